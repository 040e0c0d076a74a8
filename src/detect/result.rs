use serde::Serialize;

/// Result of running detection on one image.
#[derive(Clone, Debug, Default, Serialize)]
pub struct DetectionResult {
    /// Boxes in normalized 0..1 coordinates, highest confidence first.
    pub detections: Vec<Detection>,
}

impl DetectionResult {
    pub fn num_detections(&self) -> usize {
        self.detections.len()
    }

    /// Highest confidence of any detection, or 0.
    pub fn top_confidence(&self) -> f32 {
        self.detections
            .iter()
            .map(|d| d.confidence)
            .fold(0.0, f32::max)
    }

    pub(crate) fn sort_by_confidence(&mut self) {
        self.detections
            .sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Detection {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
    pub confidence: f32,
    pub class: ObjectClass,
}

impl Detection {
    /// Clamp the box into the unit square.
    pub fn clamped(mut self) -> Self {
        self.x = self.x.clamp(0.0, 1.0);
        self.y = self.y.clamp(0.0, 1.0);
        self.w = self.w.clamp(0.0, 1.0 - self.x);
        self.h = self.h.clamp(0.0, 1.0 - self.y);
        self
    }
}

#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectClass {
    Person,
    Vehicle,
    Animal,
    Package,
    Motion,
    Unknown,
}

impl ObjectClass {
    /// Map a zero-based model class id to a class.
    pub fn from_index(index: i64) -> Self {
        match index {
            0 => ObjectClass::Person,
            1 => ObjectClass::Vehicle,
            2 => ObjectClass::Animal,
            3 => ObjectClass::Package,
            _ => ObjectClass::Unknown,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ObjectClass::Person => "person",
            ObjectClass::Vehicle => "vehicle",
            ObjectClass::Animal => "animal",
            ObjectClass::Package => "package",
            ObjectClass::Motion => "motion",
            ObjectClass::Unknown => "unknown",
        }
    }
}
