use anyhow::Result;
use image::RgbImage;
use sha2::{Digest, Sha256};

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{Detection, DetectionResult, ObjectClass};

/// Stub backend for testing. Places one box derived from a pixel hash, so
/// identical images always yield identical results.
pub struct StubBackend {
    calls: u64,
}

impl StubBackend {
    pub fn new() -> Self {
        Self { calls: 0 }
    }

    pub fn calls(&self) -> u64 {
        self.calls
    }
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, image: &RgbImage) -> Result<DetectionResult> {
        self.calls += 1;
        let hash: [u8; 32] = Sha256::digest(image.as_raw()).into();
        let unit = |b: u8| b as f32 / 255.0;

        let w = 0.2 + unit(hash[2]) * 0.3;
        let h = 0.2 + unit(hash[3]) * 0.3;
        let detection = Detection {
            x: unit(hash[0]) * (1.0 - w),
            y: unit(hash[1]) * (1.0 - h),
            w,
            h,
            confidence: 0.5 + unit(hash[4]) * 0.5,
            class: ObjectClass::from_index((hash[5] % 4) as i64),
        };
        Ok(DetectionResult {
            detections: vec![detection.clamped()],
        })
    }
}
