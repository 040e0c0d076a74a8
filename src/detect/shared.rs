use std::fs;
use std::io::Cursor;
use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context, Result};
use image::{ImageFormat, RgbImage};

use crate::detect::annotate::draw_detections;
use crate::detect::backend::DetectorBackend;
use crate::detect::result::DetectionResult;
use crate::stats::PerformanceStats;

pub const DEFAULT_BOX_LINE_SIZE: u32 = 4;

/// Output of one detection pass: the raw result and the annotated frame.
pub struct Detected {
    pub result: DetectionResult,
    pub image: RgbImage,
}

/// One detector shared by every camera worker.
///
/// Only inference and annotation run under the lock; decoding the snapshot
/// and encoding the annotated image happen outside it.
#[derive(Clone)]
pub struct SharedDetector {
    backend: Arc<Mutex<Box<dyn DetectorBackend>>>,
    backend_name: &'static str,
    line_size: u32,
}

impl SharedDetector {
    pub fn new<B: DetectorBackend + 'static>(backend: B) -> Self {
        Self::from_boxed(Box::new(backend))
    }

    pub fn from_boxed(backend: Box<dyn DetectorBackend>) -> Self {
        let backend_name = backend.name();
        Self {
            backend: Arc::new(Mutex::new(backend)),
            backend_name,
            line_size: DEFAULT_BOX_LINE_SIZE,
        }
    }

    pub fn with_line_size(mut self, line_size: u32) -> Self {
        self.line_size = line_size.max(1);
        self
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend_name
    }

    pub fn line_size(&self) -> u32 {
        self.line_size
    }

    pub fn warm_up(&self) -> Result<()> {
        let mut backend = self
            .backend
            .lock()
            .map_err(|_| anyhow!("detector lock poisoned"))?;
        backend.warm_up()
    }

    /// Decode `jpeg`, run the backend and draw the boxes.
    pub fn detect(&self, jpeg: &[u8]) -> Result<Detected> {
        let image = decode(jpeg)?;
        self.detect_image(image)
    }

    /// Same as [`detect`](Self::detect), recording `decode` and `inference`
    /// timings under `category`.
    pub fn detect_timed(
        &self,
        jpeg: &[u8],
        stats: &mut PerformanceStats,
        category: &str,
    ) -> Result<Detected> {
        let timing = stats.start(category, "decode");
        let image = decode(jpeg);
        timing.stop();
        let image = image?;

        let timing = stats.start(category, "inference");
        let detected = self.detect_image(image);
        timing.stop();
        detected
    }

    fn detect_image(&self, mut image: RgbImage) -> Result<Detected> {
        let mut backend = self
            .backend
            .lock()
            .map_err(|_| anyhow!("detector lock poisoned"))?;
        let result = backend
            .detect(&image)
            .with_context(|| format!("{} backend failed", self.backend_name))?;
        draw_detections(&mut image, &result.detections, self.line_size);
        drop(backend);
        Ok(Detected { result, image })
    }
}

fn decode(jpeg: &[u8]) -> Result<RgbImage> {
    if jpeg.is_empty() {
        return Err(anyhow!("snapshot is empty"));
    }
    let image = image::load_from_memory_with_format(jpeg, ImageFormat::Jpeg)
        .context("failed to decode snapshot")?;
    Ok(image.to_rgb8())
}

/// Encode `image` as PNG.
pub fn png_bytes(image: &RgbImage) -> Result<Vec<u8>> {
    let mut out = Cursor::new(Vec::new());
    image
        .write_to(&mut out, ImageFormat::Png)
        .context("failed to encode PNG")?;
    Ok(out.into_inner())
}

/// Write already-encoded image bytes, creating parent directories.
pub fn write_image(bytes: &[u8], path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
    }
    fs::write(path, bytes).with_context(|| format!("failed to write {}", path.display()))
}
