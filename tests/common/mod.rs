#![allow(dead_code)]

use std::io::Cursor;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use image::{ImageFormat, Rgb, RgbImage};

use camscan::camera::{Camera, CameraError, CameraFailure};
use camscan::detect::{DetectionResult, DetectorBackend};

pub fn solid_jpeg(width: u32, height: u32, shade: u8) -> Vec<u8> {
    let image = RgbImage::from_pixel(width, height, Rgb([shade, shade, shade]));
    let mut out = Cursor::new(Vec::new());
    image
        .write_to(&mut out, ImageFormat::Jpeg)
        .expect("encode jpeg");
    out.into_inner()
}

/// Camera that succeeds `successes` times (unlimited with `None`) and then
/// fails every snapshot with a protocol error.
pub struct FakeCamera {
    key: String,
    successes: Option<u64>,
    delay: Duration,
    pub calls: Arc<AtomicU64>,
}

impl FakeCamera {
    pub fn new(key: &str) -> Self {
        Self {
            key: key.to_string(),
            successes: None,
            delay: Duration::ZERO,
            calls: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn failing_after(mut self, successes: u64) -> Self {
        self.successes = Some(successes);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

impl Camera for FakeCamera {
    fn key(&self) -> &str {
        &self.key
    }

    fn describe(&self) -> String {
        format!("fake://{}", self.key)
    }

    fn snapshot(&mut self, dest: &Path) -> Result<(), CameraError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        if self.successes.is_some_and(|n| call >= n) {
            return Err(CameraError::new(
                &self.key,
                self.describe(),
                CameraFailure::Protocol {
                    program: "fake".to_string(),
                    status: Some(1),
                    message: "camera offline".to_string(),
                },
            ));
        }
        let shade = (call * 40 % 256) as u8;
        std::fs::write(dest, solid_jpeg(64, 48, shade)).map_err(|e| {
            CameraError::new(&self.key, self.describe(), CameraFailure::Io(e))
        })
    }
}

/// Backend with no detections that can be told to fail.
pub struct FakeBackend {
    fail: bool,
}

impl FakeBackend {
    pub fn ok() -> Self {
        Self { fail: false }
    }

    pub fn failing() -> Self {
        Self { fail: true }
    }
}

impl DetectorBackend for FakeBackend {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn detect(&mut self, _image: &RgbImage) -> Result<DetectionResult> {
        if self.fail {
            return Err(anyhow!("model not loaded"));
        }
        Ok(DetectionResult::default())
    }
}

/// Count `archive-<key>-*<suffix>` files in `dir`.
pub fn archived(dir: &Path, key: &str, suffix: &str) -> Vec<String> {
    let prefix = format!("archive-{}-", key);
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .expect("read dir")
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with(&prefix) && name.ends_with(suffix))
        .collect();
    names.sort();
    names
}

pub fn wait_until(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
    let deadline = std::time::Instant::now() + timeout;
    while std::time::Instant::now() < deadline {
        if done() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    done()
}
