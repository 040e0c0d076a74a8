use anyhow::Result;
use image::RgbImage;

use crate::detect::result::DetectionResult;

/// Detector backend trait.
///
/// Backends are stateful and not safe for concurrent use; every call goes
/// through [`SharedDetector`](crate::detect::SharedDetector), which
/// serialises access across workers.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a decoded RGB image.
    fn detect(&mut self, image: &RgbImage) -> Result<DetectionResult>;

    /// Optional warm-up hook, called once before the first worker starts.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
