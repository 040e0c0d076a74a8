mod annotate;
mod backend;
mod backends;
mod registry;
mod result;
mod shared;

pub use annotate::draw_detections;
pub use backend::DetectorBackend;
pub use backends::{MotionBackend, StubBackend};
pub use registry::BackendRegistry;
pub use result::{Detection, DetectionResult, ObjectClass};
pub use shared::{png_bytes, write_image, Detected, SharedDetector, DEFAULT_BOX_LINE_SIZE};

#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
