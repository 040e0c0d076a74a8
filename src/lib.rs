//! camscan: multi-camera snapshot, detection and publishing.
//!
//! Every enabled camera gets its own worker thread that repeatedly
//! snapshots the camera, runs the shared detector, publishes the annotated
//! image for HTTP readers and optionally archives both images.
//!
//! # Module Structure
//!
//! - `camera`: snapshot sources (RTSP via ffmpeg, HTTP stills, image proxy, stub)
//! - `detect`: detector backends and the lock-guarded shared detector
//! - `worker`: the per-camera cycle and its read handle
//! - `supervisor`: starts workers in key order and joins them on shutdown
//! - `stats`: per-cycle timing and the append-only scalars log
//! - `archive`: step-numbered archive copies
//! - `api`: the HTTP result server
//! - `pump`: keeps an image proxy fed for scanners in image-proxy mode
//! - `config`: typed configuration with environment overrides

use anyhow::{anyhow, Result};
use std::sync::OnceLock;

pub mod api;
pub mod archive;
pub mod camera;
pub mod config;
pub mod detect;
pub mod process;
pub mod pump;
pub mod schedule;
pub mod stats;
pub mod supervisor;
pub mod worker;

pub use api::{CameraDirectory, ResultServer, ServerConfig, ServerHandle};
pub use archive::ArchivePolicy;
pub use camera::{open_camera, Camera, CameraError, CameraFailure};
pub use config::{CameraSettings, DetectorSettings, ImageProxySettings, ScanConfig};
pub use detect::{
    BackendRegistry, Detected, DetectionResult, DetectorBackend, MotionBackend, SharedDetector,
    StubBackend,
};
pub use schedule::{run_every, StopSignal};
pub use stats::{JsonlStatsLog, MemoryStatsSink, PerformanceStats, SharedStatsSink, StatsSink};
pub use supervisor::Supervisor;
pub use worker::{
    CameraWorker, CycleError, CycleReport, ImageReader, ReadImageError, WorkerHandle,
    WorkerSettings,
};

/// Camera keys end up in file names and URL paths, so they are limited to
/// `[A-Za-z0-9_-]{1,64}`.
pub fn validate_camera_key(key: &str) -> Result<()> {
    static CAMERA_KEY_RE: OnceLock<regex::Regex> = OnceLock::new();
    let re = CAMERA_KEY_RE
        .get_or_init(|| regex::Regex::new(r"^[A-Za-z0-9_-]{1,64}$").expect("camera key regex"));
    if !re.is_match(key) {
        return Err(anyhow!(
            "invalid camera key '{}': camera key must match ^[A-Za-z0-9_-]{{1,64}}$",
            key
        ));
    }
    Ok(())
}
