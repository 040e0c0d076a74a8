//! Camera sources.
//!
//! A camera produces one JPEG snapshot on demand, written to a path chosen
//! by the caller. The source is picked from the camera URL:
//! - `rtsp://` IP cameras, one frame grabbed with ffmpeg
//! - `http(s)://` cameras exposing a still-image endpoint
//! - `stub://` synthetic scenes (testing, demos)
//! - image proxy mode, where snapshots are pulled with rsync from a host
//!   that the `pump` binary keeps current
//!
//! Every source bounds its own snapshot time. Failures are reported as
//! [`CameraError`] carrying the camera key and a redacted source description.

mod ffmpeg;
mod http;
mod proxy;
mod stub;

pub use ffmpeg::FfmpegCamera;
pub use http::HttpCamera;
pub use proxy::ProxyCamera;
pub use stub::StubCamera;

use anyhow::{anyhow, Result};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::config::{CameraSettings, ImageProxySettings};
use crate::process::CommandFailure;

/// A source of JPEG snapshots. One camera is owned by exactly one worker.
pub trait Camera: Send {
    fn key(&self) -> &str;

    /// Human-readable source with credentials removed.
    fn describe(&self) -> String;

    /// Capture one JPEG into `dest`, replacing any existing file.
    fn snapshot(&mut self, dest: &Path) -> Result<(), CameraError>;
}

#[derive(Debug, Error)]
#[error("camera {key} ({source_desc}): {cause}")]
pub struct CameraError {
    pub key: String,
    pub source_desc: String,
    #[source]
    pub cause: CameraFailure,
}

impl CameraError {
    pub fn new(key: &str, source_desc: impl Into<String>, cause: CameraFailure) -> Self {
        Self {
            key: key.to_string(),
            source_desc: source_desc.into(),
            cause,
        }
    }

    /// True for failures the camera protocol itself reported, as opposed to
    /// local I/O trouble.
    pub fn is_protocol_failure(&self) -> bool {
        !matches!(self.cause, CameraFailure::Io(_))
    }

    /// The most specific message available, for one-line logs.
    pub fn message(&self) -> String {
        match &self.cause {
            CameraFailure::Protocol { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum CameraFailure {
    #[error("{program} failed ({}): {message}", status_label(.status))]
    Protocol {
        program: String,
        status: Option<i32>,
        message: String,
    },
    #[error("snapshot timed out after {0:?}")]
    Timeout(Duration),
    #[error("http: {0}")]
    Http(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

fn status_label(status: &Option<i32>) -> String {
    match status {
        Some(code) => format!("status {}", code),
        None => "no status".to_string(),
    }
}

impl From<CommandFailure> for CameraFailure {
    fn from(failure: CommandFailure) -> Self {
        match failure {
            CommandFailure::Exit {
                program,
                status,
                message,
            } => CameraFailure::Protocol {
                program,
                status,
                message,
            },
            CommandFailure::Timeout { timeout, .. } => CameraFailure::Timeout(timeout),
            CommandFailure::Spawn { source, .. } => CameraFailure::Io(source),
        }
    }
}

/// Open the camera described by `settings`.
///
/// With `proxy` set, snapshots come from the image proxy regardless of the
/// camera URL.
pub fn open_camera(
    settings: &CameraSettings,
    proxy: Option<&ImageProxySettings>,
) -> Result<Box<dyn Camera>> {
    if let Some(proxy) = proxy {
        return Ok(Box::new(ProxyCamera::new(
            &settings.key,
            proxy,
            settings.timeout,
        )));
    }
    let url = Url::parse(&settings.url)
        .map_err(|e| anyhow!("camera {}: invalid url: {}", settings.key, e))?;
    let camera: Box<dyn Camera> = match url.scheme() {
        "rtsp" | "rtsps" => Box::new(FfmpegCamera::new(&settings.key, url, settings.timeout)),
        "http" | "https" => Box::new(HttpCamera::new(&settings.key, url, settings.timeout)),
        "stub" => Box::new(StubCamera::from_url(&settings.key, &url)?),
        other => {
            return Err(anyhow!(
                "camera {}: unsupported url scheme '{}'",
                settings.key,
                other
            ))
        }
    };
    Ok(camera)
}

/// Render `url` without password for logs.
pub fn redact_url(url: &Url) -> String {
    let mut redacted = url.clone();
    if redacted.password().is_some() {
        let _ = redacted.set_password(Some("***"));
    }
    redacted.to_string()
}
