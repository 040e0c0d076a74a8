//! Image pump.
//!
//! Snapshots each camera on a timer and copies the image to the image proxy
//! host, where scanners running in image-proxy mode pick it up.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use thiserror::Error;

use crate::camera::{Camera, CameraError};
use crate::config::{ImageProxySettings, DEFAULT_PUMP_PROXY_DIR};
use crate::process::{run_with_deadline, CommandFailure};
use crate::schedule::{run_every, StopSignal};

const COPY_TIMEOUT_FACTOR: u32 = 3;

#[derive(Debug, Error)]
#[error("copying to image proxy {host}: {failure}")]
pub struct ProxyError {
    pub host: String,
    #[source]
    pub failure: CommandFailure,
}

impl ProxyError {
    pub fn message(&self) -> String {
        match &self.failure {
            CommandFailure::Exit { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

/// rsync target for pumped images.
#[derive(Debug, Clone)]
pub struct ImageProxy {
    host: String,
    image_dir: String,
    connect_timeout: Duration,
}

impl ImageProxy {
    /// `host` and `image_dir` override the configured values.
    pub fn new(
        settings: &ImageProxySettings,
        host: Option<&str>,
        image_dir: Option<&str>,
    ) -> Self {
        Self {
            host: host.unwrap_or(settings.host.as_str()).to_string(),
            image_dir: image_dir
                .unwrap_or_else(|| settings.image_dir_or(DEFAULT_PUMP_PROXY_DIR))
                .trim_end_matches('/')
                .to_string(),
            connect_timeout: settings.connect_timeout,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// `<host>:<image-dir>/<name><ext of src>`.
    pub fn destination(&self, name: &str, src: &Path) -> String {
        let ext = src
            .extension()
            .map(|ext| format!(".{}", ext.to_string_lossy()))
            .unwrap_or_default();
        format!("{}:{}/{}{}", self.host, self.image_dir, name, ext)
    }

    fn command(&self, name: &str, src: &Path) -> Command {
        let mut cmd = Command::new("rsync");
        cmd.arg("-e")
            .arg(format!(
                "ssh -o ConnectTimeout={} -o StrictHostKeyChecking=no",
                self.connect_timeout.as_secs().max(1)
            ))
            .arg(src)
            .arg(self.destination(name, src));
        cmd
    }

    /// Copy `src` to the proxy as `name`.
    pub fn copy(&self, name: &str, src: &Path) -> Result<(), ProxyError> {
        let mut cmd = self.command(name, src);
        let timeout = self.connect_timeout.saturating_mul(COPY_TIMEOUT_FACTOR);
        run_with_deadline(&mut cmd, timeout).map_err(|failure| ProxyError {
            host: self.host.clone(),
            failure,
        })
    }
}

#[derive(Debug, Error)]
pub enum PumpError {
    #[error(transparent)]
    Camera(#[from] CameraError),
    #[error(transparent)]
    Proxy(#[from] ProxyError),
    #[error("{0:#}")]
    Other(anyhow::Error),
}

/// Keeps one camera's image current on the proxy.
pub struct CameraPump {
    camera: Box<dyn Camera>,
    proxy: ImageProxy,
    interval: Duration,
    stop: StopSignal,
}

impl CameraPump {
    pub fn new(camera: Box<dyn Camera>, proxy: ImageProxy, interval: Duration) -> Self {
        Self {
            camera,
            proxy,
            interval,
            stop: StopSignal::new(),
        }
    }

    /// Snapshot into a temporary file and copy it to the proxy.
    pub fn pump_once(&mut self) -> Result<(), PumpError> {
        let tmp = tempfile::Builder::new()
            .prefix("pump-snapshot-")
            .suffix(".jpg")
            .tempfile()
            .context("failed to create snapshot file")
            .map_err(PumpError::Other)?;
        log::info!("snapshot from {}", self.camera.describe());
        self.camera.snapshot(tmp.path())?;
        self.proxy.copy(self.camera.key(), tmp.path())?;
        Ok(())
    }

    fn report(&self, err: &PumpError) {
        if self.stop.is_requested() {
            log::debug!("{}: ignored during shutdown: {}", self.camera.key(), err);
            return;
        }
        log::debug!("{}: {:?}", self.camera.key(), err);
        match err {
            PumpError::Camera(camera) => log::error!(
                "snapshotting {}: {}",
                self.camera.describe(),
                camera.message()
            ),
            PumpError::Proxy(proxy) => log::error!(
                "copying image to image proxy {}: {}",
                proxy.host,
                proxy.message()
            ),
            PumpError::Other(other) => log::error!("{}: {:#}", self.camera.key(), other),
        }
    }

    pub fn spawn(mut self) -> Result<PumpHandle> {
        let key = self.camera.key().to_string();
        let stop = self.stop.clone();
        let thread = thread::Builder::new()
            .name(format!("pump-{}", key))
            .spawn(move || {
                let stop = self.stop.clone();
                let interval = self.interval;
                run_every(interval, &stop, || {
                    if let Err(err) = self.pump_once() {
                        self.report(&err);
                    }
                });
            })
            .with_context(|| format!("failed to spawn pump thread for {}", key))?;
        Ok(PumpHandle { key, stop, thread })
    }
}

pub struct PumpHandle {
    key: String,
    stop: StopSignal,
    thread: JoinHandle<()>,
}

impl PumpHandle {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn stop(&self) {
        self.stop.request();
    }

    pub fn join(self) -> Result<()> {
        self.thread
            .join()
            .map_err(|_| anyhow!("pump {} panicked", self.key))
    }
}

/// Snapshot one camera to `<dir>/<key>.jpg`.
pub fn test_camera(camera: &mut dyn Camera, dir: &Path) -> Result<PathBuf> {
    let path = dir.join(format!("{}.jpg", camera.key()));
    camera.snapshot(&path)?;
    Ok(path)
}
