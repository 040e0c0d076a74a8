use std::fs;

use anyhow::{Context, Result};

use crate::api::CameraDirectory;
use crate::archive::ArchivePolicy;
use crate::camera::open_camera;
use crate::config::ScanConfig;
use crate::detect::SharedDetector;
use crate::stats::SharedStatsSink;
use crate::worker::{CameraWorker, WorkerHandle, WorkerSettings};

/// Runs one worker per enabled camera.
///
/// Workers start in key order. [`shutdown`](Supervisor::shutdown) stops
/// every worker first and then joins each of them exactly once.
pub struct Supervisor {
    handles: Vec<WorkerHandle>,
}

impl Supervisor {
    /// Open every enabled camera and start its worker.
    ///
    /// Cameras are opened before any thread starts, so a bad camera
    /// definition fails startup without leaving workers behind.
    pub fn start(
        config: &ScanConfig,
        detector: SharedDetector,
        sink: Option<SharedStatsSink>,
    ) -> Result<Self> {
        fs::create_dir_all(&config.image_dir)
            .with_context(|| format!("failed to create {}", config.image_dir.display()))?;

        let proxy = config.use_image_proxy.then_some(&config.image_proxy);
        let mut workers = Vec::new();
        for camera in config.enabled_cameras() {
            let source = open_camera(camera, proxy)?;
            log::info!("camera {}: {}", camera.key, source.describe());
            let worker = CameraWorker::new(
                source,
                detector.clone(),
                sink.clone(),
                WorkerSettings {
                    working_dir: config.image_dir.clone(),
                    interval: config.interval,
                    archive: ArchivePolicy::new(config.archive_every_for(camera)),
                },
            )?;
            workers.push(worker);
        }
        Self::spawn_all(workers)
    }

    /// Start already-built workers, in key order.
    pub fn spawn_all(mut workers: Vec<CameraWorker>) -> Result<Self> {
        workers.sort_by(|a, b| a.key().cmp(b.key()));
        if workers.is_empty() {
            log::warn!("no enabled cameras configured");
        }
        let mut supervisor = Self {
            handles: Vec::with_capacity(workers.len()),
        };
        for worker in workers {
            match worker.spawn() {
                Ok(handle) => supervisor.handles.push(handle),
                Err(err) => {
                    supervisor.shutdown();
                    return Err(err);
                }
            }
        }
        Ok(supervisor)
    }

    pub fn handles(&self) -> &[WorkerHandle] {
        &self.handles
    }

    pub fn keys(&self) -> Vec<String> {
        self.handles.iter().map(|h| h.key().to_string()).collect()
    }

    /// Read side of every worker, for the result server.
    pub fn directory(&self) -> CameraDirectory {
        CameraDirectory::new(self.handles.iter().map(WorkerHandle::reader))
    }

    /// Stop all workers, then wait for each.
    pub fn shutdown(self) {
        for handle in &self.handles {
            handle.stop();
        }
        for handle in self.handles {
            let key = handle.key().to_string();
            let steps = handle.step();
            match handle.join() {
                Ok(()) => log::info!("camera {}: joined after {} cycles", key, steps),
                Err(err) => log::error!("{:#}", err),
            }
        }
    }
}
