//! Per-camera polling worker.
//!
//! One [`CameraWorker`] owns one camera and runs snapshot, detect, publish
//! and archive on its own thread. Failures stay inside the cycle that
//! produced them: they are logged, the step counter still advances and the
//! next cycle runs on schedule.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use thiserror::Error;

use crate::archive::{archive_copy, ArchivePolicy, DETECTED_SUFFIX, ORIG_SUFFIX};
use crate::camera::{Camera, CameraError, CameraFailure};
use crate::detect::{png_bytes, write_image, SharedDetector};
use crate::schedule::{run_every, StopSignal};
use crate::stats::{PerformanceStats, SharedStatsSink, DEFAULT_ROOT_KEY};

/// Why part of a cycle failed.
#[derive(Debug, Error)]
pub enum CycleError {
    #[error(transparent)]
    Camera(#[from] CameraError),
    #[error("detector: {0:#}")]
    Detector(anyhow::Error),
    #[error("archive {}: {source}", path.display())]
    Archive {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("stats sink: {0:#}")]
    Sink(anyhow::Error),
    #[error("{0:#}")]
    Other(anyhow::Error),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReadImageError {
    #[error("unknown camera '{0}'")]
    UnknownCamera(String),
    #[error("no detection available yet for camera '{0}'")]
    NotAvailable(String),
}

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Directory for `<key>.jpg`, `<key>-detect.png` and archive copies.
    pub working_dir: PathBuf,
    /// Time between cycle starts.
    pub interval: Duration,
    pub archive: ArchivePolicy,
}

/// What one call to [`CameraWorker::run_cycle`] did.
#[derive(Debug)]
pub struct CycleReport {
    /// Step the cycle ran as (before the increment).
    pub step: u64,
    /// A new annotated image was published.
    pub published: bool,
    pub errors: Vec<CycleError>,
}

/// State shared between a worker and its readers.
struct Published {
    latest: Mutex<Option<Arc<[u8]>>>,
    step: AtomicU64,
}

impl Published {
    fn new() -> Self {
        Self {
            latest: Mutex::new(None),
            step: AtomicU64::new(0),
        }
    }

    fn publish(&self, png: Arc<[u8]>) {
        let mut latest = self.latest.lock().unwrap_or_else(|p| p.into_inner());
        *latest = Some(png);
    }

    fn latest(&self) -> Option<Arc<[u8]>> {
        self.latest
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }
}

/// Read side of a worker, handed to the result server.
#[derive(Clone)]
pub struct ImageReader {
    key: String,
    published: Arc<Published>,
}

impl ImageReader {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Latest annotated PNG. Readers share the published buffer; a publish
    /// swaps in a new buffer and never touches one already handed out.
    pub fn read_latest(&self) -> Result<Arc<[u8]>, ReadImageError> {
        self.published
            .latest()
            .ok_or_else(|| ReadImageError::NotAvailable(self.key.clone()))
    }

    /// Cycles completed so far.
    pub fn step(&self) -> u64 {
        self.published.step.load(Ordering::Acquire)
    }
}

pub struct CameraWorker {
    key: String,
    camera: Box<dyn Camera>,
    detector: SharedDetector,
    sink: Option<SharedStatsSink>,
    settings: WorkerSettings,
    snapshot_path: PathBuf,
    detect_path: PathBuf,
    published: Arc<Published>,
    stop: StopSignal,
}

impl CameraWorker {
    pub fn new(
        camera: Box<dyn Camera>,
        detector: SharedDetector,
        sink: Option<SharedStatsSink>,
        settings: WorkerSettings,
    ) -> Result<Self> {
        let key = camera.key().to_string();
        fs::create_dir_all(&settings.working_dir).with_context(|| {
            format!(
                "failed to create working dir {}",
                settings.working_dir.display()
            )
        })?;
        let snapshot_path = settings.working_dir.join(format!("{}.jpg", key));
        let detect_path = settings.working_dir.join(format!("{}-detect.png", key));
        Ok(Self {
            key,
            camera,
            detector,
            sink,
            settings,
            snapshot_path,
            detect_path,
            published: Arc::new(Published::new()),
            stop: StopSignal::new(),
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn step(&self) -> u64 {
        self.published.step.load(Ordering::Acquire)
    }

    pub fn snapshot_path(&self) -> &Path {
        &self.snapshot_path
    }

    pub fn detect_path(&self) -> &Path {
        &self.detect_path
    }

    pub fn reader(&self) -> ImageReader {
        ImageReader {
            key: self.key.clone(),
            published: Arc::clone(&self.published),
        }
    }

    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// Run one cycle, log whatever failed and advance the step counter.
    pub fn run_cycle(&mut self) -> CycleReport {
        let step = self.step();
        let mut stats = PerformanceStats::new(format!("{}/{}", DEFAULT_ROOT_KEY, self.key));
        let mut errors = Vec::new();

        let published = match self.capture(step, &mut stats, &mut errors) {
            Ok(()) => true,
            Err(err) => {
                errors.push(err);
                false
            }
        };

        if let Some(sink) = &self.sink {
            if let Err(err) = sink.write(&stats.scalars(), step) {
                errors.push(CycleError::Sink(err));
            }
        }

        self.published.step.store(step + 1, Ordering::Release);

        let stopping = self.stop.is_requested();
        for err in &errors {
            self.report(err, stopping);
        }
        CycleReport {
            step,
            published,
            errors,
        }
    }

    /// Snapshot, detect and publish. Archive and disk-write failures are
    /// collected in `errors` without aborting the cycle.
    fn capture(
        &mut self,
        step: u64,
        stats: &mut PerformanceStats,
        errors: &mut Vec<CycleError>,
    ) -> Result<(), CycleError> {
        let timing = stats.start("camera", "snapshot");
        let snapshot = self.camera.snapshot(&self.snapshot_path);
        timing.stop();
        snapshot?;

        let archive = self.settings.archive.should_archive(step);
        if archive {
            let timing = stats.start("archive", "orig");
            let copied = self.archive(&self.snapshot_path, step, ORIG_SUFFIX);
            timing.stop();
            if let Err(err) = copied {
                errors.push(err);
            }
        }

        let jpeg = fs::read(&self.snapshot_path).map_err(|e| {
            CameraError::new(&self.key, self.camera.describe(), CameraFailure::Io(e))
        })?;

        let detected = self
            .detector
            .detect_timed(&jpeg, stats, "detect")
            .map_err(CycleError::Detector)?;

        let timing = stats.start("detect", "encode");
        let png = png_bytes(&detected.image);
        timing.stop();
        let png = png.map_err(CycleError::Detector)?;

        self.published.publish(Arc::from(png.as_slice()));
        log::debug!(
            "{}: step {} published, {} detections",
            self.key,
            step,
            detected.result.num_detections()
        );

        match write_image(&png, &self.detect_path) {
            Ok(()) if archive => {
                let timing = stats.start("archive", "detected");
                let copied = self.archive(&self.detect_path, step, DETECTED_SUFFIX);
                timing.stop();
                if let Err(err) = copied {
                    errors.push(err);
                }
            }
            Ok(()) => {}
            Err(err) => errors.push(CycleError::Other(err)),
        }
        Ok(())
    }

    fn archive(&self, src: &Path, step: u64, suffix: &str) -> Result<(), CycleError> {
        archive_copy(src, &self.key, step, suffix)
            .map(|path| log::debug!("{}: archived {}", self.key, path.display()))
            .map_err(|source| CycleError::Archive {
                path: src.to_path_buf(),
                source,
            })
    }

    fn report(&self, err: &CycleError, stopping: bool) {
        if stopping {
            log::debug!("{}: ignored during shutdown: {}", self.key, err);
            return;
        }
        match err {
            CycleError::Camera(camera) if camera.is_protocol_failure() => {
                log::error!("{}: camera error: {}", self.key, camera.message())
            }
            CycleError::Camera(camera) => {
                log::error!("{}: unexpected camera failure: {}", self.key, camera)
            }
            other => log::error!("{}: {}", self.key, other),
        }
        log::debug!("{}: {:?}", self.key, err);
    }

    /// Run cycles every `interval` until stopped.
    pub fn run(mut self) {
        let stop = self.stop.clone();
        let interval = self.settings.interval;
        log::info!(
            "{}: worker started ({}, every {:?})",
            self.key,
            self.camera.describe(),
            interval
        );
        run_every(interval, &stop, || {
            self.run_cycle();
        });
        log::info!("{}: worker stopped after {} cycles", self.key, self.step());
    }

    /// Move the worker onto its own thread.
    pub fn spawn(self) -> Result<WorkerHandle> {
        let key = self.key.clone();
        let stop = self.stop.clone();
        let reader = self.reader();
        let thread = thread::Builder::new()
            .name(format!("camera-{}", key))
            .spawn(move || self.run())
            .with_context(|| format!("failed to spawn worker thread for {}", key))?;
        Ok(WorkerHandle {
            key,
            stop,
            reader,
            thread,
        })
    }
}

/// Owner's handle on a running worker.
pub struct WorkerHandle {
    key: String,
    stop: StopSignal,
    reader: ImageReader,
    thread: JoinHandle<()>,
}

impl WorkerHandle {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn step(&self) -> u64 {
        self.reader.step()
    }

    pub fn reader(&self) -> ImageReader {
        self.reader.clone()
    }

    /// Ask the worker to stop after its current cycle.
    pub fn stop(&self) {
        self.stop.request();
    }

    /// Wait for the worker thread to exit.
    pub fn join(self) -> Result<()> {
        self.thread
            .join()
            .map_err(|_| anyhow!("worker {} panicked", self.key))
    }
}
