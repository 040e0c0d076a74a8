use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use super::Scalar;

pub const SCALARS_FILE_NAME: &str = "scalars.jsonl";

/// Append-only metrics log keyed by step.
///
/// Write-only from the scanner's point of view. Records become visible to
/// external readers after `flush`.
pub trait StatsSink: Send {
    fn append_scalars(&mut self, scalars: &[Scalar], step: u64) -> Result<()>;

    fn flush(&mut self) -> Result<()>;
}

/// One line of the JSONL metrics log.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScalarRecord {
    pub step: u64,
    pub wall_time: f64,
    pub tag: String,
    pub value: f64,
}

/// Metrics log writing one JSON object per scalar to `<dir>/scalars.jsonl`.
pub struct JsonlStatsLog {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl JsonlStatsLog {
    pub fn open(log_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(log_dir)
            .with_context(|| format!("failed to create log dir {}", log_dir.display()))?;
        let path = log_dir.join(SCALARS_FILE_NAME);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("failed to open stats log {}", path.display()))?;
        Ok(Self {
            path,
            writer: BufWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StatsSink for JsonlStatsLog {
    fn append_scalars(&mut self, scalars: &[Scalar], step: u64) -> Result<()> {
        let wall_time = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs_f64();
        for (tag, value) in scalars {
            let record = ScalarRecord {
                step,
                wall_time,
                tag: tag.clone(),
                value: *value,
            };
            serde_json::to_writer(&mut self.writer, &record)?;
            self.writer.write_all(b"\n")?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer
            .flush()
            .with_context(|| format!("failed to flush stats log {}", self.path.display()))
    }
}

/// In-memory sink. Flushed records are visible through `records`.
#[derive(Debug, Default)]
pub struct MemoryStatsSink {
    pending: Vec<ScalarRecord>,
    flushed: Vec<ScalarRecord>,
}

impl MemoryStatsSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> &[ScalarRecord] {
        &self.flushed
    }
}

impl StatsSink for MemoryStatsSink {
    fn append_scalars(&mut self, scalars: &[Scalar], step: u64) -> Result<()> {
        self.pending
            .extend(scalars.iter().map(|(tag, value)| ScalarRecord {
                step,
                wall_time: 0.0,
                tag: tag.clone(),
                value: *value,
            }));
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.flushed.append(&mut self.pending);
        Ok(())
    }
}

/// A sink shared by every worker. Appends from different workers never
/// interleave within one batch.
#[derive(Clone)]
pub struct SharedStatsSink {
    inner: Arc<Mutex<dyn StatsSink>>,
}

impl SharedStatsSink {
    pub fn new<S: StatsSink + 'static>(sink: S) -> Self {
        Self {
            inner: Arc::new(Mutex::new(sink)),
        }
    }

    /// Append one batch of scalars for `step` and flush it.
    pub fn write(&self, scalars: &[Scalar], step: u64) -> Result<()> {
        if scalars.is_empty() {
            return Ok(());
        }
        let mut sink = self
            .inner
            .lock()
            .map_err(|_| anyhow!("stats sink lock poisoned"))?;
        sink.append_scalars(scalars, step)?;
        sink.flush()
    }
}

impl<S: StatsSink + 'static> From<Arc<Mutex<S>>> for SharedStatsSink {
    fn from(inner: Arc<Mutex<S>>) -> Self {
        Self { inner }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn batch() -> Vec<Scalar> {
        vec![
            ("performance/front/camera/snapshot".to_string(), 0.25),
            ("performance/front/camera/all".to_string(), 0.25),
        ]
    }

    #[test]
    fn jsonl_log_appends_one_line_per_scalar() -> Result<()> {
        let dir = tempdir()?;
        let mut log = JsonlStatsLog::open(&dir.path().join("logs"))?;
        log.append_scalars(&batch(), 7)?;
        log.flush()?;

        let raw = std::fs::read_to_string(log.path())?;
        let records: Vec<ScalarRecord> = raw
            .lines()
            .map(|line| serde_json::from_str::<ScalarRecord>(line))
            .collect::<std::result::Result<_, _>>()?;
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.step == 7));
        assert_eq!(records[0].tag, "performance/front/camera/snapshot");
        assert_eq!(records[0].value, 0.25);
        Ok(())
    }

    #[test]
    fn jsonl_log_reopens_in_append_mode() -> Result<()> {
        let dir = tempdir()?;
        for step in 0..2 {
            let mut log = JsonlStatsLog::open(dir.path())?;
            log.append_scalars(&batch(), step)?;
            log.flush()?;
        }
        let raw = std::fs::read_to_string(dir.path().join(SCALARS_FILE_NAME))?;
        assert_eq!(raw.lines().count(), 4);
        Ok(())
    }

    #[test]
    fn memory_sink_only_exposes_flushed_records() -> Result<()> {
        let mut sink = MemoryStatsSink::new();
        sink.append_scalars(&batch(), 1)?;
        assert!(sink.records().is_empty());
        sink.flush()?;
        assert_eq!(sink.records().len(), 2);
        Ok(())
    }

    #[test]
    fn shared_sink_writes_and_flushes() -> Result<()> {
        let memory = Arc::new(Mutex::new(MemoryStatsSink::new()));
        let shared = SharedStatsSink::from(memory.clone());
        shared.write(&batch(), 3)?;
        shared.write(&[], 4)?;

        let guard = memory.lock().unwrap();
        assert_eq!(guard.records().len(), 2);
        assert_eq!(guard.records()[1].step, 3);
        Ok(())
    }
}
