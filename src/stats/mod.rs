//! Per-cycle performance timings and the metrics log they are written to.

mod sink;

pub use sink::{JsonlStatsLog, MemoryStatsSink, ScalarRecord, SharedStatsSink, StatsSink};

use std::collections::BTreeMap;
use std::time::Instant;

/// One named metric sample.
pub type Scalar = (String, f64);

pub const DEFAULT_ROOT_KEY: &str = "performance";

/// Elapsed-seconds samples grouped by category then key.
///
/// Timings are taken through [`PerformanceStats::start`], which hands back a
/// guard borrowing the stats mutably. Only one timing can be open at a time
/// and a stop without a start cannot be expressed.
#[derive(Debug, Clone)]
pub struct PerformanceStats {
    root_key: String,
    samples: BTreeMap<String, BTreeMap<String, f64>>,
}

impl PerformanceStats {
    pub fn new(root_key: impl Into<String>) -> Self {
        Self {
            root_key: root_key.into(),
            samples: BTreeMap::new(),
        }
    }

    pub fn root_key(&self) -> &str {
        &self.root_key
    }

    /// Start timing `(category, key)`. The sample is stored when the guard is
    /// stopped or dropped; an earlier sample for the same pair is replaced.
    pub fn start(&mut self, category: &str, key: &str) -> Timing<'_> {
        Timing {
            stats: self,
            category: category.to_string(),
            key: key.to_string(),
            started: Instant::now(),
            done: false,
        }
    }

    /// Record a sample directly.
    pub fn record(&mut self, category: &str, key: &str, seconds: f64) {
        self.samples
            .entry(category.to_string())
            .or_default()
            .insert(key.to_string(), seconds);
    }

    pub fn get(&self, category: &str, key: &str) -> Option<f64> {
        self.samples.get(category)?.get(key).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    /// Flatten into `<root>/<category>/<key>` scalars, plus one
    /// `<root>/<category>/all` mean per category.
    pub fn scalars(&self) -> Vec<Scalar> {
        let mut out = Vec::new();
        for (category, keys) in &self.samples {
            if keys.is_empty() {
                continue;
            }
            let mut total = 0.0;
            for (key, value) in keys {
                out.push((self.scalar_key(category, key), *value));
                total += value;
            }
            out.push((self.scalar_key(category, "all"), total / keys.len() as f64));
        }
        out
    }

    fn scalar_key(&self, category: &str, key: &str) -> String {
        format!("{}/{}/{}", self.root_key, category, key)
    }
}

impl Default for PerformanceStats {
    fn default() -> Self {
        Self::new(DEFAULT_ROOT_KEY)
    }
}

/// An open timing. Records into its [`PerformanceStats`] exactly once.
#[must_use = "a timing records when stopped or dropped"]
pub struct Timing<'a> {
    stats: &'a mut PerformanceStats,
    category: String,
    key: String,
    started: Instant,
    done: bool,
}

impl Timing<'_> {
    /// Stop the timing and return the elapsed seconds.
    pub fn stop(mut self) -> f64 {
        self.finish()
    }

    fn finish(&mut self) -> f64 {
        let elapsed = self.started.elapsed().as_secs_f64();
        if !self.done {
            self.done = true;
            let category = std::mem::take(&mut self.category);
            let key = std::mem::take(&mut self.key);
            self.stats
                .samples
                .entry(category)
                .or_default()
                .insert(key, elapsed);
        }
        elapsed
    }
}

impl Drop for Timing<'_> {
    fn drop(&mut self) {
        self.finish();
    }
}
