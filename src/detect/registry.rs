use std::collections::BTreeMap;

use anyhow::{anyhow, Result};

use crate::config::DetectorSettings;

use super::backend::DetectorBackend;
use super::backends::{MotionBackend, StubBackend};
use super::shared::SharedDetector;

type Constructor = fn(&DetectorSettings) -> Result<Box<dyn DetectorBackend>>;

/// Registry of detector backends by name.
///
/// Each entry builds a fresh backend from [`DetectorSettings`]; the result
/// is wrapped in a [`SharedDetector`] so every worker uses the same instance.
pub struct BackendRegistry {
    constructors: BTreeMap<&'static str, Constructor>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self {
            constructors: BTreeMap::new(),
        }
    }

    /// Registry with every backend compiled into this build.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register("stub", build_stub);
        registry.register("motion", build_motion);
        #[cfg(feature = "backend-tract")]
        registry.register("tract", build_tract);
        registry
    }

    /// Register a constructor. A later registration replaces an earlier one.
    pub fn register(&mut self, name: &'static str, constructor: Constructor) {
        self.constructors.insert(name, constructor);
    }

    /// List registered backends.
    pub fn list(&self) -> Vec<&'static str> {
        self.constructors.keys().copied().collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }

    /// Build the backend named in `settings`.
    pub fn build(&self, settings: &DetectorSettings) -> Result<SharedDetector> {
        let constructor = self.constructors.get(settings.backend.as_str()).ok_or_else(|| {
            anyhow!(
                "detector backend '{}' not available (have: {})",
                settings.backend,
                self.list().join(", ")
            )
        })?;
        let backend = constructor(settings)?;
        Ok(SharedDetector::from_boxed(backend).with_line_size(settings.box_line_size))
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}

fn build_stub(_settings: &DetectorSettings) -> Result<Box<dyn DetectorBackend>> {
    Ok(Box::new(StubBackend::new()))
}

fn build_motion(_settings: &DetectorSettings) -> Result<Box<dyn DetectorBackend>> {
    Ok(Box::new(MotionBackend::new()))
}

#[cfg(feature = "backend-tract")]
fn build_tract(settings: &DetectorSettings) -> Result<Box<dyn DetectorBackend>> {
    use super::backends::TractBackend;

    let model_path = settings
        .model_path
        .as_ref()
        .ok_or_else(|| anyhow!("tract backend requires detector.model-path"))?;
    let backend = TractBackend::new(model_path, settings.input_width, settings.input_height)?
        .with_threshold(settings.threshold);
    Ok(Box::new(backend))
}
