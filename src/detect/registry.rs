use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use image::RgbImage;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::DetectionBatch;

/// Thread-safe registry of detector backends.
///
/// Backends are wrapped in `Mutex` because `DetectorBackend::detect` takes
/// `&mut self`; concurrent requests serialize on the backend they use.
pub struct BackendRegistry {
    backends: HashMap<String, Arc<Mutex<dyn DetectorBackend>>>,
    default_name: Option<String>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self {
            backends: HashMap::new(),
            default_name: None,
        }
    }

    /// Register a backend. The first registered backend becomes the default.
    pub fn register<B: DetectorBackend + 'static>(&mut self, backend: B) {
        let name = backend.name().to_string();
        if self.default_name.is_none() {
            self.default_name = Some(name.clone());
        }
        self.backends.insert(name, Arc::new(Mutex::new(backend)));
    }

    /// Set the default backend by name.
    pub fn set_default(&mut self, name: &str) -> Result<()> {
        if !self.backends.contains_key(name) {
            return Err(anyhow!("backend '{}' not registered", name));
        }
        self.default_name = Some(name.to_string());
        Ok(())
    }

    /// Get a backend by name.
    pub fn get(&self, name: &str) -> Option<Arc<Mutex<dyn DetectorBackend>>> {
        self.backends.get(name).cloned()
    }

    /// Get the default backend.
    pub fn default_backend(&self) -> Option<Arc<Mutex<dyn DetectorBackend>>> {
        self.default_name.as_ref().and_then(|name| self.get(name))
    }

    /// List registered backend names.
    pub fn list(&self) -> Vec<String> {
        self.backends.keys().cloned().collect()
    }

    /// Run detection on the default backend.
    pub fn detect(
        &self,
        image: &RgbImage,
        class_name: &str,
        confidence_threshold: f32,
    ) -> Result<DetectionBatch> {
        let backend = self
            .default_backend()
            .ok_or_else(|| anyhow!("no detector backend registered"))?;
        let mut guard = backend
            .lock()
            .map_err(|_| anyhow!("backend lock poisoned"))?;
        guard.detect(image, class_name, confidence_threshold)
    }

    /// Warm up every registered backend.
    pub fn warm_up(&self) -> Result<()> {
        for backend in self.backends.values() {
            let mut guard = backend
                .lock()
                .map_err(|_| anyhow!("backend lock poisoned"))?;
            guard.warm_up()?;
        }
        Ok(())
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}
