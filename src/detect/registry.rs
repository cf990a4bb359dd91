use std::collections::HashMap;

use crate::detect::backend::{Detector, ModelLoader};
use crate::detect::model::ModelRef;
use crate::error::{DetectError, Result};

/// Registry of model loaders keyed by backend name.
pub struct BackendRegistry {
    loaders: HashMap<&'static str, Box<dyn ModelLoader>>,
    default_name: Option<&'static str>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self {
            loaders: HashMap::new(),
            default_name: None,
        }
    }

    /// Registry with every backend compiled into this build.
    pub fn with_builtin(settings: &crate::config::ModelSettings) -> Self {
        let mut registry = Self::new();
        registry.register(super::backends::CpuLoader::default());
        registry.register(super::backends::StubLoader::default());
        #[cfg(feature = "backend-tract")]
        registry.register(super::backends::TractLoader::from_settings(settings));
        #[cfg(not(feature = "backend-tract"))]
        let _ = settings;
        registry
    }

    /// Register a loader. The first registered loader becomes the default.
    pub fn register<L: ModelLoader + 'static>(&mut self, loader: L) {
        let name = loader.name();
        if self.default_name.is_none() {
            self.default_name = Some(name);
        }
        self.loaders.insert(name, Box::new(loader));
    }

    /// Set default loader by name.
    pub fn set_default(&mut self, name: &str) -> Result<()> {
        let (&key, _) = self
            .loaders
            .get_key_value(name)
            .ok_or_else(|| DetectError::Config(format!("backend '{}' not registered", name)))?;
        self.default_name = Some(key);
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.loaders.contains_key(name)
    }

    pub fn default_name(&self) -> Option<&'static str> {
        self.default_name
    }

    /// List registered backends, sorted.
    pub fn list(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.loaders.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// Remove a loader so it can be handed to a detection loop.
    pub fn take(&mut self, name: &str) -> Result<Box<dyn ModelLoader>> {
        self.loaders
            .remove(name)
            .ok_or_else(|| DetectError::Config(format!("backend '{}' not registered", name)))
    }

    /// Load a model with the default backend.
    pub fn load_default(&self, model: &ModelRef) -> Result<Box<dyn Detector>> {
        let name = self
            .default_name
            .ok_or_else(|| DetectError::ModelLoad("no backends registered".to_string()))?;
        self.load(name, model)
    }

    /// Load a model with a named backend.
    pub fn load(&self, name: &str, model: &ModelRef) -> Result<Box<dyn Detector>> {
        let loader = self
            .loaders
            .get(name)
            .ok_or_else(|| DetectError::ModelLoad(format!("backend '{}' not registered", name)))?;
        loader.load(model)
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelSettings;
    use crate::detect::backends::{CpuLoader, StubLoader};

    #[test]
    fn first_registered_is_default() {
        let mut registry = BackendRegistry::new();
        registry.register(StubLoader::default());
        registry.register(CpuLoader::default());
        assert_eq!(registry.default_name(), Some("stub"));
        assert_eq!(registry.list(), vec!["cpu", "stub"]);
    }

    #[test]
    fn set_default_rejects_unknown() {
        let mut registry = BackendRegistry::with_builtin(&ModelSettings::default());
        assert!(registry.set_default("cpu").is_ok());
        assert!(matches!(
            registry.set_default("quantum"),
            Err(DetectError::Config(_))
        ));
    }

    #[test]
    fn take_hands_out_loader_once() -> Result<()> {
        let mut registry = BackendRegistry::with_builtin(&ModelSettings::default());
        let loader = registry.take("stub")?;
        assert_eq!(loader.name(), "stub");
        assert!(!registry.contains("stub"));
        assert!(registry.take("stub").is_err());
        Ok(())
    }

    #[test]
    fn load_unknown_backend_is_model_load_error() {
        let registry = BackendRegistry::new();
        let model = ModelRef::parse("stub://model").expect("stub ref");
        assert!(matches!(
            registry.load("tract", &model),
            Err(DetectError::ModelLoad(_))
        ));
        assert!(matches!(
            registry.load_default(&model),
            Err(DetectError::ModelLoad(_))
        ));
    }
}
