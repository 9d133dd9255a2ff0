//! Explicit antenna-type registry.
//!
//! The registry maps an antenna type name to one immutable pattern instance.
//! Source elements hold an `Arc` to the entry they were created from, so
//! every element of the same type shares one pattern and its interpolators.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use crate::cache::InterpolatorCache;
use crate::closed_form::ClosedFormPattern;
use crate::provider::{PatternError, RadiationPattern};
use crate::tabulated::TabulatedPattern;

/// Names of the closed-form patterns every registry starts with.
pub const BUILTIN_PATTERNS: [&str; 3] = ["dipole", "isotropic", "plane_wave"];

#[derive(Debug, Clone, Default)]
pub struct PatternRegistry {
    patterns: BTreeMap<String, Arc<dyn RadiationPattern>>,
    cache: Option<InterpolatorCache>,
}

impl PatternRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with the closed-form patterns.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(ClosedFormPattern::half_wave_dipole()));
        registry.register(Arc::new(ClosedFormPattern::isotropic()));
        registry.register(Arc::new(ClosedFormPattern::plane_wave()));
        registry
    }

    /// Attach an interpolator cache used by subsequently loaded tables.
    pub fn with_cache(mut self, cache: InterpolatorCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Insert a pattern under its own name, replacing any previous entry.
    pub fn register(&mut self, pattern: Arc<dyn RadiationPattern>) -> Arc<dyn RadiationPattern> {
        let name = pattern.name().to_string();
        if self.patterns.insert(name.clone(), pattern.clone()).is_some() {
            log::warn!("Replacing registered pattern '{}'", name);
        }
        pattern
    }

    /// Load and register an 8-column text table.
    pub fn load_table(
        &mut self,
        name: &str,
        path: &Path,
        size_m: Option<f64>,
    ) -> Result<Arc<dyn RadiationPattern>, PatternError> {
        let pattern = self.attach_cache(TabulatedPattern::from_table_file(name, path, size_m)?);
        log::info!("Loaded pattern '{}' from {}", name, path.display());
        Ok(self.register(Arc::new(pattern)))
    }

    /// Load and register one group of a far-field record.
    pub fn load_far_field(
        &mut self,
        name: &str,
        path: &Path,
        group: &str,
        size_m: Option<f64>,
    ) -> Result<Arc<dyn RadiationPattern>, PatternError> {
        let pattern = self.attach_cache(TabulatedPattern::from_far_field_file(
            name, path, group, size_m,
        )?);
        log::info!("Loaded pattern '{}' ({}) from {}", name, group, path.display());
        Ok(self.register(Arc::new(pattern)))
    }

    fn attach_cache(&self, pattern: TabulatedPattern) -> TabulatedPattern {
        match &self.cache {
            Some(cache) => pattern.with_cache(cache.clone()),
            None => pattern,
        }
    }

    /// Shared handle to a registered pattern.
    pub fn get(&self, name: &str) -> Result<Arc<dyn RadiationPattern>, PatternError> {
        self.patterns
            .get(name)
            .cloned()
            .ok_or_else(|| PatternError::NotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.patterns.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.patterns.keys().map(String::as_str).collect()
    }
}
