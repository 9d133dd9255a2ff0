//! Measured / full-wave derived patterns backed by a triangulated interpolator.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;

use num_complex::Complex64;

use crate::cache::{CacheError, CacheKey, InterpolatorCache};
use crate::interpolation::TriangulatedInterpolator;
use crate::parsers::{parse_far_field, parse_table, PatternTable};
use crate::provider::{wrap_angles, PatternComponent, PatternError, PatternKind, RadiationPattern};

/// Sampled antenna pattern.
///
/// The interpolator for each component is built on first lookup (or loaded
/// from the on-disk cache when one is attached) and then kept for the life
/// of the pattern.
#[derive(Debug)]
pub struct TabulatedPattern {
    name: String,
    table: PatternTable,
    size_m: Option<f64>,
    cache: Option<InterpolatorCache>,
    interpolators: [OnceLock<TriangulatedInterpolator>; 2],
    calibration_reported: AtomicBool,
}

impl TabulatedPattern {
    /// Wrap an already parsed table.
    ///
    /// # Arguments
    /// * `name` - Antenna type name (also the cache key prefix).
    /// * `table` - Samples in radians with linear complex components.
    /// * `size_m` - Largest antenna dimension in metres, if known.
    pub fn new(name: impl Into<String>, table: PatternTable, size_m: Option<f64>) -> Self {
        Self {
            name: name.into(),
            table,
            size_m,
            cache: None,
            interpolators: [OnceLock::new(), OnceLock::new()],
            calibration_reported: AtomicBool::new(false),
        }
    }

    /// Read an 8-column text table.
    pub fn from_table_file(
        name: impl Into<String>,
        path: &Path,
        size_m: Option<f64>,
    ) -> Result<Self, PatternError> {
        let content = std::fs::read_to_string(path)?;
        Ok(Self::new(name, parse_table(&content)?, size_m))
    }

    /// Read one group of a JSON far-field record.
    pub fn from_far_field_file(
        name: impl Into<String>,
        path: &Path,
        group: &str,
        size_m: Option<f64>,
    ) -> Result<Self, PatternError> {
        let content = std::fs::read_to_string(path)?;
        Ok(Self::new(name, parse_far_field(&content, group)?, size_m))
    }

    /// Attach a persistent interpolator cache.
    pub fn with_cache(mut self, cache: InterpolatorCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn table(&self) -> &PatternTable {
        &self.table
    }

    fn interpolator(
        &self,
        component: PatternComponent,
    ) -> Result<&TriangulatedInterpolator, PatternError> {
        let slot = &self.interpolators[component.index()];
        if let Some(interp) = slot.get() {
            return Ok(interp);
        }
        let built = self.load_or_build(component)?;
        // A racing thread may have filled the slot first; both values are identical.
        let _ = slot.set(built);
        slot.get()
            .ok_or_else(|| PatternError::DataError("interpolator slot left empty".into()))
    }

    fn load_or_build(
        &self,
        component: PatternComponent,
    ) -> Result<TriangulatedInterpolator, PatternError> {
        let values = self.table.component(component);
        let Some(cache) = &self.cache else {
            return TriangulatedInterpolator::from_samples(
                &self.table.theta,
                &self.table.phi,
                values,
            );
        };

        let key = CacheKey::new(&self.name, component, &self.table.theta, &self.table.phi, values);
        match cache.load(&key) {
            Ok(interp) => {
                log::debug!("Interpolator cache hit: {}", key.label());
                return Ok(interp);
            }
            Err(CacheError::Miss(_)) => log::debug!("Interpolator cache miss: {}", key.label()),
            Err(e) => log::warn!("Ignoring unreadable cache entry: {}", e),
        }

        let interp =
            TriangulatedInterpolator::from_samples(&self.table.theta, &self.table.phi, values)?;
        if let Err(e) = cache.store(&key, &interp) {
            log::warn!("Could not persist interpolator {}: {}", key.label(), e);
        }
        Ok(interp)
    }
}

impl RadiationPattern for TabulatedPattern {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> PatternKind {
        PatternKind::Measured
    }

    fn gain(
        &self,
        theta: f64,
        phi: f64,
        component: PatternComponent,
    ) -> Result<Complex64, PatternError> {
        let (theta, phi) = wrap_angles(theta, phi);
        Ok(self.interpolator(component)?.evaluate(theta, phi))
    }

    fn size(&self, _wavelength: f64) -> Option<f64> {
        self.size_m
    }

    fn uncalibrated_notice(&self) -> bool {
        !self.calibration_reported.swap(true, Ordering::Relaxed)
    }
}
