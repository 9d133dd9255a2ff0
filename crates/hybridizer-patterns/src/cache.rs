//! Content-addressed on-disk cache of built interpolators.
//!
//! Building a [`TriangulatedInterpolator`] for a large measured table is the
//! expensive step of a pattern lookup, so each built interpolator is written
//! once per key and read back by later runs. The key combines the antenna
//! type, the pattern component, [`CACHE_FORMAT_VERSION`] and a 64-bit FNV-1a
//! digest of the sample content, so file names are stable across Rust
//! releases and platforms. Each blob embeds its key string, which is checked
//! on read.
//!
//! Writes go to a temporary file that is renamed over the final path, so a
//! concurrent first-time population by several processes produces identical
//! files rather than torn ones.

use std::path::{Path, PathBuf};

use num_complex::Complex64;
use thiserror::Error;

use crate::interpolation::TriangulatedInterpolator;
use crate::provider::PatternComponent;

/// Bumped whenever the blob layout changes.
pub const CACHE_FORMAT_VERSION: u32 = 2;

/// Cache lookup/store failures. A [`CacheError::Miss`] is the expected
/// outcome on first use and is recovered by building the interpolator.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("No cached interpolator for {0}")]
    Miss(String),

    #[error("Cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt cache entry {key}: {message}")]
    Corrupt { key: String, message: String },
}

/// 64-bit FNV-1a over explicitly little-endian encoded fields.
#[derive(Debug, Clone, Copy)]
struct Fnv1a(u64);

impl Fnv1a {
    const OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;

    fn new() -> Self {
        Self(Self::OFFSET_BASIS)
    }

    fn bytes(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.0 ^= u64::from(b);
            self.0 = self.0.wrapping_mul(Self::PRIME);
        }
    }

    /// Length-prefixed so adjacent strings cannot run together.
    fn str(&mut self, s: &str) {
        self.bytes(&(s.len() as u64).to_le_bytes());
        self.bytes(s.as_bytes());
    }

    fn f64(&mut self, x: f64) {
        self.bytes(&x.to_bits().to_le_bytes());
    }
}

/// Identity of one cached interpolator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKey {
    label: String,
    digest: u64,
}

impl CacheKey {
    /// Key for `antenna`/`component` over the given sample content.
    pub fn new(
        antenna: &str,
        component: PatternComponent,
        theta: &[f64],
        phi: &[f64],
        values: &[Complex64],
    ) -> Self {
        let mut hasher = Fnv1a::new();
        hasher.bytes(&CACHE_FORMAT_VERSION.to_le_bytes());
        hasher.str(antenna);
        hasher.str(component.label());
        hasher.bytes(&(theta.len() as u64).to_le_bytes());
        for x in theta.iter().chain(phi) {
            hasher.f64(*x);
        }
        for v in values {
            hasher.f64(v.re);
            hasher.f64(v.im);
        }
        let digest = hasher.0;
        Self {
            label: format!(
                "{}/{}/v{}/{:016x}",
                antenna,
                component.label(),
                CACHE_FORMAT_VERSION,
                digest
            ),
            digest,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    fn file_name(&self) -> String {
        let safe: String = self
            .label
            .split('/')
            .next()
            .unwrap_or("pattern")
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        format!("{}-{:016x}.interp", safe, self.digest)
    }
}

/// Directory-backed interpolator cache.
#[derive(Debug, Clone)]
pub struct InterpolatorCache {
    dir: PathBuf,
}

impl InterpolatorCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(key.file_name())
    }

    /// Read a cached interpolator.
    pub fn load(&self, key: &CacheKey) -> Result<TriangulatedInterpolator, CacheError> {
        let path = self.path_for(key);
        let bytes = match std::fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CacheError::Miss(key.label.clone()))
            }
            Err(e) => return Err(e.into()),
        };
        let (stored_key, interp) =
            TriangulatedInterpolator::from_bytes(&bytes).map_err(|e| CacheError::Corrupt {
                key: key.label.clone(),
                message: e.to_string(),
            })?;
        if stored_key != key.label {
            return Err(CacheError::Corrupt {
                key: key.label.clone(),
                message: format!("blob holds key '{}'", stored_key),
            });
        }
        Ok(interp)
    }

    /// Persist an interpolator under `key` (atomic replace).
    pub fn store(&self, key: &CacheKey, interp: &TriangulatedInterpolator) -> Result<(), CacheError> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path_for(key);
        let tmp = path.with_extension(format!("tmp{}", std::process::id()));
        std::fs::write(&tmp, interp.to_bytes(&key.label))?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }
}
