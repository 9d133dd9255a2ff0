//! Per-metric result checkpoints for the batch pipeline.
//!
//! A checkpoint holds one `f64` per snapshot and is rewritten in full after
//! every processed snapshot. Layout (little-endian):
//!
//! ```text
//! magic "HYCK" | version u32 | count u64 | count x f64
//! ```
//!
//! Unprocessed and failed snapshots hold NaN.

use std::path::{Path, PathBuf};

use crate::error::{HybridError, Result};

const MAGIC: &[u8; 4] = b"HYCK";
const VERSION: u32 = 1;
const HEADER_LEN: usize = 16;

/// Checkpoint file of one metric for one trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    path: PathBuf,
}

impl Checkpoint {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<dir>/<trace stem>_<metric>.bin`.
    pub fn for_trace(dir: &Path, trace: &Path, metric: &str) -> Self {
        let stem = trace
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "trace".into());
        let metric: String = metric
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
            .collect();
        Self::new(dir.join(format!("{}_{}.bin", stem, metric)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the checkpoint atomically.
    pub fn write(&self, values: &[f64]) -> Result<()> {
        let mut bytes = Vec::with_capacity(HEADER_LEN + 8 * values.len());
        bytes.extend_from_slice(MAGIC);
        bytes.extend_from_slice(&VERSION.to_le_bytes());
        bytes.extend_from_slice(&(values.len() as u64).to_le_bytes());
        for v in values {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension(format!("tmp{}", std::process::id()));
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    pub fn read(&self) -> Result<Vec<f64>> {
        let bytes = std::fs::read(&self.path)?;
        let context = self.path.display().to_string();
        if bytes.len() < HEADER_LEN || &bytes[..4] != MAGIC {
            return Err(HybridError::format(context, "not a checkpoint file"));
        }
        let version = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        if version != VERSION {
            return Err(HybridError::format(
                context,
                format!("unsupported checkpoint version {}", version),
            ));
        }
        let mut count = [0u8; 8];
        count.copy_from_slice(&bytes[8..16]);
        let count = u64::from_le_bytes(count) as usize;
        let body = &bytes[HEADER_LEN..];
        if body.len() != 8 * count {
            return Err(HybridError::format(
                context,
                format!("expected {} values, found {} bytes", count, body.len()),
            ));
        }
        Ok(body
            .chunks_exact(8)
            .map(|c| {
                let mut b = [0u8; 8];
                b.copy_from_slice(c);
                f64::from_le_bytes(b)
            })
            .collect())
    }

    /// Previously saved values, or `None` if no checkpoint exists yet.
    pub fn resume(&self) -> Result<Option<Vec<f64>>> {
        if !self.path.exists() {
            return Ok(None);
        }
        self.read().map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_read_keeps_nan_sentinels() {
        let dir = tempfile::tempdir().unwrap();
        let cp = Checkpoint::for_trace(dir.path(), Path::new("/data/run_07.json"), "Sinc");
        assert!(cp.path().ends_with("run_07_Sinc.bin"));
        assert_eq!(cp.resume().unwrap(), None);

        cp.write(&[1.5, f64::NAN, -2.0]).unwrap();
        let back = cp.read().unwrap();
        assert_eq!(back.len(), 3);
        assert_eq!(back[0], 1.5);
        assert!(back[1].is_nan());
        assert_eq!(back[2], -2.0);

        cp.write(&[4.0]).unwrap();
        assert_eq!(cp.resume().unwrap(), Some(vec![4.0]));
    }

    #[test]
    fn test_metric_name_sanitised() {
        let cp = Checkpoint::for_trace(Path::new("out"), Path::new("t.json"), "<S>");
        assert_eq!(cp.path(), Path::new("out/t__S_.bin"));
    }

    #[test]
    fn test_truncated_file_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let cp = Checkpoint::new(dir.path().join("x.bin"));
        cp.write(&[1.0, 2.0]).unwrap();
        let mut bytes = std::fs::read(cp.path()).unwrap();
        bytes.truncate(bytes.len() - 3);
        std::fs::write(cp.path(), bytes).unwrap();
        assert!(matches!(cp.read(), Err(HybridError::Format { .. })));
    }
}
