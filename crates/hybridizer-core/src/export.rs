//! Boundary-field export for the external full-wave solver.
//!
//! A [`BoundaryRecord`] holds E and H over a box around the export centre,
//! with each axis described by its first coordinate relative to the centre,
//! its point count and its step. Two encodings are provided:
//!
//! - binary (`.hbf`), little-endian:
//!   ```text
//!   magic "HYBF" | version u32 | frequency f64 | unit_power u8 |
//!   3 x (offset f64, count u64, step f64) | E block | H block
//!   ```
//!   where each block stores, per point in x-slowest/z-fastest order, the
//!   three components as (re, im) pairs;
//! - plain text, `<stem>_E.txt` and `<stem>_H.txt`, `#` header lines followed
//!   by one line of six values per point.
//!
//! Readers are the exact inverse of the writers.

use std::fmt::Write as _;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use ndarray::{s, Array4, Axis};
use num_complex::Complex64;

use hybridizer_geometry::{Grid, Position};

use crate::error::{HybridError, Result};
use crate::types::FieldBuffers;

const MAGIC: &[u8; 4] = b"HYBF";
const VERSION: u32 = 1;

/// Sampling of one axis of the export box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisRange {
    /// First coordinate relative to the export centre (m).
    pub offset: f64,
    pub count: usize,
    pub step: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BoundaryRecord {
    pub axes: [AxisRange; 3],
    pub frequency: f64,
    /// Ask the solver to normalise results to unit incident power.
    pub unit_power: bool,
    /// Shape `[nx, ny, nz, 3]`.
    pub e: Array4<Complex64>,
    pub h: Array4<Complex64>,
}

impl BoundaryRecord {
    /// Cut the box of half-size `half_size` around `centre` (snapped to the
    /// grid) out of `fields`. The box is clipped to the grid.
    pub fn from_fields(
        grid: &Grid,
        fields: &FieldBuffers,
        centre: &Position,
        half_size: f64,
        frequency: f64,
        unit_power: bool,
    ) -> Result<Self> {
        if fields.shape() != grid.shape() {
            return Err(HybridError::Dimension(format!(
                "fields {:?} do not match grid {:?}",
                fields.shape(),
                grid.shape()
            )));
        }
        let c = grid.discretize(centre);
        let shape = grid.shape();
        let step = grid.step();
        let mut lo = [0; 3];
        let mut count = [1; 3];
        let mut axes = [AxisRange {
            offset: 0.0,
            count: 1,
            step: 0.0,
        }; 3];
        for a in 0..3 {
            if shape[a] > 1 {
                let half = (half_size / step[a]).round() as usize;
                lo[a] = c[a].saturating_sub(half);
                count[a] = (c[a] + half).min(shape[a] - 1) + 1 - lo[a];
            } else {
                lo[a] = 0;
            }
            let coords = grid.axis(a);
            axes[a] = AxisRange {
                offset: coords[lo[a]] - coords[c[a]],
                count: count[a],
                step: if shape[a] > 1 { step[a] } else { 0.0 },
            };
        }
        let (e, h) = fields.block(lo, count);
        Ok(Self {
            axes,
            frequency,
            unit_power,
            e: e.to_owned(),
            h: h.to_owned(),
        })
    }

    pub fn shape(&self) -> [usize; 3] {
        [self.axes[0].count, self.axes[1].count, self.axes[2].count]
    }

    /// Move each component to its Yee-cell location by averaging neighbours.
    ///
    /// $E_i$ is averaged along axis $i$; $H_i$ along the two other axes.
    /// The last sample on an axis keeps its value.
    pub fn yee_average(&mut self) {
        for c in 0..3 {
            average_along(&mut self.e, c, c);
            for a in (0..3).filter(|&a| a != c) {
                average_along(&mut self.h, c, a);
            }
        }
    }

    pub fn write_binary(&self, path: &Path) -> Result<()> {
        let mut bytes = Vec::with_capacity(64 + 16 * (self.e.len() + self.h.len()));
        bytes.extend_from_slice(MAGIC);
        bytes.extend_from_slice(&VERSION.to_le_bytes());
        bytes.extend_from_slice(&self.frequency.to_le_bytes());
        bytes.push(u8::from(self.unit_power));
        for axis in &self.axes {
            bytes.extend_from_slice(&axis.offset.to_le_bytes());
            bytes.extend_from_slice(&(axis.count as u64).to_le_bytes());
            bytes.extend_from_slice(&axis.step.to_le_bytes());
        }
        for block in [&self.e, &self.h] {
            for v in block.iter() {
                bytes.extend_from_slice(&v.re.to_le_bytes());
                bytes.extend_from_slice(&v.im.to_le_bytes());
            }
        }
        std::fs::write(path, bytes)?;
        Ok(())
    }

    pub fn read_binary(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let mut reader = ByteReader {
            bytes: &bytes,
            pos: 0,
            context: path.display().to_string(),
        };
        if reader.take(4)? != MAGIC {
            return Err(HybridError::format(reader.context, "not a boundary field file"));
        }
        let version = reader.u32()?;
        if version != VERSION {
            return Err(HybridError::format(
                reader.context,
                format!("unsupported version {}", version),
            ));
        }
        let frequency = reader.f64()?;
        let unit_power = reader.take(1)?[0] != 0;
        let mut axes = [AxisRange {
            offset: 0.0,
            count: 0,
            step: 0.0,
        }; 3];
        for axis in axes.iter_mut() {
            axis.offset = reader.f64()?;
            axis.count = reader.u64()? as usize;
            axis.step = reader.f64()?;
        }
        let dims = (axes[0].count, axes[1].count, axes[2].count, 3);
        let n = block_len(&axes)
            .ok_or_else(|| HybridError::format(reader.context.clone(), "axis counts overflow"))?;
        // Two blocks of (re, im) f64 pairs.
        let remaining = bytes.len() - reader.pos;
        if n.checked_mul(2 * 16).map_or(true, |needed| needed != remaining) {
            return Err(HybridError::format(
                reader.context,
                format!("{} bytes of field data do not match axis counts {:?}", remaining, dims),
            ));
        }
        let mut blocks = Vec::with_capacity(2);
        for _ in 0..2 {
            let mut values = Vec::with_capacity(n);
            for _ in 0..n {
                let re = reader.f64()?;
                let im = reader.f64()?;
                values.push(Complex64::new(re, im));
            }
            let block = Array4::from_shape_vec(dims, values)
                .map_err(|e| HybridError::format(reader.context.clone(), e.to_string()))?;
            blocks.push(block);
        }
        let h = blocks.pop().unwrap_or_default();
        let e = blocks.pop().unwrap_or_default();
        Ok(Self {
            axes,
            frequency,
            unit_power,
            e,
            h,
        })
    }

    /// Text file paths for `stem`: `<stem>_E.txt`, `<stem>_H.txt`.
    pub fn text_paths(stem: &Path) -> (PathBuf, PathBuf) {
        let name = stem
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        (
            stem.with_file_name(format!("{}_E.txt", name)),
            stem.with_file_name(format!("{}_H.txt", name)),
        )
    }

    pub fn write_text(&self, stem: &Path) -> Result<()> {
        let (e_path, h_path) = Self::text_paths(stem);
        for (path, block, label) in [(e_path, &self.e, "E"), (h_path, &self.h, "H")] {
            let mut out = String::new();
            let _ = writeln!(out, "# hybridizer boundary field: {}", label);
            let _ = writeln!(out, "# frequency {:e} unit_power {}", self.frequency, u8::from(self.unit_power));
            for axis in &self.axes {
                let _ = writeln!(out, "# axis {:e} {} {:e}", axis.offset, axis.count, axis.step);
            }
            for point in block.lanes(Axis(3)) {
                let _ = writeln!(
                    out,
                    "{:e} {:e} {:e} {:e} {:e} {:e}",
                    point[0].re, point[0].im, point[1].re, point[1].im, point[2].re, point[2].im
                );
            }
            let mut file = std::fs::File::create(&path)?;
            file.write_all(out.as_bytes())?;
        }
        Ok(())
    }

    pub fn read_text(stem: &Path) -> Result<Self> {
        let (e_path, h_path) = Self::text_paths(stem);
        let (frequency, unit_power, axes, e) = read_text_block(&e_path)?;
        let (_, _, h_axes, h) = read_text_block(&h_path)?;
        if h_axes != axes {
            return Err(HybridError::format(
                h_path.display().to_string(),
                "axes differ from the E file",
            ));
        }
        Ok(Self {
            axes,
            frequency,
            unit_power,
            e,
            h,
        })
    }
}

/// `v[i] = (v[i] + v[i + 1]) / 2` along `axis` for vector component `c`.
fn average_along(block: &mut Array4<Complex64>, c: usize, axis: usize) {
    let n = block.shape()[axis];
    if n < 2 {
        return;
    }
    let mut comp = block.slice_mut(s![.., .., .., c]);
    for mut lane in comp.lanes_mut(Axis(axis)) {
        for i in 0..n - 1 {
            lane[i] = 0.5 * (lane[i] + lane[i + 1]);
        }
    }
}

type TextBlock = (f64, bool, [AxisRange; 3], Array4<Complex64>);

fn read_text_block(path: &Path) -> Result<TextBlock> {
    let content = std::fs::read_to_string(path)?;
    let context = path.display().to_string();
    let bad = |line: usize, msg: &str| HybridError::format(format!("{}:{}", context, line + 1), msg);
    let parse = |line: usize, tok: &str| -> Result<f64> {
        tok.parse::<f64>().map_err(|e| bad(line, &e.to_string()))
    };

    let mut frequency = None;
    let mut unit_power = false;
    let mut axes = Vec::with_capacity(3);
    let mut values = Vec::new();
    for (ln, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(header) = line.strip_prefix('#') {
            let tokens: Vec<&str> = header.split_whitespace().collect();
            match tokens.first() {
                Some(&"frequency") if tokens.len() == 4 => {
                    frequency = Some(parse(ln, tokens[1])?);
                    unit_power = tokens[3] != "0";
                }
                Some(&"axis") if tokens.len() == 4 => {
                    let count = tokens[2]
                        .parse::<usize>()
                        .map_err(|e| bad(ln, &e.to_string()))?;
                    axes.push(AxisRange {
                        offset: parse(ln, tokens[1])?,
                        count,
                        step: parse(ln, tokens[3])?,
                    });
                }
                _ => {}
            }
            continue;
        }
        let row = line
            .split_whitespace()
            .map(|t| parse(ln, t))
            .collect::<Result<Vec<f64>>>()?;
        if row.len() != 6 {
            return Err(bad(ln, &format!("expected 6 values, found {}", row.len())));
        }
        for pair in row.chunks_exact(2) {
            values.push(Complex64::new(pair[0], pair[1]));
        }
    }

    let frequency = frequency.ok_or_else(|| bad(0, "missing frequency header"))?;
    let axes: [AxisRange; 3] = axes
        .try_into()
        .map_err(|_| bad(0, "expected three axis headers"))?;
    let dims = (axes[0].count, axes[1].count, axes[2].count, 3);
    match block_len(&axes) {
        Some(n) if n == values.len() => {}
        _ => {
            return Err(bad(
                0,
                &format!("{} values do not match axis counts {:?}", values.len(), dims),
            ))
        }
    }
    let block = Array4::from_shape_vec(dims, values).map_err(|e| bad(0, &e.to_string()))?;
    Ok((frequency, unit_power, axes, block))
}

/// Number of complex samples in one field block, `None` on overflow.
fn block_len(axes: &[AxisRange; 3]) -> Option<usize> {
    axes.iter().try_fold(3usize, |n, axis| n.checked_mul(axis.count))
}

struct ByteReader<'a> {
    bytes: &'a [u8],
    pos: usize,
    context: String,
}

impl<'a> ByteReader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let slice = self
            .pos
            .checked_add(n)
            .and_then(|end| self.bytes.get(self.pos..end))
            .ok_or_else(|| {
                HybridError::format(
                    self.context.clone(),
                    format!("unexpected end of file at byte {}", self.pos),
                )
            })?;
        self.pos += n;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    fn f64(&mut self) -> Result<f64> {
        Ok(f64::from_le_bytes(self.array()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn sample_record() -> (Grid, BoundaryRecord) {
        let grid = Grid::new(
            Position::new(-0.1, -0.1, -0.1),
            Position::new(0.1, 0.1, 0.1),
            20,
            false,
        )
        .unwrap();
        let mut fields = FieldBuffers::zeros(grid.shape());
        fields.e = Array4::from_shape_fn(fields.e.raw_dim(), |(i, j, k, c)| {
            Complex64::new(i as f64 + 0.1 * c as f64, j as f64 - k as f64)
        });
        fields.h = fields.e.mapv(|v| v.conj() * 0.01);
        let record = BoundaryRecord::from_fields(
            &grid,
            &fields,
            &Position::new(0.0, 0.0, 0.0),
            0.03,
            28e9,
            true,
        )
        .unwrap();
        (grid, record)
    }

    #[test]
    fn test_box_cut_around_centre() {
        let (_, record) = sample_record();
        assert_eq!(record.shape(), [7, 7, 7]);
        assert_abs_diff_eq!(record.axes[0].offset, -0.03, epsilon = 1e-12);
        assert_abs_diff_eq!(record.axes[1].step, 0.01, epsilon = 1e-12);
        // Local (0, 0, 0) is global (7, 7, 7).
        assert_abs_diff_eq!(record.e[[0, 0, 0, 1]].re, 7.1, epsilon = 1e-12);
    }

    #[test]
    fn test_binary_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot_3.hbf");
        let (_, record) = sample_record();
        record.write_binary(&path).unwrap();
        let back = BoundaryRecord::read_binary(&path).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_text_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let stem = dir.path().join("snapshot_3");
        let (_, record) = sample_record();
        record.write_text(&stem).unwrap();
        assert!(dir.path().join("snapshot_3_E.txt").exists());
        let back = BoundaryRecord::read_text(&stem).unwrap();
        assert_eq!(back.axes, record.axes);
        for (a, b) in back.h.iter().zip(record.h.iter()) {
            assert_abs_diff_eq!(a.re, b.re, epsilon = 1e-12);
            assert_abs_diff_eq!(a.im, b.im, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_truncated_binary_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.hbf");
        let (_, record) = sample_record();
        record.write_binary(&path).unwrap();
        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 8]).unwrap();
        assert!(matches!(
            BoundaryRecord::read_binary(&path),
            Err(HybridError::Format { .. })
        ));
    }

    #[test]
    fn test_oversized_axis_counts_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("huge.hbf");
        let mut bytes = Vec::new();
        bytes.extend_from_slice(MAGIC);
        bytes.extend_from_slice(&VERSION.to_le_bytes());
        bytes.extend_from_slice(&28e9f64.to_le_bytes());
        bytes.push(1);
        for _ in 0..3 {
            bytes.extend_from_slice(&0.0f64.to_le_bytes());
            bytes.extend_from_slice(&(1u64 << 40).to_le_bytes());
            bytes.extend_from_slice(&0.001f64.to_le_bytes());
        }
        bytes.extend_from_slice(&[0u8; 64]);
        std::fs::write(&path, &bytes).unwrap();
        assert!(matches!(
            BoundaryRecord::read_binary(&path),
            Err(HybridError::Format { .. })
        ));

        // Counts that fit in usize but exceed the payload.
        for axis in 0..3 {
            let at = 4 + 4 + 8 + 1 + axis * 24 + 8;
            bytes[at..at + 8].copy_from_slice(&1000u64.to_le_bytes());
        }
        std::fs::write(&path, &bytes).unwrap();
        assert!(matches!(
            BoundaryRecord::read_binary(&path),
            Err(HybridError::Format { .. })
        ));
    }

    #[test]
    fn test_text_axis_counts_must_match_rows() {
        let dir = tempfile::tempdir().unwrap();
        let stem = dir.path().join("snapshot_0");
        let (_, record) = sample_record();
        record.write_text(&stem).unwrap();
        let e_path = dir.path().join("snapshot_0_E.txt");
        let text = std::fs::read_to_string(&e_path).unwrap();
        let mut lines: Vec<String> = text.lines().map(String::from).collect();
        let axis = lines.iter().position(|l| l.starts_with("# axis")).unwrap();
        let tokens: Vec<&str> = lines[axis].split_whitespace().collect();
        lines[axis] = format!("# axis {} {} {}", tokens[2], usize::MAX, tokens[4]);
        std::fs::write(&e_path, lines.join("\n")).unwrap();
        assert!(matches!(
            BoundaryRecord::read_text(&stem),
            Err(HybridError::Format { .. })
        ));
    }

    #[test]
    fn test_yee_average() {
        let (_, mut record) = sample_record();
        let before = record.clone();
        record.yee_average();
        // Ex averages along x.
        let expected = 0.5 * (before.e[[2, 3, 4, 0]] + before.e[[3, 3, 4, 0]]);
        assert_eq!(record.e[[2, 3, 4, 0]], expected);
        // Last x sample keeps its value.
        assert_eq!(record.e[[6, 3, 4, 0]], before.e[[6, 3, 4, 0]]);
        // Hx averages over y then z.
        let y = |j: usize, k: usize| 0.5 * (before.h[[2, j, k, 0]] + before.h[[2, j + 1, k, 0]]);
        let expected_h = 0.5 * (y(3, 4) + y(3, 5));
        assert_abs_diff_eq!((record.h[[2, 3, 4, 0]] - expected_h).norm(), 0.0, epsilon = 1e-12);
    }
}
