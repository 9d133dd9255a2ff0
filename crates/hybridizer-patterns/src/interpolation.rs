//! Piecewise-linear interpolation over a triangulated $(\theta, \phi)$ domain.
//!
//! Pattern samples arrive as scattered `(theta, phi, value)` triples. They are
//! triangulated in the $(\theta, \phi)$ plane and a query is answered by
//! barycentric weighting of the enclosing triangle. Two triangulations are
//! built:
//!
//! - **Lattice.** When the samples cover every combination of their distinct
//!   $\theta$ and $\phi$ values, each lattice cell is split into two triangles
//!   and the enclosing cell is found by binary search on the axes.
//! - **Scattered.** Anything else (irregular sampling, partial coverage) is
//!   Delaunay-triangulated with the Bowyer-Watson algorithm and located
//!   through a uniform bucket grid. A query outside the triangulated hull
//!   takes the value at the closest point of the nearest triangle edge.
//!
//! The azimuth is periodic in both cases. The lattice repeats its
//! $\phi = \phi_0$ column at $\phi_0 + 2\pi$ when the samples stop short of
//! a full turn; the scattered mesh appends a copy of the first half turn
//! shifted by $2\pi$ so that triangles span the seam.
//!
//! The triangulation and vertex values are plain data, so a built
//! interpolator serialises to a compact little-endian blob (see
//! [`TriangulatedInterpolator::to_bytes`]) for the on-disk cache.

use std::collections::HashMap;
use std::f64::consts::PI;

use num_complex::Complex64;

use crate::provider::PatternError;

const AXIS_TOLERANCE: f64 = 1e-9;
const BLOB_MAGIC: &[u8; 8] = b"HYBINTP\x02";
const KIND_LATTICE: u8 = 0;
const KIND_SCATTERED: u8 = 1;

/// Triangulated interpolator for one complex pattern component.
#[derive(Debug, Clone, PartialEq)]
pub struct TriangulatedInterpolator {
    /// Vertex positions as `[theta, phi]` (radians).
    vertices: Vec<[f64; 2]>,
    /// Value at each vertex.
    values: Vec<Complex64>,
    /// Counter-clockwise vertex index triples.
    triangles: Vec<[u32; 3]>,
    locator: Locator,
}

#[derive(Debug, Clone, PartialEq)]
enum Locator {
    /// Sorted axes; vertices are row-major `[theta][phi]`, two triangles per cell.
    Lattice { theta: Vec<f64>, phi: Vec<f64> },
    Scattered { phi_origin: f64, buckets: Buckets },
}

/// Uniform grid over the mesh bounding box; each bucket lists the triangles
/// whose bounding boxes overlap it.
#[derive(Debug, Clone, PartialEq)]
struct Buckets {
    min: [f64; 2],
    cell: [f64; 2],
    dims: [usize; 2],
    start: Vec<u32>,
    items: Vec<u32>,
}

/// Distinct values of `xs` (sorted, merged within tolerance).
fn distinct_sorted(xs: &[f64]) -> Vec<f64> {
    let mut v: Vec<f64> = xs.to_vec();
    v.sort_by(|a, b| a.total_cmp(b));
    v.dedup_by(|a, b| (*a - *b).abs() < AXIS_TOLERANCE);
    v
}

fn locate(axis: &[f64], x: f64) -> Option<usize> {
    let pos = axis.partition_point(|&a| a < x - AXIS_TOLERANCE);
    (pos < axis.len() && (axis[pos] - x).abs() < AXIS_TOLERANCE).then_some(pos)
}

/// Index `i` of the cell `[axis[i], axis[i + 1]]` containing `x`, with `x`
/// clamped into the axis range.
fn cell(axis: &[f64], x: f64) -> (usize, f64) {
    let n = axis.len();
    let x = x.clamp(axis[0], axis[n - 1]);
    let i = axis.partition_point(|&a| a <= x).saturating_sub(1).min(n - 2);
    let frac = (x - axis[i]) / (axis[i + 1] - axis[i]);
    (i, frac.clamp(0.0, 1.0))
}

/// Twice the signed area of `abc`; positive when counter-clockwise.
fn orient(a: [f64; 2], b: [f64; 2], c: [f64; 2]) -> f64 {
    (b[0] - a[0]) * (c[1] - a[1]) - (b[1] - a[1]) * (c[0] - a[0])
}

/// Barycentric weights of `p` in `abc`, `None` for a degenerate triangle.
fn barycentric(p: [f64; 2], a: [f64; 2], b: [f64; 2], c: [f64; 2]) -> Option<[f64; 3]> {
    let area = orient(a, b, c);
    if area.abs() < f64::EPSILON * 1e-3 {
        return None;
    }
    let wa = orient(p, b, c) / area;
    let wb = orient(a, p, c) / area;
    Some([wa, wb, 1.0 - wa - wb])
}

/// Circumcentre and squared circumradius of `abc`.
fn circumcircle(a: [f64; 2], b: [f64; 2], c: [f64; 2]) -> ([f64; 2], f64) {
    let d = 2.0 * orient(a, b, c);
    if d.abs() < 1e-300 {
        return ([0.0, 0.0], f64::INFINITY);
    }
    let (ba, ca) = ([b[0] - a[0], b[1] - a[1]], [c[0] - a[0], c[1] - a[1]]);
    let (b2, c2) = (ba[0] * ba[0] + ba[1] * ba[1], ca[0] * ca[0] + ca[1] * ca[1]);
    let ux = (ca[1] * b2 - ba[1] * c2) / d;
    let uy = (ba[0] * c2 - ca[0] * b2) / d;
    ([a[0] + ux, a[1] + uy], ux * ux + uy * uy)
}

/// Bowyer-Watson Delaunay triangulation of `points`.
///
/// Returns counter-clockwise triangles over the input indices. Points must be
/// distinct.
fn delaunay(points: &[[f64; 2]]) -> Vec<[u32; 3]> {
    struct Tri {
        v: [usize; 3],
        centre: [f64; 2],
        r2: f64,
    }

    let n = points.len();
    let (mut lo, mut hi) = ([f64::INFINITY; 2], [f64::NEG_INFINITY; 2]);
    for p in points {
        for k in 0..2 {
            lo[k] = lo[k].min(p[k]);
            hi[k] = hi[k].max(p[k]);
        }
    }
    let span = (hi[0] - lo[0]).max(hi[1] - lo[1]).max(1.0);
    let mid = [(lo[0] + hi[0]) / 2.0, (lo[1] + hi[1]) / 2.0];

    let mut pts = points.to_vec();
    pts.push([mid[0] - 20.0 * span, mid[1] - span]);
    pts.push([mid[0] + 20.0 * span, mid[1] - span]);
    pts.push([mid[0], mid[1] + 20.0 * span]);

    let make = |v: [usize; 3], pts: &[[f64; 2]]| {
        let (centre, r2) = circumcircle(pts[v[0]], pts[v[1]], pts[v[2]]);
        Tri { v, centre, r2 }
    };
    let mut tris = vec![make([n, n + 1, n + 2], &pts)];

    for i in 0..n {
        let p = pts[i];
        let (bad, good): (Vec<Tri>, Vec<Tri>) = tris.into_iter().partition(|t| {
            let dx = p[0] - t.centre[0];
            let dy = p[1] - t.centre[1];
            dx * dx + dy * dy < t.r2
        });
        tris = good;

        let mut edges: HashMap<(usize, usize), (usize, usize, u32)> = HashMap::new();
        for t in &bad {
            for k in 0..3 {
                let (a, b) = (t.v[k], t.v[(k + 1) % 3]);
                edges.entry((a.min(b), a.max(b))).or_insert((a, b, 0)).2 += 1;
            }
        }
        for (a, b, count) in edges.into_values() {
            if count == 1 {
                tris.push(make([a, b, i], &pts));
            }
        }
    }

    tris.into_iter()
        .filter(|t| t.v.iter().all(|&v| v < n))
        .filter(|t| orient(pts[t.v[0]], pts[t.v[1]], pts[t.v[2]]) > 0.0)
        .map(|t| [t.v[0] as u32, t.v[1] as u32, t.v[2] as u32])
        .collect()
}

impl Buckets {
    fn build(vertices: &[[f64; 2]], triangles: &[[u32; 3]]) -> Self {
        let (mut min, mut max) = ([f64::INFINITY; 2], [f64::NEG_INFINITY; 2]);
        for v in vertices {
            for k in 0..2 {
                min[k] = min[k].min(v[k]);
                max[k] = max[k].max(v[k]);
            }
        }
        let side = ((triangles.len() as f64).sqrt().ceil() as usize).max(1);
        let dims = [side, side];
        let cell = [
            ((max[0] - min[0]) / side as f64).max(AXIS_TOLERANCE),
            ((max[1] - min[1]) / side as f64).max(AXIS_TOLERANCE),
        ];
        let mut buckets = Self {
            min,
            cell,
            dims,
            start: Vec::new(),
            items: Vec::new(),
        };

        let mut lists: Vec<Vec<u32>> = vec![Vec::new(); side * side];
        for (t, tri) in triangles.iter().enumerate() {
            let corners = tri.map(|v| vertices[v as usize]);
            let (i0, j0) = buckets.index_of([
                corners.iter().map(|c| c[0]).fold(f64::INFINITY, f64::min),
                corners.iter().map(|c| c[1]).fold(f64::INFINITY, f64::min),
            ]);
            let (i1, j1) = buckets.index_of([
                corners.iter().map(|c| c[0]).fold(f64::NEG_INFINITY, f64::max),
                corners.iter().map(|c| c[1]).fold(f64::NEG_INFINITY, f64::max),
            ]);
            for i in i0..=i1 {
                for j in j0..=j1 {
                    lists[i * side + j].push(t as u32);
                }
            }
        }
        buckets.start.push(0);
        for list in lists {
            buckets.items.extend(list);
            buckets.start.push(buckets.items.len() as u32);
        }
        buckets
    }

    fn index_of(&self, p: [f64; 2]) -> (usize, usize) {
        let axis = |k: usize| {
            let x = ((p[k] - self.min[k]) / self.cell[k]).floor();
            (x.max(0.0) as usize).min(self.dims[k] - 1)
        };
        (axis(0), axis(1))
    }

    fn candidates(&self, p: [f64; 2]) -> &[u32] {
        let (i, j) = self.index_of(p);
        let b = i * self.dims[1] + j;
        &self.items[self.start[b] as usize..self.start[b + 1] as usize]
    }
}

impl TriangulatedInterpolator {
    /// Build from scattered samples.
    ///
    /// A complete lattice of distinct angles is triangulated cell by cell;
    /// anything else goes through the Delaunay path. Samples that repeat a
    /// direction (including $\phi$ and $\phi + 2\pi$) keep the first value.
    ///
    /// # Errors
    /// Returns [`PatternError::DataError`] when the arrays differ in length
    /// or fewer than three non-collinear directions are given.
    pub fn from_samples(
        theta: &[f64],
        phi: &[f64],
        values: &[Complex64],
    ) -> Result<Self, PatternError> {
        if theta.len() != phi.len() || theta.len() != values.len() {
            return Err(PatternError::DataError(format!(
                "sample arrays differ in length ({}, {}, {})",
                theta.len(),
                phi.len(),
                values.len()
            )));
        }
        if let Some(lattice) = Self::lattice(theta, phi, values) {
            return Ok(lattice);
        }
        Self::scattered(theta, phi, values)
    }

    /// Cell-split triangulation, `None` unless the samples fill a lattice.
    fn lattice(theta: &[f64], phi: &[f64], values: &[Complex64]) -> Option<Self> {
        let theta_axis = distinct_sorted(theta);
        let mut phi_axis = distinct_sorted(phi);
        if theta_axis.len() < 2 || phi_axis.len() < 2 {
            return None;
        }

        let n_phi_raw = phi_axis.len();
        let mut grid: Vec<Option<Complex64>> = vec![None; theta_axis.len() * n_phi_raw];
        for ((&t, &p), &v) in theta.iter().zip(phi).zip(values) {
            let (Some(i), Some(j)) = (locate(&theta_axis, t), locate(&phi_axis, p)) else {
                continue;
            };
            grid[i * n_phi_raw + j].get_or_insert(v);
        }
        let grid: Vec<Complex64> = grid.into_iter().collect::<Option<_>>()?;

        let wrap = phi_axis[n_phi_raw - 1] < phi_axis[0] + 2.0 * PI - AXIS_TOLERANCE;
        if wrap {
            phi_axis.push(phi_axis[0] + 2.0 * PI);
        }
        let n_phi = phi_axis.len();

        let mut vertices = Vec::with_capacity(theta_axis.len() * n_phi);
        let mut lattice = Vec::with_capacity(theta_axis.len() * n_phi);
        for (i, &t) in theta_axis.iter().enumerate() {
            for (j, &p) in phi_axis.iter().enumerate() {
                let src = if j == n_phi_raw { 0 } else { j };
                vertices.push([t, p]);
                lattice.push(grid[i * n_phi_raw + src]);
            }
        }

        let mut triangles = Vec::with_capacity(2 * (theta_axis.len() - 1) * (n_phi - 1));
        for i in 0..theta_axis.len() - 1 {
            for j in 0..n_phi - 1 {
                let v00 = (i * n_phi + j) as u32;
                let v01 = (i * n_phi + j + 1) as u32;
                let v10 = ((i + 1) * n_phi + j) as u32;
                let v11 = ((i + 1) * n_phi + j + 1) as u32;
                triangles.push([v00, v10, v11]);
                triangles.push([v00, v11, v01]);
            }
        }

        Some(Self {
            vertices,
            values: lattice,
            triangles,
            locator: Locator::Lattice {
                theta: theta_axis,
                phi: phi_axis,
            },
        })
    }

    fn scattered(theta: &[f64], phi: &[f64], values: &[Complex64]) -> Result<Self, PatternError> {
        let phi_origin = phi.iter().copied().fold(f64::INFINITY, f64::min);
        let turn = 2.0 * PI;

        let mut vertices: Vec<[f64; 2]> = Vec::with_capacity(theta.len());
        let mut vertex_values = Vec::with_capacity(theta.len());
        let mut seen = std::collections::HashSet::new();
        for ((&t, &p), &v) in theta.iter().zip(phi).zip(values) {
            let mut p = phi_origin + (p - phi_origin).rem_euclid(turn);
            if p > phi_origin + turn - AXIS_TOLERANCE {
                p = phi_origin;
            }
            let key = (
                (t / AXIS_TOLERANCE).round() as i64,
                (p / AXIS_TOLERANCE).round() as i64,
            );
            if seen.insert(key) {
                vertices.push([t, p]);
                vertex_values.push(v);
            }
        }
        let distinct = vertices.len();
        for k in 0..distinct {
            if vertices[k][1] - phi_origin <= PI {
                vertices.push([vertices[k][0], vertices[k][1] + turn]);
                vertex_values.push(vertex_values[k]);
            }
        }

        let triangles = delaunay(&vertices);
        if triangles.is_empty() {
            return Err(PatternError::DataError(format!(
                "{} samples span no area in (theta, phi)",
                distinct
            )));
        }
        let buckets = Buckets::build(&vertices, &triangles);
        log::debug!(
            "Triangulated {} scattered pattern samples into {} triangles",
            distinct,
            triangles.len()
        );

        Ok(Self {
            vertices,
            values: vertex_values,
            triangles,
            locator: Locator::Scattered {
                phi_origin,
                buckets,
            },
        })
    }

    /// Interpolated value at $(\theta, \phi)$ (radians, already wrapped).
    pub fn evaluate(&self, theta: f64, phi: f64) -> Complex64 {
        match &self.locator {
            Locator::Lattice { theta: ts, phi: ps } => {
                let phi = if phi < ps[0] { phi + 2.0 * PI } else { phi };
                let (i, s) = cell(ts, theta);
                let (j, t) = cell(ps, phi);
                let base = 2 * (i * (ps.len() - 1) + j);

                // In cell coordinates, the first triangle is s >= t.
                let (tri, w) = if s >= t {
                    (self.triangles[base], [1.0 - s, s - t, t])
                } else {
                    (self.triangles[base + 1], [1.0 - t, s, t - s])
                };
                self.weighted(tri, w)
            }
            Locator::Scattered {
                phi_origin,
                buckets,
            } => {
                let p = [theta, phi_origin + (phi - phi_origin).rem_euclid(2.0 * PI)];
                for &t in buckets.candidates(p) {
                    let tri = self.triangles[t as usize];
                    let [a, b, c] = tri.map(|v| self.vertices[v as usize]);
                    if let Some(w) = barycentric(p, a, b, c) {
                        if w.iter().all(|&x| x >= -1e-12) {
                            return self.weighted(tri, w);
                        }
                    }
                }
                self.nearest_edge_value(p)
            }
        }
    }

    fn weighted(&self, tri: [u32; 3], w: [f64; 3]) -> Complex64 {
        tri.iter()
            .zip(w)
            .map(|(&v, w)| self.values[v as usize] * w)
            .sum()
    }

    /// Value at the closest point of any triangle edge to `p`.
    fn nearest_edge_value(&self, p: [f64; 2]) -> Complex64 {
        let mut best = (f64::INFINITY, Complex64::default());
        for tri in &self.triangles {
            for k in 0..3 {
                let (ia, ib) = (tri[k] as usize, tri[(k + 1) % 3] as usize);
                let (a, b) = (self.vertices[ia], self.vertices[ib]);
                let ab = [b[0] - a[0], b[1] - a[1]];
                let len2 = ab[0] * ab[0] + ab[1] * ab[1];
                let s = if len2 > 0.0 {
                    (((p[0] - a[0]) * ab[0] + (p[1] - a[1]) * ab[1]) / len2).clamp(0.0, 1.0)
                } else {
                    0.0
                };
                let q = [a[0] + s * ab[0], a[1] + s * ab[1]];
                let d2 = (p[0] - q[0]).powi(2) + (p[1] - q[1]).powi(2);
                if d2 < best.0 {
                    best = (d2, self.values[ia] * (1.0 - s) + self.values[ib] * s);
                }
            }
        }
        best.1
    }

    pub fn num_vertices(&self) -> usize {
        self.values.len()
    }

    pub fn num_triangles(&self) -> usize {
        self.triangles.len()
    }

    /// Whether the samples formed a complete lattice.
    pub fn is_lattice(&self) -> bool {
        matches!(self.locator, Locator::Lattice { .. })
    }

    /// Serialise into a self-describing blob tagged with `key`.
    pub fn to_bytes(&self, key: &str) -> Vec<u8> {
        let mut data = Vec::with_capacity(
            64 + key.len() + 32 * self.values.len() + 12 * self.triangles.len(),
        );
        data.extend_from_slice(BLOB_MAGIC);
        data.extend_from_slice(&(key.len() as u32).to_le_bytes());
        data.extend_from_slice(key.as_bytes());

        match &self.locator {
            Locator::Lattice { theta, phi } => {
                data.push(KIND_LATTICE);
                data.extend_from_slice(&(theta.len() as u32).to_le_bytes());
                data.extend_from_slice(&(phi.len() as u32).to_le_bytes());
                for &x in theta.iter().chain(phi) {
                    data.extend_from_slice(&x.to_le_bytes());
                }
            }
            Locator::Scattered { phi_origin, .. } => {
                data.push(KIND_SCATTERED);
                data.extend_from_slice(&phi_origin.to_le_bytes());
                data.extend_from_slice(&(self.vertices.len() as u32).to_le_bytes());
                for v in &self.vertices {
                    data.extend_from_slice(&v[0].to_le_bytes());
                    data.extend_from_slice(&v[1].to_le_bytes());
                }
            }
        }
        for v in &self.values {
            data.extend_from_slice(&v.re.to_le_bytes());
            data.extend_from_slice(&v.im.to_le_bytes());
        }

        data.extend_from_slice(&(self.triangles.len() as u32).to_le_bytes());
        for tri in &self.triangles {
            for &v in tri {
                data.extend_from_slice(&v.to_le_bytes());
            }
        }
        data
    }

    /// Inverse of [`TriangulatedInterpolator::to_bytes`]. Returns the stored
    /// key alongside the interpolator.
    pub fn from_bytes(bytes: &[u8]) -> Result<(String, Self), PatternError> {
        let mut r = ByteReader { bytes, pos: 0 };
        if r.take(8)? != BLOB_MAGIC {
            return Err(PatternError::DataError("not an interpolator blob".into()));
        }
        let key_len = r.u32()? as usize;
        let key = String::from_utf8(r.take(key_len)?.to_vec())
            .map_err(|e| PatternError::DataError(format!("blob key is not UTF-8: {}", e)))?;

        let kind = r.take(1)?[0];
        let (vertices, axes, phi_origin) = match kind {
            KIND_LATTICE => {
                let n_theta = r.u32()? as usize;
                let n_phi = r.u32()? as usize;
                if n_theta < 2 || n_phi < 2 {
                    return Err(PatternError::DataError(format!(
                        "lattice blob of {} x {} angles",
                        n_theta, n_phi
                    )));
                }
                let theta = r.f64s(n_theta)?;
                let phi = r.f64s(n_phi)?;
                let vertices = theta
                    .iter()
                    .flat_map(|&t| phi.iter().map(move |&p| [t, p]))
                    .collect::<Vec<_>>();
                (vertices, Some((theta, phi)), 0.0)
            }
            KIND_SCATTERED => {
                let phi_origin = r.f64()?;
                let n = r.u32()? as usize;
                let flat = r.f64s(2 * n)?;
                let vertices = flat.chunks_exact(2).map(|c| [c[0], c[1]]).collect();
                (vertices, None, phi_origin)
            }
            other => {
                return Err(PatternError::DataError(format!(
                    "unknown interpolator kind {}",
                    other
                )))
            }
        };
        let values = r
            .f64s(2 * vertices.len())?
            .chunks_exact(2)
            .map(|c| Complex64::new(c[0], c[1]))
            .collect::<Vec<_>>();

        let n_tri = r.u32()? as usize;
        if let Some((theta, phi)) = &axes {
            if n_tri != 2 * (theta.len() - 1) * (phi.len() - 1) {
                return Err(PatternError::DataError(format!(
                    "inconsistent blob dimensions: {} x {} lattice with {} triangles",
                    theta.len(),
                    phi.len(),
                    n_tri
                )));
            }
        }
        let mut triangles = Vec::with_capacity(n_tri.min(bytes.len() / 12));
        for _ in 0..n_tri {
            let tri = [r.u32()?, r.u32()?, r.u32()?];
            if let Some(&v) = tri.iter().find(|&&v| v as usize >= values.len()) {
                return Err(PatternError::DataError(format!(
                    "triangle vertex {} out of range for {} vertices",
                    v,
                    values.len()
                )));
            }
            triangles.push(tri);
        }
        if r.pos != bytes.len() {
            return Err(PatternError::DataError("trailing bytes in interpolator blob".into()));
        }

        let locator = match axes {
            Some((theta, phi)) => Locator::Lattice { theta, phi },
            None => {
                if triangles.is_empty() {
                    return Err(PatternError::DataError("scattered blob without triangles".into()));
                }
                Locator::Scattered {
                    phi_origin,
                    buckets: Buckets::build(&vertices, &triangles),
                }
            }
        };
        Ok((
            key,
            Self {
                vertices,
                values,
                triangles,
                locator,
            },
        ))
    }
}

struct ByteReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], PatternError> {
        let out = self
            .pos
            .checked_add(n)
            .and_then(|end| self.bytes.get(self.pos..end))
            .ok_or_else(|| PatternError::DataError("truncated interpolator blob".into()))?;
        self.pos += n;
        Ok(out)
    }

    fn u32(&mut self) -> Result<u32, PatternError> {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(self.take(4)?);
        Ok(u32::from_le_bytes(buf))
    }

    fn f64(&mut self) -> Result<f64, PatternError> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.take(8)?);
        Ok(f64::from_le_bytes(buf))
    }

    /// `n` consecutive f64 values, bounds-checked before allocating.
    fn f64s(&mut self, n: usize) -> Result<Vec<f64>, PatternError> {
        let raw = self.take(n.checked_mul(8).ok_or_else(|| {
            PatternError::DataError("interpolator blob count overflows".into())
        })?)?;
        Ok(raw
            .chunks_exact(8)
            .map(|c| {
                let mut buf = [0u8; 8];
                buf.copy_from_slice(c);
                f64::from_le_bytes(buf)
            })
            .collect())
    }
}
