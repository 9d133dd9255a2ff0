//! Rectilinear spatial grids and their child sub-grids.
//!
//! A [`Grid`] spans the axis-aligned box between a lower-left and an
//! upper-right corner. Each active axis is split into `N` cells, giving
//! `N + 1` fence-posted coordinates. Two-dimensional grids keep a single $z$
//! coordinate (the lower-left $z$).
//!
//! Flat point indices use row-major order with $z$ fastest:
//! `flat = (i * ny + j) * nz + k`, which is the memory layout of an
//! `(nx, ny, nz)` array in standard order.
//!
//! Child grids ([`Grid::subgrid`], [`Grid::face_slice`]) share the parent's
//! coordinates exactly and remember their index offset into the parent, so
//! any local index converts to a parent index with [`Grid::to_parent_index`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::position::Position;

/// Full point lists are only materialised below this many grid points.
pub const MESHGRID_POINT_LIMIT: usize = 4_000_000;

/// Errors raised while building or querying grids.
#[derive(Debug, Error)]
pub enum GridError {
    #[error("Grid axis {axis} has {len} coordinate(s); at least 2 are required")]
    Dimension { axis: usize, len: usize },

    #[error("Invalid grid bounds: {0}")]
    InvalidBounds(String),

    #[error("Axis index {0} is out of range (expected 0, 1 or 2)")]
    InvalidAxis(usize),
}

/// Number of cells per axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Resolution {
    /// Same number of cells on every axis.
    Uniform(usize),
    /// Cells along x, y, z.
    PerAxis([usize; 3]),
}

impl Resolution {
    pub fn cells(&self) -> [usize; 3] {
        match *self {
            Resolution::Uniform(n) => [n, n, n],
            Resolution::PerAxis(n) => n,
        }
    }
}

impl From<usize> for Resolution {
    fn from(n: usize) -> Self {
        Resolution::Uniform(n)
    }
}

impl From<[usize; 3]> for Resolution {
    fn from(n: [usize; 3]) -> Self {
        Resolution::PerAxis(n)
    }
}

/// How a child grid was cut from its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubGridKind {
    /// Box of given edge lengths around a point.
    Box,
    /// Thin slab spanning the full extent of the other two axes.
    FaceSlice { axis: usize },
}

/// Registry entry describing a child grid in parent index space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubGridRecord {
    pub kind: SubGridKind,
    /// Parent index of the child's local index `[0, 0, 0]`.
    pub offset: [usize; 3],
    /// Number of coordinates per axis in the child.
    pub shape: [usize; 3],
}

/// A grid point returned by the containment queries.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridMember {
    pub index: [usize; 3],
    pub point: Position,
}

/// A uniform rectilinear grid, possibly a child of a larger grid.
#[derive(Debug, Clone)]
pub struct Grid {
    axes: [Vec<f64>; 3],
    step: [f64; 3],
    is_2d: bool,
    offset: Option<[usize; 3]>,
    meshgrid: Option<Vec<[f64; 3]>>,
    children: Vec<SubGridRecord>,
}

fn linspace(start: f64, end: f64, count: usize) -> Vec<f64> {
    if count == 1 {
        return vec![start];
    }
    let step = (end - start) / (count - 1) as f64;
    (0..count).map(|i| start + step * i as f64).collect()
}

impl Grid {
    /// Build a grid between two corners.
    ///
    /// `resolution` is the number of cells per axis; each active axis gets
    /// `cells + 1` coordinates. For 2D grids the z resolution is ignored.
    pub fn new(
        lower_left: Position,
        upper_right: Position,
        resolution: impl Into<Resolution>,
        is_2d: bool,
    ) -> Result<Self, GridError> {
        let cells = resolution.into().cells();
        let ll = lower_left.to_array();
        let ur = upper_right.to_array();
        let active = if is_2d { 2 } else { 3 };

        let mut axes: [Vec<f64>; 3] = Default::default();
        let mut step = [0.0; 3];
        for a in 0..3 {
            if a >= active {
                axes[a] = vec![ll[a]];
                continue;
            }
            let len = cells[a] + 1;
            if len <= 1 {
                return Err(GridError::Dimension { axis: a, len });
            }
            if !(ur[a] > ll[a]) {
                return Err(GridError::InvalidBounds(format!(
                    "upper-right {:?} must exceed lower-left {:?} on axis {}",
                    ur, ll, a
                )));
            }
            axes[a] = linspace(ll[a], ur[a], len);
            step[a] = (ur[a] - ll[a]) / cells[a] as f64;
        }
        if is_2d {
            // Degenerate axis: reuse the in-plane spacing for area/volume maths.
            step[2] = step[0];
        }

        Ok(Self::from_axes(axes, step, is_2d, None))
    }

    /// Grid centred on `centre` with the given edge lengths and a common cell size.
    pub fn centred(
        centre: Position,
        size: [f64; 3],
        cell_size: f64,
        is_2d: bool,
    ) -> Result<Self, GridError> {
        if !(cell_size > 0.0) {
            return Err(GridError::InvalidBounds(format!(
                "cell size must be positive, got {}",
                cell_size
            )));
        }
        let half = Position::new(size[0] / 2.0, size[1] / 2.0, size[2] / 2.0);
        let cells = [
            (size[0] / cell_size).round() as usize,
            (size[1] / cell_size).round() as usize,
            (size[2] / cell_size).round() as usize,
        ];
        Grid::new(centre - half, centre + half, cells, is_2d)
    }

    fn from_axes(
        axes: [Vec<f64>; 3],
        step: [f64; 3],
        is_2d: bool,
        offset: Option<[usize; 3]>,
    ) -> Self {
        let n = axes[0].len() * axes[1].len() * axes[2].len();
        let meshgrid = if n <= MESHGRID_POINT_LIMIT {
            let mut pts = Vec::with_capacity(n);
            for &x in &axes[0] {
                for &y in &axes[1] {
                    for &z in &axes[2] {
                        pts.push([x, y, z]);
                    }
                }
            }
            Some(pts)
        } else {
            log::debug!("Skipping meshgrid materialisation for {} points", n);
            None
        };
        Self {
            axes,
            step,
            is_2d,
            offset,
            meshgrid,
            children: Vec::new(),
        }
    }

    pub fn is_2d(&self) -> bool {
        self.is_2d
    }

    /// Number of coordinates per axis.
    pub fn shape(&self) -> [usize; 3] {
        [self.axes[0].len(), self.axes[1].len(), self.axes[2].len()]
    }

    /// Total number of grid points.
    pub fn len(&self) -> usize {
        let s = self.shape();
        s[0] * s[1] * s[2]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Coordinate array of one axis.
    pub fn axis(&self, axis: usize) -> &[f64] {
        &self.axes[axis.min(2)]
    }

    /// Cell size per axis (metres).
    pub fn step(&self) -> [f64; 3] {
        self.step
    }

    pub fn lower_left(&self) -> Position {
        Position::new(self.axes[0][0], self.axes[1][0], self.axes[2][0])
    }

    pub fn upper_right(&self) -> Position {
        Position::new(
            *self.axes[0].last().unwrap_or(&0.0),
            *self.axes[1].last().unwrap_or(&0.0),
            *self.axes[2].last().unwrap_or(&0.0),
        )
    }

    pub fn centre(&self) -> Position {
        (self.lower_left() + self.upper_right()) * 0.5
    }

    /// Index offset of this grid inside its parent (`None` for root grids).
    pub fn offset(&self) -> Option<[usize; 3]> {
        self.offset
    }

    /// Child grids produced by this grid so far.
    pub fn children(&self) -> &[SubGridRecord] {
        &self.children
    }

    /// Materialised point list, when below [`MESHGRID_POINT_LIMIT`].
    pub fn meshgrid(&self) -> Option<&[[f64; 3]]> {
        self.meshgrid.as_deref()
    }

    /// Coordinates of the point at `index`.
    pub fn point(&self, index: [usize; 3]) -> Position {
        Position::new(
            self.axes[0][index[0]],
            self.axes[1][index[1]],
            self.axes[2][index[2]],
        )
    }

    /// Coordinates of the point at a flat index.
    pub fn point_at_flat(&self, flat: usize) -> Position {
        match &self.meshgrid {
            Some(m) => Position::from_array(m[flat]),
            None => self.point(self.unflatten(flat)),
        }
    }

    pub fn flatten(&self, index: [usize; 3]) -> usize {
        let s = self.shape();
        (index[0] * s[1] + index[1]) * s[2] + index[2]
    }

    pub fn unflatten(&self, flat: usize) -> [usize; 3] {
        let s = self.shape();
        let k = flat % s[2];
        let j = (flat / s[2]) % s[1];
        let i = flat / (s[1] * s[2]);
        [i, j, k]
    }

    /// Local index converted to the parent's index space.
    pub fn to_parent_index(&self, local: [usize; 3]) -> [usize; 3] {
        let o = self.offset.unwrap_or([0; 3]);
        [local[0] + o[0], local[1] + o[1], local[2] + o[2]]
    }

    /// Parent index converted to this grid's local index space, if inside.
    pub fn from_parent_index(&self, global: [usize; 3]) -> Option<[usize; 3]> {
        let o = self.offset.unwrap_or([0; 3]);
        let s = self.shape();
        let mut local = [0; 3];
        for a in 0..3 {
            if global[a] < o[a] || global[a] - o[a] >= s[a] {
                return None;
            }
            local[a] = global[a] - o[a];
        }
        Some(local)
    }

    fn nearest_on_axis(&self, axis: usize, value: f64) -> usize {
        let coords = &self.axes[axis];
        if coords.len() == 1 {
            return 0;
        }
        let raw = ((value - coords[0]) / self.step[axis]).round();
        if raw <= 0.0 {
            0
        } else {
            (raw as usize).min(coords.len() - 1)
        }
    }

    /// Snap a continuous point to the nearest grid index on each axis,
    /// clamping at the grid boundary.
    pub fn discretize(&self, point: &Position) -> [usize; 3] {
        [
            self.nearest_on_axis(0, point.x),
            self.nearest_on_axis(1, point.y),
            self.nearest_on_axis(2, point.z),
        ]
    }

    /// Like [`Grid::discretize`], also moving `point` onto the snapped coordinate.
    pub fn discretize_in_place(&self, point: &mut Position) -> [usize; 3] {
        let index = self.discretize(point);
        *point = self.point(index);
        index
    }

    /// Whether `point` lies inside the grid bounds (inclusive).
    pub fn contains_point(&self, point: &Position) -> bool {
        let ll = self.lower_left();
        let ur = self.upper_right();
        let tol = 1e-9 * self.step.iter().cloned().fold(0.0, f64::max);
        (0..3).all(|a| {
            if self.axes[a].len() == 1 {
                return true;
            }
            let v = point.component(a);
            v >= ll.component(a) - tol && v <= ur.component(a) + tol
        })
    }

    /// Grid resolution expressed in cells per wavelength (coarsest axis).
    pub fn cells_per_wavelength(&self, wavelength: f64) -> f64 {
        let active = if self.is_2d { 2 } else { 3 };
        let coarsest = self.step[..active].iter().cloned().fold(0.0, f64::max);
        wavelength / coarsest
    }

    fn child(&mut self, kind: SubGridKind, lo: [usize; 3], hi: [usize; 3]) -> Grid {
        let axes = [
            self.axes[0][lo[0]..=hi[0]].to_vec(),
            self.axes[1][lo[1]..=hi[1]].to_vec(),
            self.axes[2][lo[2]..=hi[2]].to_vec(),
        ];
        let record = SubGridRecord {
            kind,
            offset: lo,
            shape: [axes[0].len(), axes[1].len(), axes[2].len()],
        };
        self.children.push(record);
        Grid::from_axes(axes, self.step, self.is_2d, Some(lo))
    }

    fn index_span(&self, axis: usize, centre: usize, half_cells: usize) -> (usize, usize) {
        let last = self.axes[axis].len() - 1;
        (centre.saturating_sub(half_cells), (centre + half_cells).min(last))
    }

    /// Box-shaped child grid of edge lengths `size` centred (after snapping)
    /// on `centre`. The box is clipped to the parent.
    pub fn subgrid(&mut self, centre: &Position, size: [f64; 3]) -> Result<Grid, GridError> {
        let c = self.discretize(centre);
        let mut lo = [0; 3];
        let mut hi = [0; 3];
        for a in 0..3 {
            if self.axes[a].len() == 1 {
                continue;
            }
            let half_cells = (size[a] / 2.0 / self.step[a]).round() as usize;
            let (l, h) = self.index_span(a, c[a], half_cells);
            if h <= l {
                return Err(GridError::Dimension { axis: a, len: h + 1 - l });
            }
            lo[a] = l;
            hi[a] = h;
        }
        Ok(self.child(SubGridKind::Box, lo, hi))
    }

    /// Thin slab around `centre` along `axis`, spanning the full extent of
    /// the other two axes. A thickness below one cell yields a single layer.
    pub fn face_slice(
        &mut self,
        centre: &Position,
        thickness: f64,
        axis: usize,
    ) -> Result<Grid, GridError> {
        if axis > 2 {
            return Err(GridError::InvalidAxis(axis));
        }
        let mut lo = [0; 3];
        let mut hi = [0; 3];
        for a in 0..3 {
            hi[a] = self.axes[a].len() - 1;
        }
        if self.axes[axis].len() > 1 {
            let c = self.nearest_on_axis(axis, centre.component(axis));
            let half_cells = (thickness / 2.0 / self.step[axis]).round() as usize;
            let (l, h) = self.index_span(axis, c, half_cells);
            lo[axis] = l;
            hi[axis] = h;
        }
        Ok(self.child(SubGridKind::FaceSlice { axis }, lo, hi))
    }

    fn members_within(
        &self,
        centre: &Position,
        radius: f64,
        planar: bool,
    ) -> Vec<GridMember> {
        let r_vec = Position::new(radius, radius, if planar { 0.0 } else { radius });
        let lo = self.discretize(&(*centre - r_vec));
        let hi = self.discretize(&(*centre + r_vec));
        let (lo_z, hi_z) = if planar {
            (0, self.axes[2].len() - 1)
        } else {
            (lo[2], hi[2])
        };

        // Relative slack so points exactly on the radius survive rounding.
        let r_sq = radius * radius * (1.0 + 1e-9);
        let mut members = Vec::new();
        for i in lo[0]..=hi[0] {
            for j in lo[1]..=hi[1] {
                for k in lo_z..=hi_z {
                    let p = self.point([i, j, k]);
                    let mut d = p - *centre;
                    if planar {
                        d.z = 0.0;
                    }
                    if d.dot(&d) <= r_sq {
                        members.push(GridMember {
                            index: self.to_parent_index([i, j, k]),
                            point: p,
                        });
                    }
                }
            }
        }
        members
    }

    /// Grid points within `radius` of `centre` (3D distance).
    ///
    /// Returned indices are in the parent's index space for child grids.
    pub fn contains_sphere(&self, centre: &Position, radius: f64) -> Vec<GridMember> {
        self.members_within(centre, radius, false)
    }

    /// Grid points whose in-plane (x, y) distance to `centre` is within `radius`.
    pub fn contains_circle(&self, centre: &Position, radius: f64) -> Vec<GridMember> {
        self.members_within(centre, radius, true)
    }
}
