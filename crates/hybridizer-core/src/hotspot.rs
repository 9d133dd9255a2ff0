//! Hotspot detection on derived-quantity maps.
//!
//! A hotspot is characterised along each grid axis through an anchor point.
//! The 1D profile on that line is searched for local maxima, each maximum is
//! given a topographic prominence and a width at half prominence, and the
//! strongest peak is reported. Axes whose strongest peak stands out from its
//! surroundings count towards the hotspot's dimensionality
//! ([`HotspotShape`]):
//!
//! | Dimensionality | Shape |
//! |----------------|-------|
//! | 0 | flat, no localised maximum |
//! | 1 | line-like |
//! | 2 | sheet-like |
//! | 3 | point-like |

use ndarray::{s, Array3};

use hybridizer_geometry::{Grid, Position};

use crate::error::{HybridError, Result};
use crate::simulation::{DeterministicSimulation, Quantity};

/// Minimum prominence, relative to the peak height, of a genuine peak.
pub const GENUINE_PEAK_PROMINENCE: f64 = 0.5;

/// Relative height at which peak widths are measured (half prominence).
pub const WIDTH_REL_HEIGHT: f64 = 0.5;

/// One local maximum of a sampled profile.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Peak {
    pub index: usize,
    pub height: f64,
    pub prominence: f64,
    /// Width in samples at `height - WIDTH_REL_HEIGHT * prominence`.
    pub width: f64,
    /// Interpolated left/right crossing positions, in samples.
    pub left_ip: f64,
    pub right_ip: f64,
}

/// Find all interior local maxima of `signal`.
///
/// Flat tops resolve to their middle sample. NaN samples are replaced by the
/// smallest finite value before searching, so undefined regions never form
/// peaks.
pub fn find_peaks(signal: &[f64]) -> Vec<Peak> {
    let floor = signal
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .fold(f64::INFINITY, f64::min);
    let floor = if floor.is_finite() { floor } else { 0.0 };
    let x: Vec<f64> = signal
        .iter()
        .map(|&v| if v.is_finite() { v } else { floor })
        .collect();

    let n = x.len();
    let mut peaks = Vec::new();
    if n < 3 {
        return peaks;
    }

    let mut i = 1;
    while i < n - 1 {
        if x[i - 1] < x[i] {
            let mut ahead = i + 1;
            while ahead < n - 1 && x[ahead] == x[i] {
                ahead += 1;
            }
            if x[ahead] < x[i] {
                let index = (i + ahead - 1) / 2;
                peaks.push(measure_peak(&x, index));
                i = ahead;
                continue;
            }
        }
        i += 1;
    }
    peaks
}

fn measure_peak(x: &[f64], peak: usize) -> Peak {
    let n = x.len();
    let height = x[peak];

    // Walk out to the first higher sample on each side, tracking the minimum.
    let (mut left_base, mut left_min) = (peak, height);
    for j in (0..peak).rev() {
        if x[j] > height {
            break;
        }
        if x[j] < left_min {
            left_min = x[j];
            left_base = j;
        }
    }
    let (mut right_base, mut right_min) = (peak, height);
    for (j, &v) in x.iter().enumerate().skip(peak + 1) {
        if v > height {
            break;
        }
        if v < right_min {
            right_min = v;
            right_base = j;
        }
    }
    let prominence = height - left_min.max(right_min);

    let reference = height - WIDTH_REL_HEIGHT * prominence;
    let mut i = peak;
    while left_base < i && x[i] > reference {
        i -= 1;
    }
    let mut left_ip = i as f64;
    if x[i] < reference && i + 1 < n {
        left_ip += (reference - x[i]) / (x[i + 1] - x[i]);
    }

    let mut i = peak;
    while i < right_base && x[i] > reference {
        i += 1;
    }
    let mut right_ip = i as f64;
    if x[i] < reference && i > 0 {
        right_ip -= (reference - x[i]) / (x[i - 1] - x[i]);
    }

    Peak {
        index: peak,
        height,
        prominence,
        width: right_ip - left_ip,
        left_ip,
        right_ip,
    }
}

/// Where the axis lines of a hotspot search cross.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum HotspotAnchor {
    /// The largest finite value of the map.
    #[default]
    Maximum,
    /// A grid index.
    Index([usize; 3]),
    /// A point, snapped to the grid.
    Point(Position),
}

/// Strongest peak on one axis line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisPeak {
    pub axis: usize,
    /// Grid index along `axis`.
    pub index: usize,
    pub coordinate: f64,
    pub height: f64,
    pub prominence: f64,
    /// Full width at half prominence (m).
    pub fwhm: f64,
    pub genuine: bool,
}

/// Hotspot summary around an anchor.
#[derive(Debug, Clone, PartialEq)]
pub struct Hotspot {
    pub anchor: [usize; 3],
    pub location: Position,
    /// Map value at the anchor.
    pub value: f64,
    pub axes: [Option<AxisPeak>; 3],
    /// Number of axes with a genuine peak (0-3).
    pub dimensionality: usize,
}

/// Classification of a hotspot by its number of genuinely peaked axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HotspotShape {
    Flat,
    LineLike,
    SheetLike,
    PointLike,
}

impl HotspotShape {
    pub fn from_dimensionality(dimensionality: usize) -> Self {
        match dimensionality {
            0 => Self::Flat,
            1 => Self::LineLike,
            2 => Self::SheetLike,
            _ => Self::PointLike,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Flat => "flat",
            Self::LineLike => "line-like",
            Self::SheetLike => "sheet-like",
            Self::PointLike => "point-like",
        }
    }
}

impl Hotspot {
    pub fn shape(&self) -> HotspotShape {
        HotspotShape::from_dimensionality(self.dimensionality)
    }

    /// Largest axis peak height, or the anchor value when no axis peaks.
    pub fn peak_value(&self) -> f64 {
        self.axes
            .iter()
            .flatten()
            .map(|p| p.height)
            .fold(self.value, f64::max)
    }
}

/// Characterise the hotspot of `values` (shaped like `grid`) around `anchor`.
pub fn hotspot_in(values: &Array3<f64>, grid: &Grid, anchor: HotspotAnchor) -> Result<Hotspot> {
    let shape = grid.shape();
    if values.shape() != &shape[..] {
        return Err(HybridError::Dimension(format!(
            "map shape {:?} does not match grid shape {:?}",
            values.shape(),
            shape
        )));
    }
    let anchor = match anchor {
        HotspotAnchor::Index(i) => {
            if (0..3).any(|a| i[a] >= shape[a]) {
                return Err(HybridError::Configuration(format!(
                    "anchor {:?} lies outside grid {:?}",
                    i, shape
                )));
            }
            i
        }
        HotspotAnchor::Point(p) => grid.discretize(&p),
        HotspotAnchor::Maximum => values
            .indexed_iter()
            .filter(|(_, v)| v.is_finite())
            .fold(None, |best: Option<(f64, [usize; 3])>, ((i, j, k), &v)| match best {
                Some((b, _)) if b >= v => best,
                _ => Some((v, [i, j, k])),
            })
            .map(|(_, idx)| idx)
            .ok_or_else(|| HybridError::Dimension("map holds no finite values".into()))?,
    };

    let step = grid.step();
    let mut axes = [None; 3];
    for (axis, slot) in axes.iter_mut().enumerate() {
        let profile = match axis {
            0 => values.slice(s![.., anchor[1], anchor[2]]).to_vec(),
            1 => values.slice(s![anchor[0], .., anchor[2]]).to_vec(),
            _ => values.slice(s![anchor[0], anchor[1], ..]).to_vec(),
        };
        let strongest = find_peaks(&profile)
            .into_iter()
            .max_by(|a, b| a.height.total_cmp(&b.height));
        *slot = strongest.map(|p| AxisPeak {
            axis,
            index: p.index,
            coordinate: grid.axis(axis)[p.index],
            height: p.height,
            prominence: p.prominence,
            fwhm: p.width * step[axis],
            genuine: p.height > 0.0 && p.prominence >= GENUINE_PEAK_PROMINENCE * p.height,
        });
    }

    let dimensionality = axes.iter().flatten().filter(|p| p.genuine).count();
    Ok(Hotspot {
        anchor,
        location: grid.point(anchor),
        value: values[anchor],
        axes,
        dimensionality,
    })
}

/// Evaluate `quantity` on the simulation and characterise its hotspot.
pub fn hotspot_at(
    sim: &DeterministicSimulation,
    quantity: &Quantity,
    anchor: HotspotAnchor,
) -> Result<Hotspot> {
    let map = sim.get_value(quantity)?;
    hotspot_in(&map.values, sim.grid(), anchor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn gaussian(x: f64, centre: f64, fwhm: f64) -> f64 {
        let sigma = fwhm / (2.0 * (2.0 * 2.0_f64.ln()).sqrt());
        (-(x - centre).powi(2) / (2.0 * sigma * sigma)).exp()
    }

    #[test]
    fn test_find_peaks_gaussian_profile() {
        let height = 3.0;
        let width = 20.0;
        let signal: Vec<f64> = (0..201).map(|i| height * gaussian(i as f64, 100.0, width)).collect();
        let peaks = find_peaks(&signal);
        assert_eq!(peaks.len(), 1);
        assert_eq!(peaks[0].index, 100);
        assert_relative_eq!(peaks[0].height, height, max_relative = 1e-12);
        assert_relative_eq!(peaks[0].prominence, height, max_relative = 1e-6);
        assert_relative_eq!(peaks[0].width, width, max_relative = 0.01);
    }

    #[test]
    fn test_plateau_and_nan_handling() {
        let signal = [0.0, 1.0, 2.0, 2.0, 2.0, 1.0, f64::NAN, 0.5, 0.0];
        let peaks = find_peaks(&signal);
        assert_eq!(peaks[0].index, 3);
        // The NaN sample reads as the floor, splitting off a second peak.
        assert_eq!(peaks.len(), 2);
        assert_eq!(peaks[1].index, 7);
        assert_relative_eq!(peaks[1].prominence, 0.5);
    }

    #[test]
    fn test_edge_maximum_is_not_a_peak() {
        assert!(find_peaks(&[5.0, 4.0, 3.0, 2.0]).is_empty());
        assert!(find_peaks(&[1.0, 2.0]).is_empty());
    }

    #[test]
    fn test_point_hotspot_is_three_dimensional() {
        let grid = Grid::new(
            Position::new(-0.05, -0.05, -0.05),
            Position::new(0.05, 0.05, 0.05),
            100,
            false,
        )
        .unwrap();
        let fwhm = 0.02;
        let peak = 7.5;
        let values = Array3::from_shape_fn((101, 101, 101), |(i, j, k)| {
            let p = grid.point([i, j, k]);
            peak * gaussian(p.x, 0.0, fwhm) * gaussian(p.y, 0.0, fwhm) * gaussian(p.z, 0.0, fwhm)
        });
        let hotspot = hotspot_in(&values, &grid, HotspotAnchor::Maximum).unwrap();
        assert_eq!(hotspot.anchor, [50, 50, 50]);
        assert_eq!(hotspot.dimensionality, 3);
        assert_eq!(hotspot.shape(), HotspotShape::PointLike);
        for axis in hotspot.axes.iter().flatten() {
            assert_relative_eq!(axis.height, peak, max_relative = 1e-9);
            assert_relative_eq!(axis.fwhm, fwhm, max_relative = 0.02);
        }
        assert_relative_eq!(hotspot.peak_value(), peak, max_relative = 1e-9);
    }

    #[test]
    fn test_single_axis_peak_is_line_like() {
        let grid = Grid::new(
            Position::new(0.0, 0.0, 0.0),
            Position::new(0.1, 0.1, 0.1),
            [100, 10, 10],
            false,
        )
        .unwrap();
        let values = Array3::from_shape_fn((101, 11, 11), |(i, _, _)| {
            2.0 * gaussian(grid.axis(0)[i], 0.04, 0.015)
        });
        let hotspot = hotspot_in(&values, &grid, HotspotAnchor::Point(Position::new(0.04, 0.05, 0.05)))
            .unwrap();
        assert_eq!(hotspot.dimensionality, 1);
        assert_eq!(hotspot.shape(), HotspotShape::LineLike);
        assert_eq!(hotspot.shape().label(), "line-like");
        let x = hotspot.axes[0].unwrap();
        assert_relative_eq!(x.coordinate, 0.04, epsilon = 1e-12);
        assert_relative_eq!(x.fwhm, 0.015, max_relative = 0.03);
        assert!(hotspot.axes[1].is_none());
    }

    #[test]
    fn test_shape_follows_peaked_axis_count() {
        let shapes: Vec<&str> = (0..4)
            .map(|d| HotspotShape::from_dimensionality(d).label())
            .collect();
        assert_eq!(shapes, ["flat", "line-like", "sheet-like", "point-like"]);
    }

    #[test]
    fn test_anchor_outside_grid_rejected() {
        let grid = Grid::new(Position::origin(), Position::new(1.0, 1.0, 1.0), 2, false).unwrap();
        let values = Array3::zeros((3, 3, 3));
        assert!(hotspot_in(&values, &grid, HotspotAnchor::Index([3, 0, 0])).is_err());
    }
}
