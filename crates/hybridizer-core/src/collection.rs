//! Ordered source collections: antenna arrays, cluster sets and receivers.
//!
//! Insertion order is the channel-matrix order: element `i` of a radiating
//! collection is column `i`, element `r` of a receiver collection is row `r`.

use std::sync::Arc;

use num_complex::Complex64;

use hybridizer_geometry::{Orientation, PlacedElement, Placement, Position};
use hybridizer_patterns::RadiationPattern;

use crate::error::{HybridError, Result};
use crate::source::SourceElement;

/// Which kind of elements a collection holds. Collections never mix kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionKind {
    Antennas,
    Clusters,
    Receivers,
}

#[derive(Debug, Clone)]
pub struct SourceCollection {
    kind: CollectionKind,
    elements: Vec<SourceElement>,
    total_power: f64,
}

impl SourceCollection {
    /// Antenna array sharing `total_power` watts.
    pub fn antenna_array(total_power: f64) -> Self {
        Self {
            kind: CollectionKind::Antennas,
            elements: Vec::new(),
            total_power,
        }
    }

    pub fn cluster_set() -> Self {
        Self {
            kind: CollectionKind::Clusters,
            elements: Vec::new(),
            total_power: 0.0,
        }
    }

    pub fn receivers() -> Self {
        Self {
            kind: CollectionKind::Receivers,
            elements: Vec::new(),
            total_power: 0.0,
        }
    }

    /// Receiver collection at the given positions.
    pub fn receivers_at(positions: &[Position]) -> Self {
        let mut set = Self::receivers();
        set.elements
            .extend(positions.iter().map(|p| SourceElement::receiver(*p)));
        set
    }

    pub fn kind(&self) -> CollectionKind {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn elements(&self) -> &[SourceElement] {
        &self.elements
    }

    pub fn get(&self, id: usize) -> Option<&SourceElement> {
        self.elements.get(id)
    }

    pub fn get_mut(&mut self, id: usize) -> Option<&mut SourceElement> {
        self.elements.get_mut(id)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, SourceElement> {
        self.elements.iter()
    }

    pub fn positions(&self) -> Vec<Position> {
        self.elements.iter().map(|e| e.position()).collect()
    }

    pub fn total_power(&self) -> f64 {
        self.total_power
    }

    fn expect_kind(&self, wanted: CollectionKind) -> Result<()> {
        if self.kind != wanted {
            return Err(HybridError::Configuration(format!(
                "cannot add {:?} element to a {:?} collection",
                wanted, self.kind
            )));
        }
        Ok(())
    }

    /// Add one antenna and return its id.
    ///
    /// Without an explicit `orientation` the antenna keeps the canonical
    /// frame (boresight $+z$). Power is assigned by [`Self::divide_power`].
    pub fn add_element(
        &mut self,
        position: Position,
        pattern: Arc<dyn RadiationPattern>,
        orientation: Option<Orientation>,
    ) -> Result<usize> {
        self.expect_kind(CollectionKind::Antennas)?;
        self.elements.push(SourceElement::antenna(
            position,
            orientation.unwrap_or_default(),
            pattern,
            0.0,
        ));
        Ok(self.elements.len() - 1)
    }

    /// Add a cluster with receiver-referenced `weight`.
    pub fn add_cluster(
        &mut self,
        position: Position,
        weight: Complex64,
        receiver: Position,
    ) -> Result<usize> {
        self.expect_kind(CollectionKind::Clusters)?;
        self.elements
            .push(SourceElement::cluster(position, weight, receiver));
        Ok(self.elements.len() - 1)
    }

    pub fn add_receiver(&mut self, position: Position) -> Result<usize> {
        self.expect_kind(CollectionKind::Receivers)?;
        self.elements.push(SourceElement::receiver(position));
        Ok(self.elements.len() - 1)
    }

    /// Add every element of a placement rule, using the placement's own
    /// orientation unless `orientation` overrides it.
    pub fn add_placement(
        &mut self,
        placement: &Placement,
        pattern: Arc<dyn RadiationPattern>,
        orientation: Option<Orientation>,
    ) -> Result<Vec<usize>> {
        self.expect_kind(CollectionKind::Antennas)?;
        let placed: Vec<PlacedElement> = placement.elements();
        if placed.is_empty() {
            return Err(HybridError::Configuration(
                "placement produced no elements".into(),
            ));
        }
        placed
            .into_iter()
            .map(|p| {
                self.add_element(
                    p.position,
                    pattern.clone(),
                    Some(orientation.unwrap_or(p.orientation)),
                )
            })
            .collect()
    }

    /// `count` antennas evenly spaced from `start` to `end`, facing the
    /// horizontal normal of the line.
    pub fn add_line(
        &mut self,
        start: Position,
        end: Position,
        count: usize,
        pattern: Arc<dyn RadiationPattern>,
        orientation: Option<Orientation>,
    ) -> Result<Vec<usize>> {
        self.add_placement(&Placement::Line { start, end, count }, pattern, orientation)
    }

    /// `count` antennas on a parabolic arc, each facing the focus.
    #[allow(clippy::too_many_arguments)]
    pub fn add_parabola(
        &mut self,
        vertex: Position,
        axis: Position,
        focal_length: f64,
        width: f64,
        count: usize,
        pattern: Arc<dyn RadiationPattern>,
        orientation: Option<Orientation>,
    ) -> Result<Vec<usize>> {
        self.add_placement(
            &Placement::Parabola {
                vertex,
                axis,
                focal_length,
                width,
                count,
            },
            pattern,
            orientation,
        )
    }

    /// Split the total transmit power equally across all antennas.
    pub fn divide_power(&mut self) -> Result<f64> {
        self.expect_kind(CollectionKind::Antennas)?;
        if self.elements.is_empty() {
            return Err(HybridError::Prerequisite(
                "cannot divide power over an empty array".into(),
            ));
        }
        let share = self.total_power / self.elements.len() as f64;
        for element in &mut self.elements {
            element.set_power(share);
        }
        Ok(share)
    }

    /// Keep only the strongest clusters.
    ///
    /// Clusters are ranked by weight magnitude $|w|$. The kept count $N$ is
    /// the one whose discarded tail fraction
    /// $\sum_{i \ge N} |w_i| / \sum_i |w_i|$ is closest to
    /// `target_unaccounted`, found by bounded golden-section search over
    /// $N \in [1, n]$. Kept clusters retain their relative order.
    ///
    /// Returns the number of clusters kept.
    pub fn prune_by_contribution(&mut self, target_unaccounted: f64) -> Result<usize> {
        self.expect_kind(CollectionKind::Clusters)?;
        if self.elements.is_empty() {
            return Err(HybridError::Prerequisite(
                "cannot prune an empty cluster set".into(),
            ));
        }
        if !(0.0..=1.0).contains(&target_unaccounted) {
            return Err(HybridError::Configuration(format!(
                "unaccounted fraction must lie in [0, 1], got {}",
                target_unaccounted
            )));
        }

        let mut order: Vec<(usize, f64)> = self
            .elements
            .iter()
            .enumerate()
            .map(|(i, e)| (i, e.weight().map(|w| w.norm()).unwrap_or(0.0)))
            .collect();
        order.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));

        let magnitudes: Vec<f64> = order.iter().map(|(_, m)| *m).collect();
        let keep = choose_prefix(&magnitudes, target_unaccounted);

        let mut kept: Vec<usize> = order[..keep].iter().map(|(i, _)| *i).collect();
        kept.sort_unstable();
        let old = std::mem::take(&mut self.elements);
        self.elements = old
            .into_iter()
            .enumerate()
            .filter(|(i, _)| kept.binary_search(i).is_ok())
            .map(|(_, e)| e)
            .collect();

        log::info!(
            "Pruned cluster set to {} of {} (unaccounted {:.4}, target {:.4})",
            keep,
            magnitudes.len(),
            tail_fraction(&magnitudes, keep),
            target_unaccounted
        );
        Ok(keep)
    }
}

/// Fraction of the total carried by `sorted[keep..]`.
pub fn tail_fraction(sorted: &[f64], keep: usize) -> f64 {
    let total: f64 = sorted.iter().sum();
    if total <= 0.0 {
        return 0.0;
    }
    sorted[keep.min(sorted.len())..].iter().sum::<f64>() / total
}

/// Smallest prefix length in `[1, n]` whose tail fraction is closest to `target`.
///
/// The tail fraction is non-increasing in the prefix length, so the distance
/// to `target` is unimodal and a golden-section bracket narrows it down.
fn choose_prefix(sorted: &[f64], target: f64) -> usize {
    const INV_PHI: f64 = 0.618_033_988_749_895;
    let n = sorted.len();
    let cost = |k: usize| (tail_fraction(sorted, k) - target).abs();

    let (mut lo, mut hi) = (1usize, n);
    while hi - lo > 4 {
        let step = (((hi - lo) as f64) * (1.0 - INV_PHI)).round().max(1.0) as usize;
        let (m1, m2) = (lo + step, hi - step);
        let (c1, c2) = (cost(m1), cost(m2));
        if c1 < c2 || (c1 == c2 && tail_fraction(sorted, m1) <= target) {
            hi = m2;
        } else {
            lo = m1;
        }
    }

    let mut best = lo;
    for k in lo..=hi {
        if cost(k) < cost(best) {
            best = k;
        }
    }
    // Equal-cost plateaus (zero-weight clusters) resolve to the shortest prefix.
    while best > 1 && cost(best - 1) <= cost(best) {
        best -= 1;
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use hybridizer_patterns::ClosedFormPattern;

    fn clusters(weights: &[f64]) -> SourceCollection {
        let rx = Position::origin();
        let mut set = SourceCollection::cluster_set();
        for (i, &w) in weights.iter().enumerate() {
            set.add_cluster(Position::new(1.0 + i as f64, 2.0, 0.0), Complex64::new(w, 0.0), rx)
                .unwrap();
        }
        set
    }

    #[test]
    fn test_prune_closest_magnitude_fraction() {
        // Tails of 4/14, 3/14, 2/14, 1/14: dropping one unit cluster is closest to 0.1.
        let mut set = clusters(&[1.0, 10.0, 1.0, 1.0, 1.0]);
        assert_eq!(set.prune_by_contribution(0.1).unwrap(), 4);
        let kept: Vec<f64> = set.iter().map(|e| e.weight().unwrap().re).collect();
        assert_eq!(kept, vec![1.0, 10.0, 1.0, 1.0]);

        // A target above the largest tail keeps only the dominant cluster.
        let mut set = clusters(&[1.0, 10.0, 1.0, 1.0, 1.0]);
        assert_eq!(set.prune_by_contribution(0.3).unwrap(), 1);
        assert_eq!(set.get(0).unwrap().weight(), Some(Complex64::new(10.0, 0.0)));
    }

    #[test]
    fn test_prune_fraction_within_one_step() {
        let weights: Vec<f64> = (0..40).map(|i| 1.0 / (1.0 + i as f64)).collect();
        for &target in &[0.0, 0.01, 0.05, 0.2, 0.5] {
            let mut set = clusters(&weights);
            let keep = set.prune_by_contribution(target).unwrap();
            // Exhaustive reference.
            let best = (1..=weights.len())
                .min_by(|&a, &b| {
                    let ca = (tail_fraction(&weights, a) - target).abs();
                    let cb = (tail_fraction(&weights, b) - target).abs();
                    ca.total_cmp(&cb)
                })
                .unwrap();
            assert!(
                (keep as i64 - best as i64).abs() <= 1,
                "target {}: kept {}, best {}",
                target,
                keep,
                best
            );
        }
    }

    #[test]
    fn test_prune_preserves_relative_order() {
        let mut set = clusters(&[3.0, 0.1, 5.0, 0.1, 4.0]);
        set.prune_by_contribution(0.0).unwrap();
        let kept: Vec<f64> = set.iter().map(|e| e.weight().unwrap().re).collect();
        assert_eq!(kept, vec![3.0, 0.1, 5.0, 0.1, 4.0]);

        let mut set = clusters(&[3.0, 0.1, 5.0, 0.1, 4.0]);
        set.prune_by_contribution(0.05).unwrap();
        let kept: Vec<f64> = set.iter().map(|e| e.weight().unwrap().re).collect();
        assert_eq!(kept, vec![3.0, 5.0, 4.0]);
    }

    #[test]
    fn test_divide_power() {
        let mut array = SourceCollection::antenna_array(2.0);
        let dipole: Arc<dyn RadiationPattern> = Arc::new(ClosedFormPattern::half_wave_dipole());
        array
            .add_line(
                Position::new(0.0, 0.0, 0.0),
                Position::new(1.0, 0.0, 0.0),
                4,
                dipole,
                None,
            )
            .unwrap();
        assert_abs_diff_eq!(array.divide_power().unwrap(), 0.5);
        assert!(array.iter().all(|e| e.power() == 0.5));
    }

    #[test]
    fn test_kinds_do_not_mix() {
        let mut array = SourceCollection::antenna_array(1.0);
        assert!(matches!(
            array.add_cluster(Position::origin(), Complex64::new(1.0, 0.0), Position::origin()),
            Err(HybridError::Configuration(_))
        ));
        let mut empty = SourceCollection::cluster_set();
        assert!(matches!(
            empty.prune_by_contribution(0.1),
            Err(HybridError::Prerequisite(_))
        ));
    }

    #[test]
    fn test_orientation_override() {
        let mut array = SourceCollection::antenna_array(1.0);
        let iso: Arc<dyn RadiationPattern> = Arc::new(ClosedFormPattern::isotropic());
        let fixed = Orientation::facing(Position::new(0.0, 0.0, -1.0));
        array
            .add_parabola(
                Position::origin(),
                Position::new(1.0, 0.0, 0.0),
                0.5,
                1.0,
                5,
                iso,
                Some(fixed),
            )
            .unwrap();
        for e in array.iter() {
            assert!(e.orientation().boresight().approx_eq(&Position::new(0.0, 0.0, -1.0), 1e-12));
        }
    }
}
