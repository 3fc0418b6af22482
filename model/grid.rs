//! Age-time grids and the prior and constraint values attached to their nodes.

use crate::constants::PriorKind;
use crate::priors::PriorNode;
use itertools::iproduct;
use ndarray::{Array1, Array2, ArrayView1, s};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Distinct axis values closer than this are treated as a malformed axis.
pub const GRID_TOLERANCE: f64 = 1e-9;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GridError {
    #[error("Invalid {axis} grid: {reason}")]
    InvalidGridSpec { axis: &'static str, reason: String },
}

/// An ordered set of ages crossed with an ordered set of times.
///
/// Both axes are strictly increasing and hold at least one point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgeTimeGrid {
    ages: Array1<f64>,
    times: Array1<f64>,
}

impl AgeTimeGrid {
    /// Builds a grid from raw breakpoints, sorting and collapsing exact
    /// duplicates on each axis.
    pub fn new(ages: &[f64], times: &[f64]) -> Result<Self, GridError> {
        Ok(Self {
            ages: normalize_axis("age", ages)?,
            times: normalize_axis("time", times)?,
        })
    }

    pub fn ages(&self) -> ArrayView1<'_, f64> {
        self.ages.view()
    }

    pub fn times(&self) -> ArrayView1<'_, f64> {
        self.times.view()
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.ages.len(), self.times.len())
    }

    /// The one-node grid at the first age and the middle time.
    pub fn single_node(&self) -> AgeTimeGrid {
        let middle = self.times.len() / 2;
        Self {
            ages: self.ages.slice(s![..1]).to_owned(),
            times: self.times.slice(s![middle..=middle]).to_owned(),
        }
    }

    /// All `(age, time)` nodes, age-major.
    pub fn nodes(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        iproduct!(self.ages.iter().copied(), self.times.iter().copied())
    }
}

fn normalize_axis(axis: &'static str, raw: &[f64]) -> Result<Array1<f64>, GridError> {
    if raw.is_empty() {
        return Err(GridError::InvalidGridSpec {
            axis,
            reason: "no points were given".to_string(),
        });
    }
    if let Some(bad) = raw.iter().find(|v| !v.is_finite()) {
        return Err(GridError::InvalidGridSpec {
            axis,
            reason: format!("{bad} cannot be ordered"),
        });
    }
    let mut points = raw.to_vec();
    points.sort_by(f64::total_cmp);
    points.dedup();
    if let Some(pair) = points.windows(2).find(|w| w[1] - w[0] < GRID_TOLERANCE) {
        return Err(GridError::InvalidGridSpec {
            axis,
            reason: format!(
                "{} and {} collapse to the same point within tolerance {GRID_TOLERANCE:e}",
                pair[0], pair[1]
            ),
        });
    }
    Ok(Array1::from_vec(points))
}

fn position(axis: ArrayView1<'_, f64>, value: f64) -> Option<usize> {
    axis.iter().position(|&v| (v - value).abs() < GRID_TOLERANCE)
}

/// Priors laid out over a rectangle of `(age, time)` coordinates.
///
/// For the `value` slot this is the full grid; `dage` drops the last age and
/// `dtime` drops the last time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorGrid {
    ages: Array1<f64>,
    times: Array1<f64>,
    priors: Array2<PriorNode>,
}

impl PriorGrid {
    pub fn filled(ages: ArrayView1<'_, f64>, times: ArrayView1<'_, f64>, prior: &PriorNode) -> Self {
        Self {
            ages: ages.to_owned(),
            times: times.to_owned(),
            priors: Array2::from_elem((ages.len(), times.len()), prior.clone()),
        }
    }

    pub fn ages(&self) -> ArrayView1<'_, f64> {
        self.ages.view()
    }

    pub fn times(&self) -> ArrayView1<'_, f64> {
        self.times.view()
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.ages.len(), self.times.len())
    }

    pub fn is_empty(&self) -> bool {
        self.priors.is_empty()
    }

    pub fn get(&self, age: f64, time: f64) -> Option<&PriorNode> {
        let a = position(self.ages.view(), age)?;
        let t = position(self.times.view(), time)?;
        self.priors.get((a, t))
    }

    pub fn at(&self, age_idx: usize, time_idx: usize) -> Option<&PriorNode> {
        self.priors.get((age_idx, time_idx))
    }

    pub(crate) fn set_at(&mut self, age_idx: usize, time_idx: usize, prior: PriorNode) {
        self.priors[(age_idx, time_idx)] = prior;
    }

    /// The coordinate keys of every prior in the grid, age-major.
    pub fn keys(&self) -> Vec<(f64, f64)> {
        iproduct!(self.ages.iter().copied(), self.times.iter().copied()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = ((f64, f64), &PriorNode)> + '_ {
        self.priors
            .indexed_iter()
            .map(|((a, t), prior)| ((self.ages[a], self.times[t]), prior))
    }
}

/// A smoothing: an age-time grid with value, age-difference and
/// time-difference priors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmoothGrid {
    grid: AgeTimeGrid,
    value: PriorGrid,
    dage: PriorGrid,
    dtime: PriorGrid,
}

impl SmoothGrid {
    /// A smoothing with the same prior replicated over each slot.
    pub fn new(grid: AgeTimeGrid, value: &PriorNode, dage: &PriorNode, dtime: &PriorNode) -> Self {
        let ages = grid.ages();
        let times = grid.times();
        let (n_age, n_time) = grid.shape();
        let value = PriorGrid::filled(ages, times, value);
        let dage = PriorGrid::filled(ages.slice(s![..n_age - 1]), times, dage);
        let dtime = PriorGrid::filled(ages, times.slice(s![..n_time - 1]), dtime);
        Self {
            grid,
            value,
            dage,
            dtime,
        }
    }

    pub fn grid(&self) -> &AgeTimeGrid {
        &self.grid
    }

    pub fn ages(&self) -> ArrayView1<'_, f64> {
        self.grid.ages()
    }

    pub fn times(&self) -> ArrayView1<'_, f64> {
        self.grid.times()
    }

    pub fn value(&self) -> &PriorGrid {
        &self.value
    }

    pub fn dage(&self) -> &PriorGrid {
        &self.dage
    }

    pub fn dtime(&self) -> &PriorGrid {
        &self.dtime
    }

    pub fn slot(&self, kind: PriorKind) -> &PriorGrid {
        match kind {
            PriorKind::Value => &self.value,
            PriorKind::Dage => &self.dage,
            PriorKind::Dtime => &self.dtime,
        }
    }

    /// Mutable access for in-crate updates. Callers keep the slot's axes.
    pub(crate) fn slot_mut(&mut self, kind: PriorKind) -> &mut PriorGrid {
        match kind {
            PriorKind::Value => &mut self.value,
            PriorKind::Dage => &mut self.dage,
            PriorKind::Dtime => &mut self.dtime,
        }
    }

    pub fn node_count(&self) -> usize {
        let (a, t) = self.grid.shape();
        a * t
    }
}

/// Fixed values over a grid, for quantities observed rather than estimated.
/// Constrained quantities carry no difference priors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstraintGrid {
    grid: AgeTimeGrid,
    values: Array2<f64>,
}

impl ConstraintGrid {
    pub(crate) fn from_values(grid: AgeTimeGrid, values: Array2<f64>) -> Self {
        debug_assert_eq!(values.dim(), grid.shape());
        Self { grid, values }
    }

    pub fn grid(&self) -> &AgeTimeGrid {
        &self.grid
    }

    pub fn values(&self) -> &Array2<f64> {
        &self.values
    }

    pub fn get(&self, age: f64, time: f64) -> Option<f64> {
        let a = position(self.grid.ages(), age)?;
        let t = position(self.grid.times(), time)?;
        self.values.get((a, t)).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::priors::{Distribution, PriorNode};

    fn gaussian() -> PriorNode {
        PriorNode::new(
            Distribution::Gaussian {
                mean: 0.0,
                std: 1.0,
            },
            None,
            None,
        )
        .unwrap()
    }

    #[test]
    fn axes_are_sorted_and_deduplicated() {
        let grid = AgeTimeGrid::new(&[50.0, 0.0, 100.0, 50.0], &[2015.0, 1990.0]).unwrap();
        assert_eq!(grid.ages().to_vec(), vec![0.0, 50.0, 100.0]);
        assert_eq!(grid.times().to_vec(), vec![1990.0, 2015.0]);
    }

    #[test]
    fn malformed_axes_are_rejected() {
        assert!(matches!(
            AgeTimeGrid::new(&[], &[2000.0]),
            Err(GridError::InvalidGridSpec { axis: "age", .. })
        ));
        assert!(matches!(
            AgeTimeGrid::new(&[0.0], &[2000.0, f64::NAN]),
            Err(GridError::InvalidGridSpec { axis: "time", .. })
        ));
        assert!(AgeTimeGrid::new(&[1.0, 1.0 + 1e-12], &[2000.0]).is_err());
    }

    #[test]
    fn smooth_grid_slots_cover_their_cross_products() {
        let grid = AgeTimeGrid::new(&[0.0, 50.0, 100.0], &[1990.0, 2015.0]).unwrap();
        let smooth = SmoothGrid::new(grid, &gaussian(), &gaussian(), &gaussian());
        assert_eq!(smooth.value().shape(), (3, 2));
        assert_eq!(smooth.dage().shape(), (2, 2));
        assert_eq!(smooth.dtime().shape(), (3, 1));
        assert_eq!(
            smooth.dage().keys(),
            vec![(0.0, 1990.0), (0.0, 2015.0), (50.0, 1990.0), (50.0, 2015.0)]
        );
        assert!(smooth.value().get(100.0, 2015.0).is_some());
        assert!(smooth.dtime().get(100.0, 2015.0).is_none());
    }

    #[test]
    fn single_node_takes_first_age_and_middle_time() {
        let grid = AgeTimeGrid::new(&[0.0, 50.0, 100.0], &[1990.0, 2000.0, 2010.0, 2015.0]).unwrap();
        let single = grid.single_node();
        assert_eq!(single.ages().to_vec(), vec![0.0]);
        assert_eq!(single.times().to_vec(), vec![2010.0]);

        let one = AgeTimeGrid::new(&[5.0], &[2000.0]).unwrap();
        assert_eq!(one.single_node(), one);
    }

    #[test]
    fn slots_are_read_by_kind() {
        let grid = AgeTimeGrid::new(&[0.0, 50.0], &[1990.0, 2015.0]).unwrap();
        let smooth = SmoothGrid::new(grid, &gaussian(), &gaussian(), &gaussian());
        assert_eq!(smooth.slot(PriorKind::Value), smooth.value());
        assert_eq!(smooth.slot(PriorKind::Dage).shape(), (1, 2));
        assert_eq!(smooth.slot(PriorKind::Dtime).shape(), (2, 1));
    }

    #[test]
    fn single_node_grid_has_empty_difference_slots() {
        let grid = AgeTimeGrid::new(&[0.0], &[2000.0]).unwrap();
        let smooth = SmoothGrid::new(grid, &gaussian(), &gaussian(), &gaussian());
        assert_eq!(smooth.node_count(), 1);
        assert!(smooth.dage().is_empty());
        assert!(smooth.dtime().is_empty());
    }
}
