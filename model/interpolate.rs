//! Step functions over age and time built from rectangular data, and the
//! constraint grids derived from them.

use crate::grid::{AgeTimeGrid, ConstraintGrid};
use ndarray::Array2;
use std::cmp::Ordering;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum InterpolationError {
    #[error("No rows were supplied for {0}.")]
    EmptyDataset(String),

    #[error("No row covers age {age}, time {time}; the nearest age interval [{age_lower}, {age_upper}] and time interval [{time_lower}, {time_upper}] were never observed together.")]
    MissingCoverage {
        age: f64,
        time: f64,
        age_lower: f64,
        age_upper: f64,
        time_lower: f64,
        time_upper: f64,
    },

    #[error("Row in {label} has {axis} interval [{lower}, {upper}]; bounds must be finite with lower <= upper.")]
    InvalidInterval {
        label: String,
        axis: &'static str,
        lower: f64,
        upper: f64,
    },

    #[error("Rate at age {age}, time {time} is {value}; a log ratio needs positive rates.")]
    NonPositiveRate { age: f64, time: f64, value: f64 },
}

/// One observation over an age/time rectangle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RectangularRow {
    pub age_lower: f64,
    pub age_upper: f64,
    pub time_lower: f64,
    pub time_upper: f64,
    pub value: f64,
}

/// A function of age and time that may fail to evaluate.
pub trait RateFunction {
    fn value_at(&self, age: f64, time: f64) -> Result<f64, InterpolationError>;
}

impl<F> RateFunction for F
where
    F: Fn(f64, f64) -> Result<f64, InterpolationError>,
{
    fn value_at(&self, age: f64, time: f64) -> Result<f64, InterpolationError> {
        self(age, time)
    }
}

/// A piecewise-constant surface over the distinct age and time intervals of
/// a rectangular dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct RectangularData {
    age_intervals: Vec<(f64, f64)>,
    time_intervals: Vec<(f64, f64)>,
    /// `cells[[a, t]]` is the value observed over age interval `a` and time
    /// interval `t`, if any row covered that pair.
    cells: Array2<Option<f64>>,
}

impl RectangularData {
    /// `label` names the dataset in error messages, e.g. the location.
    pub fn from_rows(rows: &[RectangularRow], label: &str) -> Result<Self, InterpolationError> {
        if rows.is_empty() {
            return Err(InterpolationError::EmptyDataset(label.to_string()));
        }
        for row in rows {
            check_interval(label, "age", row.age_lower, row.age_upper)?;
            check_interval(label, "time", row.time_lower, row.time_upper)?;
        }
        let age_intervals = distinct_intervals(rows.iter().map(|r| (r.age_lower, r.age_upper)));
        let time_intervals = distinct_intervals(rows.iter().map(|r| (r.time_lower, r.time_upper)));

        let mut cells = Array2::from_elem((age_intervals.len(), time_intervals.len()), None);
        for row in rows {
            let a = interval_index(&age_intervals, label, "age", (row.age_lower, row.age_upper))?;
            let t = interval_index(&time_intervals, label, "time", (row.time_lower, row.time_upper))?;
            let cell = &mut cells[(a, t)];
            if cell.is_none() {
                *cell = Some(row.value);
            } else {
                log::debug!(
                    "Ignoring repeated row for age [{}, {}], time [{}, {}] in {label}",
                    row.age_lower,
                    row.age_upper,
                    row.time_lower,
                    row.time_upper
                );
            }
        }
        Ok(Self {
            age_intervals,
            time_intervals,
            cells,
        })
    }
}

impl RateFunction for RectangularData {
    fn value_at(&self, age: f64, time: f64) -> Result<f64, InterpolationError> {
        let a = bracket(&self.age_intervals, age);
        let t = bracket(&self.time_intervals, time);
        self.cells[(a, t)].ok_or_else(|| {
            let (age_lower, age_upper) = self.age_intervals[a];
            let (time_lower, time_upper) = self.time_intervals[t];
            InterpolationError::MissingCoverage {
                age,
                time,
                age_lower,
                age_upper,
                time_lower,
                time_upper,
            }
        })
    }
}

fn interval_order(x: &(f64, f64), y: &(f64, f64)) -> Ordering {
    x.0.total_cmp(&y.0).then(x.1.total_cmp(&y.1))
}

fn distinct_intervals(intervals: impl Iterator<Item = (f64, f64)>) -> Vec<(f64, f64)> {
    let mut out: Vec<(f64, f64)> = intervals.collect();
    out.sort_by(interval_order);
    out.dedup_by(|x, y| interval_order(x, y).is_eq());
    out
}

fn check_interval(
    label: &str,
    axis: &'static str,
    lower: f64,
    upper: f64,
) -> Result<(), InterpolationError> {
    if lower.is_finite() && upper.is_finite() && lower <= upper {
        Ok(())
    } else {
        Err(InterpolationError::InvalidInterval {
            label: label.to_string(),
            axis,
            lower,
            upper,
        })
    }
}

fn interval_index(
    intervals: &[(f64, f64)],
    label: &str,
    axis: &'static str,
    interval: (f64, f64),
) -> Result<usize, InterpolationError> {
    intervals
        .binary_search_by(|candidate| interval_order(candidate, &interval))
        .map_err(|_| InterpolationError::InvalidInterval {
            label: label.to_string(),
            axis,
            lower: interval.0,
            upper: interval.1,
        })
}

/// The first interval containing `x`, bounds included, or else the nearest
/// one. Ties go to the lower index.
fn bracket(intervals: &[(f64, f64)], x: f64) -> usize {
    if let Some(inside) = intervals.iter().position(|&(lo, hi)| lo <= x && x <= hi) {
        return inside;
    }
    let distance = |&(lo, hi): &(f64, f64)| if x < lo { lo - x } else { x - hi };
    let mut best = 0;
    for (i, interval) in intervals.iter().enumerate().skip(1) {
        if distance(interval) < distance(&intervals[best]) {
            best = i;
        }
    }
    best
}

/// Evaluates `rate` at every node of `grid` and stores the results as fixed
/// values.
pub fn constraint_from_function<R>(
    grid: &AgeTimeGrid,
    rate: &R,
) -> Result<ConstraintGrid, InterpolationError>
where
    R: RateFunction + ?Sized,
{
    let (n_age, n_time) = grid.shape();
    let mut values = Array2::zeros((n_age, n_time));
    for (a, &age) in grid.ages().iter().enumerate() {
        for (t, &time) in grid.times().iter().enumerate() {
            values[(a, t)] = rate.value_at(age, time)?;
        }
    }
    Ok(ConstraintGrid::from_values(grid.clone(), values))
}

/// A child's random effect relative to its parent: `ln(child / parent)` at
/// one point.
pub fn child_random_effect(
    child: &dyn RateFunction,
    parent: &dyn RateFunction,
    age: f64,
    time: f64,
) -> Result<f64, InterpolationError> {
    let child_rate = positive_rate(child, age, time)?;
    let parent_rate = positive_rate(parent, age, time)?;
    Ok((child_rate / parent_rate).ln())
}

fn positive_rate(rate: &dyn RateFunction, age: f64, time: f64) -> Result<f64, InterpolationError> {
    let value = rate.value_at(age, time)?;
    if value > 0.0 {
        Ok(value)
    } else {
        Err(InterpolationError::NonPositiveRate { age, time, value })
    }
}
