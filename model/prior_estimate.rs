//! Re-estimation of grid priors from draws of an earlier fit.
//!
//! A fit higher in the location hierarchy yields posterior draws at every
//! grid node. Collapsing those draws into a same-family prior at each node is
//! how information passes down the cascade.

use crate::grid::PriorGrid;
use crate::priors::PriorError;
use itertools::iproduct;
use ndarray::{ArrayView1, ArrayView3, s};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EstimateError {
    #[error("Draws have shape {draws:?} but the grid has {ages} ages, {times} times and priors laid out as {priors:?}.")]
    ShapeMismatch {
        draws: (usize, usize, usize),
        ages: usize,
        times: usize,
        priors: (usize, usize),
    },

    #[error("Fitting the prior at age {age}, time {time} failed: {source}")]
    Prior {
        age: f64,
        time: f64,
        #[source]
        source: PriorError,
    },
}

/// Fits every prior of `grid_priors` to the matching slice
/// `draws[age, time, ..]` and returns the replacement grid.
///
/// `draws` is indexed by (age, time, sample), with axes the length of
/// `ages` and `times`, which must also match the prior grid's shape.
pub fn estimate_grid_parameters(
    grid_priors: &PriorGrid,
    draws: ArrayView3<'_, f64>,
    ages: ArrayView1<'_, f64>,
    times: ArrayView1<'_, f64>,
) -> Result<PriorGrid, EstimateError> {
    let (n_age, n_time, n_sample) = draws.dim();
    if n_age != ages.len() || n_time != times.len() || grid_priors.shape() != (n_age, n_time) {
        return Err(EstimateError::ShapeMismatch {
            draws: (n_age, n_time, n_sample),
            ages: ages.len(),
            times: times.len(),
            priors: grid_priors.shape(),
        });
    }

    let mut estimated = grid_priors.clone();
    for (a, t) in iproduct!(0..n_age, 0..n_time) {
        let (age, time) = (ages[a], times[t]);
        let prior = match grid_priors.at(a, t) {
            Some(prior) => prior,
            None => continue,
        };
        let fitted = prior
            .fit(draws.slice(s![a, t, ..]))
            .map_err(|source| EstimateError::Prior { age, time, source })?;
        estimated.set_at(a, t, fitted);
    }
    Ok(estimated)
}

/// Replaces `grid_priors` with its re-estimated form. On error the grid is
/// left untouched.
pub fn estimate_in_place(
    grid_priors: &mut PriorGrid,
    draws: ArrayView3<'_, f64>,
    ages: ArrayView1<'_, f64>,
    times: ArrayView1<'_, f64>,
) -> Result<(), EstimateError> {
    *grid_priors = estimate_grid_parameters(grid_priors, draws, ages, times)?;
    Ok(())
}
