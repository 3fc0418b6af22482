//! Prior distributions attached to grid nodes, and their maximum-likelihood
//! re-estimation from empirical draws.

use crate::constants::Density;
use ndarray::ArrayView1;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Smallest standard deviation a fitted prior may carry.
pub const STD_FLOOR: f64 = 1e-10;

const STUDENTS_MAX_ITERATIONS: usize = 500;
const STUDENTS_TOLERANCE: f64 = 1e-10;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PriorError {
    #[error("Invalid {density} prior: {reason}")]
    InvalidPrior { density: &'static str, reason: String },

    #[error("Cannot fit a {0} prior to an empty set of draws.")]
    EmptyDraws(&'static str),

    #[error("Draws for a {0} prior contain NaN or infinite values.")]
    NonFiniteDraws(&'static str),

    #[error("A {density} prior with eta = {eta} cannot take the log of draw {draw}.")]
    NonPositiveLogArgument {
        density: &'static str,
        eta: f64,
        draw: f64,
    },
}

/// A distribution family with the parameters it needs.
///
/// `std` of the log families is measured on the `ln(x + eta)` scale.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "density", rename_all = "snake_case")]
pub enum Distribution {
    Uniform { mean: f64 },
    Gaussian { mean: f64, std: f64 },
    Laplace { mean: f64, std: f64 },
    Students { mean: f64, std: f64, nu: f64 },
    LogGaussian { mean: f64, std: f64, eta: f64 },
    LogLaplace { mean: f64, std: f64, eta: f64 },
    LogStudents { mean: f64, std: f64, nu: f64, eta: f64 },
}

impl Distribution {
    pub fn density(&self) -> Density {
        match self {
            Distribution::Uniform { .. } => Density::Uniform,
            Distribution::Gaussian { .. } => Density::Gaussian,
            Distribution::Laplace { .. } => Density::Laplace,
            Distribution::Students { .. } => Density::Students,
            Distribution::LogGaussian { .. } => Density::LogGaussian,
            Distribution::LogLaplace { .. } => Density::LogLaplace,
            Distribution::LogStudents { .. } => Density::LogStudents,
        }
    }

    pub fn mean(&self) -> f64 {
        match *self {
            Distribution::Uniform { mean }
            | Distribution::Gaussian { mean, .. }
            | Distribution::Laplace { mean, .. }
            | Distribution::Students { mean, .. }
            | Distribution::LogGaussian { mean, .. }
            | Distribution::LogLaplace { mean, .. }
            | Distribution::LogStudents { mean, .. } => mean,
        }
    }

    /// `None` for the uniform family, which has no scale.
    pub fn std(&self) -> Option<f64> {
        match *self {
            Distribution::Uniform { .. } => None,
            Distribution::Gaussian { std, .. }
            | Distribution::Laplace { std, .. }
            | Distribution::Students { std, .. }
            | Distribution::LogGaussian { std, .. }
            | Distribution::LogLaplace { std, .. }
            | Distribution::LogStudents { std, .. } => Some(std),
        }
    }

    pub fn nu(&self) -> Option<f64> {
        match *self {
            Distribution::Students { nu, .. } | Distribution::LogStudents { nu, .. } => Some(nu),
            _ => None,
        }
    }

    pub fn eta(&self) -> Option<f64> {
        match *self {
            Distribution::LogGaussian { eta, .. }
            | Distribution::LogLaplace { eta, .. }
            | Distribution::LogStudents { eta, .. } => Some(eta),
            _ => None,
        }
    }

    fn with_mean(self, value: f64) -> Self {
        let mut out = self;
        match &mut out {
            Distribution::Uniform { mean }
            | Distribution::Gaussian { mean, .. }
            | Distribution::Laplace { mean, .. }
            | Distribution::Students { mean, .. }
            | Distribution::LogGaussian { mean, .. }
            | Distribution::LogLaplace { mean, .. }
            | Distribution::LogStudents { mean, .. } => *mean = value,
        }
        out
    }
}

/// A prior on one grid node: a distribution plus optional bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorNode {
    distribution: Distribution,
    lower: Option<f64>,
    upper: Option<f64>,
}

impl PriorNode {
    pub fn new(
        distribution: Distribution,
        lower: Option<f64>,
        upper: Option<f64>,
    ) -> Result<Self, PriorError> {
        let density = distribution.density().name();
        let invalid = |reason: String| PriorError::InvalidPrior { density, reason };

        if let (Some(lo), Some(hi)) = (lower, upper) {
            if lo > hi {
                return Err(invalid(format!("lower bound {lo} exceeds upper bound {hi}")));
            }
        }
        let mean = distribution.mean();
        if !mean.is_finite() {
            return Err(invalid(format!("mean {mean} is not finite")));
        }
        if lower.is_some_and(|lo| mean < lo) || upper.is_some_and(|hi| mean > hi) {
            return Err(invalid(format!(
                "mean {mean} lies outside the bounds [{}, {}]",
                fmt_bound(lower, f64::NEG_INFINITY),
                fmt_bound(upper, f64::INFINITY)
            )));
        }
        if let Some(std) = distribution.std() {
            if !(std.is_finite() && std > 0.0) {
                return Err(invalid(format!("standard deviation {std} must be positive")));
            }
        }
        if let Some(nu) = distribution.nu() {
            if !(nu.is_finite() && nu > 2.0) {
                return Err(invalid(format!("degrees of freedom {nu} must exceed 2")));
            }
        }
        if let Some(eta) = distribution.eta() {
            if !eta.is_finite() || mean + eta <= 0.0 {
                return Err(invalid(format!("offset eta {eta} must make mean + eta positive")));
            }
        }
        Ok(Self {
            distribution,
            lower,
            upper,
        })
    }

    pub fn distribution(&self) -> &Distribution {
        &self.distribution
    }

    pub fn density(&self) -> Density {
        self.distribution.density()
    }

    pub fn mean(&self) -> f64 {
        self.distribution.mean()
    }

    pub fn std(&self) -> Option<f64> {
        self.distribution.std()
    }

    pub fn lower(&self) -> Option<f64> {
        self.lower
    }

    pub fn upper(&self) -> Option<f64> {
        self.upper
    }

    /// Maximum-likelihood fit of this prior's own family to `draws`.
    ///
    /// The family, degrees of freedom, log offset and bounds are carried over;
    /// only location and scale are re-estimated. The fitted mean is clamped
    /// into the bounds.
    pub fn fit(&self, draws: ArrayView1<'_, f64>) -> Result<PriorNode, PriorError> {
        let density = self.density().name();
        if draws.is_empty() {
            return Err(PriorError::EmptyDraws(density));
        }
        if draws.iter().any(|v| !v.is_finite()) {
            return Err(PriorError::NonFiniteDraws(density));
        }
        let values: Vec<f64> = draws.iter().copied().collect();

        let fitted = match self.distribution {
            Distribution::Uniform { .. } => Distribution::Uniform {
                mean: internal::mean(&values),
            },
            Distribution::Gaussian { .. } => {
                let (mean, std) = internal::gaussian_mle(&values);
                Distribution::Gaussian { mean, std }
            }
            Distribution::Laplace { .. } => {
                let (mean, std) = internal::laplace_mle(&values);
                Distribution::Laplace { mean, std }
            }
            Distribution::Students { nu, .. } => {
                let (mean, std) = internal::students_mle(&values, nu);
                Distribution::Students { mean, std, nu }
            }
            Distribution::LogGaussian { eta, .. } => {
                let logs = internal::log_offset(&values, eta, density)?;
                let (center, std) = internal::gaussian_mle(&logs);
                Distribution::LogGaussian {
                    mean: center.exp() - eta,
                    std,
                    eta,
                }
            }
            Distribution::LogLaplace { eta, .. } => {
                let logs = internal::log_offset(&values, eta, density)?;
                let (center, std) = internal::laplace_mle(&logs);
                Distribution::LogLaplace {
                    mean: center.exp() - eta,
                    std,
                    eta,
                }
            }
            Distribution::LogStudents { nu, eta, .. } => {
                let logs = internal::log_offset(&values, eta, density)?;
                let (center, std) = internal::students_mle(&logs, nu);
                Distribution::LogStudents {
                    mean: center.exp() - eta,
                    std,
                    nu,
                    eta,
                }
            }
        };

        let clamped = self.clamp_to_bounds(fitted.mean());
        Ok(PriorNode {
            distribution: fitted.with_mean(clamped),
            lower: self.lower,
            upper: self.upper,
        })
    }

    fn clamp_to_bounds(&self, value: f64) -> f64 {
        let lo = self.lower.unwrap_or(f64::NEG_INFINITY);
        let hi = self.upper.unwrap_or(f64::INFINITY);
        value.max(lo).min(hi)
    }
}

fn fmt_bound(bound: Option<f64>, open: f64) -> f64 {
    bound.unwrap_or(open)
}

mod internal {
    use super::{PriorError, STD_FLOOR, STUDENTS_MAX_ITERATIONS, STUDENTS_TOLERANCE};

    pub(super) fn mean(values: &[f64]) -> f64 {
        values.iter().sum::<f64>() / values.len() as f64
    }

    pub(super) fn median(values: &[f64]) -> f64 {
        let mut sorted = values.to_vec();
        sorted.sort_by(f64::total_cmp);
        let mid = sorted.len() / 2;
        if sorted.len() % 2 == 0 {
            0.5 * (sorted[mid - 1] + sorted[mid])
        } else {
            sorted[mid]
        }
    }

    /// Sample mean and population (divide by n) standard deviation.
    pub(super) fn gaussian_mle(values: &[f64]) -> (f64, f64) {
        let center = mean(values);
        let variance =
            values.iter().map(|v| (v - center).powi(2)).sum::<f64>() / values.len() as f64;
        (center, variance.sqrt().max(STD_FLOOR))
    }

    /// Median and the standard deviation `sqrt(2) * b` of the Laplace scale
    /// `b`, whose MLE is the mean absolute deviation about the median.
    pub(super) fn laplace_mle(values: &[f64]) -> (f64, f64) {
        let center = median(values);
        let scale = values.iter().map(|v| (v - center).abs()).sum::<f64>() / values.len() as f64;
        (center, (std::f64::consts::SQRT_2 * scale).max(STD_FLOOR))
    }

    /// Normal-consistent median absolute deviation, used to start the
    /// Student-t iterations away from outliers.
    fn robust_scale(values: &[f64], center: f64) -> f64 {
        let deviations: Vec<f64> = values.iter().map(|v| (v - center).abs()).collect();
        1.482_602_218_505_602 * median(&deviations)
    }

    /// Location and scale of a Student-t with fixed degrees of freedom, by
    /// iteratively reweighted expectation-maximisation.
    pub(super) fn students_mle(values: &[f64], nu: f64) -> (f64, f64) {
        let n = values.len() as f64;
        let mut center = median(values);
        let mut scale = robust_scale(values, center);
        if scale <= STD_FLOOR {
            scale = gaussian_mle(values).1;
        }
        if scale <= STD_FLOOR {
            return (center, STD_FLOOR);
        }

        for iteration in 0..STUDENTS_MAX_ITERATIONS {
            let weights: Vec<f64> = values
                .iter()
                .map(|v| {
                    let z = (v - center) / scale;
                    (nu + 1.0) / (nu + z * z)
                })
                .collect();
            let weight_sum: f64 = weights.iter().sum();
            let next_center =
                weights.iter().zip(values).map(|(w, v)| w * v).sum::<f64>() / weight_sum;
            let next_scale = (weights
                .iter()
                .zip(values)
                .map(|(w, v)| w * (v - next_center).powi(2))
                .sum::<f64>()
                / n)
                .sqrt()
                .max(STD_FLOOR);

            let center_step = (next_center - center).abs();
            let scale_step = (next_scale - scale).abs();
            center = next_center;
            scale = next_scale;
            if center_step <= STUDENTS_TOLERANCE * (1.0 + center.abs())
                && scale_step <= STUDENTS_TOLERANCE * (1.0 + scale)
            {
                log::trace!("Students-t fit converged after {} iterations", iteration + 1);
                return (center, scale);
            }
        }
        log::debug!(
            "Students-t fit stopped at the iteration limit ({STUDENTS_MAX_ITERATIONS}); using the last estimate"
        );
        (center, scale)
    }

    pub(super) fn log_offset(
        values: &[f64],
        eta: f64,
        density: &'static str,
    ) -> Result<Vec<f64>, PriorError> {
        values
            .iter()
            .map(|&draw| {
                let shifted = draw + eta;
                if shifted > 0.0 {
                    Ok(shifted.ln())
                } else {
                    Err(PriorError::NonPositiveLogArgument { density, eta, draw })
                }
            })
            .collect()
    }
}
