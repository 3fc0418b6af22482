//! # Model Settings
//!
//! The user-facing description of a cascade model, read from a TOML file.
//! Every smoothing (rates, random effects, covariate multipliers) shares the
//! same `SmoothingSpec` form; turning those forms into concrete grids is the
//! job of `crate::grid_spec`.

use crate::constants::{Density, MulCovKind, PriorKind, Rate};
use crate::inputs::locations::LocationId;
use crate::priors::{Distribution, PriorError, PriorNode};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Failed to read settings file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML settings: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Rate '{0}' has more than one smoothing declared.")]
    DuplicateRate(Rate),
}

/// A prior as written in the settings: a density name plus whichever
/// parameters that density uses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorSpec {
    pub density: Density,
    #[serde(default)]
    pub mean: Option<f64>,
    #[serde(default)]
    pub std: Option<f64>,
    #[serde(default)]
    pub nu: Option<f64>,
    #[serde(default)]
    pub eta: Option<f64>,
    #[serde(default)]
    pub lower: Option<f64>,
    #[serde(default)]
    pub upper: Option<f64>,
}

impl PriorSpec {
    /// An unbounded, uninformative prior.
    pub fn uniform() -> Self {
        Self {
            density: Density::Uniform,
            mean: None,
            std: None,
            nu: None,
            eta: None,
            lower: None,
            upper: None,
        }
    }

    pub fn gaussian(mean: f64, std: f64) -> Self {
        Self {
            density: Density::Gaussian,
            mean: Some(mean),
            std: Some(std),
            ..Self::uniform()
        }
    }

    pub fn with_bounds(mut self, lower: f64, upper: f64) -> Self {
        self.lower = Some(lower);
        self.upper = Some(upper);
        self
    }

    /// Builds the node prior, checking that every parameter the density
    /// needs was supplied.
    pub fn to_prior(&self) -> Result<PriorNode, PriorError> {
        let density = self.density.name();
        let require = |value: Option<f64>, name: &str| {
            value.ok_or_else(|| PriorError::InvalidPrior {
                density,
                reason: format!("missing required parameter '{name}'"),
            })
        };
        let mean = match self.density {
            // The mean of a uniform prior is only a starting value.
            Density::Uniform => self.mean.unwrap_or_else(|| self.default_uniform_mean()),
            _ => require(self.mean, "mean")?,
        };

        let distribution = match self.density {
            Density::Uniform => Distribution::Uniform { mean },
            Density::Gaussian => Distribution::Gaussian {
                mean,
                std: require(self.std, "std")?,
            },
            Density::Laplace => Distribution::Laplace {
                mean,
                std: require(self.std, "std")?,
            },
            Density::Students => Distribution::Students {
                mean,
                std: require(self.std, "std")?,
                nu: require(self.nu, "nu")?,
            },
            Density::LogGaussian => Distribution::LogGaussian {
                mean,
                std: require(self.std, "std")?,
                eta: require(self.eta, "eta")?,
            },
            Density::LogLaplace => Distribution::LogLaplace {
                mean,
                std: require(self.std, "std")?,
                eta: require(self.eta, "eta")?,
            },
            Density::LogStudents => Distribution::LogStudents {
                mean,
                std: require(self.std, "std")?,
                nu: require(self.nu, "nu")?,
                eta: require(self.eta, "eta")?,
            },
        };
        PriorNode::new(distribution, self.lower, self.upper)
    }

    fn default_uniform_mean(&self) -> f64 {
        match (self.lower, self.upper) {
            (Some(lo), Some(hi)) if lo.is_finite() && hi.is_finite() => 0.5 * (lo + hi),
            (lo, hi) => 0.0_f64
                .max(lo.unwrap_or(f64::NEG_INFINITY))
                .min(hi.unwrap_or(f64::INFINITY)),
        }
    }
}

/// Replaces the prior of one slot over an age/time window. Missing window
/// edges are unbounded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorOverride {
    pub prior_type: PriorKind,
    #[serde(default)]
    pub age_lower: Option<f64>,
    #[serde(default)]
    pub age_upper: Option<f64>,
    #[serde(default)]
    pub time_lower: Option<f64>,
    #[serde(default)]
    pub time_upper: Option<f64>,
    pub prior: PriorSpec,
}

impl PriorOverride {
    pub fn covers(&self, age: f64, time: f64) -> bool {
        self.age_lower.is_none_or(|lo| age >= lo)
            && self.age_upper.is_none_or(|hi| age <= hi)
            && self.time_lower.is_none_or(|lo| time >= lo)
            && self.time_upper.is_none_or(|hi| time <= hi)
    }
}

fn default_true() -> bool {
    true
}

/// The settings form of a smoothing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmoothingSpec {
    /// When false the quantity does not vary over age or time and the
    /// smoothing collapses to a single node.
    #[serde(default = "default_true")]
    pub age_time_specific: bool,
    #[serde(default)]
    pub age_grid: Option<Vec<f64>>,
    #[serde(default)]
    pub time_grid: Option<Vec<f64>>,
    pub value: PriorSpec,
    #[serde(default = "PriorSpec::uniform")]
    pub dage: PriorSpec,
    #[serde(default = "PriorSpec::uniform")]
    pub dtime: PriorSpec,
    #[serde(default)]
    pub detail: Vec<PriorOverride>,
}

impl SmoothingSpec {
    /// A smoothing on the default grid with the given value prior and
    /// uniform difference priors.
    pub fn with_value(value: PriorSpec) -> Self {
        Self {
            age_time_specific: true,
            age_grid: None,
            time_grid: None,
            value,
            dage: PriorSpec::uniform(),
            dtime: PriorSpec::uniform(),
            detail: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateSmoothing {
    pub rate: Rate,
    pub smooth: SmoothingSpec,
}

/// A random effect on a rate, for one child location or, without a
/// location, shared by every child.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomEffectSmoothing {
    pub rate: Rate,
    #[serde(default)]
    pub location: Option<LocationId>,
    pub smooth: SmoothingSpec,
}

/// A country-level covariate and the multiplier it enters the model through.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountryCovariate {
    pub covariate_name: String,
    pub mulcov_type: MulCovKind,
    /// The rate (for `rate_value`) or integrand (otherwise) being multiplied.
    pub target: String,
    #[serde(default)]
    pub reference: f64,
    #[serde(default)]
    pub max_difference: Option<f64>,
    pub smooth: SmoothingSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelSettings {
    #[serde(default)]
    pub default_age_grid: Option<Vec<f64>>,
    #[serde(default)]
    pub default_time_grid: Option<Vec<f64>>,
    /// Fix other-cause mortality from data instead of estimating it.
    #[serde(default)]
    pub constrain_omega: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub model: ModelSettings,
    #[serde(default)]
    pub rate: Vec<RateSmoothing>,
    #[serde(default)]
    pub random_effect: Vec<RandomEffectSmoothing>,
    #[serde(default)]
    pub country_covariate: Vec<CountryCovariate>,
}

impl Settings {
    pub fn from_toml_str(text: &str) -> Result<Self, SettingsError> {
        let settings: Settings = toml::from_str(text)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let text = fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    fn validate(&self) -> Result<(), SettingsError> {
        let mut seen = Vec::with_capacity(self.rate.len());
        for smoothing in &self.rate {
            if seen.contains(&smoothing.rate) {
                return Err(SettingsError::DuplicateRate(smoothing.rate));
            }
            seen.push(smoothing.rate);
        }
        Ok(())
    }

    /// The rates the model treats as nonzero, in declaration order.
    pub fn nonzero_rates(&self) -> Vec<Rate> {
        self.rate.iter().map(|smoothing| smoothing.rate).collect()
    }
}
