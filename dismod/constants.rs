//! Fixed vocabularies shared with the Dismod-AT solver.
//!
//! The numeric ids are part of the solver's table layout and must never be
//! renumbered.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("'{value}' is not a known {vocabulary}.")]
pub struct UnknownName {
    pub vocabulary: &'static str,
    pub value: String,
}

/// The distributions supported by the solver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Density {
    Uniform,
    Gaussian,
    Laplace,
    Students,
    LogGaussian,
    LogLaplace,
    LogStudents,
}

impl Density {
    pub const ALL: [Density; 7] = [
        Density::Uniform,
        Density::Gaussian,
        Density::Laplace,
        Density::Students,
        Density::LogGaussian,
        Density::LogLaplace,
        Density::LogStudents,
    ];

    pub fn id(self) -> u8 {
        match self {
            Density::Uniform => 0,
            Density::Gaussian => 1,
            Density::Laplace => 2,
            Density::Students => 3,
            Density::LogGaussian => 4,
            Density::LogLaplace => 5,
            Density::LogStudents => 6,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Density::Uniform => "uniform",
            Density::Gaussian => "gaussian",
            Density::Laplace => "laplace",
            Density::Students => "students",
            Density::LogGaussian => "log_gaussian",
            Density::LogLaplace => "log_laplace",
            Density::LogStudents => "log_students",
        }
    }

    /// Log densities are evaluated on `ln(x + eta)` and need an offset.
    pub fn is_log(self) -> bool {
        matches!(
            self,
            Density::LogGaussian | Density::LogLaplace | Density::LogStudents
        )
    }
}

/// The five underlying rates of the compartmental model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rate {
    /// Initial prevalence at birth, as a fraction of one.
    Pini,
    /// Incidence of leaving susceptible to become diseased.
    Iota,
    /// Remission from disease to susceptible.
    Rho,
    /// Excess mortality.
    Chi,
    /// Other-cause mortality.
    Omega,
}

impl Rate {
    pub const ALL: [Rate; 5] = [Rate::Pini, Rate::Iota, Rate::Rho, Rate::Chi, Rate::Omega];

    pub fn id(self) -> u8 {
        match self {
            Rate::Pini => 0,
            Rate::Iota => 1,
            Rate::Rho => 2,
            Rate::Chi => 3,
            Rate::Omega => 4,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Rate::Pini => "pini",
            Rate::Iota => "iota",
            Rate::Rho => "rho",
            Rate::Chi => "chi",
            Rate::Omega => "omega",
        }
    }
}

impl fmt::Display for Rate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Rate {
    type Err = UnknownName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Rate::ALL
            .into_iter()
            .find(|rate| rate.name() == s)
            .ok_or_else(|| UnknownName {
                vocabulary: "rate",
                value: s.to_string(),
            })
    }
}

/// The kinds of covariate multiplier, named after the column they scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MulCovKind {
    /// Multiplies a rate value.
    #[serde(rename = "rate_value", alias = "alpha")]
    Alpha,
    /// Multiplies a measurement value.
    #[serde(rename = "meas_value", alias = "beta")]
    Beta,
    /// Multiplies a measurement standard deviation.
    #[serde(rename = "meas_std", alias = "gamma")]
    Gamma,
}

impl MulCovKind {
    pub fn group_name(self) -> &'static str {
        match self {
            MulCovKind::Alpha => "alpha",
            MulCovKind::Beta => "beta",
            MulCovKind::Gamma => "gamma",
        }
    }

    pub fn table_name(self) -> &'static str {
        match self {
            MulCovKind::Alpha => "rate_value",
            MulCovKind::Beta => "meas_value",
            MulCovKind::Gamma => "meas_std",
        }
    }
}

impl fmt::Display for MulCovKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.group_name())
    }
}

/// Every integrand the solver can fit or predict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Integrand {
    /// Incidence with susceptibles as the denominator. Corresponds to iota.
    Sincidence,
    /// Corresponds to rho.
    #[serde(rename = "remission")]
    Remission,
    /// Corresponds to chi.
    #[serde(rename = "mtexcess")]
    MtExcess,
    /// Corresponds to omega.
    #[serde(rename = "mtother")]
    MtOther,
    /// Mortality for those with the condition.
    #[serde(rename = "mtwith")]
    MtWith,
    /// Fraction of susceptibles out of the total population.
    #[serde(rename = "susceptible")]
    Susceptible,
    /// Fraction of the total population with the condition.
    #[serde(rename = "withC")]
    WithC,
    /// Fraction of those alive with the condition.
    #[serde(rename = "prevalence")]
    Prevalence,
    /// Incidence over susceptibles and with-condition.
    Tincidence,
    /// Cause-specific mortality.
    #[serde(rename = "mtspecific")]
    MtSpecific,
    /// All-cause mortality.
    #[serde(rename = "mtall")]
    MtAll,
    /// Standardized mortality ratio.
    #[serde(rename = "mtstandard")]
    MtStandard,
    #[serde(rename = "relrisk")]
    RelRisk,
}

impl Integrand {
    pub const ALL: [Integrand; 13] = [
        Integrand::Sincidence,
        Integrand::Remission,
        Integrand::MtExcess,
        Integrand::MtOther,
        Integrand::MtWith,
        Integrand::Susceptible,
        Integrand::WithC,
        Integrand::Prevalence,
        Integrand::Tincidence,
        Integrand::MtSpecific,
        Integrand::MtAll,
        Integrand::MtStandard,
        Integrand::RelRisk,
    ];

    pub fn id(self) -> u8 {
        match self {
            Integrand::Sincidence => 0,
            Integrand::Remission => 1,
            Integrand::MtExcess => 2,
            Integrand::MtOther => 3,
            Integrand::MtWith => 4,
            Integrand::Susceptible => 5,
            Integrand::WithC => 6,
            Integrand::Prevalence => 7,
            Integrand::Tincidence => 8,
            Integrand::MtSpecific => 9,
            Integrand::MtAll => 10,
            Integrand::MtStandard => 11,
            Integrand::RelRisk => 12,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Integrand::Sincidence => "Sincidence",
            Integrand::Remission => "remission",
            Integrand::MtExcess => "mtexcess",
            Integrand::MtOther => "mtother",
            Integrand::MtWith => "mtwith",
            Integrand::Susceptible => "susceptible",
            Integrand::WithC => "withC",
            Integrand::Prevalence => "prevalence",
            Integrand::Tincidence => "Tincidence",
            Integrand::MtSpecific => "mtspecific",
            Integrand::MtAll => "mtall",
            Integrand::MtStandard => "mtstandard",
            Integrand::RelRisk => "relrisk",
        }
    }

    /// The weight an integrand is averaged with, determined by the
    /// denominator its events are counted against.
    pub fn weight(self) -> WeightKind {
        match self {
            Integrand::Sincidence => WeightKind::Susceptible,
            Integrand::Remission | Integrand::MtExcess | Integrand::MtWith => {
                WeightKind::WithCondition
            }
            Integrand::MtOther
            | Integrand::Prevalence
            | Integrand::Tincidence
            | Integrand::MtSpecific
            | Integrand::MtAll => WeightKind::Total,
            Integrand::Susceptible
            | Integrand::WithC
            | Integrand::MtStandard
            | Integrand::RelRisk => WeightKind::Constant,
        }
    }
}

impl fmt::Display for Integrand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Integrand {
    type Err = UnknownName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Integrand::ALL
            .into_iter()
            .find(|integrand| integrand.name() == s)
            .ok_or_else(|| UnknownName {
                vocabulary: "integrand",
                value: s.to_string(),
            })
    }
}

/// Weights are bilinear functions of age and time used to average rates over
/// age and time intervals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeightKind {
    /// One everywhere.
    Constant,
    Susceptible,
    WithCondition,
    Total,
}

impl WeightKind {
    pub fn id(self) -> u8 {
        match self {
            WeightKind::Constant => 0,
            WeightKind::Susceptible => 1,
            WeightKind::WithCondition => 2,
            WeightKind::Total => 3,
        }
    }
}

/// The three prior slots attached to every smoothing grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorKind {
    Value,
    Dage,
    Dtime,
}

impl PriorKind {
    pub fn id(self) -> u8 {
        match self {
            PriorKind::Value => 0,
            PriorKind::Dage => 1,
            PriorKind::Dtime => 2,
        }
    }
}

impl fmt::Display for PriorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PriorKind::Value => "value",
            PriorKind::Dage => "dage",
            PriorKind::Dtime => "dtime",
        })
    }
}
