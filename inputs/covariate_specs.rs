//! Covariates entering the estimation problem and the multipliers that
//! attach them to rates and integrands.

use crate::constants::{Integrand, MulCovKind, Rate};
use crate::settings::{CountryCovariate, SmoothingSpec};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CovariateError {
    #[error("Covariate '{covariate}' targets '{target}', which is not a valid {expected} for a {group} multiplier.")]
    InvalidTarget {
        covariate: String,
        target: String,
        group: MulCovKind,
        expected: &'static str,
    },
    #[error("Covariate '{covariate}' is declared with references {first} and {second}.")]
    ConflictingReference {
        covariate: String,
        first: f64,
        second: f64,
    },
}

/// A covariate column of the estimation problem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Covariate {
    pub name: String,
    pub reference: f64,
    pub max_difference: Option<f64>,
}

/// Identifies a multiplier within its group: the covariate and the rate or
/// integrand it multiplies.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CovariateKey {
    pub covariate: String,
    pub target: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CovariateMultiplier {
    pub group: MulCovKind,
    pub key: CovariateKey,
    pub grid_spec: SmoothingSpec,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CovariateSpecs {
    pub covariate_list: Vec<Covariate>,
    pub covariate_multipliers: Vec<CovariateMultiplier>,
}

impl CovariateSpecs {
    /// Collects covariates in first-seen order, one per name, and one
    /// multiplier per declaration.
    pub fn from_settings(declared: &[CountryCovariate]) -> Result<Self, CovariateError> {
        let mut specs = CovariateSpecs::default();
        for entry in declared {
            check_target(entry)?;
            match specs
                .covariate_list
                .iter()
                .find(|c| c.name == entry.covariate_name)
            {
                Some(existing) if existing.reference != entry.reference => {
                    return Err(CovariateError::ConflictingReference {
                        covariate: entry.covariate_name.clone(),
                        first: existing.reference,
                        second: entry.reference,
                    });
                }
                Some(_) => {}
                None => specs.covariate_list.push(Covariate {
                    name: entry.covariate_name.clone(),
                    reference: entry.reference,
                    max_difference: entry.max_difference,
                }),
            }
            specs.covariate_multipliers.push(CovariateMultiplier {
                group: entry.mulcov_type,
                key: CovariateKey {
                    covariate: entry.covariate_name.clone(),
                    target: entry.target.clone(),
                },
                grid_spec: entry.smooth.clone(),
            });
        }
        log::debug!(
            "Built {} covariates and {} multipliers",
            specs.covariate_list.len(),
            specs.covariate_multipliers.len()
        );
        Ok(specs)
    }
}

fn check_target(entry: &CountryCovariate) -> Result<(), CovariateError> {
    let (valid, expected) = match entry.mulcov_type {
        MulCovKind::Alpha => (entry.target.parse::<Rate>().is_ok(), "rate"),
        MulCovKind::Beta | MulCovKind::Gamma => {
            (entry.target.parse::<Integrand>().is_ok(), "integrand")
        }
    };
    if valid {
        Ok(())
    } else {
        Err(CovariateError::InvalidTarget {
            covariate: entry.covariate_name.clone(),
            target: entry.target.clone(),
            group: entry.mulcov_type,
            expected,
        })
    }
}
