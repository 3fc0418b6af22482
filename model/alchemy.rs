//! # Two-Level Model Assembly
//!
//! `Alchemy` turns settings into a populated `Model` for one parent location
//! and its immediate children:
//!
//! 1. Rate grids, with priors re-estimated from an earlier fit's draws when
//!    a prior update is supplied.
//! 2. Covariate-multiplier grids.
//! 3. Random-effect grids, either one per child or one shared by all.
//! 4. When omega is constrained, fixed omega grids for the parent and, if
//!    every child has mortality data, fixed omega random effects per child.
//!
//! An `Alchemy` is immutable once built, so the same instance can assemble
//! models for many parents at once.

use crate::constants::{PriorKind, Rate};
use crate::inputs::covariate_specs::CovariateSpecs;
use crate::inputs::locations::{LocationDag, LocationError, LocationId};
use crate::inputs::mortality::MortalityTable;
use crate::grid::{AgeTimeGrid, GridError, SmoothGrid};
use crate::grid_spec::{self, DefaultGrids, SpecError};
use crate::interpolate::{
    InterpolationError, RectangularData, child_random_effect, constraint_from_function,
};
use crate::model::{MulCovKey, Model, RandomEffectKey, RandomEffectLocation, RateGrid};
use crate::prior_estimate::{EstimateError, estimate_in_place};
use crate::settings::{ModelSettings, Settings, SmoothingSpec};
use ndarray::{Array1, Array3, s};
use rayon::prelude::*;
use std::collections::BTreeMap;
use thiserror::Error;

/// Default age grid: 0 to 100 in steps of 5.
const DEFAULT_AGE_RANGE: (f64, f64, usize) = (0.0, 100.0, 21);
/// Default time grid: 1990 to 2015 in steps of 5.
const DEFAULT_TIME_RANGE: (f64, f64, usize) = (1990.0, 2015.0, 6);

#[derive(Error, Debug)]
pub enum AlchemyError {
    #[error("Invalid default grid: {0}")]
    DefaultGrid(#[from] GridError),

    #[error("Smoothing for {what}: {source}")]
    Smoothing {
        what: String,
        #[source]
        source: SpecError,
    },

    #[error(transparent)]
    Location(#[from] LocationError),

    #[error(
        "Prior update for {rate} is on ages {found_ages:?} and times {found_times:?}, but the rate grid has ages {expected_ages:?} and times {expected_times:?}."
    )]
    PriorGridMismatch {
        rate: Rate,
        found_ages: Vec<f64>,
        found_times: Vec<f64>,
        expected_ages: Vec<f64>,
        expected_times: Vec<f64>,
    },

    #[error("Re-estimating the {slot} priors of {rate} failed: {source}")]
    Estimate {
        rate: Rate,
        slot: PriorKind,
        #[source]
        source: EstimateError,
    },

    #[error(
        "Random effect for {rate} does not have entries for all child locations, only {present:?} instead of {expected:?}."
    )]
    IncompleteRandomEffectCoverage {
        rate: Rate,
        present: Vec<RandomEffectLocation>,
        expected: Vec<LocationId>,
    },

    #[error("Need a mortality table in order to constrain omega.")]
    MissingMortalityData,

    #[error("No omega values for location {0}.")]
    MissingParentOmega(LocationId),

    #[error(transparent)]
    Interpolation(#[from] InterpolationError),
}

/// Posterior draws from an earlier fit, on the grid of one rate.
///
/// Each draw array is indexed by (age, time, sample); `dage` covers all but
/// the last age and `dtime` all but the last time.
#[derive(Debug, Clone, PartialEq)]
pub struct PriorUpdate {
    pub ages: Array1<f64>,
    pub times: Array1<f64>,
    pub value: Option<Array3<f64>>,
    pub dage: Option<Array3<f64>>,
    pub dtime: Option<Array3<f64>>,
}

pub type PriorUpdates = BTreeMap<Rate, PriorUpdate>;

/// One parent location to assemble, with its optional prior update.
#[derive(Debug, Clone, Copy)]
pub struct ModelRequest<'a> {
    pub parent_location: LocationId,
    pub update_prior: Option<&'a PriorUpdates>,
}

#[derive(Debug, Clone)]
pub struct Alchemy {
    settings: Settings,
    grids: DefaultGrids,
}

impl Alchemy {
    pub fn new(settings: Settings) -> Result<Self, AlchemyError> {
        let grids = DefaultGrids::new(construct_age_time_grid(&settings.model)?);
        log::debug!(
            "Default grid has {} ages and {} times",
            grids.age_time.ages().len(),
            grids.age_time.times().len()
        );
        Ok(Self { settings, grids })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn default_grids(&self) -> &DefaultGrids {
        &self.grids
    }

    pub fn get_smoothing_grid(&self, spec: &SmoothingSpec) -> Result<SmoothGrid, SpecError> {
        grid_spec::resolve(&self.grids.age_time, &self.grids.single_age_time, spec)
    }

    /// Every declared rate with its freshly resolved smoothing.
    pub fn get_all_rates_grids(&self) -> Result<BTreeMap<Rate, SmoothGrid>, AlchemyError> {
        self.settings
            .rate
            .iter()
            .map(|smoothing| {
                self.rate_smoothing(smoothing.rate, &smoothing.smooth)
                    .map(|grid| (smoothing.rate, grid))
            })
            .collect()
    }

    fn rate_smoothing(&self, rate: Rate, spec: &SmoothingSpec) -> Result<SmoothGrid, AlchemyError> {
        self.get_smoothing_grid(spec)
            .map_err(|source| AlchemyError::Smoothing {
                what: format!("rate {rate}"),
                source,
            })
    }

    /// Builds the model for `parent_location` and its immediate children.
    pub fn construct_two_level_model(
        &self,
        location_dag: &LocationDag,
        parent_location: LocationId,
        covariate_specs: &CovariateSpecs,
        mortality: Option<&MortalityTable>,
        update_prior: Option<&PriorUpdates>,
    ) -> Result<Model, AlchemyError> {
        let children = location_dag.children(parent_location)?;
        let mut nonzero_rates = self.settings.nonzero_rates();
        if self.settings.model.constrain_omega && !nonzero_rates.contains(&Rate::Omega) {
            nonzero_rates.push(Rate::Omega);
        }
        let mut model = Model::new(
            parent_location,
            children,
            covariate_specs.covariate_list.clone(),
            nonzero_rates,
        );
        log::info!(
            "Constructing model for parent {parent_location} with {} children",
            model.child_locations.len()
        );

        self.add_rate_grids(&mut model, update_prior)?;
        self.add_covariate_grids(&mut model, covariate_specs)?;
        self.add_random_effect_grids(&mut model)?;
        if self.settings.model.constrain_omega {
            self.constrain_omega(&mut model, mortality)?;
        }
        Ok(model)
    }

    /// Assembles several parents in parallel. Results keep the order of
    /// `requests`.
    pub fn construct_models(
        &self,
        location_dag: &LocationDag,
        covariate_specs: &CovariateSpecs,
        mortality: Option<&MortalityTable>,
        requests: &[ModelRequest<'_>],
    ) -> Vec<Result<Model, AlchemyError>> {
        requests
            .par_iter()
            .map(|request| {
                self.construct_two_level_model(
                    location_dag,
                    request.parent_location,
                    covariate_specs,
                    mortality,
                    request.update_prior,
                )
            })
            .collect()
    }

    fn add_rate_grids(
        &self,
        model: &mut Model,
        update_prior: Option<&PriorUpdates>,
    ) -> Result<(), AlchemyError> {
        for smoothing in &self.settings.rate {
            let mut rate_grid = self.rate_smoothing(smoothing.rate, &smoothing.smooth)?;
            if let Some(prior) = update_prior.and_then(|updates| updates.get(&smoothing.rate)) {
                apply_prior_update(smoothing.rate, &mut rate_grid, prior)?;
            }
            model.rates.insert(smoothing.rate, RateGrid::Smooth(rate_grid));
        }
        Ok(())
    }

    fn add_covariate_grids(
        &self,
        model: &mut Model,
        covariate_specs: &CovariateSpecs,
    ) -> Result<(), AlchemyError> {
        for mulcov in &covariate_specs.covariate_multipliers {
            let grid = self
                .get_smoothing_grid(&mulcov.grid_spec)
                .map_err(|source| AlchemyError::Smoothing {
                    what: format!(
                        "{} multiplier {} on {}",
                        mulcov.group, mulcov.key.covariate, mulcov.key.target
                    ),
                    source,
                })?;
            model.covariate_multipliers.insert(
                MulCovKey {
                    group: mulcov.group,
                    key: mulcov.key.clone(),
                },
                grid,
            );
        }
        Ok(())
    }

    fn add_random_effect_grids(&self, model: &mut Model) -> Result<(), AlchemyError> {
        let mut declared: BTreeMap<Rate, Vec<RandomEffectLocation>> = BTreeMap::new();
        for smoothing in &self.settings.random_effect {
            let grid = self
                .get_smoothing_grid(&smoothing.smooth)
                .map_err(|source| AlchemyError::Smoothing {
                    what: format!("random effect on {}", smoothing.rate),
                    source,
                })?;
            let location = match smoothing.location {
                Some(location) if model.child_locations.contains(&location) => {
                    RandomEffectLocation::Child(location)
                }
                _ => RandomEffectLocation::Shared,
            };
            model.random_effects.insert(
                RandomEffectKey {
                    rate: smoothing.rate,
                    location,
                },
                RateGrid::Smooth(grid),
            );
            declared.entry(smoothing.rate).or_default().push(location);
        }

        for (rate, locations) in declared {
            check_random_effect_coverage(rate, locations, &model.child_locations)?;
        }
        Ok(())
    }

    fn constrain_omega(
        &self,
        model: &mut Model,
        mortality: Option<&MortalityTable>,
    ) -> Result<(), AlchemyError> {
        log::info!("Adding the omega constraint.");
        let table = mortality.ok_or(AlchemyError::MissingMortalityData)?;
        let parent = model.parent_location;

        let parent_rows = table.for_location(parent);
        if parent_rows.is_empty() {
            return Err(AlchemyError::MissingParentOmega(parent));
        }
        let parent_omega = RectangularData::from_rows(&parent_rows, &format!("location {parent}"))?;
        let grid = &self.grids.age_time;
        model.rates.insert(
            Rate::Omega,
            RateGrid::Constraint(constraint_from_function(grid, &parent_omega)?),
        );

        let observed = table.locations();
        let missing: Vec<LocationId> = model
            .child_locations
            .iter()
            .filter(|child| !observed.contains(child))
            .copied()
            .collect();
        if !missing.is_empty() {
            log::warn!(
                "Children of {parent} missing omega {missing:?}, so not including child omega constraints"
            );
            return Ok(());
        }

        model.random_effects.retain(|key, _| key.rate != Rate::Omega);
        for &child in &model.child_locations {
            let child_omega = RectangularData::from_rows(
                &table.for_location(child),
                &format!("location {child}"),
            )?;
            let effect = constraint_from_function(grid, &|age: f64, time: f64| {
                child_random_effect(&child_omega, &parent_omega, age, time)
            })?;
            model.random_effects.insert(
                RandomEffectKey::child(Rate::Omega, child),
                RateGrid::Constraint(effect),
            );
        }
        Ok(())
    }
}

/// The default grid, with any axis the settings override sorted into place.
fn construct_age_time_grid(model: &ModelSettings) -> Result<AgeTimeGrid, GridError> {
    let ages = match &model.default_age_grid {
        Some(ages) => ages.clone(),
        None => {
            let (start, end, n) = DEFAULT_AGE_RANGE;
            Array1::linspace(start, end, n).to_vec()
        }
    };
    let times = match &model.default_time_grid {
        Some(times) => times.clone(),
        None => {
            let (start, end, n) = DEFAULT_TIME_RANGE;
            Array1::linspace(start, end, n).to_vec()
        }
    };
    AgeTimeGrid::new(&ages, &times)
}

/// Re-estimates value, dage and dtime priors of `grid` from whichever draws
/// the update carries. The update must be on exactly the grid's axes.
fn apply_prior_update(
    rate: Rate,
    grid: &mut SmoothGrid,
    prior: &PriorUpdate,
) -> Result<(), AlchemyError> {
    let ages = grid.ages().to_owned();
    let times = grid.times().to_owned();
    if prior.ages != ages || prior.times != times {
        return Err(AlchemyError::PriorGridMismatch {
            rate,
            found_ages: prior.ages.to_vec(),
            found_times: prior.times.to_vec(),
            expected_ages: ages.to_vec(),
            expected_times: times.to_vec(),
        });
    }
    let without_last_age = ages.slice(s![..ages.len() - 1]);
    let without_last_time = times.slice(s![..times.len() - 1]);
    let slots = [
        (PriorKind::Value, &prior.value, ages.view(), times.view()),
        (PriorKind::Dage, &prior.dage, without_last_age, times.view()),
        (PriorKind::Dtime, &prior.dtime, ages.view(), without_last_time),
    ];
    for (slot, draws, slot_ages, slot_times) in slots {
        if let Some(draws) = draws {
            estimate_in_place(grid.slot_mut(slot), draws.view(), slot_ages, slot_times)
                .map_err(|source| AlchemyError::Estimate { rate, slot, source })?;
        }
    }
    log::debug!("Re-estimated priors of {rate} from an earlier fit");
    Ok(())
}

/// Random effects for one rate must be a single shared grid or exactly one
/// grid per child.
fn check_random_effect_coverage(
    rate: Rate,
    mut present: Vec<RandomEffectLocation>,
    children: &[LocationId],
) -> Result<(), AlchemyError> {
    if present == [RandomEffectLocation::Shared] {
        return Ok(());
    }
    present.sort();
    let mut expected: Vec<RandomEffectLocation> = children
        .iter()
        .map(|&child| RandomEffectLocation::Child(child))
        .collect();
    expected.sort();
    if present == expected {
        return Ok(());
    }
    Err(AlchemyError::IncompleteRandomEffectCoverage {
        rate,
        present,
        expected: children.to_vec(),
    })
}
