//! Resolution of settings-form smoothings into concrete grids.

use crate::constants::PriorKind;
use crate::grid::{AgeTimeGrid, GridError, PriorGrid, SmoothGrid};
use crate::priors::{PriorError, PriorNode};
use crate::settings::{PriorSpec, SmoothingSpec};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SpecError {
    #[error(transparent)]
    Grid(#[from] GridError),

    #[error("{slot} prior: {source}")]
    Prior {
        slot: PriorKind,
        #[source]
        source: PriorError,
    },
}

/// The age-time grids every smoothing falls back on: the default grid, and
/// the one-node grid for quantities that do not vary over age or time.
#[derive(Debug, Clone, PartialEq)]
pub struct DefaultGrids {
    pub age_time: AgeTimeGrid,
    pub single_age_time: AgeTimeGrid,
}

impl DefaultGrids {
    pub fn new(age_time: AgeTimeGrid) -> Self {
        let single_age_time = age_time.single_node();
        Self {
            age_time,
            single_age_time,
        }
    }
}

/// Builds the grid a smoothing describes and fills its prior slots.
pub fn resolve(
    default_age_time: &AgeTimeGrid,
    single_age_time: &AgeTimeGrid,
    spec: &SmoothingSpec,
) -> Result<SmoothGrid, SpecError> {
    let grid = if !spec.age_time_specific {
        single_age_time.clone()
    } else {
        let ages = match &spec.age_grid {
            Some(ages) => ages.clone(),
            None => default_age_time.ages().to_vec(),
        };
        let times = match &spec.time_grid {
            Some(times) => times.clone(),
            None => default_age_time.times().to_vec(),
        };
        AgeTimeGrid::new(&ages, &times)?
    };

    let prior = |slot: PriorKind, form: &PriorSpec| {
        form.to_prior()
            .map_err(|source| SpecError::Prior { slot, source })
    };
    let mut smooth = SmoothGrid::new(
        grid,
        &prior(PriorKind::Value, &spec.value)?,
        &prior(PriorKind::Dage, &spec.dage)?,
        &prior(PriorKind::Dtime, &spec.dtime)?,
    );

    for detail in &spec.detail {
        let replacement = prior(detail.prior_type, &detail.prior)?;
        apply_override(
            smooth.slot_mut(detail.prior_type),
            |age, time| detail.covers(age, time),
            &replacement,
        );
    }
    Ok(smooth)
}

fn apply_override(
    slot: &mut PriorGrid,
    covers: impl Fn(f64, f64) -> bool,
    replacement: &PriorNode,
) {
    let ages = slot.ages().to_vec();
    let times = slot.times().to_vec();
    for (a, &age) in ages.iter().enumerate() {
        for (t, &time) in times.iter().enumerate() {
            if covers(age, time) {
                slot.set_at(a, t, replacement.clone());
            }
        }
    }
}
