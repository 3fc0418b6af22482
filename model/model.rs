//! The assembled two-level model handed to the solver.

use crate::constants::{MulCovKind, Rate};
use crate::inputs::covariate_specs::{Covariate, CovariateKey};
use crate::inputs::locations::LocationId;
use crate::grid::{AgeTimeGrid, ConstraintGrid, SmoothGrid};
use std::collections::BTreeMap;
use std::fmt;

/// A rate or random effect is either estimated under priors or fixed from
/// data.
#[derive(Debug, Clone, PartialEq)]
pub enum RateGrid {
    Smooth(SmoothGrid),
    Constraint(ConstraintGrid),
}

impl RateGrid {
    pub fn grid(&self) -> &AgeTimeGrid {
        match self {
            RateGrid::Smooth(smooth) => smooth.grid(),
            RateGrid::Constraint(constraint) => constraint.grid(),
        }
    }

    pub fn as_smooth(&self) -> Option<&SmoothGrid> {
        match self {
            RateGrid::Smooth(smooth) => Some(smooth),
            RateGrid::Constraint(_) => None,
        }
    }

    pub fn as_constraint(&self) -> Option<&ConstraintGrid> {
        match self {
            RateGrid::Constraint(constraint) => Some(constraint),
            RateGrid::Smooth(_) => None,
        }
    }

    pub fn is_constraint(&self) -> bool {
        matches!(self, RateGrid::Constraint(_))
    }
}

/// Which children a random effect applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RandomEffectLocation {
    /// One grid used for every child.
    Shared,
    Child(LocationId),
}

impl fmt::Display for RandomEffectLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RandomEffectLocation::Shared => f.write_str("shared"),
            RandomEffectLocation::Child(location) => write!(f, "{location}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RandomEffectKey {
    pub rate: Rate,
    pub location: RandomEffectLocation,
}

impl RandomEffectKey {
    pub fn shared(rate: Rate) -> Self {
        Self {
            rate,
            location: RandomEffectLocation::Shared,
        }
    }

    pub fn child(rate: Rate, location: LocationId) -> Self {
        Self {
            rate,
            location: RandomEffectLocation::Child(location),
        }
    }
}

/// A covariate multiplier's place in the model: its group and its key
/// within the group.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MulCovKey {
    pub group: MulCovKind,
    pub key: CovariateKey,
}

/// A parent location with its immediate children, their rates, covariate
/// multipliers and random effects.
#[derive(Debug, Clone, PartialEq)]
pub struct Model {
    pub parent_location: LocationId,
    pub child_locations: Vec<LocationId>,
    pub covariates: Vec<Covariate>,
    pub nonzero_rates: Vec<Rate>,
    pub rates: BTreeMap<Rate, RateGrid>,
    pub covariate_multipliers: BTreeMap<MulCovKey, SmoothGrid>,
    pub random_effects: BTreeMap<RandomEffectKey, RateGrid>,
}

impl Model {
    pub fn new(
        parent_location: LocationId,
        child_locations: Vec<LocationId>,
        covariates: Vec<Covariate>,
        nonzero_rates: Vec<Rate>,
    ) -> Self {
        Self {
            parent_location,
            child_locations,
            covariates,
            nonzero_rates,
            rates: BTreeMap::new(),
            covariate_multipliers: BTreeMap::new(),
            random_effects: BTreeMap::new(),
        }
    }

    /// Multipliers of one group, keyed within the group.
    pub fn multipliers_in(&self, group: MulCovKind) -> impl Iterator<Item = (&CovariateKey, &SmoothGrid)> + '_ {
        self.covariate_multipliers
            .iter()
            .filter(move |(key, _)| key.group == group)
            .map(|(key, grid)| (&key.key, grid))
    }

    /// The locations holding a random effect for `rate`, in key order.
    pub fn random_effect_locations(&self, rate: Rate) -> Vec<RandomEffectLocation> {
        self.random_effects
            .keys()
            .filter(|key| key.rate == rate)
            .map(|key| key.location)
            .collect()
    }

    /// A one-line-per-entry description of what the model holds.
    pub fn summary(&self) -> String {
        let mut lines = vec![format!(
            "parent {} with children {:?}",
            self.parent_location, self.child_locations
        )];
        for (rate, grid) in &self.rates {
            let (n_age, n_time) = grid.grid().shape();
            let kind = if grid.is_constraint() { "constraint" } else { "smooth" };
            lines.push(format!("rate {rate}: {kind} {n_age}x{n_time}"));
        }
        for (key, grid) in &self.covariate_multipliers {
            let (n_age, n_time) = grid.grid().shape();
            lines.push(format!(
                "{} {} on {}: {n_age}x{n_time}",
                key.group, key.key.covariate, key.key.target
            ));
        }
        for (key, grid) in &self.random_effects {
            let (n_age, n_time) = grid.grid().shape();
            let kind = if grid.is_constraint() { "constraint" } else { "smooth" };
            lines.push(format!(
                "random effect {} for {}: {kind} {n_age}x{n_time}",
                key.rate, key.location
            ));
        }
        lines.join("\n")
    }
}
