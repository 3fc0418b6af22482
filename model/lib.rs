#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]
//! Assembly of two-level Dismod-AT models: a parent location, its children,
//! and the age-time grids that carry their priors and constraints.

pub mod alchemy;
pub mod grid;
pub mod grid_spec;
pub mod interpolate;
pub mod model;
pub mod prior_estimate;
pub mod priors;

#[path = "../dismod/constants.rs"]
pub mod constants;

#[path = "../inputs/mod.rs"]
pub mod inputs;

#[path = "../settings/mod.rs"]
pub mod settings;
