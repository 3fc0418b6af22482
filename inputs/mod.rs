pub mod covariate_specs;
pub mod locations;
pub mod manipulate;
pub mod mortality;
pub mod table;
