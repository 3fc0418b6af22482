use approx::assert_abs_diff_eq;
use cascade_alchemy::alchemy::{Alchemy, AlchemyError, ModelRequest, PriorUpdate, PriorUpdates};
use cascade_alchemy::constants::{Density, MulCovKind, Rate};
use cascade_alchemy::inputs::covariate_specs::{CovariateKey, CovariateSpecs};
use cascade_alchemy::inputs::locations::{LocationDag, LocationError};
use cascade_alchemy::inputs::mortality::{MortalityRow, MortalityTable};
use cascade_alchemy::model::{Model, MulCovKey, RandomEffectKey, RandomEffectLocation};
use cascade_alchemy::settings::Settings;
use ndarray::Array3;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};
use std::sync::{Mutex, Once};

const PARENT: i64 = 1;

const BASE_SETTINGS: &str = r#"
[[rate]]
rate = "iota"
[rate.smooth.value]
density = "gaussian"
mean = 0.01
std = 0.1

[[rate]]
rate = "chi"
[rate.smooth]
age_grid = [0.0, 20.0, 100.0]
[rate.smooth.value]
density = "uniform"
lower = 0.0
upper = 1.0

[[country_covariate]]
covariate_name = "income"
mulcov_type = "rate_value"
target = "iota"
reference = 0.5
[country_covariate.smooth]
age_time_specific = false
[country_covariate.smooth.value]
density = "gaussian"
mean = 0.0
std = 1.0
"#;

fn settings_with(extra: &str) -> Settings {
    Settings::from_toml_str(&format!("{BASE_SETTINGS}{extra}")).unwrap()
}

fn hierarchy() -> LocationDag {
    LocationDag::from_edges(&[(0, PARENT), (PARENT, 4), (PARENT, 5), (4, 40)]).unwrap()
}

fn mortality_row(location_id: i64, value: f64) -> MortalityRow {
    MortalityRow {
        location_id,
        age_lower: 0.0,
        age_upper: 100.0,
        time_lower: 1990.0,
        time_upper: 2015.0,
        value,
    }
}

/// Keeps the message of every warning logged while the tests run.
struct WarningLog(Mutex<Vec<String>>);

impl log::Log for WarningLog {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= log::Level::Warn
    }

    fn log(&self, record: &log::Record) {
        if self.enabled(record.metadata()) {
            self.0.lock().unwrap().push(record.args().to_string());
        }
    }

    fn flush(&self) {}
}

static WARNINGS: WarningLog = WarningLog(Mutex::new(Vec::new()));

fn warnings() -> &'static WarningLog {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| {
        log::set_logger(&WARNINGS).unwrap();
        log::set_max_level(log::LevelFilter::Warn);
    });
    &WARNINGS
}

fn build(settings: Settings, mortality: Option<&MortalityTable>) -> Result<Model, AlchemyError> {
    let covariate_specs = CovariateSpecs::from_settings(&settings.country_covariate).unwrap();
    Alchemy::new(settings)
        .unwrap()
        .construct_two_level_model(&hierarchy(), PARENT, &covariate_specs, mortality, None)
}

#[test]
fn rates_multipliers_and_shared_random_effect_are_assembled() {
    let settings = settings_with(
        r#"
[[random_effect]]
rate = "iota"
[random_effect.smooth.value]
density = "gaussian"
mean = 0.0
std = 0.1
"#,
    );
    let model = build(settings, None).unwrap();

    assert_eq!(model.parent_location, PARENT);
    assert_eq!(model.child_locations, vec![4, 5]);
    assert_eq!(model.nonzero_rates, vec![Rate::Iota, Rate::Chi]);
    assert_eq!(model.covariates.len(), 1);
    assert_eq!(model.covariates[0].reference, 0.5);

    let iota = model.rates[&Rate::Iota].as_smooth().unwrap();
    assert_eq!(iota.value().shape(), (21, 6));
    assert_eq!(iota.dage().shape(), (20, 6));
    assert_eq!(iota.dtime().shape(), (21, 5));
    assert_eq!(iota.value().get(100.0, 2015.0).unwrap().density(), Density::Gaussian);
    assert!(iota.dage().get(100.0, 2015.0).is_none());

    let chi = model.rates[&Rate::Chi].as_smooth().unwrap();
    assert_eq!(chi.ages().to_vec(), vec![0.0, 20.0, 100.0]);
    assert_abs_diff_eq!(chi.value().get(20.0, 1990.0).unwrap().mean(), 0.5, epsilon = 1e-12);

    let key = MulCovKey {
        group: MulCovKind::Alpha,
        key: CovariateKey {
            covariate: "income".to_string(),
            target: "iota".to_string(),
        },
    };
    let multiplier = &model.covariate_multipliers[&key];
    assert_eq!(multiplier.ages().to_vec(), vec![0.0]);
    assert_eq!(multiplier.times().to_vec(), vec![2005.0]);

    assert_eq!(
        model.random_effect_locations(Rate::Iota),
        vec![RandomEffectLocation::Shared]
    );
}

#[test]
fn per_child_random_effects_must_cover_every_child() {
    let child_effect = |location: i64| {
        format!(
            r#"
[[random_effect]]
rate = "iota"
location = {location}
[random_effect.smooth.value]
density = "gaussian"
mean = 0.0
std = 0.1
"#
        )
    };

    let complete = settings_with(&format!("{}{}", child_effect(5), child_effect(4)));
    let model = build(complete, None).unwrap();
    assert_eq!(
        model.random_effect_locations(Rate::Iota),
        vec![RandomEffectLocation::Child(4), RandomEffectLocation::Child(5)]
    );

    let partial = settings_with(&child_effect(4));
    match build(partial, None) {
        Err(AlchemyError::IncompleteRandomEffectCoverage {
            rate,
            present,
            expected,
        }) => {
            assert_eq!(rate, Rate::Iota);
            assert_eq!(present, vec![RandomEffectLocation::Child(4)]);
            assert_eq!(expected, vec![4, 5]);
        }
        other => panic!("Expected IncompleteRandomEffectCoverage, got {:?}", other),
    }

    let duplicated = settings_with(&format!(
        "{}{}{}",
        child_effect(4),
        child_effect(4),
        child_effect(5)
    ));
    // The duplicate overwrites its grid, but the declaration still fails.
    assert!(matches!(
        build(duplicated, None),
        Err(AlchemyError::IncompleteRandomEffectCoverage { .. })
    ));

    let superset = settings_with(&format!(
        "{}{}{}",
        child_effect(4),
        child_effect(5),
        child_effect(40)
    ));
    match build(superset, None) {
        Err(AlchemyError::IncompleteRandomEffectCoverage {
            rate,
            present,
            expected,
        }) => {
            assert_eq!(rate, Rate::Iota);
            assert_eq!(
                present,
                vec![
                    RandomEffectLocation::Shared,
                    RandomEffectLocation::Child(4),
                    RandomEffectLocation::Child(5)
                ]
            );
            assert_eq!(expected, vec![4, 5]);
        }
        other => panic!("Expected IncompleteRandomEffectCoverage, got {:?}", other),
    }
}

#[test]
fn random_effect_for_a_non_child_is_shared() {
    let settings = settings_with(
        r#"
[[random_effect]]
rate = "iota"
location = 40
[random_effect.smooth.value]
density = "gaussian"
mean = 0.0
std = 0.1
"#,
    );
    let model = build(settings, None).unwrap();
    assert!(model.random_effects.contains_key(&RandomEffectKey::shared(Rate::Iota)));
}

#[test]
fn omega_is_constrained_for_parent_and_children() {
    let settings = settings_with("[model]\nconstrain_omega = true\n");
    let table = MortalityTable::new(vec![
        mortality_row(PARENT, 0.01),
        mortality_row(4, 0.02),
        mortality_row(5, 0.005),
    ]);
    let model = build(settings, Some(&table)).unwrap();

    assert_eq!(model.nonzero_rates, vec![Rate::Iota, Rate::Chi, Rate::Omega]);
    let omega = model.rates[&Rate::Omega].as_constraint().unwrap();
    assert_eq!(omega.grid().shape(), (21, 6));
    assert!(omega.values().iter().all(|&v| (v - 0.01).abs() < 1e-15));

    let child4 = model.random_effects[&RandomEffectKey::child(Rate::Omega, 4)]
        .as_constraint()
        .unwrap();
    assert_abs_diff_eq!(child4.get(50.0, 2000.0).unwrap(), 2.0_f64.ln(), epsilon = 1e-12);
    let child5 = model.random_effects[&RandomEffectKey::child(Rate::Omega, 5)]
        .as_constraint()
        .unwrap();
    assert_abs_diff_eq!(child5.get(0.0, 1990.0).unwrap(), 0.5_f64.ln(), epsilon = 1e-12);
}

#[test]
fn omega_skips_children_when_any_child_lacks_data() {
    let settings = settings_with("[model]\nconstrain_omega = true\n");
    let table = MortalityTable::new(vec![mortality_row(PARENT, 0.01), mortality_row(4, 0.02)]);
    let log = warnings();
    let model = build(settings, Some(&table)).unwrap();

    assert!(model.rates[&Rate::Omega].is_constraint());
    assert!(model.random_effect_locations(Rate::Omega).is_empty());

    let logged = log.0.lock().unwrap();
    assert!(
        logged
            .iter()
            .any(|message| message.contains("Children of 1 missing omega [5]")),
        "no warning names the missing child: {logged:?}"
    );
}

#[test]
fn omega_constraint_needs_parent_data() {
    let settings = settings_with("[model]\nconstrain_omega = true\n");
    let table = MortalityTable::new(vec![mortality_row(4, 0.02), mortality_row(5, 0.02)]);
    assert!(matches!(
        build(settings.clone(), Some(&table)),
        Err(AlchemyError::MissingParentOmega(PARENT))
    ));
    assert!(matches!(
        build(settings, None),
        Err(AlchemyError::MissingMortalityData)
    ));
}

#[test]
fn omega_data_short_of_the_grid_uses_the_nearest_interval() {
    let settings = settings_with("[model]\nconstrain_omega = true\n");
    let mut short = mortality_row(PARENT, 0.01);
    short.age_upper = 50.0;
    let table = MortalityTable::new(vec![short]);
    let model = build(settings, Some(&table)).unwrap();
    let omega = model.rates[&Rate::Omega].as_constraint().unwrap();
    assert_abs_diff_eq!(omega.get(100.0, 2015.0).unwrap(), 0.01, epsilon = 1e-15);
}

#[test]
fn unknown_parent_is_an_error() {
    let settings = settings_with("");
    let covariate_specs = CovariateSpecs::from_settings(&settings.country_covariate).unwrap();
    let result = Alchemy::new(settings)
        .unwrap()
        .construct_two_level_model(&hierarchy(), 99, &covariate_specs, None, None);
    assert!(matches!(
        result,
        Err(AlchemyError::Location(LocationError::UnknownLocation(99)))
    ));
}

#[test]
fn prior_update_re_estimates_rate_priors() {
    let settings = settings_with("");
    let covariate_specs = CovariateSpecs::from_settings(&settings.country_covariate).unwrap();
    let alchemy = Alchemy::new(settings).unwrap();
    let grids = alchemy.default_grids();
    let (n_age, n_time) = grids.age_time.shape();

    let mut rng = StdRng::seed_from_u64(42);
    let level = Normal::new(0.02, 0.005).unwrap();
    let slope = Normal::new(0.0, 0.001).unwrap();
    let value: Array3<f64> = Array3::from_shape_fn((n_age, n_time, 1000), |_| level.sample(&mut rng));
    let dage: Array3<f64> = Array3::from_shape_fn((n_age - 1, n_time, 1000), |_| slope.sample(&mut rng));

    let mut updates = PriorUpdates::new();
    updates.insert(
        Rate::Iota,
        PriorUpdate {
            ages: grids.age_time.ages().to_owned(),
            times: grids.age_time.times().to_owned(),
            value: Some(value),
            dage: Some(dage),
            dtime: None,
        },
    );

    let model = alchemy
        .construct_two_level_model(&hierarchy(), PARENT, &covariate_specs, None, Some(&updates))
        .unwrap();
    let iota = model.rates[&Rate::Iota].as_smooth().unwrap();
    for ((_, _), prior) in iota.value().iter() {
        assert_eq!(prior.density(), Density::Gaussian);
        assert_abs_diff_eq!(prior.mean(), 0.02, epsilon = 1e-3);
        assert_abs_diff_eq!(prior.std().unwrap(), 0.005, epsilon = 1e-3);
    }
    for ((_, _), prior) in iota.dage().iter() {
        assert_eq!(prior.density(), Density::Uniform);
        assert_abs_diff_eq!(prior.mean(), 0.0, epsilon = 5e-4);
    }
    // dtime had no draws and keeps its settings prior.
    assert!(iota.dtime().iter().all(|(_, prior)| prior.mean() == 0.0));

    // Rates without an update are untouched.
    let untouched = build(settings_with(""), None).unwrap();
    assert_eq!(model.rates[&Rate::Chi], untouched.rates[&Rate::Chi]);
}

#[test]
fn prior_update_on_another_grid_is_rejected() {
    let settings = settings_with("");
    let covariate_specs = CovariateSpecs::from_settings(&settings.country_covariate).unwrap();
    let alchemy = Alchemy::new(settings).unwrap();

    let mut updates = PriorUpdates::new();
    updates.insert(
        Rate::Chi,
        PriorUpdate {
            ages: ndarray::array![0.0, 50.0, 100.0],
            times: alchemy.default_grids().age_time.times().to_owned(),
            value: Some(Array3::zeros((3, 6, 10))),
            dage: None,
            dtime: None,
        },
    );
    match alchemy.construct_two_level_model(&hierarchy(), PARENT, &covariate_specs, None, Some(&updates)) {
        Err(AlchemyError::PriorGridMismatch {
            rate,
            found_ages,
            expected_ages,
            ..
        }) => {
            assert_eq!(rate, Rate::Chi);
            assert_eq!(found_ages, vec![0.0, 50.0, 100.0]);
            assert_eq!(expected_ages, vec![0.0, 20.0, 100.0]);
        }
        other => panic!("Expected PriorGridMismatch, got {:?}", other),
    }
}

#[test]
fn assembly_is_repeatable() {
    let settings = settings_with("[model]\nconstrain_omega = true\n");
    let covariate_specs = CovariateSpecs::from_settings(&settings.country_covariate).unwrap();
    let table = MortalityTable::new(vec![
        mortality_row(PARENT, 0.01),
        mortality_row(4, 0.02),
        mortality_row(5, 0.005),
    ]);
    let alchemy = Alchemy::new(settings).unwrap();
    let dag = hierarchy();
    let first = alchemy
        .construct_two_level_model(&dag, PARENT, &covariate_specs, Some(&table), None)
        .unwrap();
    let second = alchemy
        .construct_two_level_model(&dag, PARENT, &covariate_specs, Some(&table), None)
        .unwrap();
    assert_eq!(first, second);
}

#[test]
fn parallel_construction_keeps_request_order() {
    let settings = settings_with("");
    let covariate_specs = CovariateSpecs::from_settings(&settings.country_covariate).unwrap();
    let alchemy = Alchemy::new(settings).unwrap();
    let dag = hierarchy();
    let requests: Vec<ModelRequest<'_>> = [PARENT, 4, 0, 99]
        .into_iter()
        .map(|parent_location| ModelRequest {
            parent_location,
            update_prior: None,
        })
        .collect();

    let results = alchemy.construct_models(&dag, &covariate_specs, None, &requests);
    assert_eq!(results.len(), 4);
    assert_eq!(results[0].as_ref().unwrap().child_locations, vec![4, 5]);
    assert_eq!(results[1].as_ref().unwrap().child_locations, vec![40]);
    assert_eq!(results[2].as_ref().unwrap().child_locations, vec![PARENT]);
    assert!(results[3].is_err());

    let sequential = alchemy
        .construct_two_level_model(&dag, 4, &covariate_specs, None, None)
        .unwrap();
    assert_eq!(results[1].as_ref().unwrap(), &sequential);
}
