use approx::assert_abs_diff_eq;
use cascade_alchemy::grid::PriorGrid;
use cascade_alchemy::prior_estimate::estimate_grid_parameters;
use cascade_alchemy::priors::{Distribution, PriorNode};
use ndarray::{Array3, array};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution as Sampler, Normal, StudentT, Uniform};

const SAMPLES: usize = 4000;

fn draw(prior: &Distribution, rng: &mut StdRng) -> f64 {
    match *prior {
        Distribution::Uniform { mean } => mean + rng.gen_range(-0.5..0.5),
        Distribution::Gaussian { mean, std } => Normal::new(mean, std).unwrap().sample(rng),
        Distribution::Laplace { mean, std } => {
            // Inverse CDF with scale std / sqrt(2).
            let u: f64 = Uniform::new(-0.5, 0.5).sample(rng);
            mean - std / 2.0_f64.sqrt() * u.signum() * (1.0 - 2.0 * u.abs()).ln()
        }
        Distribution::Students { mean, std, nu } => mean + std * StudentT::new(nu).unwrap().sample(rng),
        Distribution::LogGaussian { mean, std, eta } => {
            Normal::new((mean + eta).ln(), std).unwrap().sample(rng).exp() - eta
        }
        Distribution::LogLaplace { .. } | Distribution::LogStudents { .. } => {
            unreachable!("not sampled in these tests")
        }
    }
}

fn round_trip(distribution: Distribution, seed: u64) -> PriorGrid {
    let ages = array![0.0, 50.0];
    let times = array![2000.0, 2010.0];
    let prior = PriorNode::new(distribution, None, None).unwrap();
    let grid = PriorGrid::filled(ages.view(), times.view(), &prior);

    let mut rng = StdRng::seed_from_u64(seed);
    let draws: Array3<f64> =
        Array3::from_shape_fn((ages.len(), times.len(), SAMPLES), |_| draw(&distribution, &mut rng));
    estimate_grid_parameters(&grid, draws.view(), ages.view(), times.view()).unwrap()
}

fn assert_recovers(distribution: Distribution, seed: u64, tolerance: f64) {
    let fitted = round_trip(distribution, seed);
    assert_eq!(fitted.shape(), (2, 2));
    for (_, prior) in fitted.iter() {
        assert_eq!(prior.density(), distribution.density());
        assert_abs_diff_eq!(prior.mean(), distribution.mean(), epsilon = tolerance);
        if let Some(std) = distribution.std() {
            let fitted_std = prior.std().unwrap();
            assert!(
                (fitted_std - std).abs() < tolerance,
                "{:?}: fitted std {fitted_std} far from {std}",
                distribution.density()
            );
        }
        assert_eq!(prior.distribution().nu(), distribution.nu());
        assert_eq!(prior.distribution().eta(), distribution.eta());
    }
}

#[test]
fn uniform_recovers_its_mean() {
    assert_recovers(Distribution::Uniform { mean: 0.3 }, 1, 0.02);
}

#[test]
fn gaussian_recovers_mean_and_std() {
    assert_recovers(Distribution::Gaussian { mean: 0.02, std: 0.005 }, 2, 5e-4);
}

#[test]
fn laplace_recovers_mean_and_std() {
    assert_recovers(Distribution::Laplace { mean: -1.0, std: 0.5 }, 3, 0.05);
}

#[test]
fn students_recovers_location_and_scale() {
    assert_recovers(
        Distribution::Students {
            mean: 2.0,
            std: 0.4,
            nu: 5.0,
        },
        4,
        0.05,
    );
}

#[test]
fn log_gaussian_recovers_mean_and_log_std() {
    assert_recovers(
        Distribution::LogGaussian {
            mean: 0.05,
            std: 0.2,
            eta: 0.01,
        },
        5,
        0.02,
    );
}

#[test]
fn fitted_grids_keep_their_coordinates() {
    let fitted = round_trip(Distribution::Gaussian { mean: 0.0, std: 1.0 }, 6);
    assert_eq!(
        fitted.keys(),
        vec![(0.0, 2000.0), (0.0, 2010.0), (50.0, 2000.0), (50.0, 2010.0)]
    );
}
