#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]

use clap::{Args, CommandFactory, Parser, Subcommand};
use std::path::PathBuf;
use std::process;

use cascade_alchemy::alchemy::Alchemy;
use cascade_alchemy::grid::AgeTimeGrid;
use cascade_alchemy::inputs::covariate_specs::CovariateSpecs;
use cascade_alchemy::inputs::locations::{LocationDag, LocationId};
use cascade_alchemy::inputs::mortality::load_mortality_table;
use cascade_alchemy::settings::Settings;

#[derive(Args)]
pub struct BuildArgs {
    /// Path to the model settings file (.toml)
    #[arg(long)]
    pub settings: PathBuf,

    /// Path to the location hierarchy file (.toml)
    #[arg(long)]
    pub locations: PathBuf,

    /// Location whose two-level model should be assembled
    #[arg(long, value_name = "LOCATION_ID")]
    pub parent: LocationId,

    /// Mortality CSV used to constrain omega
    #[arg(long)]
    pub mortality: Option<PathBuf>,
}

#[derive(Parser)]
#[command(
    name = "cascade",
    about = "Assembles two-level Dismod-AT models for a location cascade",
    long_about = "Reads model settings and a location hierarchy, then builds the rate, \
                 covariate-multiplier and random-effect grids for one parent location \
                 and its children."
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Assemble the model for one parent location and print what it holds
    Build(BuildArgs),

    /// Print the default and single age/time grids for a settings file
    DefaultGrid {
        /// Path to the model settings file (.toml)
        #[arg(long)]
        settings: PathBuf,
    },

    /// Show version information
    Version,
}

fn build(args: BuildArgs) -> Result<(), Box<dyn std::error::Error>> {
    let settings = Settings::load(&args.settings)?;
    let covariate_specs = CovariateSpecs::from_settings(&settings.country_covariate)?;
    let location_dag = LocationDag::load(&args.locations)?;
    let mortality = args.mortality.as_ref().map(load_mortality_table).transpose()?;

    let alchemy = Alchemy::new(settings)?;
    let model = alchemy.construct_two_level_model(
        &location_dag,
        args.parent,
        &covariate_specs,
        mortality.as_ref(),
        None,
    )?;
    println!("{}", model.summary());
    Ok(())
}

fn default_grid(settings: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let alchemy = Alchemy::new(Settings::load(&settings)?)?;
    let grids = alchemy.default_grids();
    print_grid("Default", &grids.age_time);
    print_grid("Single", &grids.single_age_time);
    for (rate, grid) in alchemy.get_all_rates_grids()? {
        let (n_age, n_time) = grid.grid().shape();
        println!("Rate {rate}: {n_age} ages x {n_time} times");
    }
    Ok(())
}

fn print_grid(label: &str, grid: &AgeTimeGrid) {
    println!("{label} ages: {}", join(grid.ages().iter()));
    println!("{label} times: {}", join(grid.times().iter()));
}

fn join<'a>(values: impl Iterator<Item = &'a f64>) -> String {
    values.map(|v| v.to_string()).collect::<Vec<_>>().join(", ")
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let Cli { command } = Cli::parse();

    let result = match command {
        Some(Commands::Build(args)) => build(args),
        Some(Commands::DefaultGrid { settings }) => default_grid(settings),
        Some(Commands::Version) => {
            print_version_info();
            Ok(())
        }
        None => Cli::command()
            .print_help()
            .map(|_| println!())
            .map_err(Into::into),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

/// Format seconds into a human-readable duration like "2.4 hours ago"
fn format_duration_ago(seconds: u64) -> String {
    const MINUTE: u64 = 60;
    const HOUR: u64 = 60 * MINUTE;
    const DAY: u64 = 24 * HOUR;

    if seconds < MINUTE {
        format!("{} seconds ago", seconds)
    } else if seconds < HOUR {
        format!("{:.1} minutes ago", seconds as f64 / MINUTE as f64)
    } else if seconds < DAY {
        format!("{:.1} hours ago", seconds as f64 / HOUR as f64)
    } else {
        format!("{:.1} days ago", seconds as f64 / DAY as f64)
    }
}

fn print_version_info() {
    let version = env!("CARGO_PKG_VERSION");
    let build_timestamp: u64 = env!("CASCADE_BUILD_TIMESTAMP").parse().unwrap_or(0);

    println!("cascade {}", version);

    if build_timestamp > 0 {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        if now > build_timestamp {
            println!("Built: {}", format_duration_ago(now - build_timestamp));
        } else {
            println!("Built: just now");
        }
    }
}
