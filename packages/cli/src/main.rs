#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Ward patrol command-line front end.
//!
//! Imports police.uk incident exports and ward boundaries into the local
//! `DuckDB` store, forecasts next month's burglaries for a ward, and places
//! officers over a sample of past incidents. Run without a subcommand for
//! the interactive menu.
//!
//! Uses `indicatif-log-bridge` (via [`ward_patrol_cli_utils::init_logger`])
//! so log lines and progress bars never fight for the terminal.

mod interactive;
mod report;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use ward_patrol_database::{DuckDbIncidentStore, import_incidents_csv, import_wards_csv};
use ward_patrol_pipeline::{DeploymentRequest, Pipeline, Section, WardPatrolConfig};

use crate::report::{DeployOptions, deploy, forecast_summary};

#[derive(Parser)]
#[command(
    name = "ward_patrol",
    about = "Burglary forecasting and officer deployment for London wards"
)]
struct Cli {
    /// TOML config file (defaults to `$WARD_PATROL_CONFIG`)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Import incidents and/or ward boundaries from CSV
    Import {
        /// Incidents CSV (police.uk street export or `snake_case` columns)
        #[arg(long)]
        incidents: Option<PathBuf>,

        /// Ward boundaries CSV with `ward_code,ward_name,geometry_wkt`
        #[arg(long)]
        wards: Option<PathBuf>,
    },
    /// List wards in the store
    Wards,
    /// Forecast next month's incidents for a ward
    Forecast {
        /// Ward code, e.g. `E05000138`
        ward: String,

        /// Print the plot series as JSON instead of a summary
        #[arg(long)]
        json: bool,
    },
    /// Forecast, place officers, and score the deployment for a ward
    Deploy {
        /// Ward code, e.g. `E05000138`
        ward: String,

        /// Number of officers to place
        #[arg(long, short = 'n', default_value_t = 5)]
        officers: usize,

        /// Skip street-network distances
        #[arg(long)]
        no_street: bool,

        /// Write CSV, JSON and `GeoJSON` files (to the configured output
        /// directory unless a path is given)
        #[arg(long, num_args = 0..=1)]
        export: Option<Option<PathBuf>>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let multi = ward_patrol_cli_utils::init_logger();
    let cli = Cli::parse();
    let mut config = WardPatrolConfig::load(cli.config.as_deref())?;

    let Some(command) = cli.command else {
        return interactive::run(&multi, config).await;
    };

    match command {
        Commands::Import { incidents, wards } => {
            if incidents.is_none() && wards.is_none() {
                log::warn!("Nothing to import: pass --incidents and/or --wards");
                return Ok(());
            }
            let store = DuckDbIncidentStore::open(&config.data.database)?;
            if let Some(path) = wards {
                let summary = import_wards_csv(&store, &path)?;
                println!(
                    "Wards: {} imported, {} skipped",
                    summary.inserted, summary.skipped
                );
            }
            if let Some(path) = incidents {
                let summary = import_incidents_csv(&store, &path)?;
                println!(
                    "Incidents: {} imported ({} with generated ids), {} skipped",
                    summary.inserted, summary.generated_ids, summary.skipped
                );
            }
        }
        Commands::Wards => {
            config.scoring.street_distance = false;
            let pipeline = Pipeline::open(config)?;
            for ward in pipeline.ward_options()? {
                println!("{:<12} {:>7}  {}", ward.code, ward.incident_count, ward.label());
            }
        }
        Commands::Forecast { ward, json } => {
            config.scoring.street_distance = false;
            let pipeline = Pipeline::open(config)?;
            match pipeline.forecast(&ward)? {
                Section::Available(forecast) if json => {
                    println!("{}", serde_json::to_string_pretty(&forecast.plot_series())?);
                }
                Section::Available(forecast) => println!("{}", forecast_summary(&forecast)),
                Section::Unavailable { reason } => {
                    return Err(format!("{ward}: {reason}").into());
                }
            }
        }
        Commands::Deploy {
            ward,
            officers,
            no_street,
            export,
        } => {
            if no_street {
                config.scoring.street_distance = false;
            }
            let pipeline = Pipeline::open(config)?;
            let request = DeploymentRequest {
                ward_code: ward,
                officers,
            };
            let options = DeployOptions {
                street: !no_street,
                export,
            };
            deploy(&multi, &pipeline, &request, &options).await?;
        }
    }

    Ok(())
}
