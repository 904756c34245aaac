//! Menu-driven flow used when no subcommand is given.

use std::path::PathBuf;

use dialoguer::{Input, Select};
use ward_patrol_cli_utils::{MultiProgress, confirm, prompt_positive};
use ward_patrol_database::{DuckDbIncidentStore, import_incidents_csv, import_wards_csv};
use ward_patrol_pipeline::{DeploymentRequest, Pipeline, WardPatrolConfig};

use crate::report::{DeployOptions, deploy};

const DEFAULT_OFFICERS: usize = 5;

enum Action {
    Deploy,
    Import,
    Quit,
}

impl Action {
    const ALL: &[Self] = &[Self::Deploy, Self::Import, Self::Quit];

    #[must_use]
    const fn label(&self) -> &'static str {
        match self {
            Self::Deploy => "Forecast and deploy officers for a ward",
            Self::Import => "Import incidents or ward boundaries",
            Self::Quit => "Quit",
        }
    }
}

/// Runs the menu until the user quits.
///
/// # Errors
///
/// Returns an error if a prompt, the store, or the pipeline fails.
#[allow(clippy::future_not_send)]
pub async fn run(
    multi: &MultiProgress,
    config: WardPatrolConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("Ward Patrol");
    println!();

    let labels: Vec<&str> = Action::ALL.iter().map(Action::label).collect();

    loop {
        let idx = Select::new()
            .with_prompt("What would you like to do?")
            .items(&labels)
            .default(0)
            .interact()?;

        match Action::ALL[idx] {
            Action::Deploy => {
                // the store is reopened per action so imports are visible
                let pipeline = Pipeline::open(config.clone())?;
                deploy_ward(multi, &pipeline).await?;
            }
            Action::Import => import(&config)?,
            Action::Quit => return Ok(()),
        }
        println!();
    }
}

#[allow(clippy::future_not_send)]
async fn deploy_ward(
    multi: &MultiProgress,
    pipeline: &Pipeline,
) -> Result<(), Box<dyn std::error::Error>> {
    let wards = pipeline.ward_options()?;
    if wards.is_empty() {
        println!("No wards in the store. Import incidents first.");
        return Ok(());
    }

    let labels: Vec<String> = wards
        .iter()
        .map(|ward| format!("{} [{} incidents]", ward.label(), ward.incident_count))
        .collect();
    let idx = Select::new()
        .with_prompt("Ward")
        .items(&labels)
        .default(0)
        .max_length(20)
        .interact()?;

    let officers = prompt_positive("Number of officers", DEFAULT_OFFICERS)?;

    let street = pipeline.street_distance_enabled()
        && confirm("Compute street-network distances?", true)?;
    let export = if confirm("Export CSV, JSON and GeoJSON files?", false)? {
        let default_dir = pipeline.config().data.output_dir.display().to_string();
        let dir: String = Input::new()
            .with_prompt("Output directory")
            .default(default_dir)
            .interact_text()?;
        Some(Some(PathBuf::from(dir)))
    } else {
        None
    };

    let request = DeploymentRequest {
        ward_code: wards[idx].code.clone(),
        officers,
    };
    deploy(multi, pipeline, &request, &DeployOptions { street, export }).await?;
    Ok(())
}

fn import(config: &WardPatrolConfig) -> Result<(), Box<dyn std::error::Error>> {
    let kinds = ["Incidents CSV", "Ward boundaries CSV"];
    let kind = Select::new()
        .with_prompt("What are you importing?")
        .items(&kinds)
        .default(0)
        .interact()?;

    let path: String = Input::new().with_prompt("CSV path").interact_text()?;
    let path = PathBuf::from(path.trim());

    let store = DuckDbIncidentStore::open(&config.data.database)?;
    let summary = if kind == 0 {
        import_incidents_csv(&store, &path)?
    } else {
        import_wards_csv(&store, &path)?
    };

    println!(
        "Imported {} row(s), skipped {}, generated {} id(s)",
        summary.inserted, summary.skipped, summary.generated_ids
    );
    Ok(())
}
