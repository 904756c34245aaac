#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Shared CLI utilities for ward patrol binaries.
//!
//! Provides an `indicatif` bar for street scoring behind the
//! [`ScoringProgress`] trait, stage spinners, [`init_logger`] which sets up
//! `indicatif-log-bridge` so that `log::info!` and friends are suspended
//! while progress bars redraw, and a few `dialoguer` prompt helpers.

use std::sync::Arc;
use std::time::Duration;

use dialoguer::{Confirm, Input};
use indicatif::{ProgressBar, ProgressStyle};
use ward_patrol_deployment_models::DistanceReport;
use ward_patrol_scoring::progress::{ScoringPhase, ScoringProgress};

pub use indicatif::MultiProgress;

/// Street scoring rendered as an `indicatif` bar.
///
/// Starts as a spinner and switches to a bar with percentage and ETA once
/// the run reports how many incidents it covers.
pub struct StreetProgressBar {
    bar: ProgressBar,
    bar_style: ProgressStyle,
}

impl StreetProgressBar {
    #[must_use]
    pub fn attach(multi: &MultiProgress, message: &str) -> Arc<dyn ScoringProgress> {
        let bar = multi.add(ProgressBar::new_spinner());
        bar.enable_steady_tick(Duration::from_millis(100));
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.set_message(message.to_string());

        let bar_style = ProgressStyle::with_template(
            "  {msg} {wide_bar:.cyan/dim} {pos}/{len} {percent}% [{eta}]",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("##-");

        Arc::new(Self { bar, bar_style })
    }
}

impl ScoringProgress for StreetProgressBar {
    fn started(&self, incidents: u64) {
        self.bar.set_length(incidents);
        self.bar.reset();
        self.bar.set_style(self.bar_style.clone());
    }

    fn phase(&self, phase: ScoringPhase) {
        self.bar.set_message(phase.label());
    }

    fn scored(&self, incidents: u64) {
        self.bar.inc(incidents);
    }

    fn finished(&self, report: &DistanceReport) {
        self.bar.finish_with_message(format!(
            "Street distances: {} measured, {} excluded",
            report.measured, report.excluded
        ));
    }
}

/// Spinner for a stage with no measurable progress, such as model fitting.
/// Clear it with [`ProgressBar::finish_and_clear`] when the stage ends.
#[must_use]
pub fn stage_spinner(multi: &MultiProgress, message: &str) -> ProgressBar {
    let bar = multi.add(ProgressBar::new_spinner());
    bar.enable_steady_tick(Duration::from_millis(100));
    bar.set_style(
        ProgressStyle::with_template("{spinner:.yellow} {msg} [{elapsed}]")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    bar.set_message(message.to_string());
    bar
}

/// Initializes the global logger wrapped in `indicatif-log-bridge` so that
/// `log::info!` and friends are suspended while progress bars redraw.
///
/// Returns the [`MultiProgress`] that all progress bars must be added to.
#[must_use]
pub fn init_logger() -> MultiProgress {
    let multi = MultiProgress::new();

    // Build the pretty-env-logger logger manually so we can wrap it.
    let logger = pretty_env_logger::formatted_builder()
        .parse_env("RUST_LOG")
        .build();
    let level = logger.filter();

    indicatif_log_bridge::LogWrapper::new(multi.clone(), logger)
        .try_init()
        .ok(); // already set, e.g. in tests

    log::set_max_level(level);

    multi
}

/// Prompts for a strictly positive integer, re-asking until one is given.
///
/// # Errors
///
/// Returns an error if the terminal interaction fails.
pub fn prompt_positive(prompt: &str, default: usize) -> Result<usize, dialoguer::Error> {
    Input::new()
        .with_prompt(prompt)
        .default(default)
        .validate_with(|value: &usize| {
            if *value == 0 {
                Err("must be at least 1")
            } else {
                Ok(())
            }
        })
        .interact_text()
}

/// Asks a yes/no question.
///
/// # Errors
///
/// Returns an error if the terminal interaction fails.
pub fn confirm(prompt: &str, default: bool) -> Result<bool, dialoguer::Error> {
    Confirm::new().with_prompt(prompt).default(default).interact()
}
