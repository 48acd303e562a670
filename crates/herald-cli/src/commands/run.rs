//! Run command implementation.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use herald_sim::runner::TrialOutcome;
use herald_sim::{RunReport, SimConfig, TrialRunner};

use super::common::{load_config, print_report};

/// Arguments of `herald run`.
#[derive(Debug, Default)]
pub struct RunArgs {
    pub config: Option<PathBuf>,
    pub trials: Option<u32>,
    pub seed: Option<u64>,
    pub efficiency: Option<f64>,
    pub dark_count: Option<f64>,
    pub retrap: Option<u32>,
    pub json: Option<PathBuf>,
    pub quiet: bool,
}

/// JSON document written by `--json`.
#[derive(Debug, Serialize)]
struct RunRecord<'a> {
    run_id: Uuid,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    config: &'a SimConfig,
    report: &'a RunReport,
}

/// Apply command-line flags over the loaded configuration.
fn apply_flags(mut config: SimConfig, args: &RunArgs) -> Result<SimConfig> {
    if let Some(trials) = args.trials {
        config.run.trials = trials;
    }
    if let Some(seed) = args.seed {
        config.run.seed = seed;
    }
    if let Some(efficiency) = args.efficiency {
        config.memory.efficiency = efficiency;
    }
    if let Some(dark_count) = args.dark_count {
        config.detector.dark_count = dark_count;
    }
    if let Some(retrap) = args.retrap {
        config.protocol.retrap_threshold = retrap;
    }
    config.validate().context("Invalid command-line override")?;
    Ok(config)
}

/// Execute the run command.
pub fn execute(args: &RunArgs) -> Result<()> {
    let config = apply_flags(load_config(args.config.as_deref())?, args)?;
    let run_id = Uuid::new_v4();
    let started_at = Utc::now();

    println!(
        "{} Running {} trials ({} encoding, memory efficiency {}, seed {})",
        style("→").cyan().bold(),
        style(config.run.trials).green(),
        style(&config.encoding.kind).yellow(),
        config.memory.efficiency,
        config.run.seed
    );
    info!(%run_id, "run started");

    let mut runner = TrialRunner::new(config.clone())?;

    let bar = if args.quiet {
        ProgressBar::hidden()
    } else {
        ProgressBar::new(u64::from(config.run.trials))
    };
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.cyan} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .context("Invalid progress bar template")?
            .progress_chars("=> "),
    );

    let report = runner.run(|trial| {
        match trial.outcome {
            TrialOutcome::Entangled => bar.set_message(format!("{} attempts", trial.attempts)),
            other => bar.set_message(format!("trial {} ended: {other:?}", trial.index)),
        }
        bar.inc(1);
    })?;
    bar.finish_and_clear();

    print_report(&report);

    if let Some(path) = &args.json {
        let record = RunRecord {
            run_id,
            started_at,
            finished_at: Utc::now(),
            config: &config,
            report: &report,
        };
        let json = serde_json::to_string_pretty(&record).context("Failed to serialize report")?;
        fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
        println!("\n  Report written to {}", style(path.display()).green());
    }

    Ok(())
}
