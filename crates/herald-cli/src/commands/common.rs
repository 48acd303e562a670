//! Shared helpers for CLI commands.

use std::path::Path;

use anyhow::{Context, Result};
use console::style;

use herald_sim::{RunReport, SimConfig};

/// Load defaults, the optional file and `HERALD_*` overrides.
pub fn load_config(path: Option<&Path>) -> Result<SimConfig> {
    if let Some(path) = path {
        if !path.exists() {
            anyhow::bail!("File not found: {}", path.display());
        }
    }
    SimConfig::load(path).with_context(|| match path {
        Some(path) => format!("Failed to load configuration from {}", path.display()),
        None => "Invalid configuration from environment".to_string(),
    })
}

/// Print a run report as a short summary.
pub fn print_report(report: &RunReport) {
    let total = report.trials.len();
    println!(
        "\n{} {}/{} trials entangled ({} encoding, seed {}):",
        style("✓").green().bold(),
        report.completed,
        total,
        report.encoding,
        report.seed
    );

    println!("  Mean attempts:       {}", style(format!("{:.2}", report.mean_attempts)).yellow());
    println!("  Mean time:           {} s", style(format!("{:.4}", report.mean_time_s)).yellow());
    println!(
        "  Signs (psi+ : psi-): {} : {}",
        report.sign_counts[0], report.sign_counts[1]
    );
    if let Some(fidelity) = report.fidelity {
        println!("  Probe fidelity:      {}", style(format!("{fidelity:.4}")).yellow());
    }

    let m = &report.metrics;
    println!("\n  BSM pairs (ee:el:le:ll): {}:{}:{}:{}", m.early_early, m.early_late, m.late_early, m.late_late);
    println!(
        "  Triggers:            {} ({} heralded, {} bad timing, {} undesired)",
        m.trigger_count, m.heralded_triggers, m.approved_state_invalid_time, m.undesired_valid_timing
    );
    println!(
        "  Losses:              {} in fibre/BSM, {} dead time, {} atom, {} off-resonance",
        m.bsm_photon_losses, m.dead_time_losses, m.atom_losses, m.off_resonance_decays
    );
    println!("  Dark counts:         {}", m.dark_counts);

    let a = &report.analytical;
    println!(
        "\n  Analytical:          p = {:.4e}, {:.1} attempts, {:.4} s",
        a.probability, a.attempts, a.time_s
    );

    if !report.attempts_histogram.is_empty() {
        println!("\n  Attempts to success:");
        let max = report.attempts_histogram.values().copied().max().unwrap_or(1).max(1);
        for (attempts, count) in report.attempts_histogram.iter().take(16) {
            let bar = "█".repeat((*count as usize * 30).div_ceil(max as usize));
            println!("  {:>6}: {:>5} {}", style(attempts).cyan(), count, style(bar).green());
        }
        if report.attempts_histogram.len() > 16 {
            println!("  ... and {} more", report.attempts_histogram.len() - 16);
        }
    }
}
