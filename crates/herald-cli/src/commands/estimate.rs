//! Estimate command implementation.

use anyhow::Result;
use console::style;

use herald_sim::AnalyticalEstimate;

/// Print the closed-form success probability and time to entanglement.
pub fn execute(
    collection: f64,
    transmission: f64,
    detection: f64,
    prep_time: f64,
    prep_number: u32,
    emission: f64,
) -> Result<()> {
    for (name, value) in [
        ("collection", collection),
        ("transmission", transmission),
        ("detection", detection),
    ] {
        if !(0.0..=1.0).contains(&value) {
            anyhow::bail!("{name} must be in [0, 1], got {value}");
        }
    }
    if prep_number == 0 {
        anyhow::bail!("prep-number must be at least 1");
    }

    let estimate =
        AnalyticalEstimate::new(collection, transmission, detection, prep_time, prep_number, emission);

    println!("{} Analytical estimate", style("→").cyan().bold());
    println!("  Success probability: {}", style(format!("{:.6e}", estimate.probability)).yellow());
    println!("  Expected attempts:   {:.1}", estimate.attempts);
    println!("  Time to entangle:    {} s", style(format!("{:.4}", estimate.time_s)).yellow());
    Ok(())
}
