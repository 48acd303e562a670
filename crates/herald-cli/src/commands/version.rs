//! Version command implementation.

use console::style;

/// Execute the version command.
pub fn execute() {
    let version = env!("CARGO_PKG_VERSION");

    println!(
        "{} {} - heralded entanglement generation simulator",
        style("Herald").cyan().bold(),
        style(format!("v{version}")).yellow()
    );
    println!();
    println!("Components:");
    println!("  herald-kernel  Event timeline and ket-vector state manager");
    println!("  herald-sim     Memories, detectors, time-bin BSM and protocols");
    println!("  herald-cli     Command-line interface");
    println!();
    println!("License:    {}", style(env!("CARGO_PKG_LICENSE")).dim());
}
