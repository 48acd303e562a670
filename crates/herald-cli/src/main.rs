//! Herald command-line interface.
//!
//! ```text
//!   end[0] ~~~~~~~~> [ BSM ] <~~~~~~~~ end[1]
//!        \_____ herald ___/\___ herald ____/
//! ```

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use console::style;
use tracing_subscriber::EnvFilter;

mod commands;

use commands::{config, estimate, run, version};

/// Herald - heralded entanglement generation over a time-bin BSM relay
#[derive(Parser)]
#[command(name = "herald")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run entanglement trials between the two end nodes
    Run {
        /// YAML configuration file
        #[arg(short, long, env = "HERALD_CONFIG")]
        config: Option<PathBuf>,

        /// Number of entangled pairs to generate
        #[arg(short = 'n', long)]
        trials: Option<u32>,

        /// Base random seed
        #[arg(long)]
        seed: Option<u64>,

        /// Memory photon collection efficiency
        #[arg(long)]
        efficiency: Option<f64>,

        /// Detector dark count rate in Hz
        #[arg(long)]
        dark_count: Option<f64>,

        /// Attempts between atom reloads
        #[arg(long)]
        retrap: Option<u32>,

        /// Write the JSON report to this file
        #[arg(long)]
        json: Option<PathBuf>,

        /// Hide the progress bar
        #[arg(short, long)]
        quiet: bool,
    },

    /// Print the effective configuration as YAML
    Config {
        /// YAML configuration file to merge over the defaults
        #[arg(short, long, env = "HERALD_CONFIG")]
        config: Option<PathBuf>,
    },

    /// Closed-form rate estimate
    Estimate {
        /// Photon collection efficiency of each memory
        #[arg(long, default_value = "0.5")]
        collection: f64,

        /// Fibre transmission to the BSM
        #[arg(long, default_value = "0.997")]
        transmission: f64,

        /// Detector efficiency
        #[arg(long, default_value = "0.8")]
        detection: f64,

        /// Atom reload time in seconds
        #[arg(long, default_value = "0.5")]
        prep_time: f64,

        /// Attempts between reloads
        #[arg(long, default_value = "128")]
        prep_number: u32,

        /// Duration of one attempt in seconds
        #[arg(long, default_value = "0.0014")]
        emission: f64,
    },

    /// Show version information
    Version,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command {
        Commands::Run {
            config,
            trials,
            seed,
            efficiency,
            dark_count,
            retrap,
            json,
            quiet,
        } => run::execute(&run::RunArgs {
            config,
            trials,
            seed,
            efficiency,
            dark_count,
            retrap,
            json,
            quiet,
        }),

        Commands::Config { config } => config::execute(config.as_deref()),

        Commands::Estimate {
            collection,
            transmission,
            detection,
            prep_time,
            prep_number,
            emission,
        } => estimate::execute(collection, transmission, detection, prep_time, prep_number, emission),

        Commands::Version => {
            version::execute();
            Ok(())
        }
    };

    // Handle errors
    if let Err(e) = result {
        eprintln!("{} {:#}", style("Error:").red().bold(), e);
        std::process::exit(1);
    }

    Ok(())
}
