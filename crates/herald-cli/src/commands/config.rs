//! Config command implementation.

use std::path::Path;

use anyhow::{Context, Result};

use super::common::load_config;

/// Print the configuration a run would use.
pub fn execute(path: Option<&Path>) -> Result<()> {
    let config = load_config(path)?;
    let yaml = serde_yaml_ng::to_string(&config).context("Failed to serialize configuration")?;
    print!("{yaml}");
    Ok(())
}
