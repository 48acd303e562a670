//! CLI command implementations.

pub mod common;
pub mod config;
pub mod estimate;
pub mod run;
pub mod version;
