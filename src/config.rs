//! Command-line parsing and validation helpers.

use anyhow::{bail, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_STREAM_END_GRACE_MS: u64 = 0;

/// CLI options for the stdio chat backend. One positional argument selects
/// the engine config; everything else has defaults.
#[derive(Debug, Parser, Clone)]
#[command(about = "Stdio LLM chat backend", version)]
pub struct AppConfig {
    /// Path to the engine config file (JSON)
    #[arg(value_name = "CONFIG")]
    pub config_path: PathBuf,

    /// Extra delay before the stream end marker (milliseconds), for engines
    /// whose respond() returns before their final write
    #[arg(long = "stream-end-grace-ms", default_value_t = DEFAULT_STREAM_END_GRACE_MS)]
    pub stream_end_grace_ms: u64,
}

impl AppConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.config_path.is_file() {
            bail!("engine config not found: {}", self.config_path.display());
        }
        Ok(())
    }

    pub fn stream_end_grace(&self) -> Duration {
        Duration::from_millis(self.stream_end_grace_ms)
    }
}
