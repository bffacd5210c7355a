//! Command-line interface definition using clap
//!
//! Provides structured argument parsing with automatic help generation.
//! Flags override the matching config file values.

use crate::config::{Config, DEFAULT_CONFIG_FILE};
use clap::Parser;
use std::path::PathBuf;

// =============================================================================
// CLI Definition
// =============================================================================

/// TCP client for bedside patient monitors
#[derive(Parser, Debug)]
#[command(name = "bedside-link")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file (missing file = defaults)
    #[arg(short, long, value_name = "FILE", default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// Monitor host (overrides config)
    #[arg(long, value_name = "HOST")]
    pub host: Option<String>,

    /// Monitor TCP port (overrides config)
    #[arg(long, value_name = "PORT")]
    pub port: Option<u16>,

    /// Append samples as JSON lines to this file (overrides config)
    #[arg(long, value_name = "FILE")]
    pub record: Option<PathBuf>,

    /// Enable verbose debug output
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    /// Apply command-line overrides on top of the loaded config
    pub fn apply(&self, config: &mut Config) {
        if let Some(ref host) = self.host {
            config.monitor.host = host.clone();
        }
        if let Some(port) = self.port {
            config.monitor.port = port;
        }
        if let Some(ref record) = self.record {
            config.record.path = Some(record.clone());
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
