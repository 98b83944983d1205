use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::{WatchdogConfig, DEFAULT_CONFIG_PATH};
use crate::domain::HealthSnapshot;
use crate::error::Result;

#[derive(Parser)]
#[command(name = "homepi-watchdog")]
#[command(author = "HomePi Team")]
#[command(version)]
#[command(about = "Health monitor and self-healing supervisor for the HomePi hub", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Config file path
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH, env = "HOMEPI_WATCHDOG_CONFIG")]
    pub config: PathBuf,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Run the monitor loop and status server (default)
    Run,
    /// Run every probe once and print the snapshot; never remediates
    Check {
        /// Exit non-zero when any probe fails
        #[arg(long)]
        strict: bool,
    },
    /// Print the effective configuration and any validation problems
    Config,
}

/// Print a one-shot snapshot as a short table followed by the JSON document
pub fn print_snapshot(snapshot: &HealthSnapshot) -> Result<()> {
    println!("\n=== Health check ({}) ===\n", snapshot.timestamp.format("%Y-%m-%d %H:%M:%S UTC"));
    for (kind, result) in &snapshot.results {
        let mark = if result.passed { "OK  " } else { "FAIL" };
        println!("  [{}] {:<10} {:>5}ms", mark, kind.as_str(), result.duration_ms);
    }
    for warning in snapshot.warnings() {
        println!("  warning: {}", warning);
    }
    println!();
    println!("{}", serde_json::to_string_pretty(snapshot)?);
    Ok(())
}

/// Print the effective configuration; returns whether it is valid
pub fn print_config(config: &WatchdogConfig) -> Result<bool> {
    println!("{}", serde_json::to_string_pretty(config)?);

    let disabled = config.disabled_features();
    if !disabled.is_empty() {
        println!("\nDisabled: {}", disabled.join(", "));
    }

    match config.validate() {
        Ok(()) => {
            println!("\nConfiguration is valid");
            Ok(true)
        }
        Err(errors) => {
            println!("\nConfiguration problems:");
            for e in &errors {
                println!("  - {}", e);
            }
            Ok(false)
        }
    }
}
