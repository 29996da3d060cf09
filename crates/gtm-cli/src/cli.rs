//! Command-line argument definitions.

use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};

use crate::config::StoreKind;

/// Game device play-time monitor.
///
/// Subscribes to device lifecycle events from a broker, reconstructs play
/// sessions and reports time per device per calendar day.
#[derive(Debug, Parser)]
#[command(name = "gtm", version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to config file.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the monitor: connect to the broker and record sessions.
    Run {
        /// Broker endpoint, e.g. 127.0.0.1:7878.
        #[arg(long)]
        endpoint: Option<String>,

        /// Channel to subscribe to.
        #[arg(long)]
        channel: Option<String>,
    },

    /// Report play time per device per day.
    Report {
        /// First day to include (inclusive), e.g. 2024-01-01.
        #[arg(long)]
        from: Option<NaiveDate>,

        /// Last day to include (inclusive).
        #[arg(long)]
        to: Option<NaiveDate>,

        /// Emit JSON instead of the human-readable table.
        #[arg(long)]
        json: bool,
    },

    /// List known devices with presence and totals.
    Devices {
        /// Emit JSON instead of the human-readable table.
        #[arg(long)]
        json: bool,
    },

    /// Show the trailing event log, newest first.
    Events {
        /// Maximum number of entries to show.
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// Delete a device and all of its history.
    Delete {
        /// The device id to delete.
        device_id: String,

        /// Skip the confirmation requirement.
        #[arg(long)]
        yes: bool,
    },

    /// Copy the snapshot into a different store backend.
    Migrate {
        /// Destination backend.
        #[arg(long, value_enum)]
        to: StoreKind,

        /// Destination path (defaults to the standard location for the
        /// chosen backend).
        #[arg(long)]
        dest: Option<PathBuf>,
    },
}
