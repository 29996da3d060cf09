//! Game device play-time monitor CLI.
//!
//! This crate wires the core domain, store and network crates into the
//! `gtm` binary.

mod cli;
pub mod commands;
mod config;

pub use cli::{Cli, Commands};
pub use config::{Config, StoreKind};
