//! CLI subcommand implementations.

pub mod delete;
pub mod devices;
pub mod events;
pub mod migrate;
pub mod report;
pub mod run;
pub mod util;
