use std::path::Path;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use gtm_cli::commands::{delete, devices, events, migrate, report, run};
use gtm_cli::{Cli, Commands, Config, StoreKind};
use gtm_core::DateRange;
use gtm_store::{JsonStore, SnapshotStore, SqliteStore};

fn open_store(kind: StoreKind, path: &Path) -> Result<Box<dyn SnapshotStore + Send>> {
    Ok(match kind {
        StoreKind::Json => Box::new(JsonStore::new(path)),
        StoreKind::Sqlite => Box::new(
            SqliteStore::open(path)
                .with_context(|| format!("failed to open {}", path.display()))?,
        ),
    })
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env()
    };
    // Use try_init to avoid panic if tracing is already initialized (e.g., in tests)
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();

    let mut config =
        Config::load_from(cli.config.as_deref()).context("failed to load configuration")?;
    tracing::debug!(?config, "loaded configuration");

    let mut stdout = std::io::stdout();
    match cli.command {
        Commands::Run { endpoint, channel } => {
            if let Some(endpoint) = endpoint {
                config.endpoint = endpoint;
            }
            if let Some(channel) = channel {
                config.channel = channel;
            }
            let store = open_store(config.store, &config.resolved_store_path())?;
            run::run(&config, store)?;
        }
        Commands::Report { from, to, json } => {
            let mut store = open_store(config.store, &config.resolved_store_path())?;
            report::run(&mut stdout, store.as_mut(), DateRange::new(from, to), json)?;
        }
        Commands::Devices { json } => {
            let mut store = open_store(config.store, &config.resolved_store_path())?;
            devices::run(&mut stdout, store.as_mut(), json)?;
        }
        Commands::Events { limit } => {
            let mut store = open_store(config.store, &config.resolved_store_path())?;
            events::run(&mut stdout, store.as_mut(), limit)?;
        }
        Commands::Delete { device_id, yes } => {
            let mut store = open_store(config.store, &config.resolved_store_path())?;
            delete::run(&mut stdout, store.as_mut(), &device_id, yes)?;
        }
        Commands::Migrate { to, dest } => {
            let source_path = config.resolved_store_path();
            let dest_path = dest.unwrap_or_else(|| config.default_path_for(to));
            if to == config.store && dest_path == source_path {
                bail!("destination is the current store; pass --dest or change --to");
            }
            let mut source = open_store(config.store, &source_path)?;
            let mut dest = open_store(to, &dest_path)?;
            migrate::run(
                &mut stdout,
                source.as_mut(),
                dest.as_mut(),
                &dest_path.display().to_string(),
            )?;
        }
    }
    Ok(())
}
