//! Configuration loading and management.

use std::fmt;
use std::path::{Path, PathBuf};

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};

/// Which snapshot backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    Json,
    Sqlite,
}

impl StoreKind {
    /// Default file name for this backend under the data directory.
    #[must_use]
    pub const fn default_file_name(self) -> &'static str {
        match self {
            Self::Json => "gametime.json",
            Self::Sqlite => "gametime.db",
        }
    }
}

/// Application configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct Config {
    /// Broker endpoint (host:port).
    pub endpoint: String,
    /// Channel the monitor subscribes to.
    pub channel: String,
    /// Snapshot backend.
    pub store: StoreKind,
    /// Snapshot location; defaults to the platform data directory.
    pub store_path: Option<PathBuf>,
    /// Broker connect timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// How often the monitor persists changed state, in seconds.
    pub save_interval_secs: u64,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("endpoint", &self.endpoint)
            .field("channel", &self.channel)
            .field("store", &self.store)
            .field("store_path", &self.store_path)
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .field("save_interval_secs", &self.save_interval_secs)
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: "127.0.0.1:7878".to_string(),
            channel: "gametime/events".to_string(),
            store: StoreKind::Json,
            store_path: None,
            connect_timeout_ms: 4_000,
            save_interval_secs: 60,
        }
    }
}

impl Config {
    /// Loads configuration, optionally from a specific file.
    ///
    /// Precedence, lowest to highest: built-in defaults, the platform
    /// config file, an explicitly passed file, `GTM_*` environment
    /// variables.
    #[expect(
        clippy::result_large_err,
        reason = "figment::Error is large but only returned at startup"
    )]
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, figment::Error> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Some(config_dir) = dirs_config_path() {
            figment = figment.merge(Toml::file(config_dir.join("config.toml")));
        }

        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }

        figment = figment.merge(Env::prefixed("GTM_"));

        figment.extract()
    }

    /// Where the snapshot lives, honoring `store_path` when set.
    #[must_use]
    pub fn resolved_store_path(&self) -> PathBuf {
        self.store_path.clone().unwrap_or_else(|| {
            dirs_data_path()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(self.store.default_file_name())
        })
    }

    /// Default path for a specific backend, ignoring `store_path`.
    #[must_use]
    pub fn default_path_for(&self, kind: StoreKind) -> PathBuf {
        dirs_data_path()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(kind.default_file_name())
    }
}

/// Returns the platform-specific config directory for gtm.
fn dirs_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("gtm"))
}

/// Returns the platform-specific data directory for gtm.
///
/// On Linux: `~/.local/share/gtm`
pub fn dirs_data_path() -> Option<PathBuf> {
    dirs::data_dir().map(|p| p.join("gtm"))
}
