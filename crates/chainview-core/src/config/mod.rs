//! Application configuration with layered loading.
//!
//! Configuration is loaded in this order (later overrides earlier):
//!
//! 1. **Compiled defaults**: hardcoded in the `Default` implementation
//! 2. **Config file**: `config.{toml,yaml,json}` in the working
//!    directory or under `~/.chainview/`
//! 3. **Environment variables**: `PORT`, `CHAIN`, `STORAGE_PATH`,
//!    `BOOTSTRAP_URL`, `SYNC_URL` override specific fields
//!
//! Invalid configurations return errors at load time rather than
//! failing later.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Log output configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter level when `RUST_LOG` is unset. Defaults to `info`.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// `pretty` or `json`. Defaults to `pretty`.
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level(), format: default_log_format() }
    }
}

/// Top-level service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// HTTP listen port. Defaults to `3011`.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Chain identifier (`main`, `test`, ...). Defaults to `main`.
    #[serde(default = "default_network")]
    pub network: String,

    /// Header store root. Defaults to `~/.chainview`.
    #[serde(default = "default_storage_path")]
    pub storage_path: PathBuf,

    /// Optional CDN base URL for the initial bulk sync.
    #[serde(default)]
    pub bootstrap_url: Option<String>,

    /// Optional remote server URL for range catch-up after bootstrap.
    #[serde(default)]
    pub sync_url: Option<String>,

    /// Optional JSON file with per-network bootstrap peer
    /// multiaddresses, handed to the gossip transport.
    #[serde(default)]
    pub bootstrap_peers: Option<PathBuf>,

    /// Headers per bulk file. Defaults to the production constant.
    #[serde(default = "default_headers_per_file")]
    pub headers_per_file: u32,

    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_port() -> u16 {
    3011
}

fn default_network() -> String {
    "main".to_string()
}

fn default_storage_path() -> PathBuf {
    dirs::home_dir()
        .map_or_else(|| PathBuf::from(".chainview"), |home| home.join(".chainview"))
}

fn default_headers_per_file() -> u32 {
    crate::store::DEFAULT_HEADERS_PER_FILE
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            network: default_network(),
            storage_path: default_storage_path(),
            bootstrap_url: None,
            sync_url: None,
            bootstrap_peers: None,
            headers_per_file: default_headers_per_file(),
            logging: LoggingConfig::default(),
        }
    }
}

impl AppConfig {
    /// Loads configuration from files and the environment.
    ///
    /// # Errors
    ///
    /// Malformed files, unparseable values, or failed validation.
    pub fn load() -> Result<Self, ConfigError> {
        let mut sources = Config::builder().add_source(File::with_name("config").required(false));
        if let Some(home) = dirs::home_dir() {
            sources = sources.add_source(
                File::from(home.join(".chainview").join("config")).required(false),
            );
        }

        let mut cfg: Self = sources
            .add_source(Environment::default().try_parsing(true))
            .build()?
            .try_deserialize()?;

        // The chain identifier rides a differently-named variable.
        if let Ok(chain) = std::env::var("CHAIN") {
            if !chain.is_empty() {
                cfg.network = chain;
            }
        }

        cfg.validate()?;
        Ok(cfg)
    }

    /// Checks invariants that the type system cannot.
    ///
    /// # Errors
    ///
    /// A message naming the offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::Message("port must be greater than 0".into()));
        }
        if self.network.is_empty() {
            return Err(ConfigError::Message("network must not be empty".into()));
        }
        if self.headers_per_file == 0 {
            return Err(ConfigError::Message(
                "headers_per_file must be greater than 0".into(),
            ));
        }
        match self.logging.format.as_str() {
            "pretty" | "json" => Ok(()),
            other => Err(ConfigError::Message(format!(
                "unknown logging format {other:?} (expected \"pretty\" or \"json\")"
            ))),
        }
    }
}
