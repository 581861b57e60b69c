//! Application configuration.
//!
//! Resolved in layers, later layers winning:
//! 1. built-in defaults
//! 2. `config.toml` in the platform config dir, or the file named by `RSI_CONFIG`
//! 3. `RSI_*` environment variables (a `.env` file is honored via dotenvy)
//!
//! ```toml
//! listen_port = 41295
//! command_timeout_secs = 5
//!
//! [[catalogs]]
//! path = "catalogs/drupal_modules_d11.json"
//! platform_version = "11.0.0"
//! ```

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::profile::CacheConfig;
use crate::remote::SshOptions;
use crate::remote::session::{DEFAULT_COMMAND_TIMEOUT, DEFAULT_CONNECT_TIMEOUT, default_known_hosts};
use crate::server::DEFAULT_LISTEN_PORT;

pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const DB_FILE_NAME: &str = "profiles.db";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },
}

/// A catalog file and the platform version it was published for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogSource {
    pub path: PathBuf,
    pub platform_version: String,
}

/// An environment value that could not be parsed and was skipped.
///
/// Loading runs before the log subscriber exists, so these are kept on the
/// config and reported through [`AppConfig::log_warnings`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigWarning {
    pub key: String,
    pub value: String,
}

/// Values that may come from the file or the environment.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct Overrides {
    data_dir: Option<PathBuf>,
    db_path: Option<PathBuf>,
    listen_addr: Option<IpAddr>,
    listen_port: Option<u16>,
    command_timeout_secs: Option<u64>,
    connect_timeout_secs: Option<u64>,
    known_hosts: Option<PathBuf>,
    cache_ttl_secs: Option<u64>,
    cache_capacity: Option<usize>,
    catalogs: Vec<CatalogSource>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
    pub listen_addr: SocketAddr,
    pub command_timeout: Duration,
    pub connect_timeout: Duration,
    pub known_hosts: Option<PathBuf>,
    pub cache: CacheConfig,
    pub catalogs: Vec<CatalogSource>,
    pub warnings: Vec<ConfigWarning>,
}

impl AppConfig {
    /// Defaults rooted at `data_dir`.
    pub fn defaults(data_dir: PathBuf) -> Self {
        Self {
            db_path: data_dir.join(DB_FILE_NAME),
            data_dir,
            listen_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), DEFAULT_LISTEN_PORT),
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            known_hosts: default_known_hosts(),
            cache: CacheConfig::default(),
            catalogs: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Load from the default locations.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = dotenvy::var("RSI_CONFIG")
            .map(PathBuf::from)
            .ok()
            .or_else(default_config_path);
        Self::load_from(config_path.as_deref(), crate::default_data_dir())
    }

    /// Load with an explicit config file. A missing file is not an error.
    pub fn load_from(config_path: Option<&Path>, default_data_dir: PathBuf) -> Result<Self, ConfigError> {
        let mut overrides = match config_path {
            Some(path) if path.exists() => read_file(path)?,
            Some(path) => {
                debug!(path = %path.display(), "No config file, using defaults");
                Overrides::default()
            }
            None => Overrides::default(),
        };
        let warnings = apply_env(&mut overrides);
        let mut config = Self::resolve(overrides, default_data_dir)?;
        config.warnings = warnings;
        Ok(config)
    }

    fn resolve(overrides: Overrides, default_data_dir: PathBuf) -> Result<Self, ConfigError> {
        let data_dir = overrides.data_dir.unwrap_or(default_data_dir);
        let mut config = Self::defaults(data_dir);

        if let Some(db_path) = overrides.db_path {
            config.db_path = db_path;
        }
        if let Some(addr) = overrides.listen_addr {
            config.listen_addr.set_ip(addr);
        }
        if let Some(port) = overrides.listen_port {
            config.listen_addr.set_port(port);
        }
        if let Some(secs) = overrides.command_timeout_secs {
            config.command_timeout = positive_secs("command_timeout_secs", secs)?;
        }
        if let Some(secs) = overrides.connect_timeout_secs {
            config.connect_timeout = positive_secs("connect_timeout_secs", secs)?;
        }
        if let Some(path) = overrides.known_hosts {
            config.known_hosts = Some(path);
        }
        if let Some(secs) = overrides.cache_ttl_secs {
            config.cache.ttl = Duration::from_secs(secs);
        }
        if let Some(capacity) = overrides.cache_capacity {
            if capacity == 0 {
                return Err(ConfigError::InvalidValue {
                    key: "cache_capacity".into(),
                    reason: "must be at least 1".into(),
                });
            }
            config.cache.capacity = capacity;
        }
        config.catalogs = overrides.catalogs;

        Ok(config)
    }

    /// Emit the warnings collected while loading.
    pub fn log_warnings(&self) {
        for warning in &self.warnings {
            warn!(key = %warning.key, value = %warning.value, "Ignoring unparsable environment value");
        }
    }

    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }

    pub fn ssh_options(&self) -> SshOptions {
        SshOptions {
            connect_timeout: self.connect_timeout,
            known_hosts: self.known_hosts.clone(),
        }
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("com", "remote-site-installer", "remote-site-installer")
        .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
}

fn read_file(path: &Path) -> Result<Overrides, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut overrides: Overrides = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    // Catalog paths are relative to the config file.
    if let Some(base) = path.parent() {
        for catalog in &mut overrides.catalogs {
            if catalog.path.is_relative() {
                catalog.path = base.join(&catalog.path);
            }
        }
    }
    debug!(path = %path.display(), "Loaded config file");
    Ok(overrides)
}

fn apply_env(overrides: &mut Overrides) -> Vec<ConfigWarning> {
    if let Ok(path) = dotenvy::var("RSI_DATA_DIR") {
        overrides.data_dir = Some(PathBuf::from(path));
    }
    if let Ok(path) = dotenvy::var("RSI_DB_PATH") {
        overrides.db_path = Some(PathBuf::from(path));
    }
    if let Ok(path) = dotenvy::var("RSI_KNOWN_HOSTS") {
        overrides.known_hosts = Some(PathBuf::from(path));
    }

    let mut warnings = Vec::new();
    env_parse("RSI_LISTEN_ADDR", &mut overrides.listen_addr, &mut warnings);
    env_parse("RSI_LISTEN_PORT", &mut overrides.listen_port, &mut warnings);
    env_parse("RSI_COMMAND_TIMEOUT_SECS", &mut overrides.command_timeout_secs, &mut warnings);
    env_parse("RSI_CONNECT_TIMEOUT_SECS", &mut overrides.connect_timeout_secs, &mut warnings);
    env_parse("RSI_CACHE_TTL_SECS", &mut overrides.cache_ttl_secs, &mut warnings);
    env_parse("RSI_CACHE_CAPACITY", &mut overrides.cache_capacity, &mut warnings);
    warnings
}

fn env_parse<T: std::str::FromStr>(key: &str, slot: &mut Option<T>, warnings: &mut Vec<ConfigWarning>) {
    if let Ok(val) = dotenvy::var(key) {
        match val.trim().parse() {
            Ok(parsed) => *slot = Some(parsed),
            Err(_) => warnings.push(ConfigWarning {
                key: key.to_string(),
                value: val,
            }),
        }
    }
}

fn positive_secs(key: &str, secs: u64) -> Result<Duration, ConfigError> {
    if secs == 0 {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            reason: "must be greater than zero".into(),
        });
    }
    Ok(Duration::from_secs(secs))
}
