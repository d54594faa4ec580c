//! Store and registry configuration.
//!
//! The configuration is resolved once, usually at process start, and passed
//! to [`open_store`] and [`registry_client`].

use std::path::PathBuf;
use std::time::Duration;

use onmetal_registry::{credentials, CredentialStore, RegistryClient, RegistryConfig, RegistryError};
use onmetal_store::{Store, StoreError};

use crate::error::ConfigError;

pub const STORE_PATH_ENV: &str = "ONMETAL_STORE_PATH";
pub const DOCKER_CONFIG_PATHS_ENV: &str = "ONMETAL_DOCKER_CONFIG_PATHS";
pub const PLAIN_HTTP_REGISTRIES_ENV: &str = "ONMETAL_PLAIN_HTTP_REGISTRIES";
pub const REGISTRY_TIMEOUT_ENV: &str = "ONMETAL_REGISTRY_TIMEOUT_SECS";

const DEFAULT_STORE_DIR: &str = ".onmetal";
const DEFAULT_REGISTRY_TIMEOUT_SECS: u64 = 60;

/// Resolved store and registry configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory of the local store.
    pub store_path: PathBuf,

    /// Docker config files searched for credentials, in order.
    pub docker_config_paths: Vec<PathBuf>,

    /// Registry hosts reached over plain HTTP.
    pub plain_http_registries: Vec<String>,

    /// Timeout for registry manifest and metadata requests.
    pub registry_timeout: Duration,
}

impl Config {
    /// Configuration for a store path, with default credential paths.
    pub fn new(store_path: impl Into<PathBuf>) -> Self {
        Self {
            store_path: store_path.into(),
            docker_config_paths: credentials::default_config_paths(),
            plain_http_registries: Vec::new(),
            registry_timeout: Duration::from_secs(DEFAULT_REGISTRY_TIMEOUT_SECS),
        }
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through a variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let store_path = match var(STORE_PATH_ENV) {
            Some(path) => PathBuf::from(path),
            None => default_store_path().ok_or(ConfigError::NoStorePath(STORE_PATH_ENV))?,
        };

        let docker_config_paths = match var(DOCKER_CONFIG_PATHS_ENV) {
            Some(paths) => std::env::split_paths(&paths).collect(),
            None => credentials::default_config_paths(),
        };

        let plain_http_registries = var(PLAIN_HTTP_REGISTRIES_ENV)
            .map(|hosts| {
                hosts
                    .split(',')
                    .map(str::trim)
                    .filter(|h| !h.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let registry_timeout = match var(REGISTRY_TIMEOUT_ENV) {
            Some(value) => value
                .trim()
                .parse()
                .map(Duration::from_secs)
                .map_err(|_| ConfigError::InvalidValue {
                    name: REGISTRY_TIMEOUT_ENV,
                    value,
                })?,
            None => Duration::from_secs(DEFAULT_REGISTRY_TIMEOUT_SECS),
        };

        Ok(Self {
            store_path,
            docker_config_paths,
            plain_http_registries,
            registry_timeout,
        })
    }
}

/// `~/.onmetal`, if a home directory is known.
pub fn default_store_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|base| base.home_dir().join(DEFAULT_STORE_DIR))
}

/// Open the configured store.
pub fn open_store(config: &Config) -> Result<Store, StoreError> {
    Store::open(&config.store_path)
}

/// Build a registry client with credentials from the configured files.
pub fn registry_client(config: &Config) -> Result<RegistryClient, RegistryError> {
    RegistryClient::new(RegistryConfig {
        credentials: CredentialStore::load(&config.docker_config_paths),
        plain_http: config.plain_http_registries.clone(),
        request_timeout: config.registry_timeout,
        ..Default::default()
    })
}
