//! Docker-style registry credentials.
//!
//! Credentials come from `config.json` files in the format written by
//! `docker login`:
//!
//! ```json
//! {"auths": {"https://index.docker.io/v1/": {"auth": "dXNlcjpwYXNz"}}}
//! ```
//!
//! Files are searched in order and the first file that has a credential for
//! a host wins. Credential helpers (`credsStore`, `credHelpers`) are not
//! consulted.

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::CredentialLoadError;

const DOCKER_HUB: &str = "docker.io";
const DOCKER_HUB_ALIASES: &[&str] = &["index.docker.io", "registry-1.docker.io"];

#[derive(Debug, Default, Deserialize)]
struct DockerConfigFile {
    #[serde(default)]
    auths: HashMap<String, AuthEntry>,
}

#[derive(Debug, Default, Deserialize)]
struct AuthEntry {
    #[serde(default)]
    auth: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
    #[serde(default, rename = "identitytoken")]
    identity_token: Option<String>,
    #[serde(default, rename = "registrytoken")]
    registry_token: Option<String>,
}

/// Credential for one registry host.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    /// Username and password, sent as basic auth or exchanged for a token.
    Basic { username: String, password: String },
    /// OAuth2 refresh token exchanged at the token endpoint.
    IdentityToken { username: String, token: String },
    /// Bearer token sent as is.
    RegistryToken(String),
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .finish_non_exhaustive(),
            Credential::IdentityToken { username, .. } => f
                .debug_struct("IdentityToken")
                .field("username", username)
                .finish_non_exhaustive(),
            Credential::RegistryToken(_) => f.write_str("RegistryToken(..)"),
        }
    }
}

/// Credentials keyed by normalized registry host.
#[derive(Debug, Clone, Default)]
pub struct CredentialStore {
    by_host: HashMap<String, Credential>,
}

impl CredentialStore {
    /// An empty store; every registry is accessed anonymously.
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Load credentials from the given files in order.
    ///
    /// Missing files are skipped. Unreadable or malformed files are skipped
    /// with a warning.
    pub fn load(paths: &[PathBuf]) -> Self {
        let mut store = Self::default();

        for path in paths {
            match load_file(path) {
                Ok(Some(entries)) => {
                    debug!(path = %path.display(), hosts = entries.len(), "Loaded credentials");
                    for (host, credential) in entries {
                        store.by_host.entry(host).or_insert(credential);
                    }
                }
                Ok(None) => {}
                Err(e) => warn!(error = %e, "Skipping credential file"),
            }
        }

        store
    }

    /// Add a credential unless the host already has one.
    pub fn insert(&mut self, host: &str, credential: Credential) {
        self.by_host
            .entry(normalize_host(host))
            .or_insert(credential);
    }

    /// Get the credential for a registry host.
    pub fn get(&self, host: &str) -> Option<&Credential> {
        self.by_host.get(&normalize_host(host))
    }

    pub fn is_empty(&self) -> bool {
        self.by_host.is_empty()
    }
}

/// Parse a single docker config file.
///
/// Returns `Ok(None)` if the file does not exist. An invalid entry rejects
/// the whole file.
pub fn load_file(path: &Path) -> Result<Option<Vec<(String, Credential)>>, CredentialLoadError> {
    let contents = match std::fs::read(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(CredentialLoadError::Read {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    let file: DockerConfigFile =
        serde_json::from_slice(&contents).map_err(|source| CredentialLoadError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

    let mut entries = Vec::new();
    for (key, entry) in file.auths {
        let host = normalize_host(&key);
        let credential = entry
            .into_credential()
            .map_err(|reason| CredentialLoadError::InvalidEntry {
                path: path.to_path_buf(),
                host: host.clone(),
                reason,
            })?;
        if let Some(credential) = credential {
            entries.push((host, credential));
        }
    }

    Ok(Some(entries))
}

/// Default credential search paths: `$DOCKER_CONFIG/config.json`, then
/// `~/.docker/config.json`.
pub fn default_config_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    if let Some(dir) = std::env::var_os("DOCKER_CONFIG").filter(|d| !d.is_empty()) {
        paths.push(PathBuf::from(dir).join("config.json"));
    }

    if let Some(base) = directories::BaseDirs::new() {
        let path = base.home_dir().join(".docker").join("config.json");
        if !paths.contains(&path) {
            paths.push(path);
        }
    }

    paths
}

/// Normalize a config key or registry domain to a bare host.
///
/// `https://index.docker.io/v1/` and `registry-1.docker.io` both become
/// `docker.io`.
pub fn normalize_host(key: &str) -> String {
    let key = key.trim();
    let key = key
        .strip_prefix("https://")
        .or_else(|| key.strip_prefix("http://"))
        .unwrap_or(key);
    let host = key.split('/').next().unwrap_or(key).to_ascii_lowercase();

    if DOCKER_HUB_ALIASES.contains(&host.as_str()) {
        DOCKER_HUB.to_string()
    } else {
        host
    }
}

impl AuthEntry {
    fn into_credential(self) -> Result<Option<Credential>, String> {
        if let Some(token) = self.registry_token.filter(|t| !t.is_empty()) {
            return Ok(Some(Credential::RegistryToken(token)));
        }

        let (username, password) = match self.auth.filter(|a| !a.is_empty()) {
            Some(auth) => {
                let (user, pass) = decode_auth(&auth)?;
                (Some(user), Some(pass))
            }
            None => (self.username, self.password),
        };

        if let Some(token) = self.identity_token.filter(|t| !t.is_empty()) {
            return Ok(Some(Credential::IdentityToken {
                username: username.unwrap_or_default(),
                token,
            }));
        }

        match (username, password) {
            (Some(username), Some(password)) if !username.is_empty() => {
                Ok(Some(Credential::Basic { username, password }))
            }
            (Some(_), None) => Err("username without password".to_string()),
            _ => Ok(None),
        }
    }
}

fn decode_auth(auth: &str) -> Result<(String, String), String> {
    let decoded = STANDARD
        .decode(auth.trim())
        .map_err(|e| format!("auth is not base64: {e}"))?;
    let decoded = String::from_utf8(decoded).map_err(|_| "auth is not UTF-8".to_string())?;
    let (user, pass) = decoded
        .split_once(':')
        .ok_or_else(|| "auth is not user:password".to_string())?;
    Ok((user.to_string(), pass.to_string()))
}
