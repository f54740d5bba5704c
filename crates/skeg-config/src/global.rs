//! Global configuration for skeg
//!
//! Located at `~/.config/skeg/config.toml`

use crate::{ConfigError, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable that overrides the runtime endpoint
pub const DOCKER_HOST_ENV: &str = "DOCKER_HOST";

/// Set to `1` to talk to the runtime over verified TLS
pub const DOCKER_TLS_VERIFY_ENV: &str = "DOCKER_TLS_VERIFY";

/// Directory holding `ca.pem`, `cert.pem` and `key.pem`
pub const DOCKER_CERT_PATH_ENV: &str = "DOCKER_CERT_PATH";

/// Directory under the user's home where environments live by default
const DEFAULT_ENVS_DIR: &str = "~/skegs";

/// Global skeg configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    pub defaults: DefaultsConfig,
    pub runtime: RuntimeConfig,
    pub paths: PathsConfig,
}

/// Default settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DefaultsConfig {
    /// Keep the home directory in a named runtime volume instead of a local directory
    pub home_volume: bool,
    /// Grace period in seconds before a stopping container is killed
    pub stop_timeout: u32,
    /// External ssh client used by `connect`
    pub ssh_command: String,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            home_volume: false,
            stop_timeout: 10,
            ssh_command: "ssh".to_string(),
        }
    }
}

/// Container runtime connection settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Runtime endpoint (`unix:///var/run/docker.sock`, `tcp://host:2376`).
    /// Empty means the local socket.
    pub host: String,
    /// Connect over TLS, verifying the daemon against the CA certificate
    pub tls_verify: bool,
    /// Directory holding `ca.pem`, `cert.pem` and `key.pem` for `tls_verify`
    pub cert_path: String,
}

/// Filesystem locations
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Base directory for per-environment directories and the shared keypair.
    /// Empty means `~/skegs`.
    pub envs_dir: String,
}

/// Resolved runtime endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Address handed to the runtime client
    pub address: String,
    /// True when the address came from an explicit override rather than the
    /// built-in local socket
    pub overridden: bool,
}

/// TLS settings given on the command line
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsFlags {
    pub verify: bool,
    pub ca_cert: Option<PathBuf>,
    pub cert: Option<PathBuf>,
    pub key: Option<PathBuf>,
}

/// Certificate files for a TLS runtime connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsPaths {
    pub ca_cert: PathBuf,
    pub cert: PathBuf,
    pub key: PathBuf,
}

impl TlsPaths {
    /// The docker layout: `ca.pem`, `cert.pem` and `key.pem` in `dir`
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            ca_cert: dir.join("ca.pem"),
            cert: dir.join("cert.pem"),
            key: dir.join("key.pem"),
        }
    }
}

#[cfg(windows)]
fn default_docker_socket() -> String {
    "npipe:////./pipe/docker_engine".to_string()
}

#[cfg(not(windows))]
fn default_docker_socket() -> String {
    "unix:///var/run/docker.sock".to_string()
}

impl GlobalConfig {
    /// Load global configuration from the default path
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        Self::load_from(&path)
    }

    /// Load global configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::TomlParseError {
            path: path.to_path_buf(),
            source: e,
        })?;

        tracing::debug!("Loaded config from {:?}", path);

        Ok(config)
    }

    /// Save configuration to the default path
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        self.save_to(&path)
    }

    /// Save configuration to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::WriteError {
                path: path.to_path_buf(),
                source: e,
            })?;
        }

        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid(e.to_string()))?;

        std::fs::write(path, content).map_err(|e| ConfigError::WriteError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Get the default config file path
    pub fn config_path() -> Result<PathBuf> {
        let dirs = ProjectDirs::from("", "", "skeg").ok_or(ConfigError::NoConfigDir)?;
        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Base directory holding environment directories, with `~` and
    /// environment variables expanded
    pub fn envs_dir(&self) -> Result<PathBuf> {
        let raw = if self.paths.envs_dir.trim().is_empty() {
            DEFAULT_ENVS_DIR
        } else {
            self.paths.envs_dir.trim()
        };

        let expanded =
            shellexpand::full(raw).map_err(|e| ConfigError::Invalid(e.to_string()))?;
        if expanded.starts_with('~') {
            return Err(ConfigError::NoHomeDir);
        }

        Ok(PathBuf::from(expanded.into_owned()))
    }

    /// Resolve the runtime endpoint.
    ///
    /// Precedence: `$DOCKER_HOST`, then the `--host` flag, then `runtime.host`,
    /// then the local socket.
    pub fn endpoint(&self, cli_host: Option<&str>) -> Endpoint {
        let env_host = std::env::var(DOCKER_HOST_ENV).ok();
        self.endpoint_from(env_host.as_deref(), cli_host)
    }

    /// Endpoint resolution with the environment value passed in explicitly
    pub fn endpoint_from(&self, env_host: Option<&str>, cli_host: Option<&str>) -> Endpoint {
        let candidates = [env_host, cli_host, Some(self.runtime.host.as_str())];
        match candidates
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|h| !h.is_empty())
        {
            Some(host) => Endpoint {
                address: host.to_string(),
                overridden: true,
            },
            None => Endpoint {
                address: default_docker_socket(),
                overridden: false,
            },
        }
    }

    /// Resolve TLS certificates for the runtime connection, or None for a
    /// plain connection.
    ///
    /// TLS is on when `$DOCKER_TLS_VERIFY` is `1`, `--tlsverify` is passed or
    /// `runtime.tls_verify` is set. Certificates come from `$DOCKER_CERT_PATH`,
    /// then the three `--tls*` file flags, then `runtime.cert_path`.
    pub fn tls(&self, flags: &TlsFlags) -> Result<Option<TlsPaths>> {
        let env_verify = std::env::var(DOCKER_TLS_VERIFY_ENV).ok();
        let env_cert_path = std::env::var(DOCKER_CERT_PATH_ENV).ok();
        self.tls_from(env_verify.as_deref(), env_cert_path.as_deref(), flags)
    }

    /// TLS resolution with the environment values passed in explicitly
    pub fn tls_from(
        &self,
        env_verify: Option<&str>,
        env_cert_path: Option<&str>,
        flags: &TlsFlags,
    ) -> Result<Option<TlsPaths>> {
        let env_on = env_verify.map(str::trim) == Some("1");
        if !(env_on || flags.verify || self.runtime.tls_verify) {
            return Ok(None);
        }

        if let Some(dir) = env_cert_path.map(str::trim).filter(|d| !d.is_empty()) {
            return Ok(Some(TlsPaths::in_dir(Path::new(dir))));
        }

        if let (Some(ca_cert), Some(cert), Some(key)) = (&flags.ca_cert, &flags.cert, &flags.key) {
            return Ok(Some(TlsPaths {
                ca_cert: ca_cert.clone(),
                cert: cert.clone(),
                key: key.clone(),
            }));
        }

        let configured = self.runtime.cert_path.trim();
        if !configured.is_empty() {
            let expanded =
                shellexpand::full(configured).map_err(|e| ConfigError::Invalid(e.to_string()))?;
            return Ok(Some(TlsPaths::in_dir(Path::new(expanded.as_ref()))));
        }

        Err(ConfigError::Invalid(
            "TLS verification requested but certs not specified".into(),
        ))
    }
}
