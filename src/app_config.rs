//! Module for application configuration settings.
//!
//! User configurations may be specified in a configuration file, with
//! command-line flags taking precedence over it.

use bytesize::ByteSize;
use thiserror::Error;
use tracing::{debug, info};

use std::net::{Ipv4Addr, SocketAddr};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use fairserve::sched::{Policy, PolicyParseError, Tuning};

fn default_listen() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, 8080))
}

fn default_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_workers() -> usize {
    std::thread::available_parallelism().map_or(4, NonZeroUsize::get)
}

fn default_cache_size() -> ByteSize {
    ByteSize::mib(64)
}

fn default_policy() -> String {
    Policy::RoundRobin.to_string()
}

fn default_quantum() -> u64 {
    Tuning::default().quantum
}

fn default_levels() -> usize {
    Tuning::default().levels
}

/// The server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ServerConfig {
    /// Address the server accepts connections on.
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,

    /// Directory files are served out of.
    #[serde(default = "default_root")]
    pub root: PathBuf,

    /// Worker threads draining the scheduler.
    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            root: default_root(),
            workers: default_workers(),
        }
    }
}

/// The cache configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CacheConfig {
    /// Maximum bytes of file content kept resident.
    #[serde(default = "default_cache_size")]
    pub max_size: ByteSize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: default_cache_size(),
        }
    }
}

/// The scheduler configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SchedulerConfig {
    /// Queueing discipline: SJF, RR or MLFB.
    #[serde(default = "default_policy")]
    pub policy: String,

    /// Bytes a transfer may move per turn under RR and MLFB.
    #[serde(default = "default_quantum")]
    pub quantum: u64,

    /// Number of feedback levels under MLFB.
    #[serde(default = "default_levels")]
    pub levels: usize,

    /// Cap on admitted-but-unfinished requests. Unbounded if not set.
    pub capacity: Option<usize>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            policy: default_policy(),
            quantum: default_quantum(),
            levels: default_levels(),
            capacity: None,
        }
    }
}

/// Application configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration validation errors: {0:?}")]
    ValidationErrors(Vec<String>),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] toml::ser::Error),

    #[error("Deserialization error: {0}")]
    DeserializationError(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Config parent directory does not exist.")]
    NoParentDir,

    #[error("No suitable configuration path found.")]
    NoSuitableConfigPath,
}

impl Config {
    /// Validate the correctness of the configuration.
    ///
    /// Returns:
    /// - `Ok(())` if the configuration is valid.
    /// - `Err(Vec<String>)` containing a list of validation error messages if the configuration
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if !self.server.root.is_dir() {
            errors.push(format!(
                "Serving root '{}' is not a directory.",
                self.server.root.display()
            ));
        }

        if self.server.workers == 0 {
            errors.push("At least one worker thread is required.".to_owned());
        }

        if let Err(err) = self.policy() {
            errors.push(err.to_string());
        }

        if self.scheduler.quantum == 0 {
            errors.push("Scheduler quantum must be at least 1 byte.".to_owned());
        }

        if self.scheduler.levels == 0 {
            errors.push("The scheduler needs at least one feedback level.".to_owned());
        }

        if self.scheduler.capacity == Some(0) {
            errors.push("A queue capacity of 0 would refuse every request.".to_owned());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// The parsed scheduling policy.
    pub fn policy(&self) -> Result<Policy, PolicyParseError> {
        self.scheduler.policy.parse()
    }

    /// Scheduler tuning derived from the configuration.
    #[must_use]
    pub fn tuning(&self) -> Tuning {
        Tuning {
            quantum: self.scheduler.quantum,
            levels: self.scheduler.levels,
            capacity: self.scheduler.capacity,
        }
    }

    /// Fold command-line overrides into the loaded configuration.
    pub fn apply_overrides(
        &mut self,
        listen: Option<SocketAddr>,
        root: Option<PathBuf>,
        policy: Option<String>,
    ) {
        if let Some(listen) = listen {
            self.server.listen = listen;
        }
        if let Some(root) = root {
            self.server.root = root;
        }
        if let Some(policy) = policy {
            self.scheduler.policy = policy;
        }
    }

    /// Returns config file paths in descending priority order.
    /// On macOS, skips `dirs::config_dir()` (resolves to ~/Library/Application Support/).
    fn config_search_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();

        #[cfg(not(target_os = "macos"))]
        if let Some(xdg) = dirs::config_dir() {
            paths.push(xdg.join("fairserve").join("config.toml"));
        }

        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".config").join("fairserve").join("config.toml"));
        }

        paths.push(PathBuf::from("/etc/fairserve/config.toml"));

        paths
    }

    /// Finds the first existing config file from search paths.
    fn find_config_file() -> Option<PathBuf> {
        Self::config_search_paths().into_iter().find(|p| p.exists())
    }

    /// Loads config from a single TOML file.
    fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        debug!(path = ?path, "Loading configuration file.");
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Loads configuration from the first found config file, or the external path if given.
    pub fn load(external_config_path: Option<&Path>) -> Option<Result<Self, ConfigError>> {
        if let Some(path) = external_config_path {
            return Some(Self::load_from_file(path));
        }

        Self::find_config_file().map(|path| Self::load_from_file(&path))
    }

    /// Loads config or creates a default if none exists.
    /// Errors if a config file exists but is malformed.
    pub fn load_or_create(external_config_path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(res) = Self::load(external_config_path) {
            let config = res?;
            debug!("Loaded configuration successfully.");
            return Ok(config);
        }

        // No config exists, write the defaults to the highest-priority path
        let creation_path = Self::config_search_paths()
            .into_iter()
            .next()
            .ok_or(ConfigError::NoSuitableConfigPath)?;

        let config = Self::default();
        config.write_to_disk(&creation_path)?;
        info!(path = ?creation_path.display(), "Created configuration file.");
        Ok(config)
    }

    fn write_to_disk(&self, path: &Path) -> Result<(), ConfigError> {
        let toml_str = toml::to_string_pretty(self)?;
        std::fs::create_dir_all(path.parent().ok_or(ConfigError::NoParentDir)?)?;
        std::fs::write(path, toml_str)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_configuration_validates() {
        assert_eq!(Config::default().validate(), Ok(()));
    }

    #[test]
    fn toml_round_trip_preserves_everything() {
        let mut config = Config::default();
        config.scheduler.capacity = Some(128);

        let serialized = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&serialized).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let config: Config = toml::from_str(
            "[server]\nlisten = \"0.0.0.0:9000\"\n\n[scheduler]\npolicy = \"mlfb\"\n",
        )
        .unwrap();

        assert_eq!(config.server.listen, "0.0.0.0:9000".parse().unwrap());
        assert_eq!(config.server.workers, default_workers());
        assert_eq!(config.scheduler.policy, "mlfb");
        assert_eq!(config.scheduler.quantum, default_quantum());
        assert_eq!(config.cache.max_size, default_cache_size());
    }

    #[test]
    fn unparseable_policy_is_flagged() {
        let mut config = Config::default();
        config.scheduler.policy = "fifo".to_owned();

        let errors = config.validate().unwrap_err();
        assert!(
            errors.iter().any(|e| e.contains("fifo")),
            "the offending policy should be named: {errors:?}"
        );
    }

    #[test]
    fn overrides_take_precedence() {
        let mut config = Config::default();
        config.apply_overrides(None, Some(PathBuf::from("/srv/www")), Some("sjf".to_owned()));

        assert_eq!(config.server.listen, default_listen(), "unset overrides change nothing");
        assert_eq!(config.server.root, PathBuf::from("/srv/www"));
        assert_eq!(config.policy(), Ok(Policy::Sjf));
    }
}
