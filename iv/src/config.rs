//! Interactview configuration types and loading

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Main configuration, read once at boot
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,

    /// Source file location
    pub data: DataConfig,

    /// External producer settings
    pub producer: ProducerConfig,

    /// Tailing and cache settings
    pub ingest: IngestConfig,

    /// Live stream settings
    pub stream: StreamConfig,

    /// HTTP server settings
    pub server: ServerConfig,
}

impl Config {
    /// Load configuration with fallback chain, then apply environment overrides
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        let mut config = Self::load_file_chain(config_path)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    fn load_file_chain(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .interactview.yml
        let local_config = PathBuf::from(".interactview.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/interactview/interactview.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("interactview").join("interactview.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        // No config file found, use defaults
        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Read only the log level, before logging is initialized
    pub fn load_log_level(config_path: Option<&PathBuf>) -> Option<String> {
        let path = match config_path {
            Some(path) => path.clone(),
            None => {
                let local = PathBuf::from(".interactview.yml");
                if local.exists() {
                    local
                } else {
                    dirs::config_dir()?.join("interactview").join("interactview.yml")
                }
            }
        };
        let content = fs::read_to_string(path).ok()?;
        serde_yaml::from_str::<Self>(&content).ok()?.log_level
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Apply environment-style overrides from `lookup`
    ///
    /// Empty values are ignored, like unset ones.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.is_empty());

        if let Some(dir) = get("INTERACT_DATA_DIR") {
            self.data.dir = PathBuf::from(dir);
        }
        if let Some(file) = get("DATA_FILE") {
            self.data.file = Some(PathBuf::from(file));
        }
        if let Some(mode) = get("INTERACT_MODE") {
            match mode.parse() {
                Ok(mode) => self.producer.mode = mode,
                Err(e) => tracing::warn!("Ignoring INTERACT_MODE: {}", e),
            }
        }
        if let Some(image) = get("INTERACT_IMAGE") {
            self.producer.image = image;
        }
        if let Some(name) = get("INTERACT_CONTAINER_NAME") {
            self.producer.container_name = name;
        }
        if let Some(file) = get("INTERACT_CONTAINER_DATA") {
            self.producer.container_data_file = file;
        }
        if let Some(bin) = get("INTERACT_BIN") {
            self.producer.executable = bin;
        }
        if let Some(server) = get("INTERACT_SERVER") {
            self.producer.default_server = server;
        }
        if let Some(bin) = get("CONTAINER_BIN") {
            self.producer.runtime_bin = Some(bin);
        }
        if let Some(sudo) = lookup("CONTAINER_SUDO") {
            self.producer.sudo = is_enabled(&sudo);
        }
        if let Some(bind) = get("IV_BIND") {
            self.server.bind = bind;
        }
        debug!(?self, "Config::apply_overrides: applied");
    }

    /// Path of the NDJSON file the producer writes and the tailers read
    pub fn source_file(&self) -> PathBuf {
        self.data.source_file()
    }

    /// Parsed bind address for the HTTP server
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        self.server
            .bind
            .parse()
            .context(format!("Invalid bind address: {}", self.server.bind))
    }
}

/// Truthy toggle values accepted from the environment
fn is_enabled(value: &str) -> bool {
    matches!(value.trim().to_lowercase().as_str(), "1" | "true" | "yes")
}

/// Source file location
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Host directory holding the source file; mounted into the container
    pub dir: PathBuf,

    /// Source file; defaults to `<dir>/interactions.ndjson`
    pub file: Option<PathBuf>,
}

impl DataConfig {
    pub fn source_file(&self) -> PathBuf {
        self.file.clone().unwrap_or_else(|| self.dir.join("interactions.ndjson"))
    }
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            dir: dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".interactsh-viewer")
                .join("data"),
            file: None,
        }
    }
}

/// How the producer is run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProducerMode {
    /// Through a docker/podman compatible CLI
    #[default]
    Container,
    /// As a direct child process
    Local,
}

impl std::str::FromStr for ProducerMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "container" | "docker" | "podman" => Ok(Self::Container),
            "local" | "process" => Ok(Self::Local),
            _ => Err(format!("Unknown producer mode: {}. Use: container or local", s)),
        }
    }
}

impl std::fmt::Display for ProducerMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Container => write!(f, "container"),
            Self::Local => write!(f, "local"),
        }
    }
}

/// Default payload identifier pattern scanned from producer logs
pub const DEFAULT_PAYLOAD_PATTERN: &str = r"([a-z0-9]{10,}\.oast\.(?:pro|live))";

/// Default pattern for hosts that look like a payload identifier
pub const DEFAULT_PAYLOAD_HOST_PATTERN: &str = r"\.oast\.(?:pro|live)\.?$";

/// External producer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProducerConfig {
    pub mode: ProducerMode,

    /// Container image
    pub image: String,

    /// Container instance name
    #[serde(rename = "container-name")]
    pub container_name: String,

    /// Output file path as seen inside the container
    #[serde(rename = "container-data-file")]
    pub container_data_file: String,

    /// Producer executable for local mode
    pub executable: String,

    /// Upstream server used when start does not name one
    #[serde(rename = "default-server")]
    pub default_server: String,

    /// Container runtime binary; discovered when unset
    #[serde(rename = "runtime-bin")]
    pub runtime_bin: Option<String>,

    /// Prefix runtime commands with sudo
    pub sudo: bool,

    /// Payload pattern; group 1 (or the whole match) is the identifier
    #[serde(rename = "payload-pattern")]
    pub payload_pattern: String,

    /// Pattern for event hosts used by the status fallback scan
    #[serde(rename = "payload-host-pattern")]
    pub payload_host_pattern: String,

    /// Seconds to wait after SIGTERM before killing
    #[serde(rename = "grace-period-secs")]
    pub grace_period_secs: u64,

    /// Timeout for one-shot runtime commands
    #[serde(rename = "command-timeout-secs")]
    pub command_timeout_secs: u64,

    /// How long start waits for the first payload in the producer log
    #[serde(rename = "payload-wait-ms")]
    pub payload_wait_ms: u64,
}

impl ProducerConfig {
    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn payload_wait(&self) -> Duration {
        Duration::from_millis(self.payload_wait_ms)
    }
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            mode: ProducerMode::Container,
            image: "projectdiscovery/interactsh-client".to_string(),
            container_name: "interactsh-client".to_string(),
            container_data_file: "/data/interactions.ndjson".to_string(),
            executable: "interactsh-client".to_string(),
            default_server: "https://oast.pro".to_string(),
            runtime_bin: None,
            sudo: false,
            payload_pattern: DEFAULT_PAYLOAD_PATTERN.to_string(),
            payload_host_pattern: DEFAULT_PAYLOAD_HOST_PATTERN.to_string(),
            grace_period_secs: 5,
            command_timeout_secs: crate::runtime::DEFAULT_COMMAND_TIMEOUT.as_secs(),
            payload_wait_ms: 3000,
        }
    }
}

/// Tailing and cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Idle delay between end-of-file checks
    #[serde(rename = "poll-interval-ms")]
    pub poll_interval_ms: u64,

    /// Maximum cached events
    #[serde(rename = "cache-capacity")]
    pub cache_capacity: usize,

    /// Trailing lines read by warm-up
    #[serde(rename = "warmup-lines")]
    pub warmup_lines: usize,

    /// Subscriber cursors also append to the cache
    #[serde(rename = "subscriber-cache-writes")]
    pub subscriber_cache_writes: bool,
}

impl IngestConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 200,
            cache_capacity: crate::cache::MAX_CACHE,
            warmup_lines: crate::cache::WARMUP_LINES,
            subscriber_cache_writes: false,
        }
    }
}

/// Live stream settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Idle seconds before a keep-alive frame
    #[serde(rename = "keepalive-secs")]
    pub keepalive_secs: u64,
}

impl StreamConfig {
    pub fn keepalive(&self) -> Duration {
        Duration::from_secs(self.keepalive_secs)
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self { keepalive_secs: 15 }
    }
}

/// HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address
    pub bind: String,

    /// Directory holding index.html
    #[serde(rename = "static-dir")]
    pub static_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:5000".to_string(),
            static_dir: PathBuf::from("."),
        }
    }
}
