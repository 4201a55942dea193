//! Configuration
//!
//! Timeouts for the plugin host, limits for the cost engine, and where to
//! find plugins and pricing specs. Everything has a default; a YAML file at
//! `~/.costwell/config.yaml` and a couple of environment variables can
//! override them.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{PluginError, PluginResult};

/// Overrides the plugin root
pub const PLUGIN_DIR_ENV: &str = "COSTWELL_PLUGIN_DIR";
/// Overrides the pricing-spec directory
pub const SPEC_DIR_ENV: &str = "COSTWELL_SPEC_DIR";

/// Plugin launch timeouts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchConfig {
    /// How long to keep dialing a freshly spawned plugin
    #[serde(with = "humantime_serde", default = "default_connect_timeout")]
    pub connect_timeout: Duration,
    /// Delay between dial attempts
    #[serde(with = "humantime_serde", default = "default_retry_interval")]
    pub retry_interval: Duration,
    /// Bound on the `Name()` identity call
    #[serde(with = "humantime_serde", default = "default_handshake_timeout")]
    pub handshake_timeout: Duration,
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_retry_interval() -> Duration {
    Duration::from_millis(100)
}

fn default_handshake_timeout() -> Duration {
    Duration::from_secs(10)
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            connect_timeout: default_connect_timeout(),
            retry_interval: default_retry_interval(),
            handshake_timeout: default_handshake_timeout(),
        }
    }
}

/// Cost engine limits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineOptions {
    /// Hard bound on a whole batch
    #[serde(with = "humantime_serde", default = "default_overall_deadline")]
    pub overall_deadline: Duration,
    /// Log a warning when a batch runs longer than this
    #[serde(with = "humantime_serde", default = "default_warn_threshold")]
    pub warn_threshold: Duration,
    /// Bound on the plugin phase of one resource
    #[serde(with = "humantime_serde", default = "default_per_resource_timeout")]
    pub per_resource_timeout: Duration,
    /// Bound on one plugin RPC
    #[serde(with = "humantime_serde", default = "default_per_plugin_timeout")]
    pub per_plugin_timeout: Duration,
    /// Workers per available CPU
    #[serde(default = "default_concurrency_multiplier")]
    pub concurrency_multiplier: usize,
    /// Absolute worker cap, overrides the multiplier
    #[serde(default)]
    pub max_concurrency: Option<usize>,
}

fn default_overall_deadline() -> Duration {
    Duration::from_secs(300)
}

fn default_warn_threshold() -> Duration {
    Duration::from_secs(120)
}

fn default_per_resource_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_per_plugin_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_concurrency_multiplier() -> usize {
    4
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            overall_deadline: default_overall_deadline(),
            warn_threshold: default_warn_threshold(),
            per_resource_timeout: default_per_resource_timeout(),
            per_plugin_timeout: default_per_plugin_timeout(),
            concurrency_multiplier: default_concurrency_multiplier(),
            max_concurrency: None,
        }
    }
}

impl EngineOptions {
    /// Number of workers for a batch of `len` items. Never zero for a
    /// non-empty batch and never more than `len`.
    pub fn workers_for(&self, len: usize) -> usize {
        let cap = self.max_concurrency.unwrap_or_else(|| {
            let cpus = std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1);
            cpus.saturating_mul(self.concurrency_multiplier.max(1))
        });
        cap.max(1).min(len.max(1))
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostwellConfig {
    /// Plugin root, `<root>/<name>/<version>/<binary>`
    #[serde(default = "default_plugin_dir")]
    pub plugin_dir: PathBuf,
    /// Directory of local pricing specs
    #[serde(default = "default_spec_dir")]
    pub spec_dir: PathBuf,
    #[serde(default)]
    pub launch: LaunchConfig,
    #[serde(default)]
    pub engine: EngineOptions,
}

/// `~/.costwell`
pub fn config_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("~"))
        .join(".costwell")
}

fn default_plugin_dir() -> PathBuf {
    config_home().join("plugins")
}

fn default_spec_dir() -> PathBuf {
    config_home().join("specs")
}

impl Default for CostwellConfig {
    fn default() -> Self {
        Self {
            plugin_dir: default_plugin_dir(),
            spec_dir: default_spec_dir(),
            launch: LaunchConfig::default(),
            engine: EngineOptions::default(),
        }
    }
}

impl CostwellConfig {
    /// Default config file location
    pub fn default_path() -> PathBuf {
        config_home().join("config.yaml")
    }

    /// Load from `path` (or the default location), then apply environment
    /// overrides. A missing file yields the defaults.
    pub fn load(path: Option<&Path>) -> PluginResult<Self> {
        let path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(Self::default_path);

        let mut config = match std::fs::read_to_string(&path) {
            Ok(content) => Self::from_yaml(&content).map_err(|e| match e {
                PluginError::Config { source, .. } => PluginError::Config {
                    message: format!("parsing {}", path.display()),
                    source,
                },
                other => other,
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                Self::default()
            }
            Err(e) => return Err(PluginError::io(format!("reading {}", path.display()), e)),
        };

        config.apply_env();
        Ok(config)
    }

    /// Parse a YAML document. Absent keys take their defaults.
    pub fn from_yaml(content: &str) -> PluginResult<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content)
            .map_err(|e| PluginError::config_with_source("invalid configuration", e))
    }

    fn apply_env(&mut self) {
        if let Some(dir) = std::env::var_os(PLUGIN_DIR_ENV).filter(|v| !v.is_empty()) {
            self.plugin_dir = PathBuf::from(dir);
        }
        if let Some(dir) = std::env::var_os(SPEC_DIR_ENV).filter(|v| !v.is_empty()) {
            self.spec_dir = PathBuf::from(dir);
        }
    }
}
