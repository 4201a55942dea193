//! Costwell error types
//!
//! Every fallible operation in the plugin host, registry and engine returns
//! [`PluginError`]. Each variant maps onto a [`PluginErrorKind`] so callers can
//! decide between "report and continue" and "abort the command" without
//! matching on individual variants.

use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Coarse classification of a [`PluginError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginErrorKind {
    /// Binary missing, not executable, or failed to spawn
    Launcher,
    /// Plugin never became reachable within the connect timeout
    ConnectionTimeout,
    /// Identity handshake failed or returned garbage
    Protocol,
    /// A cost RPC failed
    Rpc,
    /// The caller's cancellation token fired
    Cancelled,
    /// Plugin root unreadable, unknown plugin, or nothing to price with
    RegistryFatal,
    /// Tearing down a plugin process failed
    Cleanup,
    /// Configuration or pricing-spec loading failed
    Config,
    /// Other IO failures
    Io,
}

impl PluginErrorKind {
    /// Returns a human-readable description of the kind
    pub fn description(&self) -> &'static str {
        match self {
            Self::Launcher => "Launcher error",
            Self::ConnectionTimeout => "Connection timeout",
            Self::Protocol => "Protocol error",
            Self::Rpc => "RPC error",
            Self::Cancelled => "Cancelled",
            Self::RegistryFatal => "Registry error",
            Self::Cleanup => "Cleanup error",
            Self::Config => "Configuration error",
            Self::Io => "IO error",
        }
    }

    /// Whether a command should stop when it sees this kind of error.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::RegistryFatal | Self::Config | Self::Cancelled)
    }
}

/// Costwell error type.
#[derive(Debug, Error)]
pub enum PluginError {
    /// Spawning the plugin binary failed
    #[error("starting plugin {}: {message}", path.display())]
    Launch {
        /// Binary that was being started
        path: PathBuf,
        /// Human-readable error message
        message: String,
        /// Underlying OS error
        #[source]
        source: Option<std::io::Error>,
    },

    /// The plugin never accepted a gRPC connection
    #[error("timeout: plugin at {address} not reachable after {elapsed:?}")]
    ConnectionTimeout {
        /// Address that was dialed
        address: String,
        /// Time spent retrying
        elapsed: Duration,
    },

    /// Handshake or message-level failure
    #[error("{message}")]
    Protocol {
        /// Human-readable error message
        message: String,
        /// Optional source error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A cost RPC returned a non-success status
    #[error("plugin {plugin}: {method} failed: {}", status.message())]
    Rpc {
        /// Plugin identity
        plugin: String,
        /// RPC method name
        method: &'static str,
        /// gRPC status
        #[source]
        status: tonic::Status,
    },

    /// Operation was cancelled
    #[error("cancelled: {message}")]
    Cancelled {
        /// What was being done when the token fired
        message: String,
    },

    /// Tearing down a plugin failed
    #[error("cleaning up plugin {plugin}: {message}")]
    Cleanup {
        /// Plugin binary or identity
        plugin: String,
        /// Human-readable error message
        message: String,
        /// Underlying OS error
        #[source]
        source: Option<std::io::Error>,
    },

    /// An operation failed and the forced cleanup afterwards failed as well
    #[error("{primary}; cleanup also failed: {cleanup}")]
    Composite {
        /// The original failure
        primary: Box<PluginError>,
        /// The cleanup failure
        cleanup: Box<PluginError>,
    },

    /// The plugin root itself is missing or unreadable
    #[error("plugin directory {} is not accessible: {source}", path.display())]
    RegistryRoot {
        /// Plugin root
        path: PathBuf,
        /// Underlying OS error
        #[source]
        source: std::io::Error,
    },

    /// A specific plugin was requested but is not installed
    #[error("plugin {name} is not installed under {}", root.display())]
    PluginNotFound {
        /// Requested plugin name
        name: String,
        /// Plugin root that was searched
        root: PathBuf,
    },

    /// No plugin is open and no local spec covers any requested resource
    #[error("no cost source available: {opened} plugins opened and no pricing spec matches any of {resources} resources")]
    NoCostSources {
        /// Number of opened plugins
        opened: usize,
        /// Number of requested resources
        resources: usize,
    },

    /// Configuration errors (loading, parsing)
    #[error("Configuration error: {message}")]
    Config {
        /// Human-readable error message
        message: String,
        /// Optional source error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// IO errors
    #[error("IO error: {message}")]
    Io {
        /// Human-readable error message
        message: String,
        /// Source IO error
        #[source]
        source: std::io::Error,
    },
}

/// Result type for costwell operations
pub type PluginResult<T> = Result<T, PluginError>;

impl PluginError {
    /// Returns the error classification
    pub fn kind(&self) -> PluginErrorKind {
        match self {
            Self::Launch { .. } => PluginErrorKind::Launcher,
            Self::ConnectionTimeout { .. } => PluginErrorKind::ConnectionTimeout,
            Self::Protocol { .. } => PluginErrorKind::Protocol,
            Self::Rpc { .. } => PluginErrorKind::Rpc,
            Self::Cancelled { .. } => PluginErrorKind::Cancelled,
            Self::Cleanup { .. } => PluginErrorKind::Cleanup,
            Self::Composite { primary, .. } => primary.kind(),
            Self::RegistryRoot { .. } | Self::PluginNotFound { .. } | Self::NoCostSources { .. } => {
                PluginErrorKind::RegistryFatal
            }
            Self::Config { .. } => PluginErrorKind::Config,
            Self::Io { .. } => PluginErrorKind::Io,
        }
    }

    // Constructor helpers

    /// Create a launch error from a spawn failure
    pub fn launch(path: &Path, source: std::io::Error) -> Self {
        let message = match source.kind() {
            std::io::ErrorKind::NotFound => "no such file or directory".to_string(),
            std::io::ErrorKind::PermissionDenied => "permission denied".to_string(),
            _ => source.to_string(),
        };
        Self::Launch {
            path: path.to_path_buf(),
            message,
            source: Some(source),
        }
    }

    /// Create a launch error without an OS error
    pub fn launch_failed(path: &Path, message: impl Into<String>) -> Self {
        Self::Launch {
            path: path.to_path_buf(),
            message: message.into(),
            source: None,
        }
    }

    /// Create a connection timeout error
    pub fn connection_timeout(address: impl Into<String>, elapsed: Duration) -> Self {
        Self::ConnectionTimeout {
            address: address.into(),
            elapsed,
        }
    }

    /// Create a protocol error
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
            source: None,
        }
    }

    /// Create a protocol error with source
    pub fn protocol_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Protocol {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create an RPC error
    pub fn rpc(plugin: impl Into<String>, method: &'static str, status: tonic::Status) -> Self {
        Self::Rpc {
            plugin: plugin.into(),
            method,
            status,
        }
    }

    /// Create a cancelled error
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::Cancelled {
            message: message.into(),
        }
    }

    /// Create a cleanup error
    pub fn cleanup(
        plugin: impl Into<String>,
        message: impl Into<String>,
        source: Option<std::io::Error>,
    ) -> Self {
        Self::Cleanup {
            plugin: plugin.into(),
            message: message.into(),
            source,
        }
    }

    /// Combine a failure with the failure of the cleanup it triggered
    pub fn composite(primary: PluginError, cleanup: PluginError) -> Self {
        Self::Composite {
            primary: Box::new(primary),
            cleanup: Box::new(cleanup),
        }
    }

    /// Create a config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    /// Create a config error with source
    pub fn config_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Config {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create an IO error
    pub fn io(message: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            message: message.into(),
            source,
        }
    }

    /// Whether this error came from the cancellation token
    pub fn is_cancelled(&self) -> bool {
        self.kind() == PluginErrorKind::Cancelled
    }
}
