//! Costwell - cloud cost estimation through out-of-process plugins
//!
//! Cost plugins are standalone executables installed under
//! `<root>/<name>/<version>/`. The [`registry`] finds them, the [`host`]
//! launches them and talks gRPC to them, and the [`engine`] prices batches of
//! resources against whatever plugins opened, falling back to local
//! [`pricing`] specs.
//!
//! ```no_run
//! # async fn run() -> costwell::PluginResult<()> {
//! use costwell::{CostwellConfig, Engine, Registry, ResourceDescriptor};
//! use tokio_util::sync::CancellationToken;
//!
//! let config = CostwellConfig::load(None)?;
//! let cancel = CancellationToken::new();
//!
//! let opened = Registry::new(&config.plugin_dir, config.launch.clone())
//!     .open(&cancel, None)
//!     .await?;
//! let engine = Engine::new(opened.sources(), None, config.engine.clone());
//!
//! let resources = vec![ResourceDescriptor::new(
//!     "aws:ec2/instance:Instance",
//!     "aws",
//!     "t3.micro",
//!     "us-east-1",
//! )];
//! let results = engine.calculate_projected(&cancel, &resources).await;
//! opened.close_all().await?;
//! # let _ = results;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod host;
pub mod pricing;
pub mod proto;
pub mod registry;
pub mod types;

pub use config::{CostwellConfig, EngineOptions, LaunchConfig};
pub use engine::{CostSummary, Engine, ResolutionState, SpecLookup, SpecPrice};
pub use error::{PluginError, PluginErrorKind, PluginResult};
pub use host::{Client, CostSource, Launcher, ProcessLauncher, StdioLauncher};
pub use pricing::{PricingSpec, SpecStore, SpecWarning};
pub use registry::{Discovery, OpenedPlugins, Registry, RegistryWarning, WarningKind};
pub use types::{
    ActualCostEntry, ActualCostQuery, ActualCostResult, AdapterSource, CostResult,
    PluginDescriptor, PricePoint, ResourceDescriptor, TransportKind,
};
