//! Plugin registry
//!
//! Discovers installed plugins under a root directory laid out as
//! `<root>/<name>/<version>/<binary>`, selects the newest version of each
//! and opens them through the plugin host.
//!
//! The registry holds no mutable state: every call rescans the disk, and
//! every [`Registry::open`] returns an independent set of clients.

mod scan;
pub mod version;


pub use scan::{scan, Discovery, RegistryWarning, WarningKind, BINARY_PREFIX, MANIFEST_FILE};
pub use version::{latest_per_name, parse_version_dir};

use futures::future::join_all;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::LaunchConfig;
use crate::error::{PluginError, PluginResult};
use crate::host::{launcher_for, Client, CostSource};

/// On-disk plugin registry
#[derive(Debug, Clone)]
pub struct Registry {
    root: PathBuf,
    launch: LaunchConfig,
}

impl Registry {
    pub fn new(root: impl Into<PathBuf>, launch: LaunchConfig) -> Self {
        Self {
            root: root.into(),
            launch,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Every installed version of every plugin
    pub async fn list_all_plugins(&self) -> PluginResult<Discovery> {
        scan(&self.root).await
    }

    /// The newest installed version of every plugin
    pub async fn list_latest_plugins(&self) -> PluginResult<Discovery> {
        let discovery = scan(&self.root).await?;
        Ok(Discovery {
            plugins: latest_per_name(&discovery.plugins),
            warnings: discovery.warnings,
        })
    }

    /// Launch the newest version of every plugin, or only of `only`.
    ///
    /// Plugins that fail to start are reported as warnings and left out.
    /// An unknown `only` name, an unreadable root or cancellation is an
    /// error; in the cancellation case any clients already opened are
    /// closed first.
    pub async fn open(
        &self,
        cancel: &CancellationToken,
        only: Option<&str>,
    ) -> PluginResult<OpenedPlugins> {
        let discovery = self.list_latest_plugins().await?;
        let mut warnings = discovery.warnings;

        let selected: Vec<_> = match only {
            Some(name) => {
                let matched: Vec<_> = discovery
                    .plugins
                    .into_iter()
                    .filter(|p| p.name == name)
                    .collect();
                if matched.is_empty() {
                    return Err(PluginError::PluginNotFound {
                        name: name.to_string(),
                        root: self.root.clone(),
                    });
                }
                matched
            }
            None => discovery.plugins,
        };

        let launches = selected.iter().map(|descriptor| async move {
            let launcher = launcher_for(descriptor.transport, self.launch.clone());
            let result =
                Client::connect(cancel, launcher.as_ref(), &descriptor.binary, &[]).await;
            (descriptor, result)
        });

        let mut clients = Vec::new();
        for (descriptor, result) in join_all(launches).await {
            match result {
                Ok(client) => clients.push(Arc::new(client)),
                Err(e) => warnings.push(RegistryWarning::new(
                    WarningKind::LaunchFailed,
                    &descriptor.binary,
                    format!("plugin {} {} failed to start: {}", descriptor.name, descriptor.version, e),
                )),
            }
        }

        let opened = OpenedPlugins { clients, warnings };
        if cancel.is_cancelled() {
            opened.close_all().await.ok();
            return Err(PluginError::cancelled("opening plugins"));
        }

        tracing::info!(
            root = %self.root.display(),
            opened = opened.len(),
            warnings = opened.warnings.len(),
            "plugins opened"
        );
        Ok(opened)
    }
}

/// Clients returned by [`Registry::open`]
#[derive(Debug, Default)]
pub struct OpenedPlugins {
    clients: Vec<Arc<Client>>,
    warnings: Vec<RegistryWarning>,
}

impl OpenedPlugins {
    /// Opened clients in discovery order
    pub fn clients(&self) -> &[Arc<Client>] {
        &self.clients
    }

    /// The clients as engine cost sources, in discovery order
    pub fn sources(&self) -> Vec<Arc<dyn CostSource>> {
        self.clients
            .iter()
            .map(|c| c.clone() as Arc<dyn CostSource>)
            .collect()
    }

    pub fn warnings(&self) -> &[RegistryWarning] {
        &self.warnings
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Close every client. All clients are closed even if some fail; the
    /// first failure is returned.
    pub async fn close_all(&self) -> PluginResult<()> {
        let results = join_all(self.clients.iter().map(|c| c.close())).await;
        results.into_iter().collect()
    }
}
