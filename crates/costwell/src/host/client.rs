//! Plugin client
//!
//! A [`Client`] is one launched plugin whose identity has been confirmed with
//! a `Name()` call. It owns the plugin process until [`Client::close`].

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tonic::Code;

use super::launcher::{CleanupFn, Launcher};
use crate::error::{PluginError, PluginResult};
use crate::proto::{self, CostSourceClient};
use crate::types::{
    ActualCostEntry, ActualCostQuery, AdapterSource, PricePoint, ResourceDescriptor,
};

/// Anything that can price resources. Implemented by [`Client`]; the engine
/// only depends on this trait.
#[async_trait]
pub trait CostSource: Send + Sync {
    /// Identity used as the adapter source of results
    fn name(&self) -> &str;

    /// Price one resource. `Ok(None)` means the source does not cover it.
    async fn projected_cost(&self, resource: &ResourceDescriptor)
        -> PluginResult<Option<PricePoint>>;

    /// Historical costs for one resource. Empty means no data.
    async fn actual_cost(&self, query: &ActualCostQuery) -> PluginResult<Vec<ActualCostEntry>>;
}

/// A live, identified plugin
#[derive(Debug)]
pub struct Client {
    name: String,
    protocol_version: Option<String>,
    binary: PathBuf,
    rpc: Mutex<Option<CostSourceClient>>,
    cleanup: CleanupFn,
}

impl Client {
    /// Launch `binary` through `launcher` and confirm its identity.
    ///
    /// A launcher failure is returned as is. Once the plugin is running, any
    /// handshake failure runs the launcher's cleanup before returning; if the
    /// cleanup fails as well both errors are reported together.
    pub async fn connect(
        cancel: &CancellationToken,
        launcher: &dyn Launcher,
        binary: &Path,
        args: &[String],
    ) -> PluginResult<Self> {
        if cancel.is_cancelled() {
            return Err(PluginError::cancelled(format!(
                "connecting to {}",
                binary.display()
            )));
        }

        let launched = launcher.start(cancel, binary, args).await?;
        let mut rpc = CostSourceClient::new(launched.channel);

        let handshake_timeout = launcher.config().handshake_timeout;
        let identity = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(PluginError::cancelled("getting plugin name")),
            result = tokio::time::timeout(handshake_timeout, rpc.name(proto::NameRequest {})) => {
                match result {
                    Ok(Ok(response)) => Ok(response.into_inner()),
                    Ok(Err(status)) => Err(PluginError::protocol_with_source(
                        format!("getting plugin name: {}", status.message()),
                        status,
                    )),
                    Err(_) => Err(PluginError::protocol(format!(
                        "getting plugin name: no answer within {:?}",
                        handshake_timeout
                    ))),
                }
            }
        };

        let identity = match identity {
            Ok(identity) if identity.name.trim().is_empty() => {
                Err(PluginError::protocol("getting plugin name: plugin returned an empty name"))
            }
            Ok(identity) if AdapterSource::is_reserved(&identity.name) => {
                Err(PluginError::protocol(format!(
                    "getting plugin name: \"{}\" is reserved and cannot name a plugin",
                    identity.name
                )))
            }
            other => other,
        };

        match identity {
            Ok(identity) => {
                let protocol_version =
                    Some(identity.protocol_version).filter(|v| !v.is_empty());
                if let Some(version) = protocol_version
                    .as_deref()
                    .filter(|v| *v != proto::PROTOCOL_VERSION)
                {
                    tracing::warn!(
                        plugin = %identity.name,
                        plugin_protocol = version,
                        host_protocol = proto::PROTOCOL_VERSION,
                        "plugin speaks a different protocol version"
                    );
                }
                tracing::info!(
                    plugin = %identity.name,
                    binary = %binary.display(),
                    transport = %launcher.transport(),
                    protocol = protocol_version.as_deref().unwrap_or("legacy"),
                    "plugin ready"
                );
                Ok(Self {
                    name: identity.name,
                    protocol_version,
                    binary: binary.to_path_buf(),
                    rpc: Mutex::new(Some(rpc)),
                    cleanup: launched.cleanup,
                })
            }
            Err(err) => {
                drop(rpc);
                match launched.cleanup.run().await {
                    Ok(()) => Err(err),
                    Err(cleanup) => Err(PluginError::composite(err, cleanup)),
                }
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn from_parts(
        name: &str,
        channel: tonic::transport::Channel,
        cleanup: CleanupFn,
    ) -> Self {
        Self {
            name: name.to_string(),
            protocol_version: None,
            binary: PathBuf::from(name),
            rpc: Mutex::new(Some(CostSourceClient::new(channel))),
            cleanup,
        }
    }

    /// Self-reported plugin identity
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Protocol version, `None` for plugins predating versioning
    pub fn protocol_version(&self) -> Option<&str> {
        self.protocol_version.as_deref()
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    pub fn is_closed(&self) -> bool {
        self.rpc.lock().is_none()
    }

    /// Release the connection, then stop and reap the plugin process.
    ///
    /// May be called any number of times; every call repeats the release
    /// steps.
    pub async fn close(&self) -> PluginResult<()> {
        drop(self.rpc.lock().take());
        let result = self.cleanup.run().await;
        if let Err(e) = &result {
            tracing::warn!(plugin = %self.name, error = %e, "plugin cleanup failed");
        }
        result
    }

    fn rpc(&self, method: &'static str) -> PluginResult<CostSourceClient> {
        self.rpc.lock().clone().ok_or_else(|| {
            PluginError::rpc(
                self.name.clone(),
                method,
                tonic::Status::failed_precondition("client closed"),
            )
        })
    }
}

/// `NotFound` and `Unimplemented` mean "not my resource", not a failure.
fn is_unsupported(status: &tonic::Status) -> bool {
    matches!(status.code(), Code::NotFound | Code::Unimplemented)
}

/// `None` when the timestamp is outside chrono's range
fn from_unix(seconds: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(seconds, 0).single()
}

#[async_trait]
impl CostSource for Client {
    fn name(&self) -> &str {
        &self.name
    }

    async fn projected_cost(
        &self,
        resource: &ResourceDescriptor,
    ) -> PluginResult<Option<PricePoint>> {
        const METHOD: &str = "GetProjectedCost";
        let mut rpc = self.rpc(METHOD)?;
        let request = proto::GetProjectedCostRequest {
            resources: vec![resource.into()],
        };

        let response = match rpc.get_projected_cost(request).await {
            Ok(response) => response.into_inner(),
            Err(status) if is_unsupported(&status) => return Ok(None),
            Err(status) => return Err(PluginError::rpc(self.name.clone(), METHOD, status)),
        };

        Ok(response.results.into_iter().next().map(|r| PricePoint {
            monthly_cost: r.cost_per_month,
            unit_price: r.unit_price,
            currency: if r.currency.is_empty() {
                crate::types::DEFAULT_CURRENCY.to_string()
            } else {
                r.currency
            },
            billing_detail: r.billing_detail,
        }))
    }

    async fn actual_cost(&self, query: &ActualCostQuery) -> PluginResult<Vec<ActualCostEntry>> {
        const METHOD: &str = "GetActualCost";
        let mut rpc = self.rpc(METHOD)?;
        let request = proto::GetActualCostRequest {
            resource_id: query.resource_id.clone(),
            start: query.start.timestamp(),
            end: query.end.timestamp(),
            tags: query.tags.clone(),
        };

        let response = match rpc.get_actual_cost(request).await {
            Ok(response) => response.into_inner(),
            Err(status) if is_unsupported(&status) => return Ok(Vec::new()),
            Err(status) => return Err(PluginError::rpc(self.name.clone(), METHOD, status)),
        };

        let mut entries = Vec::with_capacity(response.results.len());
        for r in response.results {
            let Some(timestamp) = from_unix(r.timestamp) else {
                tracing::warn!(
                    plugin = %self.name,
                    resource = %query.resource_id,
                    timestamp = r.timestamp,
                    "dropping cost entry with out-of-range timestamp"
                );
                continue;
            };
            entries.push(ActualCostEntry {
                timestamp,
                cost: r.cost,
                usage_amount: r.usage_amount,
                usage_unit: r.usage_unit,
                source: r.source,
            });
        }
        Ok(entries)
    }
}
