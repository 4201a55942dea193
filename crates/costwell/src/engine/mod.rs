//! Cost engine
//!
//! Prices a batch of resources against the opened plugins, falling back to
//! local pricing specs. Every input gets exactly one result, in input order.
//!
//! Per resource:
//!
//! ```text
//! Pending ─► QueryingPlugins ─┬─► ResolvedByPlugin
//!                             └─► QueryingSpec ─┬─► ResolvedBySpec
//!                                               └─► Unresolved
//! ```
//!
//! Plugins are asked in discovery order and the first usable price wins.
//! A batch is bounded by [`EngineOptions::overall_deadline`]; resources still
//! in flight when it passes come back unresolved with a timeout note.

mod pool;


use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use self::pool::{run_bounded, BatchStatus, PoolLimits};
use crate::config::EngineOptions;
use crate::error::{PluginError, PluginResult};
use crate::host::CostSource;
use crate::types::{
    ActualCostQuery, ActualCostResult, AdapterSource, CostResult, PricePoint, ResourceDescriptor,
};

/// A price from a local spec
#[derive(Debug, Clone, PartialEq)]
pub struct SpecPrice {
    pub monthly_cost: f64,
    pub currency: String,
    pub note: String,
}

/// Fallback pricing consulted when no plugin answers
pub trait SpecLookup: Send + Sync {
    fn lookup_spec(&self, provider: &str, service: &str, sku: &str) -> Option<SpecPrice>;
}

/// Resolution phase of one resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionState {
    Pending,
    QueryingPlugins,
    QueryingSpec,
    ResolvedByPlugin,
    ResolvedBySpec,
    Unresolved,
}

impl ResolutionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::ResolvedByPlugin | Self::ResolvedBySpec | Self::Unresolved
        )
    }
}

impl fmt::Display for ResolutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::QueryingPlugins => "querying_plugins",
            Self::QueryingSpec => "querying_spec",
            Self::ResolvedByPlugin => "resolved_by_plugin",
            Self::ResolvedBySpec => "resolved_by_spec",
            Self::Unresolved => "unresolved",
        };
        f.write_str(s)
    }
}

/// Totals over a batch of results
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CostSummary {
    /// Monthly total per currency
    pub totals: BTreeMap<String, f64>,
    /// Result count per adapter source
    pub by_source: BTreeMap<String, usize>,
    pub resolved: usize,
    pub unresolved: usize,
}

/// Cost aggregation over a fixed set of sources
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    sources: Vec<Arc<dyn CostSource>>,
    specs: Option<Arc<dyn SpecLookup>>,
    options: EngineOptions,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field(
                "sources",
                &self.inner.sources.iter().map(|s| s.name()).collect::<Vec<_>>(),
            )
            .field("specs", &self.inner.specs.is_some())
            .field("options", &self.inner.options)
            .finish()
    }
}

impl Engine {
    /// `sources` are queried in the given order.
    pub fn new(
        sources: Vec<Arc<dyn CostSource>>,
        specs: Option<Arc<dyn SpecLookup>>,
        options: EngineOptions,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                sources,
                specs,
                options,
            }),
        }
    }

    pub fn options(&self) -> &EngineOptions {
        &self.inner.options
    }

    pub fn source_count(&self) -> usize {
        self.inner.sources.len()
    }

    /// Fails when nothing could price any of `resources`: no plugin is open
    /// and no local spec matches.
    pub fn check_coverage(&self, resources: &[ResourceDescriptor]) -> PluginResult<()> {
        if resources.is_empty() || !self.inner.sources.is_empty() {
            return Ok(());
        }
        let any_spec = self.inner.specs.as_ref().is_some_and(|specs| {
            resources
                .iter()
                .any(|r| specs.lookup_spec(&r.provider, r.service(), &r.sku).is_some())
        });
        if any_spec {
            Ok(())
        } else {
            Err(PluginError::NoCostSources {
                opened: 0,
                resources: resources.len(),
            })
        }
    }

    /// Price every resource. Never fails; problems end up in the results.
    pub async fn calculate_projected(
        &self,
        cancel: &CancellationToken,
        resources: &[ResourceDescriptor],
    ) -> Vec<CostResult> {
        let items: Arc<[ResourceDescriptor]> = resources.into();
        let inner = self.inner.clone();
        let output = run_bounded(
            "projected",
            items,
            self.limits(resources.len()),
            cancel,
            move |resource, token| {
                let inner = inner.clone();
                async move { inner.resolve_projected(resource, &token).await }
            },
        )
        .await;

        let note = stopped_note(output.status, self.inner.options.overall_deadline);
        output
            .slots
            .into_iter()
            .zip(resources)
            .map(|(slot, resource)| {
                slot.unwrap_or_else(|| CostResult::unresolved(resource.clone(), note.clone()))
            })
            .collect()
    }

    /// Fetch historical costs for every query. Only plugins are consulted.
    pub async fn calculate_actual(
        &self,
        cancel: &CancellationToken,
        queries: &[ActualCostQuery],
    ) -> Vec<ActualCostResult> {
        let items: Arc<[ActualCostQuery]> = queries.into();
        let inner = self.inner.clone();
        let output = run_bounded(
            "actual",
            items,
            self.limits(queries.len()),
            cancel,
            move |query, token| {
                let inner = inner.clone();
                async move { inner.resolve_actual(query, &token).await }
            },
        )
        .await;

        let note = stopped_note(output.status, self.inner.options.overall_deadline);
        output
            .slots
            .into_iter()
            .zip(queries)
            .map(|(slot, query)| {
                slot.unwrap_or_else(|| ActualCostResult::unresolved(query.clone(), note.clone()))
            })
            .collect()
    }

    /// Totals per currency and counts per source
    pub fn summarize(results: &[CostResult]) -> CostSummary {
        let mut summary = CostSummary::default();
        for result in results {
            *summary
                .by_source
                .entry(result.adapter_source.to_string())
                .or_default() += 1;
            if result.is_resolved() {
                summary.resolved += 1;
                *summary.totals.entry(result.currency.clone()).or_default() +=
                    result.monthly_cost;
            } else {
                summary.unresolved += 1;
            }
        }
        summary
    }

    fn limits(&self, len: usize) -> PoolLimits {
        let options = &self.inner.options;
        PoolLimits {
            workers: options.workers_for(len),
            deadline: options.overall_deadline,
            warn_after: options.warn_threshold,
        }
    }
}

fn stopped_note(status: BatchStatus, deadline: Duration) -> String {
    match status {
        BatchStatus::Cancelled => "cancelled before a price was found".to_string(),
        BatchStatus::DeadlineExceeded => {
            format!("timed out: overall deadline of {:?} exceeded", deadline)
        }
        BatchStatus::Completed => "resolution did not complete".to_string(),
    }
}

/// Outcome of asking the plugins about one resource
#[derive(Default)]
struct PluginPhase {
    answer: Option<(String, PricePoint)>,
    errors: Vec<String>,
}

impl EngineInner {
    /// `None` when the batch token fired first.
    async fn resolve_projected(
        &self,
        resource: ResourceDescriptor,
        cancel: &CancellationToken,
    ) -> Option<CostResult> {
        let mut state = ResolutionState::Pending;
        let mut errors = Vec::new();

        if !self.sources.is_empty() {
            state = self.advance(&resource, state, ResolutionState::QueryingPlugins);
            let phase = tokio::select! {
                biased;
                _ = cancel.cancelled() => return None,
                phase = tokio::time::timeout(
                    self.options.per_resource_timeout,
                    self.query_plugins(&resource),
                ) => phase,
            };

            match phase {
                Ok(PluginPhase {
                    answer: Some((plugin, price)),
                    errors: plugin_errors,
                }) => {
                    self.advance(&resource, state, ResolutionState::ResolvedByPlugin);
                    let mut result = CostResult::from_plugin(resource, &plugin, price);
                    result.error_detail = join_errors(plugin_errors);
                    return Some(result);
                }
                Ok(PluginPhase {
                    answer: None,
                    errors: plugin_errors,
                }) => errors = plugin_errors,
                Err(_) => errors.push(format!(
                    "plugin queries timed out after {:?}",
                    self.options.per_resource_timeout
                )),
            }
        }

        if cancel.is_cancelled() {
            return None;
        }

        state = self.advance(&resource, state, ResolutionState::QueryingSpec);
        let spec = self
            .specs
            .as_ref()
            .and_then(|specs| specs.lookup_spec(&resource.provider, resource.service(), &resource.sku));

        let mut result = match spec {
            Some(price) => {
                self.advance(&resource, state, ResolutionState::ResolvedBySpec);
                CostResult {
                    resource,
                    adapter_source: AdapterSource::Spec,
                    monthly_cost: price.monthly_cost,
                    currency: price.currency,
                    note: price.note,
                    error_detail: None,
                }
            }
            None => {
                self.advance(&resource, state, ResolutionState::Unresolved);
                let note = if self.sources.is_empty() {
                    "no plugins available and no local pricing spec found".to_string()
                } else if errors.is_empty() {
                    "no plugin supports this resource and no local pricing spec found"
                        .to_string()
                } else {
                    "no plugin returned a price and no local pricing spec found".to_string()
                };
                CostResult::unresolved(resource, note)
            }
        };
        result.error_detail = join_errors(errors);
        Some(result)
    }

    /// Ask each source in turn until one prices the resource.
    async fn query_plugins(&self, resource: &ResourceDescriptor) -> PluginPhase {
        let mut phase = PluginPhase::default();
        for source in &self.sources {
            let name = source.name();
            match tokio::time::timeout(
                self.options.per_plugin_timeout,
                source.projected_cost(resource),
            )
            .await
            {
                Ok(Ok(Some(price))) if is_usable(&price) => {
                    phase.answer = Some((name.to_string(), price));
                    break;
                }
                Ok(Ok(Some(price))) => phase.errors.push(format!(
                    "plugin {}: unusable monthly cost {}",
                    name, price.monthly_cost
                )),
                Ok(Ok(None)) => {}
                Ok(Err(e)) => {
                    tracing::debug!(plugin = name, resource = %resource.resource_type, error = %e, "projected cost failed");
                    phase.errors.push(e.to_string());
                }
                Err(_) => phase.errors.push(format!(
                    "plugin {}: GetProjectedCost timed out after {:?}",
                    name, self.options.per_plugin_timeout
                )),
            }
        }
        phase
    }

    async fn resolve_actual(
        &self,
        query: ActualCostQuery,
        cancel: &CancellationToken,
    ) -> Option<ActualCostResult> {
        if self.sources.is_empty() {
            return Some(ActualCostResult::unresolved(query, "no plugins available"));
        }

        let lookup = async {
            let mut errors = Vec::new();
            for source in &self.sources {
                let name = source.name();
                match tokio::time::timeout(
                    self.options.per_plugin_timeout,
                    source.actual_cost(&query),
                )
                .await
                {
                    Ok(Ok(entries)) if !entries.is_empty() => {
                        return (Some((name.to_string(), entries)), errors)
                    }
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => errors.push(e.to_string()),
                    Err(_) => errors.push(format!(
                        "plugin {}: GetActualCost timed out after {:?}",
                        name, self.options.per_plugin_timeout
                    )),
                }
            }
            (None, errors)
        };

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return None,
            outcome = tokio::time::timeout(self.options.per_resource_timeout, lookup) => outcome,
        };

        let (answer, errors) = outcome.unwrap_or_else(|_| {
            (
                None,
                vec![format!(
                    "plugin queries timed out after {:?}",
                    self.options.per_resource_timeout
                )],
            )
        });

        let mut result = match answer {
            Some((plugin, entries)) => ActualCostResult::from_plugin(query, &plugin, entries),
            None => ActualCostResult::unresolved(query, "no plugin returned cost data"),
        };
        result.error_detail = join_errors(errors);
        Some(result)
    }

    fn advance(
        &self,
        resource: &ResourceDescriptor,
        from: ResolutionState,
        to: ResolutionState,
    ) -> ResolutionState {
        tracing::trace!(
            resource = %resource.resource_type,
            sku = %resource.sku,
            from = %from,
            to = %to,
            "resolution state"
        );
        to
    }
}

fn is_usable(price: &PricePoint) -> bool {
    price.monthly_cost.is_finite() && price.monthly_cost >= 0.0
}

fn join_errors(errors: Vec<String>) -> Option<String> {
    if errors.is_empty() {
        None
    } else {
        Some(errors.join("; "))
    }
}
