//! Core data types
//!
//! Resource descriptors going in, cost results coming out, and the
//! descriptor of an installed plugin.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

/// How the host talks to a plugin process
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Plugin serves gRPC on `127.0.0.1:<port>` given via `--port`
    #[default]
    Tcp,
    /// Plugin serves gRPC over its stdin/stdout, started with `--stdio`
    Stdio,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp => f.write_str("tcp"),
            Self::Stdio => f.write_str("stdio"),
        }
    }
}

/// An installed plugin found under `<root>/<name>/<version>/`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PluginDescriptor {
    /// Plugin name (first-level directory)
    pub name: String,
    /// Parsed version (second-level directory)
    pub version: semver::Version,
    /// The version directory
    pub install_path: PathBuf,
    /// Executable inside the version directory
    pub binary: PathBuf,
    /// Declared transport
    pub transport: TransportKind,
}

/// A resource to price. Owned by the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    /// Pulumi type token, e.g. `aws:ec2/instance:Instance`
    #[serde(rename = "type")]
    pub resource_type: String,
    /// Cloud provider, e.g. `aws`
    pub provider: String,
    /// Provider SKU, e.g. `t3.micro`
    #[serde(default)]
    pub sku: String,
    /// Region, e.g. `us-east-1`
    #[serde(default)]
    pub region: String,
    /// Free-form properties passed through to plugins
    #[serde(default)]
    pub properties: HashMap<String, String>,
}

impl ResourceDescriptor {
    pub fn new(
        resource_type: impl Into<String>,
        provider: impl Into<String>,
        sku: impl Into<String>,
        region: impl Into<String>,
    ) -> Self {
        Self {
            resource_type: resource_type.into(),
            provider: provider.into(),
            sku: sku.into(),
            region: region.into(),
            properties: HashMap::new(),
        }
    }

    /// Pricing service derived from the type token.
    ///
    /// `aws:ec2/instance:Instance` yields `ec2`. Tokens that are not in
    /// `provider:module:Type` form yield the whole type.
    pub fn service(&self) -> &str {
        let mut parts = self.resource_type.split(':');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(_), Some(module), Some(_)) if !module.is_empty() => {
                module.split('/').next().unwrap_or(module)
            }
            _ => &self.resource_type,
        }
    }
}

/// Where a cost figure came from
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AdapterSource {
    /// Answered by the named plugin
    Plugin(String),
    /// Answered by a local pricing spec
    Spec,
    /// Nobody had a price
    None,
}

impl AdapterSource {
    /// Source names that are not available to plugins
    pub const RESERVED: [&'static str; 2] = ["spec", "none"];

    /// True if a plugin may not identify itself as `name`
    pub fn is_reserved(name: &str) -> bool {
        Self::RESERVED.contains(&name)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Plugin(name) => name,
            Self::Spec => "spec",
            Self::None => "none",
        }
    }
}

impl fmt::Display for AdapterSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for AdapterSource {
    fn from(value: String) -> Self {
        match value.as_str() {
            "spec" => Self::Spec,
            "none" => Self::None,
            _ => Self::Plugin(value),
        }
    }
}

impl From<AdapterSource> for String {
    fn from(value: AdapterSource) -> Self {
        match value {
            AdapterSource::Plugin(name) => name,
            other => other.as_str().to_string(),
        }
    }
}

/// A price returned by a plugin for one resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    /// Monthly cost
    pub monthly_cost: f64,
    /// Unit (usually hourly) price
    pub unit_price: f64,
    /// ISO currency code
    pub currency: String,
    /// Plugin-supplied billing detail
    pub billing_detail: String,
}

/// Projected cost of one resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostResult {
    /// The resource this result belongs to
    pub resource: ResourceDescriptor,
    /// Provenance of the figure
    pub adapter_source: AdapterSource,
    /// Monthly cost, zero when unresolved
    pub monthly_cost: f64,
    /// ISO currency code
    pub currency: String,
    /// Human-readable explanation
    pub note: String,
    /// Plugin errors seen while resolving, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
}

impl CostResult {
    pub fn from_plugin(resource: ResourceDescriptor, plugin: &str, price: PricePoint) -> Self {
        let note = if price.billing_detail.is_empty() {
            format!("priced by plugin {}", plugin)
        } else {
            price.billing_detail
        };
        Self {
            resource,
            adapter_source: AdapterSource::Plugin(plugin.to_string()),
            monthly_cost: price.monthly_cost,
            currency: price.currency,
            note,
            error_detail: None,
        }
    }

    /// A result with no price; `note` must say why.
    pub fn unresolved(resource: ResourceDescriptor, note: impl Into<String>) -> Self {
        Self {
            resource,
            adapter_source: AdapterSource::None,
            monthly_cost: 0.0,
            currency: DEFAULT_CURRENCY.to_string(),
            note: note.into(),
            error_detail: None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.adapter_source != AdapterSource::None
    }
}

pub const DEFAULT_CURRENCY: &str = "USD";

/// Historical cost lookup for one resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActualCostQuery {
    /// Cloud resource ID
    pub resource_id: String,
    /// Start of the window
    pub start: DateTime<Utc>,
    /// End of the window
    pub end: DateTime<Utc>,
    /// Tag filters
    #[serde(default)]
    pub tags: HashMap<String, String>,
}

/// One historical cost data point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActualCostEntry {
    pub timestamp: DateTime<Utc>,
    pub cost: f64,
    pub usage_amount: f64,
    pub usage_unit: String,
    /// Billing source reported by the plugin
    pub source: String,
}

/// Historical cost of one resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActualCostResult {
    pub query: ActualCostQuery,
    pub adapter_source: AdapterSource,
    pub entries: Vec<ActualCostEntry>,
    pub total_cost: f64,
    pub note: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
}

impl ActualCostResult {
    pub fn from_plugin(query: ActualCostQuery, plugin: &str, entries: Vec<ActualCostEntry>) -> Self {
        let total_cost = entries.iter().map(|e| e.cost).sum();
        Self {
            query,
            adapter_source: AdapterSource::Plugin(plugin.to_string()),
            note: format!("{} entries from plugin {}", entries.len(), plugin),
            entries,
            total_cost,
            error_detail: None,
        }
    }

    pub fn unresolved(query: ActualCostQuery, note: impl Into<String>) -> Self {
        Self {
            query,
            adapter_source: AdapterSource::None,
            entries: Vec::new(),
            total_cost: 0.0,
            note: note.into(),
            error_detail: None,
        }
    }
}
