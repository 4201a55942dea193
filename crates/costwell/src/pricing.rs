//! Local pricing specs
//!
//! YAML files describing a fixed price for a `(provider, service, sku)`
//! triple. The engine falls back to them when no plugin prices a resource.
//!
//! ```yaml
//! provider: aws
//! service: ec2
//! sku: t3.micro
//! currency: USD
//! hourly_rate: 0.0104
//! description: On-demand Linux, us-east-1
//! ```
//!
//! A file may hold one spec or a list of specs.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::engine::{SpecLookup, SpecPrice};
use crate::error::{PluginError, PluginResult};
use crate::types::DEFAULT_CURRENCY;

/// Hours used to turn an hourly rate into a monthly figure
pub const HOURS_PER_MONTH: f64 = 730.0;

/// One priced SKU
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingSpec {
    pub provider: String,
    pub service: String,
    pub sku: String,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monthly_estimate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hourly_rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

fn default_currency() -> String {
    DEFAULT_CURRENCY.to_string()
}

impl PricingSpec {
    /// `monthly_estimate`, else `hourly_rate` over a 730 hour month
    pub fn monthly_cost(&self) -> Option<f64> {
        self.monthly_estimate
            .or_else(|| self.hourly_rate.map(|rate| rate * HOURS_PER_MONTH))
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SpecFile {
    Many(Vec<PricingSpec>),
    One(PricingSpec),
}

/// A spec file that could not be used
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecWarning {
    pub path: PathBuf,
    pub message: String,
}

type SpecKey = (String, String, String);

fn key(provider: &str, service: &str, sku: &str) -> SpecKey {
    (
        provider.to_lowercase(),
        service.to_lowercase(),
        sku.to_lowercase(),
    )
}

/// In-memory index of pricing specs, keyed case-insensitively
#[derive(Debug, Clone, Default)]
pub struct SpecStore {
    specs: HashMap<SpecKey, PricingSpec>,
}

impl SpecStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a spec, replacing any earlier one for the same key
    pub fn insert(&mut self, spec: PricingSpec) {
        let k = key(&spec.provider, &spec.service, &spec.sku);
        self.specs.insert(k, spec);
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    pub fn get(&self, provider: &str, service: &str, sku: &str) -> Option<&PricingSpec> {
        self.specs.get(&key(provider, service, sku))
    }

    /// Load every `*.yaml` / `*.yml` file in `dir`, in file name order.
    ///
    /// A missing directory is an empty store. Files that fail to parse, and
    /// specs without any price, are skipped and reported.
    pub async fn load_dir(dir: &Path) -> PluginResult<(Self, Vec<SpecWarning>)> {
        let mut store = Self::new();
        let mut warnings = Vec::new();

        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %dir.display(), "no pricing spec directory");
                return Ok((store, warnings));
            }
            Err(e) => return Err(PluginError::io(format!("reading {}", dir.display()), e)),
        };

        let mut files = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| PluginError::io(format!("reading {}", dir.display()), e))?
        {
            let path = entry.path();
            let is_yaml = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"))
                .unwrap_or(false);
            if is_yaml {
                files.push(path);
            }
        }
        files.sort();

        for path in files {
            let parsed = match tokio::fs::read_to_string(&path).await {
                Ok(content) => serde_yaml::from_str::<SpecFile>(&content)
                    .map_err(|e| format!("invalid pricing spec: {}", e)),
                Err(e) => Err(format!("cannot read pricing spec: {}", e)),
            };

            let specs = match parsed {
                Ok(SpecFile::Many(specs)) => specs,
                Ok(SpecFile::One(spec)) => vec![spec],
                Err(message) => {
                    tracing::warn!(path = %path.display(), "{}", message);
                    warnings.push(SpecWarning { path, message });
                    continue;
                }
            };

            for spec in specs {
                if spec.monthly_cost().is_none() {
                    let message = format!(
                        "spec {}/{}/{} has neither monthly_estimate nor hourly_rate",
                        spec.provider, spec.service, spec.sku
                    );
                    tracing::warn!(path = %path.display(), "{}", message);
                    warnings.push(SpecWarning {
                        path: path.clone(),
                        message,
                    });
                    continue;
                }
                store.insert(spec);
            }
        }

        tracing::debug!(path = %dir.display(), specs = store.len(), "pricing specs loaded");
        Ok((store, warnings))
    }
}

impl SpecLookup for SpecStore {
    fn lookup_spec(&self, provider: &str, service: &str, sku: &str) -> Option<SpecPrice> {
        let spec = self.get(provider, service, sku)?;
        let monthly_cost = spec.monthly_cost()?;
        Some(SpecPrice {
            monthly_cost,
            currency: spec.currency.clone(),
            note: spec
                .description
                .clone()
                .unwrap_or_else(|| format!("local pricing spec {}/{}", spec.service, spec.sku)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn spec(provider: &str, service: &str, sku: &str) -> PricingSpec {
        PricingSpec {
            provider: provider.to_string(),
            service: service.to_string(),
            sku: sku.to_string(),
            currency: "USD".to_string(),
            monthly_estimate: None,
            hourly_rate: Some(0.0104),
            description: None,
        }
    }

    #[test]
    fn test_monthly_cost_prefers_estimate() {
        let mut s = spec("aws", "ec2", "t3.micro");
        assert!((s.monthly_cost().unwrap() - 7.592).abs() < 1e-9);

        s.monthly_estimate = Some(8.0);
        assert_eq!(s.monthly_cost(), Some(8.0));

        s.monthly_estimate = None;
        s.hourly_rate = None;
        assert_eq!(s.monthly_cost(), None);
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let mut store = SpecStore::new();
        store.insert(spec("aws", "ec2", "t3.micro"));

        let price = store.lookup_spec("AWS", "EC2", "T3.Micro").unwrap();
        assert_eq!(price.currency, "USD");
        assert!(price.note.contains("t3.micro"));
        assert!(store.lookup_spec("aws", "ec2", "t3.small").is_none());
    }

    #[tokio::test]
    async fn test_load_dir() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("ec2.yaml"),
            "provider: aws\nservice: ec2\nsku: t3.micro\nhourly_rate: 0.0104\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("storage.yml"),
            "- provider: gcp\n  service: storage\n  sku: standard\n  monthly_estimate: 2.6\n  currency: EUR\n\
             - provider: azure\n  service: blob\n  sku: hot\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("broken.yaml"), "provider: [").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let (store, warnings) = SpecStore::load_dir(dir.path()).await.unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(warnings.len(), 2);
        assert!(warnings.iter().any(|w| w.path.ends_with("broken.yaml")));
        assert!(warnings.iter().any(|w| w.message.contains("azure/blob/hot")));

        let gcp = store.lookup_spec("gcp", "storage", "standard").unwrap();
        assert_eq!(gcp.monthly_cost, 2.6);
        assert_eq!(gcp.currency, "EUR");
    }

    #[tokio::test]
    async fn test_load_missing_dir_is_empty() {
        let dir = TempDir::new().unwrap();
        let (store, warnings) = SpecStore::load_dir(&dir.path().join("specs")).await.unwrap();
        assert!(store.is_empty());
        assert!(warnings.is_empty());
    }
}
