use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use costwell::{
    ActualCostQuery, CostwellConfig, Engine, OpenedPlugins, PluginError, Registry,
    ResourceDescriptor, SpecStore,
};

use super::warn;
use crate::output::{self, OutputFormat};

/// Exit status after an interrupt
const INTERRUPTED: u8 = 130;

async fn read_input<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("parsing {}", path.display()))
}

/// Open plugins, reporting warnings. A missing plugin root is tolerated
/// when something else can still produce prices.
async fn open_plugins(
    config: &CostwellConfig,
    cancel: &CancellationToken,
    only: Option<&str>,
    has_fallback: bool,
) -> Result<OpenedPlugins> {
    let registry = Registry::new(&config.plugin_dir, config.launch.clone());
    match registry.open(cancel, only).await {
        Ok(opened) => {
            for warning in opened.warnings() {
                warn(warning);
            }
            Ok(opened)
        }
        Err(e @ PluginError::RegistryRoot { .. }) if only.is_none() && has_fallback => {
            warn(&e);
            Ok(OpenedPlugins::default())
        }
        Err(e) => Err(e.into()),
    }
}

async fn close(opened: &OpenedPlugins) {
    if let Err(e) = opened.close_all().await {
        warn(format!("closing plugins: {}", e));
    }
}

fn exit_code(cancel: &CancellationToken) -> ExitCode {
    if cancel.is_cancelled() {
        ExitCode::from(INTERRUPTED)
    } else {
        ExitCode::SUCCESS
    }
}

pub async fn projected(
    config: &CostwellConfig,
    cancel: &CancellationToken,
    file: &Path,
    only: Option<&str>,
    format: OutputFormat,
) -> Result<ExitCode> {
    let resources: Vec<ResourceDescriptor> = read_input(file).await?;

    let (specs, spec_warnings) = SpecStore::load_dir(&config.spec_dir).await?;
    for warning in &spec_warnings {
        warn(format!("{}: {}", warning.path.display(), warning.message));
    }

    let opened = open_plugins(config, cancel, only, !specs.is_empty()).await?;
    let engine = Engine::new(opened.sources(), Some(Arc::new(specs)), config.engine.clone());

    if let Err(e) = engine.check_coverage(&resources) {
        close(&opened).await;
        return Err(anyhow::Error::new(e)
            .context("cannot price any resource: install a cost plugin or add a pricing spec"));
    }

    let results = engine.calculate_projected(cancel, &resources).await;
    close(&opened).await;

    output::projected(&mut std::io::stdout().lock(), &results, format)?;
    Ok(exit_code(cancel))
}

pub async fn actual(
    config: &CostwellConfig,
    cancel: &CancellationToken,
    file: &Path,
    only: Option<&str>,
    format: OutputFormat,
) -> Result<ExitCode> {
    let queries: Vec<ActualCostQuery> = read_input(file).await?;

    let opened = open_plugins(config, cancel, only, false).await?;
    if opened.is_empty() && !queries.is_empty() {
        return Err(anyhow::Error::new(PluginError::NoCostSources {
            opened: 0,
            resources: queries.len(),
        })
        .context("actual costs need at least one cost plugin"));
    }

    let engine = Engine::new(opened.sources(), None, config.engine.clone());
    let results = engine.calculate_actual(cancel, &queries).await;
    close(&opened).await;

    output::actual(&mut std::io::stdout().lock(), &results, format)?;
    Ok(exit_code(cancel))
}
