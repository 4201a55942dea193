use anyhow::Result;
use std::process::ExitCode;

use costwell::{CostwellConfig, Registry};

use super::warn;
use crate::output::{self, OutputFormat};

pub async fn list(config: &CostwellConfig, all: bool, format: OutputFormat) -> Result<ExitCode> {
    let registry = Registry::new(&config.plugin_dir, config.launch.clone());
    let discovery = if all {
        registry.list_all_plugins().await?
    } else {
        registry.list_latest_plugins().await?
    };

    for warning in &discovery.warnings {
        warn(warning);
    }

    output::plugins(&mut std::io::stdout().lock(), &discovery.plugins, format)?;
    Ok(ExitCode::SUCCESS)
}
