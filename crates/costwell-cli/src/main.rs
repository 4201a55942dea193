use anyhow::Result;
use clap::{ArgAction, Args, Parser, Subcommand};
use console::style;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;

use costwell::CostwellConfig;

mod commands;
mod logging;
mod output;

use output::OutputFormat;

#[derive(Parser)]
#[command(
    name = "costwell",
    version,
    about = "Estimate cloud costs through pluggable pricing sources"
)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct GlobalArgs {
    /// Plugin root directory
    #[arg(long, global = true, value_name = "DIR")]
    plugin_dir: Option<PathBuf>,

    /// Local pricing spec directory
    #[arg(long, global = true, value_name = "DIR")]
    spec_dir: Option<PathBuf>,

    /// Config file (default ~/.costwell/config.yaml)
    #[arg(long, global = true, env = "COSTWELL_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// More log output on stderr (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// Inspect installed plugins
    Plugin {
        #[command(subcommand)]
        command: PluginCommand,
    },
    /// Calculate costs
    Cost {
        #[command(subcommand)]
        command: CostCommand,
    },
}

#[derive(Subcommand)]
enum PluginCommand {
    /// List installed plugins, newest version of each by default
    List {
        /// Show every installed version
        #[arg(long)]
        all: bool,

        #[arg(long, short, value_enum, default_value_t = OutputFormat::Table)]
        output: OutputFormat,
    },
}

#[derive(Subcommand)]
enum CostCommand {
    /// Projected monthly cost of the resources in a JSON file
    Projected {
        /// JSON array of resource descriptors
        file: PathBuf,

        /// Only use this plugin
        #[arg(long)]
        plugin: Option<String>,

        #[arg(long, short, value_enum, default_value_t = OutputFormat::Table)]
        output: OutputFormat,
    },
    /// Historical cost of the resources in a JSON file
    Actual {
        /// JSON array of actual-cost queries
        file: PathBuf,

        /// Only use this plugin
        #[arg(long)]
        plugin: Option<String>,

        #[arg(long, short, value_enum, default_value_t = OutputFormat::Table)]
        output: OutputFormat,
    },
}

fn load_config(global: &GlobalArgs) -> Result<CostwellConfig> {
    let mut config = CostwellConfig::load(global.config.as_deref())?;
    if let Some(dir) = &global.plugin_dir {
        config.plugin_dir = dir.clone();
    }
    if let Some(dir) = &global.spec_dir {
        config.spec_dir = dir.clone();
    }
    Ok(config)
}

async fn run(cli: Cli, cancel: &CancellationToken) -> Result<ExitCode> {
    let config = load_config(&cli.global)?;
    tracing::debug!(
        plugin_dir = %config.plugin_dir.display(),
        spec_dir = %config.spec_dir.display(),
        "configuration loaded"
    );

    match cli.command {
        Command::Plugin {
            command: PluginCommand::List { all, output },
        } => commands::plugin::list(&config, all, output).await,
        Command::Cost { command } => match command {
            CostCommand::Projected {
                file,
                plugin,
                output,
            } => commands::cost::projected(&config, cancel, &file, plugin.as_deref(), output).await,
            CostCommand::Actual {
                file,
                plugin,
                output,
            } => commands::cost::actual(&config, cancel, &file, plugin.as_deref(), output).await,
        },
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.global.verbose);

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted, stopping");
            on_signal.cancel();
        }
    });

    match run(cli, &cancel).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {:#}", style("error:").red().bold(), e);
            ExitCode::FAILURE
        }
    }
}
