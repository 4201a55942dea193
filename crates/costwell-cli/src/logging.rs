//! Log setup. Logs go to stderr; stdout is reserved for results.

use tracing_subscriber::EnvFilter;

/// Filter directives, e.g. `COSTWELL_LOG=costwell=debug`
pub const LOG_ENV: &str = "COSTWELL_LOG";

fn level_for(verbose: u8) -> Option<&'static str> {
    match verbose {
        0 => None,
        1 => Some("info"),
        2 => Some("debug"),
        _ => Some("trace"),
    }
}

/// `-v` flags win over `COSTWELL_LOG`; with neither, only warnings show.
pub fn filter(verbose: u8) -> EnvFilter {
    match level_for(verbose) {
        Some(level) => EnvFilter::new(format!("costwell={level},costwell_cli={level},warn")),
        None => EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn")),
    }
}

pub fn init(verbose: u8) {
    let result = tracing_subscriber::fmt()
        .with_env_filter(filter(verbose))
        .with_writer(std::io::stderr)
        .with_target(verbose > 1)
        .try_init();
    if let Err(e) = result {
        eprintln!("failed to initialise logging: {}", e);
    }
}
