pub mod cost;
pub mod plugin;

use console::style;
use std::fmt::Display;

/// Print a non-fatal problem to stderr. Never affects the exit code.
pub fn warn(message: impl Display) {
    eprintln!("{} {}", style("warning:").yellow().bold(), message);
}
