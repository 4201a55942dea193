//! Plugin host
//!
//! Starts plugin binaries as child processes, connects to them over gRPC and
//! tears them down again.
//!
//! ```text
//!   Registry ──► launcher_for(transport) ──► Launcher::start ──► Launched
//!                                                                  │
//!                                   Client::connect ◄── Name() ◄───┘
//!                                          │
//!                                   CostSource (engine)
//! ```
//!
//! | transport | plugin flag | channel |
//! |---|---|---|
//! | `tcp` | `--port=<N>` | `127.0.0.1:<N>` |
//! | `stdio` | `--stdio` | loopback proxy ⇄ child stdin/stdout |

pub mod client;
pub mod launcher;
pub mod process;
pub mod stdio;

#[cfg(test)]
mod client_tests;

pub use client::{Client, CostSource};
pub use launcher::{allocate_port, launcher_for, CleanupFn, Launched, Launcher, PORT_ENV};
pub use process::ProcessLauncher;
pub use stdio::StdioLauncher;
