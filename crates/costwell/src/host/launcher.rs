//! Launcher abstraction
//!
//! A [`Launcher`] turns a plugin binary into a live gRPC [`Channel`] plus a
//! [`CleanupFn`] that tears everything down again. The two transports share
//! the dial/retry loop and the child-termination logic defined here.

use async_trait::async_trait;
use futures::future::BoxFuture;
use std::future::Future;
use std::net::{Ipv4Addr, SocketAddr, TcpListener};
use std::path::Path;
use std::sync::Arc;
use tokio::process::Child;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tonic::transport::{Channel, Endpoint};

use crate::config::LaunchConfig;
use crate::error::{PluginError, PluginResult};
use crate::types::TransportKind;

/// Environment variable carrying the assigned port, for plugins that do not
/// parse `--port`.
pub const PORT_ENV: &str = "COSTWELL_PLUGIN_PORT";

/// Repeatable teardown for a launched plugin.
///
/// Cloning shares the same underlying resources. Running it more than once
/// repeats the release steps; each step tolerates having already happened.
#[derive(Clone)]
pub struct CleanupFn {
    inner: Arc<dyn Fn() -> BoxFuture<'static, PluginResult<()>> + Send + Sync>,
}

impl CleanupFn {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = PluginResult<()>> + Send + 'static,
    {
        Self {
            inner: Arc::new(move || -> BoxFuture<'static, PluginResult<()>> { Box::pin(f()) }),
        }
    }

    /// A cleanup with nothing to release
    pub fn noop() -> Self {
        Self::new(|| async { Ok(()) })
    }

    pub async fn run(&self) -> PluginResult<()> {
        (self.inner)().await
    }
}

impl std::fmt::Debug for CleanupFn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CleanupFn")
    }
}

/// A started plugin
#[derive(Debug)]
pub struct Launched {
    /// Connected gRPC channel
    pub channel: Channel,
    /// Releases the channel and the child process
    pub cleanup: CleanupFn,
}

/// Starts a plugin binary and connects to it
#[async_trait]
pub trait Launcher: Send + Sync {
    /// Spawn `binary` with `args` and return a connected channel.
    ///
    /// On error nothing is left running.
    async fn start(
        &self,
        cancel: &CancellationToken,
        binary: &Path,
        args: &[String],
    ) -> PluginResult<Launched>;

    /// Transport this launcher implements
    fn transport(&self) -> TransportKind;

    /// Timeouts used by this launcher
    fn config(&self) -> &LaunchConfig;
}

/// Build the launcher for a declared transport
pub fn launcher_for(transport: TransportKind, config: LaunchConfig) -> Arc<dyn Launcher> {
    match transport {
        TransportKind::Tcp => Arc::new(super::process::ProcessLauncher::new(config)),
        TransportKind::Stdio => Arc::new(super::stdio::StdioLauncher::new(config)),
    }
}

/// Ask the OS for a free loopback port and release it straight away.
///
/// Another process may grab the port before the plugin binds it. The dial
/// loop retries until the deadline, which covers the plugin's own bind
/// failing and being restarted by the caller.
pub fn allocate_port() -> PluginResult<u16> {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
        .map_err(|e| PluginError::io("allocating plugin port", e))?;
    let port = listener
        .local_addr()
        .map_err(|e| PluginError::io("reading allocated port", e))?
        .port();
    drop(listener);
    Ok(port)
}

/// Dial `address` until connected, `connect_timeout` elapses, or `cancel`
/// fires.
pub(crate) async fn dial(
    cancel: &CancellationToken,
    address: SocketAddr,
    config: &LaunchConfig,
) -> PluginResult<Channel> {
    let endpoint = Endpoint::from_shared(format!("http://{}", address))
        .map_err(|e| PluginError::protocol_with_source(format!("invalid address {}", address), e))?
        .connect_timeout(config.connect_timeout);

    let started = Instant::now();
    let deadline = started + config.connect_timeout;
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        let attempt = tokio::time::timeout_at(deadline, endpoint.connect());
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(PluginError::cancelled(format!("connecting to plugin at {}", address)));
            }
            result = attempt => match result {
                Ok(Ok(channel)) => {
                    tracing::debug!(%address, attempts, elapsed = ?started.elapsed(), "plugin connected");
                    return Ok(channel);
                }
                Ok(Err(e)) => {
                    tracing::trace!(%address, attempts, error = %e, "plugin not reachable yet");
                }
                Err(_) => break,
            },
        }

        if Instant::now() + config.retry_interval >= deadline {
            break;
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(PluginError::cancelled(format!("connecting to plugin at {}", address)));
            }
            _ = tokio::time::sleep(config.retry_interval) => {}
        }
    }

    Err(PluginError::connection_timeout(
        address.to_string(),
        started.elapsed(),
    ))
}

/// Dial the plugin while watching the child, so a plugin that dies during
/// startup fails the launch immediately instead of after the full timeout.
pub(crate) async fn connect_child(
    cancel: &CancellationToken,
    child: &mut Child,
    binary: &Path,
    address: SocketAddr,
    config: &LaunchConfig,
) -> PluginResult<Channel> {
    tokio::select! {
        result = dial(cancel, address, config) => result,
        status = child.wait() => Err(match status {
            Ok(status) => PluginError::launch_failed(
                binary,
                format!("plugin exited before accepting connections ({})", status),
            ),
            Err(e) => PluginError::launch(binary, e),
        }),
    }
}

/// Stop a child whose launch failed and return the launch error, combined
/// with the cleanup error if stopping it failed too.
pub(crate) async fn abandon_child(child: &mut Child, plugin: &str, err: PluginError) -> PluginError {
    match terminate_child(child, plugin).await {
        Ok(()) => err,
        Err(cleanup) => {
            tracing::warn!(plugin, error = %cleanup, "failed to stop plugin after launch error");
            PluginError::composite(err, cleanup)
        }
    }
}

/// Everything one launched plugin owns
struct PluginProcess {
    channel: Option<Channel>,
    proxy: Option<JoinHandle<()>>,
    child: Child,
}

/// Cleanup that drops the connection, stops the stdio proxy (if any), then
/// kills and reaps the child.
pub(crate) fn process_cleanup(
    plugin: String,
    child: Child,
    channel: Channel,
    proxy: Option<JoinHandle<()>>,
) -> CleanupFn {
    let process = Arc::new(Mutex::new(PluginProcess {
        channel: Some(channel),
        proxy,
        child,
    }));
    CleanupFn::new(move || {
        let process = process.clone();
        let plugin = plugin.clone();
        async move {
            let mut process = process.lock().await;
            drop(process.channel.take());
            if let Some(proxy) = process.proxy.take() {
                proxy.abort();
            }
            terminate_child(&mut process.child, &plugin).await
        }
    })
}

/// Short name for log fields: the binary's file name.
pub(crate) fn plugin_label(binary: &Path) -> String {
    binary
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| binary.display().to_string())
}

/// Kill `child` if it is still running and reap it.
///
/// Safe to call repeatedly: a child that already exited is only reaped.
pub(crate) async fn terminate_child(child: &mut Child, plugin: &str) -> PluginResult<()> {
    match child.try_wait() {
        Ok(Some(status)) => {
            tracing::trace!(plugin, %status, "plugin already exited");
            return Ok(());
        }
        Ok(None) => {}
        Err(e) => {
            return Err(PluginError::cleanup(
                plugin,
                "checking process status",
                Some(e),
            ))
        }
    }

    if let Err(e) = child.start_kill() {
        // Raced with the child exiting on its own.
        if e.kind() != std::io::ErrorKind::InvalidInput {
            return Err(PluginError::cleanup(plugin, "killing process", Some(e)));
        }
    }

    child
        .wait()
        .await
        .map(|status| tracing::debug!(plugin, %status, "plugin process reaped"))
        .map_err(|e| PluginError::cleanup(plugin, "waiting for process", Some(e)))
}
