//! Stdio launcher
//!
//! Spawns the plugin with `--stdio` and tunnels gRPC through its
//! stdin/stdout. tonic only dials sockets, so a loopback listener accepts the
//! host's single connection and a proxy task relays bytes between that
//! connection and the child's pipes.

use async_trait::async_trait;
use std::net::Ipv4Addr;
use std::path::Path;
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use super::launcher::{
    abandon_child, connect_child, plugin_label, process_cleanup, Launched, Launcher,
};
use crate::config::LaunchConfig;
use crate::error::{PluginError, PluginResult};
use crate::types::TransportKind;

/// Launches plugins that serve gRPC over stdin/stdout
#[derive(Debug, Clone, Default)]
pub struct StdioLauncher {
    config: LaunchConfig,
}

impl StdioLauncher {
    pub fn new(config: LaunchConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Launcher for StdioLauncher {
    async fn start(
        &self,
        cancel: &CancellationToken,
        binary: &Path,
        args: &[String],
    ) -> PluginResult<Launched> {
        if cancel.is_cancelled() {
            return Err(PluginError::cancelled(format!(
                "launching {}",
                binary.display()
            )));
        }

        let plugin = plugin_label(binary);
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
            .await
            .map_err(|e| PluginError::io("binding stdio proxy listener", e))?;
        let address = listener
            .local_addr()
            .map_err(|e| PluginError::io("reading stdio proxy address", e))?;

        let mut command = Command::new(binary);
        command
            .args(args)
            .arg("--stdio")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let mut child = command
            .spawn()
            .map_err(|e| PluginError::launch(binary, e))?;
        tracing::debug!(plugin = %plugin, proxy = %address, pid = ?child.id(), "stdio plugin spawned");

        let (stdin, stdout) = match (child.stdin.take(), child.stdout.take()) {
            (Some(stdin), Some(stdout)) => (stdin, stdout),
            _ => {
                let err = PluginError::launch_failed(binary, "plugin stdio pipes unavailable");
                return Err(abandon_child(&mut child, &plugin, err).await);
            }
        };
        let proxy = tokio::spawn(relay(listener, stdin, stdout, plugin.clone()));

        match connect_child(cancel, &mut child, binary, address, &self.config).await {
            Ok(channel) => {
                let cleanup = process_cleanup(plugin, child, channel.clone(), Some(proxy));
                Ok(Launched { channel, cleanup })
            }
            Err(e) => {
                proxy.abort();
                Err(abandon_child(&mut child, &plugin, e).await)
            }
        }
    }

    fn transport(&self) -> TransportKind {
        TransportKind::Stdio
    }

    fn config(&self) -> &LaunchConfig {
        &self.config
    }
}

/// Accept one connection on `listener` and shuttle bytes between it and the
/// plugin's pipes until either side closes.
pub(crate) async fn relay<W, R>(listener: TcpListener, mut stdin: W, mut stdout: R, plugin: String)
where
    W: AsyncWrite + Unpin,
    R: AsyncRead + Unpin,
{
    let (mut stream, peer) = match listener.accept().await {
        Ok(accepted) => accepted,
        Err(e) => {
            tracing::warn!(plugin = %plugin, error = %e, "stdio proxy accept failed");
            return;
        }
    };
    // Only one host connection may own the pipes.
    drop(listener);
    tracing::trace!(plugin = %plugin, %peer, "stdio proxy connected");

    let (mut from_host, mut to_host) = stream.split();
    // Owns stdin so the plugin sees EOF once the host hangs up.
    let upstream = async move {
        let copied = tokio::io::copy(&mut from_host, &mut stdin).await;
        let _ = stdin.shutdown().await;
        copied
    };
    let downstream = async {
        let copied = tokio::io::copy(&mut stdout, &mut to_host).await;
        let _ = to_host.shutdown().await;
        copied
    };

    let (up, down) = tokio::join!(upstream, downstream);
    tracing::debug!(
        plugin = %plugin,
        sent = up.as_ref().ok().copied(),
        received = down.as_ref().ok().copied(),
        "stdio proxy closed"
    );
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpStream;

    #[tokio::test]
    async fn test_relay_round_trips_through_child() {
        let mut child = Command::new("cat")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .unwrap();
        let stdin = child.stdin.take().unwrap();
        let stdout = child.stdout.take().unwrap();

        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let address = listener.local_addr().unwrap();
        let proxy = tokio::spawn(relay(listener, stdin, stdout, "cat".to_string()));

        let mut stream = TcpStream::connect(address).await.unwrap();
        stream.write_all(b"ping\n").await.unwrap();
        let mut buf = [0u8; 5];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping\n");

        drop(stream);
        proxy.await.unwrap();
        child.wait().await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_binary() {
        let err = StdioLauncher::default()
            .start(
                &CancellationToken::new(),
                Path::new("/nonexistent/plugin/binary"),
                &[],
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::PluginErrorKind::Launcher);
    }

    #[test]
    fn test_transport() {
        assert_eq!(StdioLauncher::default().transport(), TransportKind::Stdio);
    }
}
