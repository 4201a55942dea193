//! TCP launcher
//!
//! Spawns the plugin with `--port=<N>` and dials `127.0.0.1:<N>`.

use async_trait::async_trait;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use super::launcher::{
    abandon_child, allocate_port, connect_child, plugin_label, process_cleanup, Launched,
    Launcher, PORT_ENV,
};
use crate::config::LaunchConfig;
use crate::error::{PluginError, PluginResult};
use crate::types::TransportKind;

/// Launches plugins that serve gRPC on a loopback TCP port
#[derive(Debug, Clone, Default)]
pub struct ProcessLauncher {
    config: LaunchConfig,
}

impl ProcessLauncher {
    pub fn new(config: LaunchConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Launcher for ProcessLauncher {
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
        let port = allocate_port()?;
        let address = SocketAddr::from((Ipv4Addr::LOCALHOST, port));

        let mut command = Command::new(binary);
        command
            .args(args)
            .arg(format!("--port={}", port))
            .env(PORT_ENV, port.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let mut child = command
            .spawn()
            .map_err(|e| PluginError::launch(binary, e))?;
        tracing::debug!(plugin = %plugin, port, pid = ?child.id(), "plugin process spawned");

        if let Some(stdout) = child.stdout.take() {
            forward_output(plugin.clone(), stdout);
        }

        match connect_child(cancel, &mut child, binary, address, &self.config).await {
            Ok(channel) => {
                let cleanup = process_cleanup(plugin, child, channel.clone(), None);
                Ok(Launched { channel, cleanup })
            }
            Err(e) => Err(abandon_child(&mut child, &plugin, e).await),
        }
    }

    fn transport(&self) -> TransportKind {
        TransportKind::Tcp
    }

    fn config(&self) -> &LaunchConfig {
        &self.config
    }
}

/// Relay a plugin's stdout to the debug log, line by line. Stdout belongs
/// to the host's own output, so plugin chatter never reaches it.
fn forward_output<R>(plugin: String, output: R)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(output).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            tracing::debug!(plugin = %plugin, "{}", line);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PluginErrorKind;

    #[tokio::test]
    async fn test_missing_binary() {
        let launcher = ProcessLauncher::default();
        let err = launcher
            .start(
                &CancellationToken::new(),
                Path::new("/nonexistent/plugin/binary"),
                &[],
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), PluginErrorKind::Launcher);
        assert!(err.to_string().contains("no such file"));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = ProcessLauncher::default()
            .start(&cancel, Path::new("/bin/sh"), &[])
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[test]
    fn test_transport() {
        assert_eq!(ProcessLauncher::default().transport(), TransportKind::Tcp);
    }
}
