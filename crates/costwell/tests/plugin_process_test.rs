//! Launch real (shell script) plugins and check nothing is left running.
#![cfg(unix)]

use costwell::config::LaunchConfig;
use costwell::error::PluginErrorKind;
use costwell::host::{Client, Launcher, ProcessLauncher, StdioLauncher};
use costwell::registry::{Registry, WarningKind};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// A plugin that records its pid and then never serves anything
fn sleeper(dir: &Path, name: &str) -> (PathBuf, PathBuf) {
    fs::create_dir_all(dir).unwrap();
    let pid_file = dir.join(format!("{}.pid", name));
    let script = format!(
        "#!/bin/sh\necho $$ > '{}'\nexec sleep 30\n",
        pid_file.display()
    );
    (write_script(dir, name, &script), pid_file)
}

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, body).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn read_pid(pid_file: &Path) -> String {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if let Ok(pid) = fs::read_to_string(pid_file) {
            let pid = pid.trim().to_string();
            if !pid.is_empty() {
                return pid;
            }
        }
        assert!(Instant::now() < deadline, "plugin never wrote {}", pid_file.display());
        std::thread::sleep(Duration::from_millis(20));
    }
}

fn is_running(pid: &str) -> bool {
    Command::new("kill")
        .args(["-0", pid])
        .stderr(std::process::Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

fn short_timeouts() -> LaunchConfig {
    LaunchConfig {
        connect_timeout: Duration::from_millis(400),
        retry_interval: Duration::from_millis(25),
        handshake_timeout: Duration::from_millis(400),
    }
}

#[tokio::test]
async fn test_unreachable_plugin_times_out_and_is_reaped() {
    let dir = TempDir::new().unwrap();
    let (binary, pid_file) = sleeper(dir.path(), "silent");

    let launcher = ProcessLauncher::new(short_timeouts());
    let err = launcher
        .start(&CancellationToken::new(), &binary, &[])
        .await
        .unwrap_err();

    assert_eq!(err.kind(), PluginErrorKind::ConnectionTimeout);
    assert!(err.to_string().starts_with("timeout"));
    assert!(!is_running(&read_pid(&pid_file)));
}

#[tokio::test]
async fn test_plugin_exiting_early_fails_fast() {
    let dir = TempDir::new().unwrap();
    let binary = write_script(dir.path(), "quitter", "#!/bin/sh\necho 'bad flag' >&2\nexit 3\n");

    let launcher = ProcessLauncher::new(LaunchConfig {
        connect_timeout: Duration::from_secs(20),
        ..LaunchConfig::default()
    });
    let started = Instant::now();
    let err = Client::connect(&CancellationToken::new(), &launcher, &binary, &[])
        .await
        .unwrap_err();

    assert_eq!(err.kind(), PluginErrorKind::Launcher);
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[tokio::test]
async fn test_cancel_during_dial_reaps_plugin() {
    let dir = TempDir::new().unwrap();
    let (binary, pid_file) = sleeper(dir.path(), "slow-start");

    let launcher = ProcessLauncher::new(LaunchConfig {
        connect_timeout: Duration::from_secs(30),
        ..short_timeouts()
    });
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        trigger.cancel();
    });

    let err = Client::connect(&cancel, &launcher, &binary, &[])
        .await
        .unwrap_err();
    assert!(err.is_cancelled(), "unexpected error: {}", err);
    assert!(!is_running(&read_pid(&pid_file)));
}

#[tokio::test]
async fn test_silent_stdio_plugin_is_reaped() {
    let dir = TempDir::new().unwrap();
    let (binary, pid_file) = sleeper(dir.path(), "stdio-silent");

    let launcher = StdioLauncher::new(short_timeouts());
    let started = Instant::now();
    let result = Client::connect(&CancellationToken::new(), &launcher, &binary, &[]).await;

    assert!(result.is_err());
    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(!is_running(&read_pid(&pid_file)));
}

#[tokio::test]
async fn test_registry_open_leaves_no_processes_behind() {
    let root = TempDir::new().unwrap();
    let (_, first) = sleeper(&root.path().join("alpha").join("1.0.0"), "alpha");
    let (_, second) = sleeper(&root.path().join("beta").join("0.2.0"), "beta");

    let opened = Registry::new(root.path(), short_timeouts())
        .open(&CancellationToken::new(), None)
        .await
        .unwrap();

    assert!(opened.is_empty());
    assert_eq!(opened.warnings().len(), 2);
    assert!(opened
        .warnings()
        .iter()
        .all(|w| w.kind == WarningKind::LaunchFailed));
    opened.close_all().await.unwrap();

    assert!(!is_running(&read_pid(&first)));
    assert!(!is_running(&read_pid(&second)));
}
