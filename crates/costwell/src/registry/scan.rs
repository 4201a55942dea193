//! Plugin directory scan
//!
//! Walks `<root>/<name>/<version>/` and turns every usable version directory
//! into a [`PluginDescriptor`]. Anything odd below the root becomes a
//! [`RegistryWarning`]; only an unreadable root is an error.

use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};

use super::version::parse_version_dir;
use crate::error::{PluginError, PluginResult};
use crate::types::{PluginDescriptor, TransportKind};

/// Optional per-version manifest
pub const MANIFEST_FILE: &str = "plugin.yaml";

/// Binary name prefix accepted besides the bare plugin name
pub const BINARY_PREFIX: &str = "costwell-plugin-";

/// What went wrong with one entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningKind {
    /// Version directory name is not semver
    InvalidVersion,
    /// Directory could not be read
    Unreadable,
    /// `plugin.yaml` could not be parsed
    InvalidManifest,
    /// No executable in the version directory
    MissingBinary,
    /// The plugin was found but could not be started
    LaunchFailed,
}

/// A non-fatal problem found while scanning or opening plugins
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryWarning {
    pub kind: WarningKind,
    pub path: PathBuf,
    pub message: String,
}

impl RegistryWarning {
    pub fn new(kind: WarningKind, path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        let warning = Self {
            kind,
            path: path.into(),
            message: message.into(),
        };
        tracing::warn!(path = %warning.path.display(), kind = ?warning.kind, "{}", warning.message);
        warning
    }
}

impl fmt::Display for RegistryWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path.display(), self.message)
    }
}

/// Result of one scan
#[derive(Debug, Clone, Default)]
pub struct Discovery {
    /// Found plugins, sorted by name then ascending version
    pub plugins: Vec<PluginDescriptor>,
    pub warnings: Vec<RegistryWarning>,
}

#[derive(Debug, Default, Deserialize)]
struct Manifest {
    binary: Option<String>,
    transport: Option<TransportKind>,
}

/// Scan `root`. Side-effect free; safe to run concurrently.
pub async fn scan(root: &Path) -> PluginResult<Discovery> {
    let names = sorted_dirs(root)
        .await
        .map_err(|source| PluginError::RegistryRoot {
            path: root.to_path_buf(),
            source,
        })?;

    let mut discovery = Discovery::default();
    for (name, name_dir) in names {
        let versions = match sorted_dirs(&name_dir).await {
            Ok(versions) => versions,
            Err(e) => {
                discovery.warnings.push(RegistryWarning::new(
                    WarningKind::Unreadable,
                    &name_dir,
                    format!("cannot read plugin directory: {}", e),
                ));
                continue;
            }
        };

        for (version_name, version_dir) in versions {
            let Some(version) = parse_version_dir(&version_name) else {
                discovery.warnings.push(RegistryWarning::new(
                    WarningKind::InvalidVersion,
                    &version_dir,
                    format!("{:?} is not a semantic version, skipping", version_name),
                ));
                continue;
            };

            match describe(&name, version, &version_dir).await {
                Ok(descriptor) => discovery.plugins.push(descriptor),
                Err(warning) => discovery.warnings.push(warning),
            }
        }
    }

    discovery
        .plugins
        .sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.version.cmp(&b.version)));
    Ok(discovery)
}

async fn describe(
    name: &str,
    version: semver::Version,
    dir: &Path,
) -> Result<PluginDescriptor, RegistryWarning> {
    let manifest = read_manifest(dir).await?;

    let binary = match &manifest.binary {
        Some(binary) => {
            let path = dir.join(binary);
            if !is_file(&path).await {
                return Err(RegistryWarning::new(
                    WarningKind::MissingBinary,
                    dir,
                    format!("manifest names binary {:?} which does not exist", binary),
                ));
            }
            path
        }
        None => find_binary(name, dir).await.ok_or_else(|| {
            RegistryWarning::new(
                WarningKind::MissingBinary,
                dir,
                format!("no executable found for plugin {}", name),
            )
        })?,
    };

    Ok(PluginDescriptor {
        name: name.to_string(),
        version,
        install_path: dir.to_path_buf(),
        binary,
        transport: manifest.transport.unwrap_or_default(),
    })
}

async fn read_manifest(dir: &Path) -> Result<Manifest, RegistryWarning> {
    let path = dir.join(MANIFEST_FILE);
    match tokio::fs::read_to_string(&path).await {
        Ok(content) => serde_yaml::from_str(&content).map_err(|e| {
            RegistryWarning::new(
                WarningKind::InvalidManifest,
                &path,
                format!("invalid manifest: {}", e),
            )
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Manifest::default()),
        Err(e) => Err(RegistryWarning::new(
            WarningKind::Unreadable,
            &path,
            format!("cannot read manifest: {}", e),
        )),
    }
}

/// `<name>`, then `costwell-plugin-<name>`, then the first executable file.
async fn find_binary(name: &str, dir: &Path) -> Option<PathBuf> {
    let suffix = std::env::consts::EXE_SUFFIX;
    for candidate in [
        format!("{}{}", name, suffix),
        format!("{}{}{}", BINARY_PREFIX, name, suffix),
    ] {
        let path = dir.join(candidate);
        if is_file(&path).await {
            return Some(path);
        }
    }

    let mut entries = tokio::fs::read_dir(dir).await.ok()?;
    let mut files = Vec::new();
    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        if entry.file_name() == MANIFEST_FILE {
            continue;
        }
        if let Ok(metadata) = tokio::fs::metadata(&path).await {
            if metadata.is_file() && is_executable(&metadata, &path) {
                files.push(path);
            }
        }
    }
    files.sort();
    files.into_iter().next()
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}

#[cfg(unix)]
fn is_executable(metadata: &std::fs::Metadata, _path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_metadata: &std::fs::Metadata, path: &Path) -> bool {
    path.extension().map(|e| e == "exe").unwrap_or(false)
}

/// Subdirectories of `dir` as `(name, path)`, sorted by name. Symlinks to
/// directories count; non-UTF-8 names are skipped.
async fn sorted_dirs(dir: &Path) -> std::io::Result<Vec<(String, PathBuf)>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut dirs = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        if name.starts_with('.') {
            continue;
        }
        if tokio::fs::metadata(&path)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
        {
            dirs.push((name, path));
        }
    }
    dirs.sort();
    Ok(dirs)
}
