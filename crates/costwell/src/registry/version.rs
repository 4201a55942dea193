//! Version selection
//!
//! Version directories are semver strings, optionally prefixed with `v`.
//! Precedence follows the semver specification, so `1.0.0-beta < 1.0.0`.

use semver::Version;
use std::collections::BTreeMap;

use crate::types::PluginDescriptor;

/// Parse a version directory name
pub fn parse_version_dir(name: &str) -> Option<Version> {
    let trimmed = name.strip_prefix('v').unwrap_or(name);
    Version::parse(trimmed).ok()
}

/// Keep the highest version of every plugin name.
///
/// Output is sorted by name. Among equal versions the first one wins.
pub fn latest_per_name(plugins: &[PluginDescriptor]) -> Vec<PluginDescriptor> {
    let mut latest: BTreeMap<&str, &PluginDescriptor> = BTreeMap::new();
    for plugin in plugins {
        latest
            .entry(plugin.name.as_str())
            .and_modify(|current| {
                if plugin.version > current.version {
                    *current = plugin;
                }
            })
            .or_insert(plugin);
    }
    latest.into_values().cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TransportKind;
    use proptest::prelude::*;
    use std::path::PathBuf;

    fn descriptor(name: &str, version: &str) -> PluginDescriptor {
        PluginDescriptor {
            name: name.to_string(),
            version: parse_version_dir(version).unwrap(),
            install_path: PathBuf::from(format!("/plugins/{}/{}", name, version)),
            binary: PathBuf::from(format!("/plugins/{}/{}/{}", name, version, name)),
            transport: TransportKind::Tcp,
        }
    }

    #[test]
    fn test_parse_version_dir() {
        assert_eq!(parse_version_dir("1.2.3"), Some(Version::new(1, 2, 3)));
        assert_eq!(parse_version_dir("v2.0.0"), Some(Version::new(2, 0, 0)));
        assert!(parse_version_dir("1.0.0-beta.1").unwrap().pre.as_str() == "beta.1");
    }

    #[test]
    fn test_parse_version_dir_invalid() {
        assert!(parse_version_dir("1.2").is_none());
        assert!(parse_version_dir("latest").is_none());
        assert!(parse_version_dir("").is_none());
        assert!(parse_version_dir("vv1.0.0").is_none());
    }

    #[test]
    fn test_latest_picks_highest() {
        let plugins = vec![
            descriptor("test-plugin", "v1.0.0"),
            descriptor("test-plugin", "v2.0.0"),
            descriptor("other", "0.3.0"),
        ];
        let latest = latest_per_name(&plugins);
        assert_eq!(latest.len(), 2);
        assert_eq!(latest[0].name, "other");
        assert_eq!(latest[1].name, "test-plugin");
        assert_eq!(latest[1].version, Version::new(2, 0, 0));
    }

    #[test]
    fn test_prerelease_ranks_below_release() {
        let plugins = vec![
            descriptor("aws", "1.0.0"),
            descriptor("aws", "1.0.0-beta"),
            descriptor("aws", "1.0.0-rc.1"),
        ];
        let latest = latest_per_name(&plugins);
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].version, Version::new(1, 0, 0));
    }

    #[test]
    fn test_latest_empty() {
        assert!(latest_per_name(&[]).is_empty());
    }

    fn version_strategy() -> impl Strategy<Value = String> {
        (
            0u64..5,
            0u64..5,
            0u64..5,
            prop::option::of(prop_oneof![
                Just("alpha".to_string()),
                Just("beta.2".to_string()),
                Just("rc.1".to_string()),
            ]),
        )
            .prop_map(|(major, minor, patch, pre)| match pre {
                Some(pre) => format!("{}.{}.{}-{}", major, minor, patch, pre),
                None => format!("{}.{}.{}", major, minor, patch),
            })
    }

    proptest! {
        #[test]
        fn property_latest_is_semver_maximum(
            versions in prop::collection::vec(version_strategy(), 1..12)
        ) {
            let plugins: Vec<_> = versions.iter().map(|v| descriptor("p", v)).collect();
            let latest = latest_per_name(&plugins);
            prop_assert_eq!(latest.len(), 1);

            let max = versions.iter().filter_map(|v| parse_version_dir(v)).max().unwrap();
            prop_assert_eq!(&latest[0].version, &max);
        }
    }
}
