//! End-to-end runs of the `costwell` binary

use std::fs;
use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

const RESOURCES: &str = r#"[
  {"type": "aws:ec2/instance:Instance", "provider": "aws", "sku": "t3.micro", "region": "us-east-1"},
  {"type": "aws:s3/bucket:Bucket", "provider": "aws"}
]"#;

fn costwell(home: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_costwell"))
        .arg("--config")
        .arg(home.join("config.yaml"))
        .arg("--plugin-dir")
        .arg(home.join("plugins"))
        .arg("--spec-dir")
        .arg(home.join("specs"))
        .args(args)
        .env_remove("COSTWELL_LOG")
        .output()
        .expect("run costwell")
}

fn workspace() -> TempDir {
    let home = TempDir::new().unwrap();
    fs::create_dir_all(home.path().join("plugins")).unwrap();
    fs::write(home.path().join("resources.json"), RESOURCES).unwrap();
    home
}

#[test]
fn test_spec_fallback_without_plugins() {
    let home = workspace();
    fs::create_dir_all(home.path().join("specs")).unwrap();
    fs::write(
        home.path().join("specs").join("ec2.yaml"),
        "provider: aws\nservice: ec2\nsku: t3.micro\nmonthly_estimate: 7.59\n",
    )
    .unwrap();

    let resources = home.path().join("resources.json");
    let out = costwell(
        home.path(),
        &["cost", "projected", resources.to_str().unwrap(), "--output", "json"],
    );
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));

    let value: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    let results = value["results"].as_array().unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0]["adapter_source"], "spec");
    assert_eq!(results[0]["monthly_cost"], 7.59);
    assert_eq!(results[1]["adapter_source"], "none");
}

#[test]
fn test_nothing_to_price_with_is_fatal() {
    let home = workspace();
    let resources = home.path().join("resources.json");

    let out = costwell(home.path(), &["cost", "projected", resources.to_str().unwrap()]);
    assert!(!out.status.success());
    assert!(out.stdout.is_empty());
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("no cost source available"), "stderr: {}", stderr);
}

#[test]
fn test_plugin_list_on_missing_root_fails() {
    let home = TempDir::new().unwrap();
    let out = costwell(home.path(), &["plugin", "list"]);
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("not accessible"));
}

#[test]
fn test_plugin_list_reports_warnings_but_succeeds() {
    let home = workspace();
    fs::create_dir_all(home.path().join("plugins").join("aws").join("not-a-version")).unwrap();

    let out = costwell(home.path(), &["plugin", "list", "--all"]);
    assert!(out.status.success());
    assert_eq!(String::from_utf8_lossy(&out.stdout), "No plugins installed\n");
    assert!(String::from_utf8_lossy(&out.stderr).contains("not a semantic version"));
}

#[test]
fn test_unknown_plugin_is_fatal() {
    let home = workspace();
    let resources = home.path().join("resources.json");

    let out = costwell(
        home.path(),
        &["cost", "projected", resources.to_str().unwrap(), "--plugin", "gcp"],
    );
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("plugin gcp is not installed"));
}
