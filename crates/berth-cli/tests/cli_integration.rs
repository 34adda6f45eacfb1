//! CLI subprocess integration tests.
//!
//! These tests invoke the `berth` binary as a subprocess against the mock
//! transport and verify exit codes, stdout content, and JSON output.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

fn berth_bin() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_berth"));
    cmd.env_remove("BERTH_LOG").stdin(Stdio::null());
    cmd
}

fn write_manifest(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("berth.toml");
    std::fs::write(&path, body).unwrap();
    path
}

fn write_redis_manifest(dir: &Path) -> PathBuf {
    std::fs::write(dir.join("redis.conf"), "appendonly no\n").unwrap();
    write_manifest(
        dir,
        r#"manifest_version = 1

[container]
image = "redis:7"
name = "redis-fixture"
command = ["redis-server", "/etc/redis.conf"]

[[container.ports]]
container = 6379
protocol = "tcp"

[[pre_start]]
action = "copy"
local = "redis.conf"
remote = "/etc/redis.conf"

[[post_start]]
action = "exec"
command = ["redis-cli", "ping"]
"#,
    )
}

fn stdout(output: &std::process::Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &std::process::Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn cli_version_exits_zero() {
    let output = berth_bin().arg("--version").output().unwrap();
    assert!(output.status.success());
    assert!(stdout(&output).contains("berth"));
}

#[test]
fn cli_help_lists_commands() {
    let output = berth_bin().arg("--help").output().unwrap();
    assert!(output.status.success());
    let out = stdout(&output);
    for command in ["up", "exec", "check", "ports", "image", "doctor"] {
        assert!(out.contains(command), "help is missing {command}");
    }
}

#[test]
fn cli_unknown_subcommand_fails() {
    let output = berth_bin().arg("launch").output().unwrap();
    assert!(!output.status.success());
}

#[test]
fn cli_check_lists_stages_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let manifest = write_redis_manifest(dir.path());
    let output = berth_bin()
        .args(["--transport", "mock", "check"])
        .arg(&manifest)
        .output()
        .unwrap();
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let out = stdout(&output);
    let create = out.find("create-container").unwrap();
    let copy = out.find("into /etc/redis.conf").unwrap();
    let start = out.find("start-container").unwrap();
    let exec = out.find("exec redis-cli ping").unwrap();
    assert!(create < copy && copy < start && start < exec);
}

#[test]
fn cli_check_json_carries_manifest_and_stages() {
    let dir = tempfile::tempdir().unwrap();
    let manifest = write_redis_manifest(dir.path());
    let output = berth_bin()
        .args(["--transport", "mock", "--json", "check"])
        .arg(&manifest)
        .output()
        .unwrap();
    assert!(output.status.success());
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["stages"].as_array().unwrap().len(), 4);
    assert_eq!(json["manifest"]["params"]["image"], "redis:7");
}

#[test]
fn cli_check_missing_manifest_exits_two() {
    let dir = tempfile::tempdir().unwrap();
    let output = berth_bin()
        .args(["--transport", "mock", "check"])
        .arg(dir.path().join("missing.toml"))
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
    assert!(stderr(&output).contains("manifest error:"));
}

#[test]
fn cli_check_invalid_manifest_exits_two() {
    let dir = tempfile::tempdir().unwrap();
    let manifest = write_manifest(
        dir.path(),
        "manifest_version = 1\n\n[container]\nimage = \"redis:7\"\nshell = true\n",
    );
    let output = berth_bin()
        .args(["--transport", "mock", "check"])
        .arg(&manifest)
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn cli_unknown_transport_exits_three() {
    let dir = tempfile::tempdir().unwrap();
    let manifest = write_redis_manifest(dir.path());
    let output = berth_bin()
        .args(["--transport", "podman-rest", "check"])
        .arg(&manifest)
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(3));
    assert!(stderr(&output).contains("engine error:"));
}

#[test]
fn cli_ports_json_parses_listing() {
    let output = berth_bin()
        .args(["--json", "ports", "0.0.0.0:32771->80/tcp, 443/tcp"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let bindings = json.as_array().unwrap();
    assert_eq!(bindings.len(), 2);
    assert_eq!(bindings[0]["container_port"], 80);
    assert_eq!(bindings[0]["host"]["port"], 32771);
    assert!(bindings[1].get("host").is_none());
}

#[test]
fn cli_ports_rejects_garbage() {
    let output = berth_bin().args(["ports", "eighty/tcp"]).output().unwrap();
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("invalid port listing"));
}

#[test]
fn cli_image_json_splits_reference() {
    let output = berth_bin()
        .args(["--json", "image", "localhost:5000/team/api:2.4"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["registry"], "localhost:5000");
    assert_eq!(json["repository"], "team");
    assert_eq!(json["name"], "api");
    assert_eq!(json["tag"], "2.4");
    assert!(json["digest"].is_null());
}

#[test]
fn cli_image_rejects_invalid_reference() {
    let output = berth_bin().args(["image", "Redis:7"]).output().unwrap();
    assert!(!output.status.success());
}

#[test]
fn cli_up_with_mock_provisions_and_tears_down() {
    let dir = tempfile::tempdir().unwrap();
    let manifest = write_redis_manifest(dir.path());
    let output = berth_bin()
        .args(["--transport", "mock", "up"])
        .arg(&manifest)
        .output()
        .unwrap();
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let out = stdout(&output);
    assert!(out.contains("started"));
    assert!(out.contains("0.0.0.0:32768->6379/tcp"));
    assert!(out.contains("torn down"));
}

#[test]
fn cli_up_json_reports_container() {
    let dir = tempfile::tempdir().unwrap();
    let manifest = write_redis_manifest(dir.path());
    let output = berth_bin()
        .args(["--transport", "mock", "--json", "up"])
        .arg(&manifest)
        .output()
        .unwrap();
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["state"], "started");
    assert_eq!(json["container"]["name"], "redis-fixture");
    assert_eq!(json["ports"][0]["host"]["port"], 32768);
}

#[test]
fn cli_up_fails_when_a_copy_source_is_missing() {
    let dir = tempfile::tempdir().unwrap();
    let manifest = write_redis_manifest(dir.path());
    std::fs::remove_file(dir.path().join("redis.conf")).unwrap();
    let output = berth_bin()
        .args(["--transport", "mock", "up"])
        .arg(&manifest)
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("nothing to copy"));
}

#[test]
fn cli_exec_with_mock_runs_the_command() {
    let dir = tempfile::tempdir().unwrap();
    let manifest = write_redis_manifest(dir.path());
    let output = berth_bin()
        .args(["--transport", "mock", "exec", "--manifest"])
        .arg(&manifest)
        .args(["--", "redis-cli", "info"])
        .output()
        .unwrap();
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert!(stdout(&output).contains("mock-exec: redis-cli info"));
}

#[test]
fn cli_exec_requires_a_command() {
    let output = berth_bin()
        .args(["--transport", "mock", "exec"])
        .output()
        .unwrap();
    assert!(!output.status.success());
}

#[test]
fn cli_doctor_mock_json_is_healthy() {
    let dir = tempfile::tempdir().unwrap();
    let manifest = write_redis_manifest(dir.path());
    let output = berth_bin()
        .args(["--transport", "mock", "--json", "doctor"])
        .arg(&manifest)
        .output()
        .unwrap();
    assert!(output.status.success());
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["healthy"], true);
    let names: Vec<_> = json["checks"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["name"].as_str().unwrap().to_owned())
        .collect();
    assert!(names.contains(&"transport".to_owned()));
    assert!(names.contains(&"manifest".to_owned()));
}

#[test]
fn cli_completions_bash() {
    let output = berth_bin().args(["completions", "bash"]).output().unwrap();
    assert!(output.status.success());
    assert!(stdout(&output).contains("berth"));
}
