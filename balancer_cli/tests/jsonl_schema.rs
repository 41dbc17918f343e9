use assert_cmd::prelude::*;
use rstest::rstest;
use std::fs;
use std::path::PathBuf;
use std::process::Command;
use tempfile::tempdir;

fn write_valid_config(dir: &tempfile::TempDir) -> PathBuf {
    let toml = r#"
[general]
number_of_batteries = 2
voltage_difference_to_balance = 0.1
balance_duration_seconds = 1
sleep_time_between_checks = 0.01
balance_rest_period_seconds = 1
low_voltage_threshold_per_battery = 18.0
high_voltage_threshold_per_battery = 21.0
email_alert_interval_seconds = 300

[sampling]
conversion_delay_ms = 1
voltage_divider_ratio = 0.01

[relays]
settle_ms = 1
table = [
  { high = 0, low = 1, mask = 0x21 },
  { high = 1, low = 0, mask = 0x12 },
]
"#;
    let path = dir.path().join("cfg.toml");
    fs::write(&path, toml).unwrap();
    path
}

fn json_cmd(cfg: &PathBuf) -> Command {
    let mut cmd = Command::cargo_bin("balancer").unwrap();
    cmd.arg("--json")
        .arg("--log-level")
        .arg("error")
        .arg("--config")
        .arg(cfg)
        .env_remove("RUST_LOG")
        .env("BALANCER_SIM_VOLTAGES", "20.0,19.6")
        .env_remove("BALANCER_SIM_FAIL_CELLS");
    cmd
}

fn last_json_line(bytes: &[u8]) -> serde_json::Value {
    let text = String::from_utf8_lossy(bytes);
    let line = text
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .expect("some output");
    serde_json::from_str(line).expect("valid JSON line")
}

#[rstest]
fn sample_json_lists_each_cell() {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir);
    let out = json_cmd(&cfg).arg("sample").output().unwrap();
    assert!(out.status.success());

    let v = last_json_line(&out.stdout);
    let cells = v["cells"].as_array().unwrap();
    assert_eq!(cells.len(), 2);
    assert_eq!(cells[0]["cell"], 1);
    let volts = cells[1]["voltage"].as_f64().unwrap();
    assert!((volts - 19.6).abs() < 0.01, "{volts}");
}

#[rstest]
fn run_json_summary_schema() {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir);
    let out = json_cmd(&cfg)
        .args(["run", "--cycles", "2"])
        .output()
        .unwrap();
    assert!(out.status.success());

    let v = last_json_line(&out.stdout);
    assert_eq!(v["cycles"], 2);
    assert!(v["phase"].is_string());
    assert_eq!(v["alarm"], false);
    assert_eq!(v["cells"].as_array().unwrap().len(), 2);
}

#[rstest]
fn self_check_failure_json_on_stderr() {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir);
    let out = json_cmd(&cfg)
        .env("BALANCER_SIM_FAIL_CELLS", "1")
        .arg("self-check")
        .output()
        .unwrap();
    assert_eq!(out.status.code(), Some(3));

    let report = last_json_line(&out.stdout);
    assert_eq!(report["passed"], false);
    assert!(report["cells"][0]["voltage"].is_null());

    let err = last_json_line(&out.stderr);
    assert_eq!(err["reason"], "SelfCheck");
    assert_eq!(err["exit_code"], 3);
    assert!(
        err["details"]["failures"][0]
            .as_str()
            .unwrap()
            .contains("cell 1 could not be sampled")
    );
}

#[rstest]
fn config_error_json_on_stderr() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("bad.toml");
    fs::write(&path, "[general]\nnumber_of_batteries = 2\n").unwrap();
    let out = json_cmd(&path).arg("sample").output().unwrap();
    assert_eq!(out.status.code(), Some(2));
    let err = last_json_line(&out.stderr);
    assert_eq!(err["reason"], "Config");
    assert!(err["message"].as_str().unwrap().contains("invalid configuration"));
}
