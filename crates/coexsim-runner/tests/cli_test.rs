//! Integration tests for the `coexsim` binary.
//!
//! Configurations are written into a temporary directory and the binary's
//! JSON output is parsed back.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

use serde::Deserialize;

// ============================================================================
// JSON Deserialization Types
// ============================================================================

#[derive(Debug, Deserialize)]
struct Summary {
    channel_occupancy_wifi: f64,
    channel_occupancy_nru: f64,
    channel_occupancy_total: f64,
    collision_probability: f64,
    jain_fairness_index: f64,
}

#[derive(Debug, Deserialize)]
struct Station {
    name: String,
    technology: String,
}

#[derive(Debug, Deserialize)]
struct Report {
    run: u32,
    seed: u64,
    wifi_nodes: u32,
    nru_nodes: u32,
    nru_mode: String,
    summary: Summary,
    stations: Vec<Station>,
    #[serde(default)]
    records: Option<Vec<serde_json::Value>>,
}

// ============================================================================
// Test Helper Functions
// ============================================================================

const SCENARIO: &str = r#"
simulation:
  duration_us: 20000
  seed: 5
  runs: 2
nodes:
  wifi: 2
  nru: 1
nru:
  mode: rs
"#;

fn write_config(dir: &TempDir, yaml: &str) -> PathBuf {
    let path = dir.path().join("scenario.yaml");
    fs::write(&path, yaml).expect("Failed to write config");
    path
}

fn coexsim(args: &[&str], config: Option<&Path>) -> Output {
    // CARGO_BIN_EXE_coexsim is set by cargo when running tests for this crate
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_coexsim"));
    cmd.args(args);
    if let Some(config) = config {
        cmd.arg(config);
    }
    cmd.output().expect("Failed to execute coexsim")
}

fn expect_success(output: &Output) -> String {
    if !output.status.success() {
        panic!(
            "coexsim failed:\nstdout: {}\nstderr: {}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );
    }
    String::from_utf8_lossy(&output.stdout).into_owned()
}

// ============================================================================
// Integration Tests
// ============================================================================

#[test]
fn test_run_prints_one_report_per_run() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let config = write_config(&dir, SCENARIO);

    let stdout = expect_success(&coexsim(&["run"], Some(&config)));
    let reports: Vec<Report> = serde_json::from_str(&stdout).expect("Failed to parse reports");

    assert_eq!(reports.len(), 2);
    for (i, report) in reports.iter().enumerate() {
        assert_eq!(report.run, i as u32);
        assert_eq!(report.seed, 5 + i as u64);
        assert_eq!((report.wifi_nodes, report.nru_nodes), (2, 1));
        assert_eq!(report.nru_mode, "rs");
        assert!(report.records.is_none());

        let summary = &report.summary;
        let total = summary.channel_occupancy_wifi + summary.channel_occupancy_nru;
        assert!((total - summary.channel_occupancy_total).abs() < 1e-9);
        assert!(summary.channel_occupancy_total <= 1.0);
        assert!((0.0..=1.0).contains(&summary.collision_probability));
        assert!(summary.jain_fairness_index >= 0.5 && summary.jain_fairness_index <= 1.0);

        let names: Vec<&str> = report.stations.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["wifi-0", "wifi-1", "gnb-0"]);
        assert_eq!(report.stations[2].technology, "nru");
    }
}

#[test]
fn test_run_overrides_and_records() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let config = write_config(&dir, SCENARIO);

    let stdout = expect_success(&coexsim(
        &["run", "--seed", "40", "--runs", "1", "--wifi", "1", "--nru", "0", "--records"],
        Some(&config),
    ));
    let reports: Vec<Report> = serde_json::from_str(&stdout).expect("Failed to parse reports");

    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].seed, 40);
    assert_eq!(reports[0].stations.len(), 1);
    let records = reports[0].records.as_ref().expect("records requested");
    assert!(!records.is_empty());
    assert!(records.iter().all(|r| r["technology"] == "wifi"));
    assert_eq!(reports[0].summary.collision_probability, 0.0);
}

#[test]
fn test_same_seed_same_output() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let config = write_config(&dir, SCENARIO);

    let parse = |stdout: String| -> Vec<serde_json::Value> {
        let mut reports: Vec<serde_json::Value> = serde_json::from_str(&stdout).expect("Failed to parse reports");
        // Wall time differs between invocations.
        for report in &mut reports {
            report["stats"]["wall_time_ms"] = serde_json::Value::Null;
        }
        reports
    };
    let first = parse(expect_success(&coexsim(&["run"], Some(&config))));
    let second = parse(expect_success(&coexsim(&["run"], Some(&config))));
    assert_eq!(first, second);
}

#[test]
fn test_metrics_export_to_file() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let config = write_config(&dir, SCENARIO);
    let metrics_path = dir.path().join("metrics.json");
    let metrics_arg = metrics_path.to_string_lossy().into_owned();

    let stdout = expect_success(&coexsim(
        &["run", "--metrics-output", "json", "--metrics-file", &metrics_arg],
        Some(&config),
    ));
    // Reports still go to stdout when metrics go to a file.
    let reports: Vec<Report> = serde_json::from_str(&stdout).expect("Failed to parse reports");
    assert_eq!(reports.len(), 2);

    let metrics: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&metrics_path).expect("Failed to read metrics"))
            .expect("Failed to parse metrics");
    assert!(metrics["counters"]["coexsim.access.tx_attempts"].as_u64().unwrap_or(0) > 0);
    assert!(metrics["technologies"]["wifi"].is_object());
    assert!(metrics["nodes"]["gnb-0"].is_object());
    assert!(metrics["histograms"]["coexsim.access.backoff_slots"]["count"].as_u64().unwrap_or(0) > 0);
}

#[test]
fn test_invalid_config_fails() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let config = write_config(&dir, "wifi:\n  min_cw: 64\n  max_cw: 16\n");

    let output = coexsim(&["run"], Some(&config));
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("min_cw"), "stderr: {stderr}");
}

#[test]
fn test_unknown_field_fails() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let config = write_config(&dir, "nodes:\n  wifi: 1\n  bluetooth: 2\n");

    let output = coexsim(&["run"], Some(&config));
    assert!(!output.status.success());
}

#[test]
fn test_solve_cw_output() {
    let stdout = expect_success(&coexsim(&["solve-cw", "--wifi", "8", "--nru", "8"], None));
    let value: serde_json::Value = serde_json::from_str(&stdout).expect("Failed to parse solver output");
    let cw = value["cw"].as_u64().expect("cw");
    assert!(cw > 32 && cw < 512, "cw = {cw}");

    let stdout = expect_success(&coexsim(&["solve-cw", "--wifi", "1", "--nru", "0"], None));
    let value: serde_json::Value = serde_json::from_str(&stdout).expect("Failed to parse solver output");
    assert_eq!(value["cw"], 32);
    assert_eq!(value["predicted_collision_probability"], 0.0);
}

#[test]
fn test_solve_cw_calibration_output() {
    let stdout = expect_success(&coexsim(
        &[
            "solve-cw",
            "--wifi",
            "2",
            "--nru",
            "2",
            "--strategy",
            "calibration",
            "--step",
            "240",
            "--calibration-duration-us",
            "10000",
            "--calibration-runs",
            "1",
        ],
        None,
    ));
    let value: serde_json::Value = serde_json::from_str(&stdout).expect("Failed to parse solver output");
    assert_eq!(value["strategy"], "calibration");
    let cw = value["cw"].as_u64().expect("cw");
    assert!((32..=512).contains(&cw), "cw = {cw}");
    let windows: Vec<u64> = value["calibration"]
        .as_array()
        .expect("calibration points")
        .iter()
        .map(|p| p["cw"].as_u64().expect("point cw"))
        .collect();
    assert_eq!(windows, vec![32, 272, 512]);
}

#[test]
fn test_metrics_listing() {
    let stdout = expect_success(&coexsim(&["metrics"], None));
    assert!(stdout.contains("coexsim.access.tx_attempts"));
    assert!(stdout.contains("coexsim.nru.lbt_aborts"));
}
