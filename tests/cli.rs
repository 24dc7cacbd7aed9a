mod common;

use assert_cmd::Command;
use common::{TestWorkspace, fixture_path};
use predicates::str::contains;

fn forecast_cmd() -> Command {
    Command::cargo_bin("csv-forecast").expect("binary present")
}

#[test]
fn forecast_prints_twelve_months_for_single_series() {
    let assert = forecast_cmd()
        .args(["forecast", "-i", fixture_path("single_series.csv").to_str().unwrap()])
        .assert()
        .success();
    let stdout = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    let body: serde_json::Value = serde_json::from_str(stdout.trim()).expect("json output");
    let forecast = body["forecast"].as_array().unwrap();
    assert_eq!(forecast.len(), 12);
    assert_eq!(forecast[0]["date"], "2020-04");
    assert_eq!(forecast[11]["date"], "2021-03");
}

#[test]
fn forecast_reads_stdin_and_pretty_prints() {
    let data = std::fs::read_to_string(fixture_path("multi_product.csv")).unwrap();
    forecast_cmd()
        .args(["forecast", "-i", "-", "--pretty"])
        .write_stdin(data)
        .assert()
        .success()
        .stdout(contains("\"forecasts\": ["))
        .stdout(contains("\"product\": \"A\""))
        .stdout(contains("insufficient data"));
}

#[test]
fn forecast_failure_prints_error_json_and_exits_nonzero() {
    forecast_cmd()
        .args(["forecast", "-i", fixture_path("no_roles.csv").to_str().unwrap()])
        .assert()
        .failure()
        .stdout(contains("{\"error\":\"CSV must contain a date column"))
        .stderr(contains("error: forecast failed"));
}

#[test]
fn forecast_honours_delimiter_and_product_cap() {
    let workspace = TestWorkspace::new();
    let csv = common::monthly_products_csv(4, 5).replace(',', "|");
    let path = workspace.write("sales.psv", &csv);
    let assert = forecast_cmd()
        .args([
            "forecast",
            "-i",
            path.to_str().unwrap(),
            "--delimiter",
            "pipe",
            "--max-products",
            "2",
        ])
        .assert()
        .success();
    let body: serde_json::Value =
        serde_json::from_slice(&assert.get_output().stdout).expect("json output");
    assert_eq!(body["forecasts"].as_array().unwrap().len(), 2);
    assert_eq!(body["metadata"]["total_products"], 4);
    assert_eq!(body["metadata"]["products_processed"], 2);
}

#[test]
fn forecast_uses_config_file_values() {
    let workspace = TestWorkspace::new();
    let config = workspace.write("forecast.yml", "default_group_cap: 1\n");
    let assert = forecast_cmd()
        .args([
            "forecast",
            "-i",
            fixture_path("multi_product.csv").to_str().unwrap(),
            "--config",
            config.to_str().unwrap(),
        ])
        .assert()
        .success();
    let body: serde_json::Value =
        serde_json::from_slice(&assert.get_output().stdout).expect("json output");
    assert_eq!(body["forecasts"].as_array().unwrap().len(), 1);
    assert_eq!(body["forecasts"][0]["product"], "A");
}

#[test]
fn invalid_config_is_reported() {
    let workspace = TestWorkspace::new();
    let config = workspace.write("bad.yml", "workers: 0\n");
    forecast_cmd()
        .args([
            "forecast",
            "-i",
            fixture_path("single_series.csv").to_str().unwrap(),
            "-c",
            config.to_str().unwrap(),
        ])
        .assert()
        .failure()
        .stderr(contains("workers must be at least 1"));
}

#[test]
fn inspect_reports_roles_and_kinds() {
    forecast_cmd()
        .args(["inspect", "-i", fixture_path("multi_product.csv").to_str().unwrap()])
        .assert()
        .success()
        .stdout(contains("\"rows\": 5"))
        .stdout(contains("\"name\": \"item\""))
        .stdout(contains("\"role\": \"group\""))
        .stdout(contains("\"role\": \"date\""))
        .stdout(contains("\"kind\": \"integer\""));
}

#[test]
fn missing_input_file_is_an_error() {
    forecast_cmd()
        .args(["forecast", "-i", "does-not-exist.csv"])
        .assert()
        .failure()
        .stderr(contains("Opening input file"));
}
