mod common;

use std::{net::SocketAddr, sync::Arc};

use common::fixture_bytes;
use csv_forecast::{
    config::PipelineConfig, forecaster::TrendForecaster, pipeline::ForecastPipeline, server,
};
use reqwest::multipart::{Form, Part};
use serde_json::Value;
use tokio::net::TcpListener;

async fn spawn_server(config: PipelineConfig) -> SocketAddr {
    let pipeline = ForecastPipeline::new(config, Arc::new(TrendForecaster)).expect("pipeline");
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, server::router(pipeline))
            .await
            .expect("server");
    });
    addr
}

fn upload(field: &str, bytes: Vec<u8>) -> Form {
    Form::new().part(field.to_string(), Part::bytes(bytes).file_name("upload.csv"))
}

#[tokio::test]
async fn root_and_health_respond() {
    let addr = spawn_server(PipelineConfig::default()).await;
    let client = reqwest::Client::new();

    let root: Value = client
        .get(format!("http://{addr}/"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(root["message"], "Forecast API is running!");

    let health: Value = client
        .get(format!("http://{addr}/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn upload_returns_single_series_forecast() {
    let addr = spawn_server(PipelineConfig::default()).await;
    let response = reqwest::Client::new()
        .post(format!("http://{addr}/forecast"))
        .multipart(upload("file", fixture_bytes("single_series.csv")))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    let forecast = body["forecast"].as_array().unwrap();
    assert_eq!(forecast.len(), 12);
    assert_eq!(forecast[0]["date"], "2020-04");
    assert!(forecast[0]["yhat_lower"].as_f64().unwrap() <= forecast[0]["forecast"].as_f64().unwrap());
}

#[tokio::test]
async fn query_caps_and_unnamed_field_are_honoured() {
    let addr = spawn_server(PipelineConfig::default()).await;
    let csv = common::monthly_products_csv(3, 4);
    let body: Value = reqwest::Client::new()
        .post(format!("http://{addr}/forecast?max_products=1"))
        .multipart(upload("data", csv.into_bytes()))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["forecasts"].as_array().unwrap().len(), 1);
    assert_eq!(body["forecasts"][0]["product"], "P00");
    assert_eq!(body["metadata"]["total_products"], 3);
}

#[tokio::test]
async fn pipeline_errors_are_ok_responses_with_error_body() {
    let addr = spawn_server(PipelineConfig::default()).await;
    let response = reqwest::Client::new()
        .post(format!("http://{addr}/forecast"))
        .multipart(upload("file", fixture_bytes("no_roles.csv")))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert!(
        body["error"]
            .as_str()
            .unwrap()
            .starts_with("CSV must contain a date column")
    );
}

#[tokio::test]
async fn request_without_upload_is_unprocessable() {
    let addr = spawn_server(PipelineConfig::default()).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("http://{addr}/forecast"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::UNPROCESSABLE_ENTITY);
    let body: Value = response.json().await.unwrap();
    assert!(body["error"].is_string());

    let response = client
        .post(format!("http://{addr}/forecast"))
        .multipart(Form::new())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn oversized_upload_is_rejected() {
    let config = PipelineConfig {
        max_upload_bytes: 64,
        ..PipelineConfig::default()
    };
    let addr = spawn_server(config).await;
    let csv = common::monthly_products_csv(5, 12);
    let response = reqwest::Client::new()
        .post(format!("http://{addr}/forecast"))
        .multipart(upload("file", csv.into_bytes()))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::PAYLOAD_TOO_LARGE);
}
