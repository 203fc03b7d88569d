//! Integration tests for the reqwest transport against a local HTTP server

mod common;

use common::{sha256, test_config};
use sdk::discovery::DiscoveryFilter;
use sdk::errors::AcquireError;
use sdk::interfaces::{Transport, TransportRequest};
use sdk::source::{RemoteSource, SecurityLevel, SourceType};
use serde_json::json;
use warden_engine::config::NetworkConfig;
use warden_engine::orchestrator::{LoadOptions, OrchestratorBuilder, RequestState};
use warden_engine::transport::HttpTransport;
use wiremock::{
    matchers::{header, method, path},
    Mock, MockServer, ResponseTemplate,
};

const PLUGIN: &[u8] = b"\0asm plugin served over http";

fn local_source(server: &MockServer) -> RemoteSource {
    // Plain HTTP is only accepted at the minimal level.
    RemoteSource::new(server.uri(), SourceType::Http)
        .with_security_level(SecurityLevel::Minimal)
        .with_header("X-Token", "s3cret")
}

#[tokio::test]
async fn test_http_transport_streams_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/plugins/a.wasm"))
        .and(header("x-token", "s3cret"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(PLUGIN))
        .expect(1)
        .mount(&server)
        .await;

    let transport = HttpTransport::new(&NetworkConfig::default()).unwrap();
    let response = transport
        .request(
            TransportRequest::get(format!("{}/plugins/a.wasm", server.uri()))
                .with_header("X-Token", "s3cret"),
        )
        .await
        .unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(
        response.headers.get("content-length").map(String::as_str),
        Some(PLUGIN.len().to_string().as_str())
    );
    assert_eq!(response.collect(1024).await.unwrap(), PLUGIN);
}

#[tokio::test]
async fn test_status_codes_pass_through() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(418))
        .mount(&server)
        .await;

    let transport = HttpTransport::new(&NetworkConfig::default()).unwrap();
    let response = transport
        .request(TransportRequest::get(format!("{}/teapot", server.uri())))
        .await
        .unwrap();
    assert_eq!(response.status, 418);
}

#[tokio::test]
async fn test_unreachable_host_is_network_error() {
    let transport = HttpTransport::new(&NetworkConfig::default()).unwrap();
    let err = transport
        .request(TransportRequest::get("http://127.0.0.1:9/index.json"))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, AcquireError::Network { .. }), "{}", err);
}

#[tokio::test]
async fn test_pipeline_over_http() {
    let server = MockServer::start().await;
    let index = json!({
        "version": "1",
        "plugins": [{
            "id": "logger",
            "name": "Logger",
            "version": "1.2.0",
            "download_url": "plugins/logger.wasm",
            "hash": format!("sha256:{}", sha256(PLUGIN)),
        }]
    });
    Mock::given(method("GET"))
        .and(path("/index.json"))
        .and(header("x-token", "s3cret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(index))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/plugins/logger.wasm"))
        .and(header("x-token", "s3cret"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(PLUGIN))
        .expect(1)
        .mount(&server)
        .await;

    let (_dir, config) = test_config();
    let orchestrator = OrchestratorBuilder::new(config)
        .source(local_source(&server))
        .build()
        .await
        .unwrap();

    let report = orchestrator.discover(&DiscoveryFilter::default()).await.unwrap();
    assert_eq!(report.failed_sources, Vec::<String>::new());
    let record = &report.records[0];
    assert_eq!(record.download_url, format!("{}/plugins/logger.wasm", server.uri()));

    let outcome = orchestrator
        .load_discovered(record, LoadOptions::default())
        .await
        .unwrap();
    assert_eq!(outcome.state, RequestState::Ready);
    assert_eq!(std::fs::read(&outcome.path).unwrap(), PLUGIN);

    let cached = orchestrator
        .load_discovered(record, LoadOptions::default())
        .await
        .unwrap();
    assert!(cached.from_cache);
}

#[tokio::test]
async fn test_server_errors_are_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/flaky.wasm"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/flaky.wasm"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(PLUGIN))
        .mount(&server)
        .await;

    let (_dir, config) = test_config();
    let orchestrator = OrchestratorBuilder::new(config).build().await.unwrap();
    let source = local_source(&server).with_max_retries(3);

    let outcome = orchestrator
        .load(
            &source,
            LoadOptions::default().with_artifact_url(format!("{}/flaky.wasm", server.uri())),
        )
        .await
        .unwrap();
    assert_eq!(outcome.bytes_transferred, PLUGIN.len() as u64);
    assert_eq!(server.received_requests().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_missing_artifact_is_not_found() {
    let server = MockServer::start().await;
    let (_dir, config) = test_config();
    let orchestrator = OrchestratorBuilder::new(config).build().await.unwrap();

    let err = orchestrator
        .load(
            &local_source(&server),
            LoadOptions::default().with_artifact_url(format!("{}/missing.wasm", server.uri())),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AcquireError::NotFound(_)), "{}", err);
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}
