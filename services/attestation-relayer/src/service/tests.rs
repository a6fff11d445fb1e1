use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::{Json, Router};
use futures::StreamExt;

use attestation_envelope_decoder::SignedVaa;
use attestation_relayer_config::RelayerConfig;
use attestation_relayer_context::RelayerContext;
use attestation_relayer_store::SledStore;
use attestation_relayer_utils::Error;
use attestation_watcher::{
    AttestationSource, AttestationStream, EmitterFilter, SourceError,
};

use super::*;

/// Serves the given attestations once, then stays silent.
struct OneShotSource(Vec<Vec<u8>>);

#[async_trait::async_trait]
impl AttestationSource for OneShotSource {
    async fn connect(
        &self,
        _: &EmitterFilter,
    ) -> Result<AttestationStream, SourceError> {
        let items: Vec<_> = self.0.iter().cloned().map(Ok).collect();
        Ok(futures::stream::iter(items)
            .chain(futures::stream::pending())
            .boxed())
    }
}

struct DownSource;

#[async_trait::async_trait]
impl AttestationSource for DownSource {
    async fn connect(
        &self,
        _: &EmitterFilter,
    ) -> Result<AttestationStream, SourceError> {
        Err(SourceError::Unavailable("connection refused".into()))
    }
}

fn vaa(sequence: u64) -> Vec<u8> {
    SignedVaa::builder()
        .emitter_chain(2)
        .emitter_address([0xAB; 32])
        .sequence(sequence)
        .payload(b"P2WH\x00\x02".to_vec())
        .build()
        .to_bytes()
}

async fn spawn_gateway() -> SocketAddr {
    let app = Router::new()
        .route(
            "/submit",
            post(|Json(body): Json<serde_json::Value>| async move {
                Json(serde_json::json!({
                    "txHash": format!("0x{:x}", body["sequence"].as_u64().unwrap_or(0)),
                    "height": 7,
                }))
            }),
        )
        .route(
            "/balance",
            get(|| async { Json(serde_json::json!({ "balance": 3.5 })) }),
        );
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let server = axum::Server::from_tcp(listener)
        .unwrap()
        .serve(app.into_make_service());
    tokio::spawn(server);
    addr
}

fn config(gateway: SocketAddr, credential: Option<&str>) -> RelayerConfig {
    let mut destination = serde_json::json!({
        "kind": "http",
        "endpoint": format!("http://{gateway}/submit"),
        "account": "terra1relayer",
        "balance-interval-ms": 50,
    });
    if let Some(credential) = credential {
        destination["credential"] = credential.into();
    }
    serde_json::from_value(serde_json::json!({
        "port": 0,
        "app-name": "service_test",
        "source": { "endpoint": "ws://127.0.0.1:1" },
        "filter": { "payload-prefix": "P2WH" },
        "destinations": { "terra": destination },
    }))
    .unwrap()
}

fn context(config: RelayerConfig) -> RelayerContext {
    RelayerContext::new(config, SledStore::temporary().unwrap()).unwrap()
}

#[tokio::test]
async fn relays_an_attestation_end_to_end() {
    let gateway = spawn_gateway().await;
    let ctx = context(config(gateway, Some("token")));
    let (addr, server) = build_web_services(ctx.clone()).unwrap();
    let server = tokio::spawn(server);
    ignite_with_source(&ctx, Arc::new(OneShotSource(vec![vaa(42), vaa(42)])))
        .await
        .unwrap();

    let url = format!(
        "http://127.0.0.1:{}/query/2/{}/42",
        addr.port(),
        "ab".repeat(32)
    );
    let mut last = serde_json::Value::Null;
    for _ in 0..100 {
        let response = reqwest::get(&url).await.unwrap();
        if response.status() == reqwest::StatusCode::OK {
            last = response.json().await.unwrap();
            if last["status"] == "Succeeded" {
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(last["status"], "Succeeded", "{last}");
    assert_eq!(last["attempts"], 1);
    assert_eq!(last["receipt"]["txHash"], "0x2a");
    assert_eq!(last["receipt"]["destination"], "terra");

    let metrics_url = format!("http://127.0.0.1:{}/metrics", addr.port());
    let mut text = String::new();
    for _ in 0..100 {
        text = reqwest::get(&metrics_url).await.unwrap().text().await.unwrap();
        if text.contains("destination_account_balance") {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(text.contains("relay_successes"));
    assert!(text.contains("destination_account_balance"));

    ctx.shutdown();
    tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn unreachable_source_at_boot_is_fatal() {
    let gateway = spawn_gateway().await;
    let ctx = context(config(gateway, Some("token")));
    let err = ignite_with_source(&ctx, Arc::new(DownSource))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::SourceUnavailable(_)), "{err}");
}

#[tokio::test]
async fn missing_credential_is_fatal() {
    let gateway = spawn_gateway().await;
    let ctx = context(config(gateway, None));
    let err = ignite_with_source(&ctx, Arc::new(OneShotSource(vec![])))
        .await
        .unwrap_err();
    assert!(
        matches!(err, Error::MissingSecrets { ref destination } if destination == "terra"),
        "{err}"
    );
}
