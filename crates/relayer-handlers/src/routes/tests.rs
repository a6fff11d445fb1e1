use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use tower::ServiceExt;

use attestation_relayer_config::RelayerConfig;
use attestation_relayer_context::RelayerContext;
use attestation_relayer_store::{MessageStatus, MessageStore, SledStore};
use attestation_relayer_types::{ChainId, EmitterAddress, MessageKey, Receipt};

fn context() -> Arc<RelayerContext> {
    let config: RelayerConfig = serde_json::from_value(serde_json::json!({
        "app-name": "handlers_test",
        "source": { "endpoint": "ws://localhost:7073" },
        "destinations": {
            "terra": {
                "kind": "http",
                "endpoint": "http://localhost:9000/submit",
                "account": "terra1relayer",
                "credential": "super-secret-token",
            }
        }
    }))
    .unwrap();
    Arc::new(
        RelayerContext::new(config, SledStore::temporary().unwrap()).unwrap(),
    )
}

async fn get(
    ctx: Arc<RelayerContext>,
    uri: &str,
) -> (StatusCode, Vec<u8>) {
    let response = crate::router(ctx)
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
    (status, body.to_vec())
}

fn key(sequence: u64) -> MessageKey {
    MessageKey::new(ChainId(2), EmitterAddress([0xAB; 32]), sequence)
}

#[tokio::test]
async fn query_returns_the_stored_receipt() {
    let ctx = context();
    let receipt = Receipt {
        destination: "terra".into(),
        tx_hash: Some("0xfeed".into()),
        height: Some(99),
        already_delivered: false,
    };
    ctx.store()
        .upsert(key(42), |e| {
            e.transition(MessageStatus::Queued)?;
            e.begin_attempt()?;
            e.receipt = Some(receipt.clone());
            e.transition(MessageStatus::Succeeded)
        })
        .unwrap();

    let uri = format!("/query/2/{}/42", "ab".repeat(32));
    let (status, body) = get(ctx, &uri).await;
    assert_eq!(status, StatusCode::OK);
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "Succeeded");
    assert_eq!(json["attempts"], 1);
    assert!(json.get("lastError").is_none());
    let got: Receipt = serde_json::from_value(json["receipt"].clone()).unwrap();
    assert_eq!(got, receipt);
}

#[tokio::test]
async fn query_reports_the_last_error() {
    let ctx = context();
    ctx.store()
        .upsert(key(7), |e| {
            e.transition(MessageStatus::Queued)?;
            e.begin_attempt()?;
            e.last_error = Some("unauthorized".into());
            e.transition(MessageStatus::FailedPermanent)
        })
        .unwrap();

    // a short address is left padded, so this is a different emitter.
    let (status, body) = get(ctx.clone(), "/query/2/0xab/7").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(!body.is_empty());

    let uri = format!("/query/2/0x{}/7", "ab".repeat(32));
    let (status, body) = get(ctx, &uri).await;
    assert_eq!(status, StatusCode::OK);
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "FailedPermanent");
    assert_eq!(json["lastError"], "unauthorized");
    assert!(json.get("receipt").is_none());
}

#[tokio::test]
async fn unknown_key_is_not_found() {
    let (status, _) = get(context(), "/query/2/0x01/1").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn malformed_key_is_a_bad_request() {
    let ctx = context();
    let (status, _) = get(ctx.clone(), "/query/two/0x01/1").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = get(ctx.clone(), "/query/2/0xzz/1").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = get(ctx, "/query/2/0x01/-1").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn metrics_are_exposed_as_text() {
    let ctx = context();
    ctx.metrics.relay_successes.inc();
    ctx.metrics.observe_dispatched_sequence(42);
    let (status, body) = get(ctx, "/metrics").await;
    assert_eq!(status, StatusCode::OK);
    let text = String::from_utf8(body).unwrap();
    assert!(text.contains("relay_successes"));
    assert!(text.contains(r#"app="handlers_test""#));
    assert!(text.contains("last_dispatched_sequence"));
}

#[tokio::test]
async fn info_never_leaks_credentials() {
    let (status, body) = get(context(), "/api/v1/info").await;
    assert_eq!(status, StatusCode::OK);
    let text = String::from_utf8(body).unwrap();
    assert!(text.contains("terra1relayer"));
    assert!(!text.contains("super-secret-token"));
    let json: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(json["app-name"], "handlers_test");
    assert!(json["version"].is_string());
}
