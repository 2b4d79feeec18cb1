//! Mock HTTP server tests for the model clients.
//!
//! Uses [`wiremock`] to emulate the local generate endpoint and the
//! remote invoke endpoint, exercising the full request/response path
//! without real model servers.
//!
//! Coverage:
//! - Local generate success and warm-cache second call (one HTTP hit)
//! - Local server error classification
//! - Local tags listing
//! - Remote dispatch with signed headers and usage recording
//! - Remote quota denial without any network traffic
//! - Remote failure recording with zero output tokens

use std::sync::Arc;
use std::time::Duration;

use wiremock::matchers::{header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use kotoba_llm::local::{GenerateOptions, LocalGenerate, LocalModelClient};
use kotoba_llm::remote::{RemoteGenerate, RemoteModelClient};
use kotoba_llm::signing::{HmacSigner, NoopSigner};
use kotoba_llm::usage::UsageLedger;
use kotoba_llm::{LocalModelError, RemoteModelError};
use kotoba_types::config::{LocalModelConfig, QuotaConfig, RemoteModelConfig};
use kotoba_types::request::AssistRequest;

fn local_config(server_url: &str, cache_dir: &std::path::Path) -> LocalModelConfig {
    LocalModelConfig {
        base_url: server_url.into(),
        cache_dir: cache_dir.to_string_lossy().into_owned(),
        ..LocalModelConfig::default()
    }
}

fn remote_config(server_url: &str) -> RemoteModelConfig {
    RemoteModelConfig {
        endpoint: server_url.into(),
        default_model: "amazon.nova-micro".into(),
        ..RemoteModelConfig::default()
    }
}

fn vocabulary_request() -> AssistRequest {
    AssistRequest::new("What does 'kippu' mean?", "vocabulary")
}

// ── Local client ───────────────────────────────────────────────────────

#[tokio::test]
async fn local_generate_then_cache_hit() {
    let server = MockServer::start().await;
    let cache_dir = tempfile::tempdir().unwrap();

    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({"response": "'Kippu' means 'ticket'."})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = LocalModelClient::new(&local_config(&server.uri(), cache_dir.path())).unwrap();
    let request = vocabulary_request();

    let first = client
        .generate(&request, GenerateOptions::default())
        .await
        .unwrap();
    assert_eq!(first, "'Kippu' means 'ticket'.");

    // Identical input: served from cache, no second HTTP call.
    let second = client
        .generate(&request, GenerateOptions::default())
        .await
        .unwrap();
    assert_eq!(second, first);

    let stats = client.cache_info();
    assert_eq!(stats.api_calls, 1);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hits, 1);
}

#[tokio::test]
async fn local_server_error_is_classified() {
    let server = MockServer::start().await;
    let cache_dir = tempfile::tempdir().unwrap();

    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(
            ResponseTemplate::new(500)
                .set_body_json(serde_json::json!({"error": "model 'llama9' not found"})),
        )
        .mount(&server)
        .await;

    let client = LocalModelClient::new(&local_config(&server.uri(), cache_dir.path())).unwrap();
    let err = client
        .generate(&vocabulary_request(), GenerateOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, LocalModelError::Model(_)), "{err}");
}

#[tokio::test]
async fn local_connection_error_when_server_down() {
    let cache_dir = tempfile::tempdir().unwrap();
    // Nothing listens on this port.
    let client = LocalModelClient::new(&local_config(
        "http://127.0.0.1:59999",
        cache_dir.path(),
    ))
    .unwrap();

    let err = client
        .generate(&vocabulary_request(), GenerateOptions::default())
        .await
        .unwrap_err();
    assert!(err.is_transient(), "{err}");
}

#[tokio::test]
async fn local_available_models() {
    let server = MockServer::start().await;
    let cache_dir = tempfile::tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "models": [{"name": "llama3"}, {"name": "llama3:16b"}]
        })))
        .mount(&server)
        .await;

    let client = LocalModelClient::new(&local_config(&server.uri(), cache_dir.path())).unwrap();
    let models = client.available_models().await.unwrap();
    assert_eq!(models, vec!["llama3", "llama3:16b"]);
}

// ── Remote client ──────────────────────────────────────────────────────

#[tokio::test]
async fn remote_generate_signs_and_records_usage() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/model/amazon.nova-micro/invoke"))
        .and(header_exists("Authorization"))
        .and(header_exists("X-Kotoba-Date"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "results": [{"outputText": "The gate is to your right.", "tokenCount": 8}],
            "inputTextTokenCount": 40,
        })))
        .expect(1)
        .mount(&server)
        .await;

    let ledger = Arc::new(UsageLedger::new(QuotaConfig::default()));
    let signer = Arc::new(HmacSigner::new("key-1", b"secret".to_vec(), "us-east-1"));
    let client = RemoteModelClient::new(&remote_config(&server.uri()), signer, ledger.clone());

    let text = client
        .generate(&vocabulary_request(), GenerateOptions::default())
        .await
        .unwrap();
    assert_eq!(text, "The gate is to your right.");

    let summary = ledger.summary().await;
    assert_eq!(summary.total_requests, 1);
    let usage = &summary.per_model["amazon.nova-micro"];
    assert_eq!(usage.input_tokens, 40);
    assert_eq!(usage.output_tokens, 8);
}

#[tokio::test]
async fn remote_quota_denial_skips_dispatch() {
    let server = MockServer::start().await;

    // Any request reaching the server is a test failure.
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let quota = QuotaConfig {
        daily_token_limit: 0,
        ..QuotaConfig::default()
    };
    let ledger = Arc::new(UsageLedger::new(quota));
    let client =
        RemoteModelClient::new(&remote_config(&server.uri()), Arc::new(NoopSigner), ledger);

    let err = client
        .generate(&vocabulary_request(), GenerateOptions::default())
        .await
        .unwrap_err();
    match err {
        RemoteModelError::Quota { reason, throttled } => {
            assert!(reason.contains("daily token limit exceeded"), "{reason}");
            // A ledger denial is final, not a retryable throttle.
            assert!(!throttled);
        }
        other => panic!("expected Quota, got: {other}"),
    }
}

#[tokio::test]
async fn remote_failure_records_zero_output_tokens() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/model/amazon.nova-micro/invoke"))
        .respond_with(
            ResponseTemplate::new(500)
                .set_body_json(serde_json::json!({"message": "internal failure"})),
        )
        .mount(&server)
        .await;

    let ledger = Arc::new(UsageLedger::new(QuotaConfig::default()));
    let client = RemoteModelClient::new(
        &remote_config(&server.uri()),
        Arc::new(NoopSigner),
        ledger.clone(),
    );

    let err = client
        .generate(&vocabulary_request(), GenerateOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, RemoteModelError::Unknown(_)), "{err}");

    let summary = ledger.summary().await;
    assert_eq!(summary.total_requests, 1);
    let usage = &summary.per_model["amazon.nova-micro"];
    assert_eq!(usage.requests, 1);
    // Failed calls contribute no tokens to the aggregates.
    assert_eq!(usage.output_tokens, 0);
    assert_eq!(usage.input_tokens, 0);
}

#[tokio::test]
async fn remote_throttle_maps_to_quota_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/model/amazon.nova-micro/invoke"))
        .respond_with(
            ResponseTemplate::new(429)
                .set_body_json(serde_json::json!({"message": "rate exceeded"})),
        )
        .mount(&server)
        .await;

    let ledger = Arc::new(UsageLedger::new(QuotaConfig::default()));
    let client =
        RemoteModelClient::new(&remote_config(&server.uri()), Arc::new(NoopSigner), ledger);

    let err = client
        .generate(&vocabulary_request(), GenerateOptions::default())
        .await
        .unwrap_err();
    assert!(
        matches!(err, RemoteModelError::Quota { throttled: true, .. }),
        "{err}"
    );
    assert!(err.is_transient());
}

#[tokio::test]
async fn remote_timeout_respects_deadline() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/model/amazon.nova-micro/invoke"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({"results": [{"outputText": "late"}]}))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let ledger = Arc::new(UsageLedger::new(QuotaConfig::default()));
    let client = RemoteModelClient::with_timeout(
        &remote_config(&server.uri()),
        Arc::new(NoopSigner),
        ledger,
        Duration::from_millis(200),
    );

    let err = client
        .generate(&vocabulary_request(), GenerateOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, RemoteModelError::Timeout), "{err}");
}
