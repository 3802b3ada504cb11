//! HttpRecordStore against a mock REST backend.

use std::sync::Arc;
use std::time::Duration;

use lexsync_core::app::{ConflictAwareWriter, LoadPhase, LoadPolicy, RetryPolicy, SyncClientBuilder};
use lexsync_core::config::SyncConfig;
use lexsync_core::domain::{EntityType, TransportError, Version, WriteError};
use lexsync_core::impls::{HttpRecordStore, InMemoryCredentialStore};
use lexsync_core::ports::{CredentialStore, RecordStore};
use lexsync_core::typed::Client;
use serde_json::{Map, json};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn store(server: &MockServer, token: Option<&str>) -> (HttpRecordStore, Arc<InMemoryCredentialStore>) {
    let credentials = Arc::new(InMemoryCredentialStore::new(token.map(str::to_string)));
    let store = HttpRecordStore::new(server.uri(), credentials.clone(), None).unwrap();
    (store, credentials)
}

#[tokio::test]
async fn test_list_sends_the_bearer_credential() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/clients"))
        .and(header("authorization", "Bearer token-1"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([{"id": "c-1", "name": "Acme", "version": 1}])),
        )
        .expect(1)
        .mount(&server)
        .await;

    let (store, _) = store(&server, Some("token-1"));
    let clients = store
        .list(EntityType::Client, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(clients.len(), 1);
    assert_eq!(clients[0]["name"], "Acme");
}

#[tokio::test]
async fn test_unauthorized_discards_the_credential() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/cases/k-1"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({"detail": "expired"})))
        .mount(&server)
        .await;

    let (store, credentials) = store(&server, Some("token-1"));
    let err = store.get(EntityType::Case, "k-1").await.unwrap_err();

    assert_eq!(err, TransportError::Unauthorized);
    assert_eq!(credentials.token(), None);
}

#[tokio::test]
async fn test_update_carries_the_version_and_surfaces_conflicts() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/api/clients/c-1"))
        .and(body_partial_json(json!({"version": 1, "name": "Acme Ltd"})))
        .respond_with(
            ResponseTemplate::new(409).set_body_json(json!({"detail": "Version mismatch"})),
        )
        .expect(2)
        .mount(&server)
        .await;

    let (store, _) = store(&server, Some("token-1"));
    let raw = store
        .update(EntityType::Client, "c-1", json!({"version": 1, "name": "Acme Ltd"}))
        .await
        .unwrap_err();
    assert_eq!(
        raw,
        TransportError::Status {
            status: 409,
            message: "Version mismatch".into()
        }
    );

    let writer = ConflictAwareWriter::new(Arc::new(store));
    let mut fields = Map::new();
    fields.insert("name".into(), json!("Acme Ltd"));
    let err = writer
        .update(EntityType::Client, "c-1", Version::INITIAL, fields)
        .await
        .unwrap_err();
    assert!(matches!(err, WriteError::Conflict(c) if c.submitted == Version::INITIAL));
}

#[tokio::test]
async fn test_case_search_uses_the_search_endpoint() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/cases/search"))
        .and(query_param("status", "open"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    let (store, _) = store(&server, None);
    let found = store
        .search(EntityType::Case, &[("status".into(), "open".into())])
        .await
        .unwrap();
    assert!(found.is_empty());
}

#[tokio::test]
async fn test_delete_accepts_an_empty_body() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/api/executions/e-4"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let (store, _) = store(&server, Some("token-1"));
    store.delete(EntityType::Execution, "e-4").await.unwrap();
}

#[tokio::test]
async fn test_response_after_the_loader_timeout_still_commits() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/clients"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([{"id": "c-1", "name": "Acme", "version": 1}]))
                .set_delay(Duration::from_millis(400)),
        )
        .mount(&server)
        .await;

    // Transport wiring as the CLI builds it from the default config.
    let config = SyncConfig::default();
    let credentials = Arc::new(InMemoryCredentialStore::new(Some("token-1".into())));
    let store = HttpRecordStore::new(server.uri(), credentials.clone(), config.request_timeout())
        .unwrap();
    let sync = SyncClientBuilder::from_config(&config)
        .record_store(Arc::new(store))
        .credentials(credentials)
        .load_policy(LoadPolicy {
            timeout: Duration::from_millis(300),
            retry: RetryPolicy::loader_default(),
        })
        .build()
        .unwrap();
    let clients = sync.loader::<Client>();

    let (loaded, seen) = tokio::join!(clients.load(), async {
        tokio::time::sleep(Duration::from_millis(700)).await;
        clients.snapshot()
    });

    assert_eq!(seen.phase, LoadPhase::Ready);
    assert_eq!(seen.records().len(), 1);
    assert_eq!(loaded.unwrap()[0].name, "Acme");
}
