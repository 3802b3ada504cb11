//! End-to-end flows over the in-memory collaborators.

use std::sync::Arc;
use std::time::Duration;

use lexsync_core::app::{SubmitError, SyncClient, SyncClientBuilder};
use lexsync_core::domain::{EntityType, LoadError, Version};
use lexsync_core::impls::{InMemoryCredentialStore, InMemoryRecordStore};
use lexsync_core::typed::Client;
use serde_json::json;

fn client(store: Arc<InMemoryRecordStore>) -> SyncClient {
    SyncClientBuilder::new()
        .record_store(store)
        .credentials(Arc::new(InMemoryCredentialStore::new(Some("token-1".into()))))
        .poll_interval(Duration::from_secs(10))
        .build()
        .unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_polling_fallback_invalidates_the_client_list() {
    let store = Arc::new(InMemoryRecordStore::new());
    store.seed(EntityType::Client, json!({"name": "Acme"}));
    let sync = client(store.clone());

    let clients = sync.loader::<Client>();
    assert_eq!(clients.load().await.unwrap().len(), 1);

    // No push transport is configured, so the channel never connects and the
    // poller covers for it from its first tick.
    let realtime = sync.start_realtime();
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert!(realtime.is_polling_fallback());
    assert!(realtime.aggregator().has_changes_for_entity(EntityType::Client));

    store.seed(EntityType::Client, json!({"name": "Globex"}));
    let reloaded = realtime
        .aggregator()
        .consume(EntityType::Client, || async {
            clients.load().await.map(|_| ())
        })
        .await
        .unwrap();

    assert!(reloaded);
    assert!(realtime.aggregator().is_empty());
    let names: Vec<String> = clients
        .snapshot()
        .records()
        .iter()
        .map(|c| c.name.clone())
        .collect();
    assert_eq!(names, vec!["Acme", "Globex"]);

    realtime.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_failed_reload_keeps_the_change_signal() {
    let store = Arc::new(InMemoryRecordStore::new());
    let sync = client(store.clone());
    let clients = sync.loader::<Client>();
    let realtime = sync.start_realtime();
    tokio::time::sleep(Duration::from_millis(1)).await;

    store.fail_lists(true);
    let result: Result<bool, LoadError> = realtime
        .aggregator()
        .consume(EntityType::Client, || async {
            clients.load().await.map(|_| ())
        })
        .await;

    assert!(matches!(result, Err(LoadError::Terminal(_))));
    assert!(realtime.aggregator().has_changes_for_entity(EntityType::Client));

    realtime.shutdown().await;
}

#[tokio::test]
async fn test_stale_update_reloads_and_keeps_the_users_input() {
    let store = Arc::new(InMemoryRecordStore::new());
    let record = store.seed(EntityType::Case, json!({"title": "Smith v. Jones", "status": "open"}));
    let sync = client(store.clone());

    let mut mine = sync.form(EntityType::Case, Some(&record.id));
    let mut theirs = sync.form(EntityType::Case, Some(&record.id));
    mine.mount().await.unwrap();
    theirs.mount().await.unwrap();
    assert_eq!(mine.working_version(), Some(Version::INITIAL));

    theirs.edit("status", json!("closed"));
    let committed = theirs.submit().await.unwrap();
    assert_eq!(committed.version.get(), 2);

    mine.edit("title", json!("Smith v. Jones (appeal)"));
    let err = mine.submit().await.unwrap_err();
    let SubmitError::Conflict { conflict, current } = &err else {
        panic!("expected a conflict, got {err:?}");
    };
    assert_eq!(conflict.submitted, Version::INITIAL);
    assert_eq!(current.version.get(), 2);
    assert!(err.to_string().contains("changed by someone else"));
    assert_eq!(mine.working_version(), Some(current.version));
    assert_eq!(mine.fields()["title"], json!("Smith v. Jones (appeal)"));

    let resubmitted = mine.submit().await.unwrap();
    assert_eq!(resubmitted.version.get(), 3);
    assert_eq!(resubmitted.field("title"), Some(&json!("Smith v. Jones (appeal)")));
}
