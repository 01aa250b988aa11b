//! Event subscription repository tests against the in-memory store
//!
//! Covers matching, the first-open ordering and the token lease under
//! contention, expiry, index lag and store outages.

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use workflow_persistence::{
    provision, EventSubscription, EventSubscriptionRepository, InMemoryDocumentStore, IndexMode,
    PersistenceConfig,
};

const COLLECTION: &str = "wfc.subscriptions";

async fn setup() -> (InMemoryDocumentStore, EventSubscriptionRepository) {
    let store = InMemoryDocumentStore::new();
    let config = PersistenceConfig::default();
    let provisioned = provision(&store, &config, &CancellationToken::new())
        .await
        .expect("provisioning failed");
    let repo = EventSubscriptionRepository::new(Arc::new(store.clone()), &provisioned, &config);
    (store, repo)
}

fn at(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis).unwrap()
}

/// Log sink for asserting on emitted events
#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

impl std::io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for CapturedLogs {
    type Writer = CapturedLogs;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

// ============================================
// Lookup and matching
// ============================================

#[tokio::test]
async fn test_create_and_get() {
    let (_store, repo) = setup().await;
    let cancel = CancellationToken::new();

    let sub = EventSubscription::new("wf-1", "order-paid", "order-17", at(1_000))
        .with_step(3, "pointer-9");
    let id = repo.create(&sub, &cancel).await.unwrap();

    let stored = repo.get(&id, &cancel).await.unwrap().unwrap();
    assert_eq!(stored.id, id);
    assert_eq!(stored.event_name, "order-paid");
    assert_eq!(stored.step_id, Some(3));
    assert_eq!(stored.execution_pointer_id.as_deref(), Some("pointer-9"));
    assert!(stored.external_token.is_none());
}

#[tokio::test]
async fn test_get_absent_returns_none() {
    let (_store, repo) = setup().await;
    let found = repo.get("missing", &CancellationToken::new()).await.unwrap();
    assert!(found.is_none());
}

#[tokio::test]
async fn test_delete_is_idempotent() {
    let (store, repo) = setup().await;
    let cancel = CancellationToken::new();

    let id = repo
        .create(&EventSubscription::new("wf-1", "e", "k", at(0)), &cancel)
        .await
        .unwrap();

    repo.delete(&id, &cancel).await.unwrap();
    repo.delete(&id, &cancel).await.unwrap();
    repo.delete("never-existed", &cancel).await.unwrap();

    assert_eq!(store.document_count(COLLECTION), 0);
}

#[tokio::test]
async fn test_matching_uses_event_name_not_key() {
    let (_store, repo) = setup().await;
    let cancel = CancellationToken::new();

    // Name equal to the key of another subscription must not leak into matches
    repo.create(&EventSubscription::new("wf-1", "k", "k", at(0)), &cancel)
        .await
        .unwrap();
    let wanted = repo
        .create(&EventSubscription::new("wf-2", "paid", "k", at(0)), &cancel)
        .await
        .unwrap();

    let all = repo.find_all("paid", "k", at(10), &cancel).await.unwrap();
    let ids: Vec<_> = all.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec![wanted.as_str()]);
}

#[tokio::test]
async fn test_subscriptions_in_the_future_do_not_match() {
    let (_store, repo) = setup().await;
    let cancel = CancellationToken::new();

    repo.create(&EventSubscription::new("wf-1", "e", "k", at(5_000)), &cancel)
        .await
        .unwrap();

    assert!(repo
        .find_first_open("e", "k", at(4_999), &cancel)
        .await
        .unwrap()
        .is_none());
    assert!(repo
        .find_first_open("e", "k", at(5_000), &cancel)
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn test_subscribe_as_of_keeps_sub_millisecond_precision() {
    let (_store, repo) = setup().await;
    let cancel = CancellationToken::new();
    let base = at(5_000);

    repo.create(
        &EventSubscription::new("wf-1", "e", "k", base + Duration::microseconds(600)),
        &cancel,
    )
    .await
    .unwrap();

    assert!(repo
        .find_first_open("e", "k", base + Duration::microseconds(400), &cancel)
        .await
        .unwrap()
        .is_none());
    let found = repo
        .find_first_open("e", "k", base + Duration::microseconds(600), &cancel)
        .await
        .unwrap()
        .expect("subscription should match at its own instant");
    assert_eq!(found.subscribe_as_of, base + Duration::microseconds(600));
}

#[tokio::test]
async fn test_first_open_is_earliest_then_smallest_id() {
    let (_store, repo) = setup().await;
    let cancel = CancellationToken::new();

    for (id, as_of) in [("s-c", 2_000), ("s-b", 1_000), ("s-a", 1_000)] {
        repo.create(
            &EventSubscription::new("wf-1", "e", "k", at(as_of)).with_id(id),
            &cancel,
        )
        .await
        .unwrap();
    }

    let first = repo
        .find_first_open("e", "k", at(3_000), &cancel)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.id, "s-a");

    let all = repo.find_all("e", "k", at(3_000), &cancel).await.unwrap();
    let ids: Vec<_> = all.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec!["s-a", "s-b", "s-c"]);
}

#[tokio::test]
async fn test_id_tie_break_is_bytewise() {
    let (_store, repo) = setup().await;
    let cancel = CancellationToken::new();

    for id in ["a", "b", "B"] {
        repo.create(
            &EventSubscription::new("wf-1", "e", "k", at(1_000)).with_id(id),
            &cancel,
        )
        .await
        .unwrap();
    }

    let all = repo.find_all("e", "k", at(1_000), &cancel).await.unwrap();
    let ids: Vec<_> = all.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec!["B", "a", "b"]);
}

#[tokio::test]
async fn test_first_open_for_workflow() {
    let (_store, repo) = setup().await;
    let cancel = CancellationToken::new();

    repo.create(&EventSubscription::new("wf-1", "e", "k", at(0)).with_id("s-1"), &cancel)
        .await
        .unwrap();
    repo.create(&EventSubscription::new("wf-2", "e", "k", at(0)).with_id("s-2"), &cancel)
        .await
        .unwrap();

    let found = repo
        .find_first_open_for_workflow("e", "k", "wf-2", at(10), &cancel)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.id, "s-2");

    assert!(repo
        .find_first_open_for_workflow("e", "k", "wf-3", at(10), &cancel)
        .await
        .unwrap()
        .is_none());
}

// ============================================
// Token lease
// ============================================

#[test_log::test(tokio::test)]
async fn test_claim_release_cycle() {
    let (_store, repo) = setup().await;
    let cancel = CancellationToken::new();
    let expiry = Utc::now() + Duration::minutes(5);

    let id = repo
        .create(&EventSubscription::new("wf-1", "e", "k", at(0)), &cancel)
        .await
        .unwrap();

    let open = repo
        .find_first_open("e", "k", Utc::now(), &cancel)
        .await
        .unwrap()
        .expect("subscription should be open");
    assert_eq!(open.id, id);

    assert!(repo
        .claim_token(&id, "token-a", "worker-a", expiry, &cancel)
        .await
        .unwrap());
    assert!(!repo
        .claim_token(&id, "token-b", "worker-b", expiry, &cancel)
        .await
        .unwrap());

    // Claimed subscriptions are no longer open but still listed
    assert!(repo
        .find_first_open("e", "k", Utc::now(), &cancel)
        .await
        .unwrap()
        .is_none());
    assert_eq!(repo.find_all("e", "k", Utc::now(), &cancel).await.unwrap().len(), 1);

    let held = repo.get(&id, &cancel).await.unwrap().unwrap();
    assert_eq!(held.external_token.as_deref(), Some("token-a"));
    assert_eq!(held.external_worker_id.as_deref(), Some("worker-a"));
    assert_eq!(held.external_token_expiry, Some(expiry));
    assert!(held.is_claimed_at(Utc::now()));

    assert!(repo.release_token(&id, "token-a", &cancel).await.unwrap());

    let released = repo.get(&id, &cancel).await.unwrap().unwrap();
    assert!(released.external_token.is_none());
    assert!(released.external_token_expiry.is_none());
    assert!(released.external_worker_id.is_none());

    let reopened = repo
        .find_first_open("e", "k", Utc::now(), &cancel)
        .await
        .unwrap();
    assert_eq!(reopened.map(|s| s.id), Some(id));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_claims_have_one_winner() {
    let (_store, repo) = setup().await;
    let cancel = CancellationToken::new();
    let expiry = Utc::now() + Duration::minutes(5);

    let id = repo
        .create(&EventSubscription::new("wf-1", "e", "k", at(0)), &cancel)
        .await
        .unwrap();

    let handles: Vec<_> = (0..16)
        .map(|i| {
            let repo = repo.clone();
            let id = id.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                repo.claim_token(&id, &format!("token-{i}"), &format!("worker-{i}"), expiry, &cancel)
                    .await
            })
        })
        .collect();

    let mut winners = 0;
    for handle in futures::future::join_all(handles).await {
        if handle.unwrap().unwrap() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
}

#[tokio::test]
async fn test_expired_token_can_be_claimed() {
    let (_store, repo) = setup().await;
    let cancel = CancellationToken::new();

    let id = repo
        .create(&EventSubscription::new("wf-1", "e", "k", at(0)), &cancel)
        .await
        .unwrap();

    let lapsed = Utc::now() - Duration::seconds(1);
    assert!(repo
        .claim_token(&id, "token-a", "worker-a", lapsed, &cancel)
        .await
        .unwrap());

    let expiry = Utc::now() + Duration::minutes(5);
    assert!(repo
        .claim_token(&id, "token-b", "worker-b", expiry, &cancel)
        .await
        .unwrap());

    let held = repo.get(&id, &cancel).await.unwrap().unwrap();
    assert_eq!(held.external_token.as_deref(), Some("token-b"));
    assert_eq!(held.external_worker_id.as_deref(), Some("worker-b"));

    // The lapsed holder can no longer release
    assert!(!repo.release_token(&id, "token-a", &cancel).await.unwrap());
}

#[tokio::test]
async fn test_release_with_wrong_token_changes_nothing() {
    let (store, repo) = setup().await;
    let cancel = CancellationToken::new();
    let expiry = Utc::now() + Duration::minutes(5);

    let id = repo
        .create(&EventSubscription::new("wf-1", "e", "k", at(0)), &cancel)
        .await
        .unwrap();
    repo.claim_token(&id, "token-a", "worker-a", expiry, &cancel)
        .await
        .unwrap();

    let before = store.document(COLLECTION, &id);
    assert!(!repo.release_token(&id, "token-b", &cancel).await.unwrap());
    assert_eq!(store.document(COLLECTION, &id), before);
}

#[tokio::test]
async fn test_release_mismatch_is_not_a_warning() {
    let (_store, repo) = setup().await;
    let cancel = CancellationToken::new();

    let id = repo
        .create(&EventSubscription::new("wf-1", "e", "k", at(0)), &cancel)
        .await
        .unwrap();
    repo.claim_token(&id, "token-a", "worker-a", Utc::now() + Duration::minutes(5), &cancel)
        .await
        .unwrap();

    let logs = CapturedLogs::default();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_ansi(false)
        .with_writer(logs.clone())
        .finish();
    let released = {
        let _guard = tracing::subscriber::set_default(subscriber);
        repo.release_token(&id, "token-b", &cancel).await.unwrap()
    };

    assert!(!released);
    let output = logs.contents();
    assert!(output.contains("release skipped"), "missing log line: {output}");
    assert!(!output.contains("WARN"), "unexpected warning: {output}");
}

#[tokio::test]
async fn test_cancelled_claim_leaves_token_unset() {
    let (store, repo) = setup().await;
    let cancel = CancellationToken::new();
    let expiry = Utc::now() + Duration::minutes(5);

    let id = repo
        .create(&EventSubscription::new("wf-1", "e", "k", at(0)), &cancel)
        .await
        .unwrap();

    store.set_latency(std::time::Duration::from_millis(200));
    let claim_cancel = CancellationToken::new();
    let trigger = claim_cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let result = repo
        .claim_token(&id, "token-a", "worker-a", expiry, &claim_cancel)
        .await;
    assert!(matches!(
        result,
        Err(workflow_persistence::PersistenceError::Cancelled)
    ));

    store.set_latency(std::time::Duration::ZERO);
    let sub = repo.get(&id, &cancel).await.unwrap().unwrap();
    assert!(sub.external_token.is_none());

    // Nobody is left holding the lease
    assert!(repo
        .claim_token(&id, "token-b", "worker-b", expiry, &cancel)
        .await
        .unwrap());
}

#[tokio::test]
async fn test_claim_absent_subscription_is_false() {
    let (store, repo) = setup().await;
    let claimed = repo
        .claim_token(
            "missing",
            "token",
            "worker",
            Utc::now() + Duration::minutes(1),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(!claimed);
    assert_eq!(store.document_count(COLLECTION), 0);
}

#[tokio::test]
async fn test_claim_during_outage_is_an_error() {
    let (store, repo) = setup().await;
    let cancel = CancellationToken::new();

    let id = repo
        .create(&EventSubscription::new("wf-1", "e", "k", at(0)), &cancel)
        .await
        .unwrap();

    store.set_unavailable(true);
    let result = repo
        .claim_token(&id, "token", "worker", Utc::now() + Duration::minutes(1), &cancel)
        .await;
    let err = result.expect_err("outage must not look like a lost claim");
    assert!(err.is_transient());

    store.set_unavailable(false);
    let sub = repo.get(&id, &cancel).await.unwrap().unwrap();
    assert!(sub.external_token.is_none());
}

#[tokio::test]
async fn test_stale_index_does_not_allow_double_claim() {
    let (store, repo) = setup().await;
    let cancel = CancellationToken::new();
    let expiry = Utc::now() + Duration::minutes(5);

    store.set_index_mode(IndexMode::Manual);
    let id = repo
        .create(&EventSubscription::new("wf-1", "e", "k", at(0)), &cancel)
        .await
        .unwrap();

    // Not indexed yet
    assert!(repo
        .find_first_open("e", "k", Utc::now(), &cancel)
        .await
        .unwrap()
        .is_none());

    store.refresh_indexes();
    let seen_by_a = repo.find_first_open("e", "k", Utc::now(), &cancel).await.unwrap();
    assert_eq!(seen_by_a.map(|s| s.id), Some(id.clone()));
    assert!(repo
        .claim_token(&id, "token-a", "worker-a", expiry, &cancel)
        .await
        .unwrap());

    // The index still reports the subscription open; the claim decides
    let seen_by_b = repo.find_first_open("e", "k", Utc::now(), &cancel).await.unwrap();
    assert_eq!(seen_by_b.map(|s| s.id), Some(id.clone()));
    assert!(!repo
        .claim_token(&id, "token-b", "worker-b", expiry, &cancel)
        .await
        .unwrap());
}

#[tokio::test]
async fn test_cancelled_create_writes_nothing() {
    let (store, repo) = setup().await;
    store.set_latency(std::time::Duration::from_millis(200));

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let result = repo
        .create(&EventSubscription::new("wf-1", "e", "k", at(0)), &cancel)
        .await;
    assert!(matches!(
        result,
        Err(workflow_persistence::PersistenceError::Cancelled)
    ));

    store.set_latency(std::time::Duration::ZERO);
    assert_eq!(store.document_count(COLLECTION), 0);
}
