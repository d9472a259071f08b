//! Live DynamoDB integration tests for the staleness store.
//!
//! These talk to a real AWS account and are ignored by default:
//!
//!     cargo test --test store_integration -- --ignored
//!
//! Region and table come from `CLEANUP_AWS_REGION` / `DYNAMODB_TABLE_NAME`
//! with local fallbacks. The table is created on first use.

use aws_reaper::store::{store_key, StalenessStore};
use aws_reaper::AwsContext;
use chrono::{Duration, SubsecRound, Utc};

fn test_region() -> String {
    std::env::var("CLEANUP_AWS_REGION").unwrap_or_else(|_| "us-east-1".to_string())
}

fn test_table() -> String {
    std::env::var("DYNAMODB_TABLE_NAME").unwrap_or_else(|_| "aws-reaper-test-seen".to_string())
}

async fn test_store() -> StalenessStore {
    let ctx = AwsContext::new(&test_region()).await;
    let store = StalenessStore::new(&ctx, &test_table());
    store
        .ensure_ready()
        .await
        .expect("staleness store table should become ready");
    store
}

fn unique_key(test: &str) -> String {
    store_key("IntegrationTest", &format!("{test}-{}", Utc::now().timestamp_nanos_opt().unwrap_or_default()))
}

#[tokio::test]
#[ignore = "requires AWS credentials"]
async fn ensure_ready_is_idempotent() {
    let store = test_store().await;
    store.ensure_ready().await.expect("second call should be a no-op");
}

#[tokio::test]
#[ignore = "requires AWS credentials"]
async fn first_seen_round_trip() {
    let store = test_store().await;
    let key = unique_key("round-trip");
    let now = Utc::now().trunc_subsecs(0);

    assert_eq!(store.get(&key).await.expect("read"), None);

    let seen = store.first_seen(&key, now).await.expect("record");
    assert_eq!(seen, now);

    // A later observer must get the original timestamp back
    let later = now + Duration::minutes(5);
    let seen_again = store.first_seen(&key, later).await.expect("re-read");
    assert_eq!(seen_again, now);

    store.delete(&key).await.expect("delete");
    assert_eq!(store.get(&key).await.expect("read after delete"), None);
}

#[tokio::test]
#[ignore = "requires AWS credentials"]
async fn conditional_insert_admits_one_writer() {
    let store = test_store().await;
    let key = unique_key("one-writer");
    let first = Utc::now().trunc_subsecs(0);
    let second = first + Duration::minutes(1);

    store.put_if_absent(&key, first).await.expect("first write wins");

    let err = store
        .put_if_absent(&key, second)
        .await
        .expect_err("second write must fail the condition");
    assert!(
        aws_reaper::aws::classify_anyhow_error(&err).is_already_exists(),
        "unexpected error: {err:?}"
    );

    assert_eq!(store.get(&key).await.expect("read"), Some(first));

    store.delete(&key).await.expect("cleanup");
}

#[tokio::test]
#[ignore = "requires AWS credentials"]
async fn scan_expired_respects_cutoff() {
    let store = test_store().await;
    let old_key = unique_key("scan-old");
    let new_key = unique_key("scan-new");
    let now = Utc::now().trunc_subsecs(0);

    store
        .put_if_absent(&old_key, now - Duration::hours(2))
        .await
        .expect("write old row");
    store.put_if_absent(&new_key, now).await.expect("write new row");

    let expired = store
        .scan_expired(Some(now - Duration::hours(1)))
        .await
        .expect("scan");
    assert!(expired.contains(&old_key));
    assert!(!expired.contains(&new_key));

    // An unfiltered scan sees everything
    let all = store.scan_expired(None).await.expect("full scan");
    assert!(all.contains(&old_key));
    assert!(all.contains(&new_key));

    store.delete_batch(&[old_key, new_key]).await.expect("cleanup");
}

#[tokio::test]
#[ignore = "requires AWS credentials"]
async fn delete_batch_removes_every_row_across_chunks() {
    let store = test_store().await;
    let now = Utc::now().trunc_subsecs(0);

    // More keys than one batch-write request can carry
    let keys: Vec<String> = (0..30).map(|i| unique_key(&format!("batch-{i}"))).collect();
    for key in &keys {
        store.put_if_absent(key, now).await.expect("seed row");
    }

    store.delete_batch(&keys).await.expect("batch delete");

    for key in &keys {
        assert_eq!(store.get(key).await.expect("read"), None, "row {key} survived");
    }
}

#[tokio::test]
#[ignore = "requires AWS credentials"]
async fn delete_is_idempotent() {
    let store = test_store().await;
    let key = unique_key("delete-missing");

    // Deleting a key that was never written must not error
    store.delete(&key).await.expect("delete of missing key");
}
