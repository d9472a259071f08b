//! DynamoDB-backed staleness store
//!
//! Persists first-seen timestamps for resources whose provider does not
//! report a creation time. One row per tracked resource: primary key `id`
//! (`"{Kind}:{id-or-name}"`), attribute `created_time` (RFC 3339).
//!
//! The conditional insert in [`StalenessStore::put_if_absent`] is the sole
//! concurrency-control primitive: when several invocations race to record
//! the same key, exactly one write lands and every reader converges on it.

use crate::aws::{classify_anyhow_error, AwsContext};
use crate::wait::{backoff_delays, wait_for, WaitConfig};
use anyhow::{Context, Result};
use std::collections::HashMap;
use aws_sdk_dynamodb::types::{
    AttributeDefinition, AttributeValue, BillingMode, DeleteRequest, KeySchemaElement, KeyType,
    ScalarAttributeType, TableStatus, WriteRequest,
};
use aws_sdk_dynamodb::Client;
use chrono::{DateTime, SecondsFormat, Utc};
use tracing::{debug, info, warn};

/// Primary key attribute name
const PRIMARY_KEY: &str = "id";

/// First-seen timestamp attribute name
const CREATED_TIME: &str = "created_time";

/// DynamoDB batch-write limit, also used as the scan page size
const BATCH_SIZE: usize = 25;

/// Resubmission cap for unprocessed batch-write requests
const MAX_BATCH_ATTEMPTS: usize = 5;

/// Pull this table's unprocessed write requests out of a batch response.
fn take_unprocessed(
    items: Option<HashMap<String, Vec<WriteRequest>>>,
    table_name: &str,
) -> Vec<WriteRequest> {
    items
        .and_then(|mut map| map.remove(table_name))
        .unwrap_or_default()
}

/// Build the store key for a resource: `"{Kind}:{id-or-name}"`.
pub fn store_key(kind: &str, ident: &str) -> String {
    format!("{kind}:{ident}")
}

/// Format a timestamp the way the store persists it.
pub fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Parse a stored timestamp; `None` if the row holds garbage.
pub fn parse_ts(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// First-seen tracking for resources without a native creation time.
#[derive(Clone)]
pub struct StalenessStore {
    client: Client,
    table_name: String,
}

impl StalenessStore {
    pub fn new(ctx: &AwsContext, table_name: &str) -> Self {
        Self {
            client: ctx.dynamodb_client(),
            table_name: table_name.to_string(),
        }
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// Make sure the backing table exists and is active.
    ///
    /// Idempotent: an active table is reused, a missing table is created,
    /// and a table mid-deletion is waited out and then recreated. This is
    /// top-level setup; failures here are fatal to the whole pass.
    pub async fn ensure_ready(&self) -> Result<()> {
        let describe = self
            .client
            .describe_table()
            .table_name(&self.table_name)
            .send()
            .await;

        match describe {
            Ok(response) => {
                let status = response.table().and_then(|t| t.table_status().cloned());
                match status {
                    Some(TableStatus::Deleting) => {
                        info!(table = %self.table_name, "table mid-deletion, waiting for removal");
                        self.wait_until_gone().await?;
                        self.create_table().await?;
                    }
                    Some(TableStatus::Active) => {
                        debug!(table = %self.table_name, "table ready");
                    }
                    _ => {
                        // Creating or updating; wait for it to settle
                        self.wait_until_active().await?;
                    }
                }
            }
            Err(err) => {
                let service_err = err.into_service_error();
                if service_err.is_resource_not_found_exception() {
                    self.create_table().await?;
                } else {
                    return Err(anyhow::Error::new(service_err)
                        .context(format!("failed to describe table {}", self.table_name)));
                }
            }
        }

        Ok(())
    }

    /// Read the first-seen timestamp recorded for `key`, if any.
    pub async fn get(&self, key: &str) -> Result<Option<DateTime<Utc>>> {
        let response = self
            .client
            .get_item()
            .table_name(&self.table_name)
            .key(PRIMARY_KEY, AttributeValue::S(key.to_string()))
            .projection_expression(CREATED_TIME)
            .send()
            .await
            .context("failed to read from staleness store")?;

        let value = response
            .item()
            .and_then(|item| item.get(CREATED_TIME))
            .and_then(|attr| attr.as_s().ok())
            .and_then(|s| parse_ts(s));

        Ok(value)
    }

    /// Conditionally record a first-seen timestamp for `key`.
    ///
    /// Fails with a `ConditionalCheckFailedException` when the key already
    /// exists; an existing first-seen time is never overwritten. Callers
    /// racing for the same key must re-read and use whichever value won.
    pub async fn put_if_absent(&self, key: &str, value: DateTime<Utc>) -> Result<()> {
        self.client
            .put_item()
            .table_name(&self.table_name)
            .item(PRIMARY_KEY, AttributeValue::S(key.to_string()))
            .item(CREATED_TIME, AttributeValue::S(format_ts(value)))
            .condition_expression(format!("attribute_not_exists({PRIMARY_KEY})"))
            .send()
            .await
            .context("failed to write to staleness store")?;

        Ok(())
    }

    /// Resolve the first-seen time for `key`, recording `now` when the key
    /// is new.
    ///
    /// Concurrent observers converge on a single timestamp: the conditional
    /// insert admits exactly one winner, and losers re-read the winner's
    /// value.
    pub async fn first_seen(&self, key: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        if let Some(ts) = self.get(key).await? {
            return Ok(ts);
        }

        match self.put_if_absent(key, now).await {
            Ok(()) => Ok(now),
            Err(err) if classify_anyhow_error(&err).is_already_exists() => self
                .get(key)
                .await?
                .with_context(|| format!("lost first-seen race for {key} but winner row is gone")),
            Err(err) => Err(err),
        }
    }

    /// Remove the row for `key`; a missing key is not an error.
    pub async fn delete(&self, key: &str) -> Result<()> {
        self.client
            .delete_item()
            .table_name(&self.table_name)
            .key(PRIMARY_KEY, AttributeValue::S(key.to_string()))
            .send()
            .await
            .context("failed to delete from staleness store")?;

        Ok(())
    }

    /// Scan for keys whose first-seen time predates `cutoff`.
    ///
    /// `None` scans everything (force mode). Pages of 25 items with
    /// eventually-consistent reads; a cleanup sweep does not need strong
    /// consistency.
    pub async fn scan_expired(&self, cutoff: Option<DateTime<Utc>>) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut start_key = None;

        loop {
            let mut request = self
                .client
                .scan()
                .table_name(&self.table_name)
                .projection_expression(PRIMARY_KEY)
                .limit(BATCH_SIZE as i32)
                .consistent_read(false)
                .set_exclusive_start_key(start_key);

            if let Some(cutoff) = cutoff {
                request = request
                    .filter_expression(format!("{CREATED_TIME} < :cutoff"))
                    .expression_attribute_values(":cutoff", AttributeValue::S(format_ts(cutoff)));
            }

            let response = request
                .send()
                .await
                .context("failed to scan staleness store")?;

            for item in response.items() {
                if let Some(key) = item.get(PRIMARY_KEY).and_then(|attr| attr.as_s().ok()) {
                    keys.push(key.clone());
                }
            }

            match response.last_evaluated_key() {
                Some(last) => start_key = Some(last.clone()),
                None => break,
            }
        }

        Ok(keys)
    }

    /// Batch-delete rows by key, chunked at the DynamoDB batch-write limit.
    ///
    /// DynamoDB may return part of a batch as unprocessed under load; those
    /// requests are resubmitted with backoff. Deletes still unprocessed after
    /// the retry cap fail the call so the purge phase cannot report rows as
    /// removed when they are not.
    pub async fn delete_batch(&self, keys: &[String]) -> Result<()> {
        for chunk in keys.chunks(BATCH_SIZE) {
            let mut requests = Vec::with_capacity(chunk.len());
            for key in chunk {
                let delete = DeleteRequest::builder()
                    .key(PRIMARY_KEY, AttributeValue::S(key.clone()))
                    .build()
                    .context("failed to build delete request")?;
                requests.push(WriteRequest::builder().delete_request(delete).build());
            }

            let mut delays = backoff_delays(&WaitConfig::default());
            let mut attempts = 0usize;

            loop {
                let response = self
                    .client
                    .batch_write_item()
                    .request_items(&self.table_name, requests)
                    .send()
                    .await
                    .context("failed to batch-delete from staleness store")?;

                requests = take_unprocessed(response.unprocessed_items, &self.table_name);
                if requests.is_empty() {
                    break;
                }

                attempts += 1;
                if attempts >= MAX_BATCH_ATTEMPTS {
                    anyhow::bail!(
                        "{} staleness store deletes still unprocessed after {} resubmissions",
                        requests.len(),
                        attempts
                    );
                }

                warn!(
                    remaining = requests.len(),
                    attempt = attempts,
                    "resubmitting unprocessed staleness store deletes"
                );
                let delay = delays.next().unwrap_or(WaitConfig::default().max_delay);
                tokio::time::sleep(delay).await;
            }
        }

        Ok(())
    }

    /// Create the backing table and wait until it is active.
    async fn create_table(&self) -> Result<()> {
        info!(table = %self.table_name, "creating staleness store table");

        self.client
            .create_table()
            .table_name(&self.table_name)
            .attribute_definitions(
                AttributeDefinition::builder()
                    .attribute_name(PRIMARY_KEY)
                    .attribute_type(ScalarAttributeType::S)
                    .build()
                    .context("failed to build attribute definition")?,
            )
            .key_schema(
                KeySchemaElement::builder()
                    .attribute_name(PRIMARY_KEY)
                    .key_type(KeyType::Hash)
                    .build()
                    .context("failed to build key schema")?,
            )
            .billing_mode(BillingMode::PayPerRequest)
            .send()
            .await
            .with_context(|| format!("failed to create table {}", self.table_name))?;

        self.wait_until_active().await
    }

    /// Block until the table no longer exists.
    async fn wait_until_gone(&self) -> Result<()> {
        wait_for(
            WaitConfig::unbounded(),
            || async {
                match self
                    .client
                    .describe_table()
                    .table_name(&self.table_name)
                    .send()
                    .await
                {
                    Ok(_) => Ok(false),
                    Err(err) => {
                        let service_err = err.into_service_error();
                        if service_err.is_resource_not_found_exception() {
                            Ok(true)
                        } else {
                            Err(anyhow::Error::new(service_err))
                        }
                    }
                }
            },
            "staleness store table removal",
        )
        .await
    }

    /// Block until the table reports active.
    async fn wait_until_active(&self) -> Result<()> {
        wait_for(
            WaitConfig::unbounded(),
            || async {
                let response = self
                    .client
                    .describe_table()
                    .table_name(&self.table_name)
                    .send()
                    .await
                    .context("failed to describe table while waiting for active")?;

                Ok(matches!(
                    response.table().and_then(|t| t.table_status()),
                    Some(TableStatus::Active)
                ))
            },
            "staleness store table active",
        )
        .await
    }
}

impl std::fmt::Debug for StalenessStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StalenessStore")
            .field("table_name", &self.table_name)
            .finish_non_exhaustive()
    }
}

/// Log-and-swallow wrapper for store reads used during discovery; a store
/// failure degrades the resource to "unsupported" for this cycle instead of
/// aborting its processing.
pub async fn first_seen_or_none(
    store: &StalenessStore,
    key: &str,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    match store.first_seen(key, now).await {
        Ok(ts) => Some(ts),
        Err(err) => {
            warn!(key = %key, error = ?err, "staleness store access failed");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn store_key_format() {
        assert_eq!(store_key("SecurityGroup", "sg-12345"), "SecurityGroup:sg-12345");
        assert_eq!(store_key("ElasticIp", "my-eip"), "ElasticIp:my-eip");
    }

    #[test]
    fn timestamp_round_trip() {
        let ts = Utc.with_ymd_and_hms(2024, 6, 1, 12, 30, 45).unwrap();
        let formatted = format_ts(ts);
        assert_eq!(formatted, "2024-06-01T12:30:45Z");
        assert_eq!(parse_ts(&formatted), Some(ts));
    }

    #[test]
    fn parse_ts_accepts_offset_form() {
        let ts = parse_ts("2024-06-01T12:30:45+00:00").expect("should parse");
        assert_eq!(format_ts(ts), "2024-06-01T12:30:45Z");
    }

    #[test]
    fn parse_ts_rejects_garbage() {
        assert_eq!(parse_ts("not-a-timestamp"), None);
        assert_eq!(parse_ts(""), None);
    }

    fn delete_request(key: &str) -> WriteRequest {
        let delete = DeleteRequest::builder()
            .key(PRIMARY_KEY, AttributeValue::S(key.to_string()))
            .build()
            .unwrap();
        WriteRequest::builder().delete_request(delete).build()
    }

    #[test]
    fn take_unprocessed_handles_clean_responses() {
        assert!(take_unprocessed(None, "seen").is_empty());
        assert!(take_unprocessed(Some(HashMap::new()), "seen").is_empty());
    }

    #[test]
    fn take_unprocessed_returns_this_tables_leftovers() {
        let mut items = HashMap::new();
        items.insert(
            "seen".to_string(),
            vec![delete_request("SecurityGroup:sg-1"), delete_request("ElasticIp:eip-2")],
        );

        let remaining = take_unprocessed(Some(items), "seen");
        assert_eq!(remaining.len(), 2);
    }

    #[test]
    fn take_unprocessed_ignores_other_tables() {
        let mut items = HashMap::new();
        items.insert("other".to_string(), vec![delete_request("IamRole:r")]);

        assert!(take_unprocessed(Some(items), "seen").is_empty());
    }
}
