//! S3 resource handlers: buckets and fixture-bucket objects
//!
//! Bucket deletion handles the non-empty case by draining object versions
//! and delete markers, then retrying the bucket deletion exactly once.

use super::to_utc;
use crate::resource::{HandlerKind, Resource};
use crate::session::Session;
use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_sdk_s3::types::{Delete, ObjectIdentifier};
use aws_sdk_s3::Client;
use chrono::{DateTime, SubsecRound, Utc};
use tracing::debug;

/// Persistent encrypted bucket shared across test runs. Bucket encryption
/// takes up to 24 hours to enable, so this bucket is never deleted; its
/// contents are cleaned through `FixtureBucketObject` instead.
const FIXTURE_BUCKET: &str = "reaper-encrypted-fixture";

pub static KINDS: &[HandlerKind] = &[
    HandlerKind {
        name: "S3Bucket",
        discover: |session| Box::pin(discover_buckets(session)),
    },
    HandlerKind {
        name: "FixtureBucketObject",
        discover: |session| Box::pin(discover_fixture_objects(session)),
    },
];

/// An S3 bucket; age comes from the provider's creation date.
struct S3Bucket {
    client: Client,
    name: String,
    created: Option<DateTime<Utc>>,
    observed: DateTime<Utc>,
}

#[async_trait]
impl Resource for S3Bucket {
    fn kind(&self) -> &'static str {
        "S3Bucket"
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn created_time(&self) -> Option<DateTime<Utc>> {
        self.created
    }

    fn observed_at(&self) -> DateTime<Utc> {
        self.observed
    }

    fn ignore(&self) -> bool {
        self.name == FIXTURE_BUCKET
    }

    async fn terminate(&self) -> Result<()> {
        use aws_sdk_s3::error::ProvideErrorMetadata;

        let first_attempt = self
            .client
            .delete_bucket()
            .bucket(&self.name)
            .send()
            .await;

        match first_attempt {
            Ok(_) => Ok(()),
            Err(err) => match err.code() {
                Some("NoSuchBucket") => Ok(()),
                Some("BucketNotEmpty") => {
                    self.drain().await?;
                    self.client
                        .delete_bucket()
                        .bucket(&self.name)
                        .send()
                        .await
                        .with_context(|| {
                            format!("failed to delete bucket {} after draining", self.name)
                        })?;
                    Ok(())
                }
                _ => Err(anyhow::Error::new(err)
                    .context(format!("failed to delete bucket {}", self.name))),
            },
        }
    }
}

impl S3Bucket {
    /// Bulk-remove every object version and delete marker in the bucket.
    /// Delete markers count too; they alone can hold up a bucket deletion.
    async fn drain(&self) -> Result<()> {
        let mut key_marker: Option<String> = None;
        let mut version_marker: Option<String> = None;

        loop {
            let response = self
                .client
                .list_object_versions()
                .bucket(&self.name)
                .set_key_marker(key_marker)
                .set_version_id_marker(version_marker)
                .send()
                .await
                .with_context(|| format!("failed to list versions in bucket {}", self.name))?;

            let mut objects = Vec::new();
            for version in response.versions() {
                if let (Some(key), Some(vid)) = (version.key(), version.version_id()) {
                    objects.push(
                        ObjectIdentifier::builder()
                            .key(key)
                            .version_id(vid)
                            .build()
                            .context("failed to build object identifier")?,
                    );
                }
            }
            for marker in response.delete_markers() {
                if let (Some(key), Some(vid)) = (marker.key(), marker.version_id()) {
                    objects.push(
                        ObjectIdentifier::builder()
                            .key(key)
                            .version_id(vid)
                            .build()
                            .context("failed to build object identifier")?,
                    );
                }
            }

            if !objects.is_empty() {
                debug!(bucket = %self.name, count = objects.len(), "draining object versions");
                self.client
                    .delete_objects()
                    .bucket(&self.name)
                    .delete(
                        Delete::builder()
                            .set_objects(Some(objects))
                            .quiet(true)
                            .build()
                            .context("failed to build delete request")?,
                    )
                    .send()
                    .await
                    .with_context(|| format!("failed to drain bucket {}", self.name))?;
            }

            if response.is_truncated() == Some(true) {
                key_marker = response.next_key_marker().map(|s| s.to_string());
                version_marker = response.next_version_id_marker().map(|s| s.to_string());
            } else {
                return Ok(());
            }
        }
    }
}

async fn discover_buckets(session: &Session) -> Result<Vec<Box<dyn Resource>>> {
    let client = session.aws().s3_client();
    let now = Utc::now().trunc_subsecs(0);

    let response = client
        .list_buckets()
        .send()
        .await
        .context("failed to list buckets")?;

    let mut resources: Vec<Box<dyn Resource>> = Vec::new();

    for bucket in response.buckets() {
        let Some(name) = bucket.name() else {
            continue;
        };

        resources.push(Box::new(S3Bucket {
            client: client.clone(),
            name: name.to_string(),
            created: bucket.creation_date().and_then(to_utc),
            observed: now,
        }));
    }

    debug!(count = resources.len(), "located S3Bucket");
    Ok(resources)
}

/// An object inside the persistent fixture bucket; kept clean of artifacts
/// from past test runs. Age comes from the object's last-modified time.
struct FixtureBucketObject {
    client: Client,
    key: String,
    modified: Option<DateTime<Utc>>,
    observed: DateTime<Utc>,
}

#[async_trait]
impl Resource for FixtureBucketObject {
    fn kind(&self) -> &'static str {
        "FixtureBucketObject"
    }

    fn name(&self) -> &str {
        &self.key
    }

    fn created_time(&self) -> Option<DateTime<Utc>> {
        self.modified
    }

    fn observed_at(&self) -> DateTime<Utc> {
        self.observed
    }

    async fn terminate(&self) -> Result<()> {
        self.client
            .delete_object()
            .bucket(FIXTURE_BUCKET)
            .key(&self.key)
            .send()
            .await
            .with_context(|| format!("failed to delete fixture object {}", self.key))?;

        Ok(())
    }
}

async fn discover_fixture_objects(session: &Session) -> Result<Vec<Box<dyn Resource>>> {
    let client = session.aws().s3_client();
    let now = Utc::now().trunc_subsecs(0);
    let mut resources: Vec<Box<dyn Resource>> = Vec::new();
    let mut continuation: Option<String> = None;

    loop {
        let response = client
            .list_objects_v2()
            .bucket(FIXTURE_BUCKET)
            .set_continuation_token(continuation)
            .send()
            .await
            .context("failed to list fixture bucket objects")?;

        for object in response.contents() {
            let Some(key) = object.key() else {
                continue;
            };

            resources.push(Box::new(FixtureBucketObject {
                client: client.clone(),
                key: key.to_string(),
                modified: object.last_modified().and_then(to_utc),
                observed: now,
            }));
        }

        if response.is_truncated() == Some(true) {
            continuation = response.next_continuation_token().map(|s| s.to_string());
        } else {
            break;
        }
    }

    debug!(count = resources.len(), "located FixtureBucketObject");
    Ok(resources)
}
