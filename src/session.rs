//! Per-invocation session context
//!
//! Owns the loaded AWS config, the staleness store, and the lazily-resolved
//! default-VPC lookup. Built once in `main` and passed by reference to the
//! orchestrator and every handler; there is no global state.

use crate::aws::AwsContext;
use crate::store::StalenessStore;
use anyhow::{Context, Result};
use tokio::sync::OnceCell;
use tracing::debug;

pub struct Session {
    aws: AwsContext,
    store: StalenessStore,
    // Default-VPC id for the region, resolved at most once per pass.
    // `Some(None)` caches the "no default VPC" answer.
    default_vpc: OnceCell<Option<String>>,
}

impl Session {
    /// Load AWS configuration and construct the staleness store.
    ///
    /// Cheap: no network calls happen here beyond credential resolution.
    /// `StalenessStore::ensure_ready` is a separate, explicit setup step.
    pub async fn connect(region: &str, profile: Option<&str>, table_name: &str) -> Self {
        let aws = AwsContext::with_profile(region, profile).await;
        let store = StalenessStore::new(&aws, table_name);

        Self {
            aws,
            store,
            default_vpc: OnceCell::new(),
        }
    }

    pub fn aws(&self) -> &AwsContext {
        &self.aws
    }

    pub fn store(&self) -> &StalenessStore {
        &self.store
    }

    pub fn region(&self) -> &str {
        self.aws.region()
    }

    /// The region's default VPC id, if one exists.
    ///
    /// Resolved lazily and cached for the rest of the pass. Lookup errors
    /// propagate to the caller's per-type isolation boundary.
    pub async fn default_vpc_id(&self) -> Result<Option<&str>> {
        let cached = self
            .default_vpc
            .get_or_try_init(|| async {
                let response = self
                    .aws
                    .ec2_client()
                    .describe_vpcs()
                    .filters(
                        aws_sdk_ec2::types::Filter::builder()
                            .name("isDefault")
                            .values("true")
                            .build(),
                    )
                    .send()
                    .await
                    .context("failed to look up default VPC")?;

                let vpc_id = response
                    .vpcs()
                    .first()
                    .and_then(|vpc| vpc.vpc_id())
                    .map(|id| id.to_string());

                debug!(default_vpc = ?vpc_id, "resolved default VPC");
                Ok::<_, anyhow::Error>(vpc_id)
            })
            .await?;

        Ok(cached.as_deref())
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("region", &self.aws.region())
            .field("table_name", &self.store.table_name())
            .finish_non_exhaustive()
    }
}
