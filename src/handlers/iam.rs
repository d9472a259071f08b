//! IAM resource handlers: roles
//!
//! Roles carry a provider creation date. Service-linked roles belong to AWS
//! and are never candidates.

use super::to_utc;
use crate::resource::{HandlerKind, Resource};
use crate::session::Session;
use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_sdk_iam::Client;
use chrono::{DateTime, SubsecRound, Utc};
use tracing::debug;

pub static KINDS: &[HandlerKind] = &[HandlerKind {
    name: "IamRole",
    discover: |session| Box::pin(discover_roles(session)),
}];

struct IamRole {
    client: Client,
    name: String,
    role_id: String,
    path: String,
    created: Option<DateTime<Utc>>,
    observed: DateTime<Utc>,
}

#[async_trait]
impl Resource for IamRole {
    fn kind(&self) -> &'static str {
        "IamRole"
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn id(&self) -> Option<&str> {
        Some(&self.role_id)
    }

    fn created_time(&self) -> Option<DateTime<Utc>> {
        self.created
    }

    fn observed_at(&self) -> DateTime<Utc> {
        self.observed
    }

    fn ignore(&self) -> bool {
        // Service-linked roles are managed by AWS and cannot be deleted here
        self.path.starts_with("/aws-service-role/")
    }

    async fn terminate(&self) -> Result<()> {
        self.client
            .delete_role()
            .role_name(&self.name)
            .send()
            .await
            .with_context(|| format!("failed to delete role {}", self.name))?;

        Ok(())
    }
}

async fn discover_roles(session: &Session) -> Result<Vec<Box<dyn Resource>>> {
    let client = session.aws().iam_client();
    let now = Utc::now().trunc_subsecs(0);
    let mut resources: Vec<Box<dyn Resource>> = Vec::new();
    let mut marker: Option<String> = None;

    loop {
        let response = client
            .list_roles()
            .set_marker(marker)
            .send()
            .await
            .context("failed to list roles")?;

        for role in response.roles() {
            resources.push(Box::new(IamRole {
                client: client.clone(),
                name: role.role_name().to_string(),
                role_id: role.role_id().to_string(),
                path: role.path().to_string(),
                created: to_utc(role.create_date()),
                observed: now,
            }));
        }

        if response.is_truncated() {
            marker = response.marker().map(|s| s.to_string());
        } else {
            break;
        }
    }

    debug!(count = resources.len(), "located IamRole");
    Ok(resources)
}
