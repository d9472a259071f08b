//! EC2 resource handlers: instances, security groups, Elastic IPs
//!
//! Instances carry a provider launch time. Security groups and Elastic IPs
//! do not, so their age is tracked through the staleness store.

use super::to_utc;
use crate::resource::{HandlerKind, Resource, TrackedAge};
use crate::session::Session;
use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_sdk_ec2::types::Filter;
use aws_sdk_ec2::Client;
use chrono::{DateTime, Duration, SubsecRound, Utc};
use tracing::debug;

pub static KINDS: &[HandlerKind] = &[
    HandlerKind {
        name: "Ec2Instance",
        discover: |session| Box::pin(discover_instances(session)),
    },
    HandlerKind {
        name: "SecurityGroup",
        discover: |session| Box::pin(discover_security_groups(session)),
    },
    HandlerKind {
        name: "ElasticIp",
        discover: |session| Box::pin(discover_elastic_ips(session)),
    },
];

/// An EC2 instance; age comes from the provider's launch time.
struct Ec2Instance {
    client: Client,
    id: String,
    name: String,
    launched: Option<DateTime<Utc>>,
    observed: DateTime<Utc>,
}

#[async_trait]
impl Resource for Ec2Instance {
    fn kind(&self) -> &'static str {
        "Ec2Instance"
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn id(&self) -> Option<&str> {
        Some(&self.id)
    }

    fn created_time(&self) -> Option<DateTime<Utc>> {
        self.launched
    }

    fn observed_at(&self) -> DateTime<Utc> {
        self.observed
    }

    async fn terminate(&self) -> Result<()> {
        self.client
            .terminate_instances()
            .instance_ids(&self.id)
            .send()
            .await
            .with_context(|| format!("failed to terminate instance {}", self.id))?;

        Ok(())
    }
}

async fn discover_instances(session: &Session) -> Result<Vec<Box<dyn Resource>>> {
    let client = session.aws().ec2_client();
    let now = Utc::now().trunc_subsecs(0);
    let mut resources: Vec<Box<dyn Resource>> = Vec::new();
    let mut next_token: Option<String> = None;

    loop {
        let response = client
            .describe_instances()
            .filters(
                // Already-terminated instances are not candidates
                Filter::builder()
                    .name("instance-state-name")
                    .values("pending")
                    .values("running")
                    .values("stopping")
                    .values("stopped")
                    .build(),
            )
            .set_next_token(next_token)
            .send()
            .await
            .context("failed to describe instances")?;

        for reservation in response.reservations() {
            for instance in reservation.instances() {
                let Some(id) = instance.instance_id() else {
                    continue;
                };

                let name = instance
                    .tags()
                    .iter()
                    .find(|tag| tag.key() == Some("Name"))
                    .and_then(|tag| tag.value())
                    .unwrap_or(id)
                    .to_string();

                resources.push(Box::new(Ec2Instance {
                    client: client.clone(),
                    id: id.to_string(),
                    name,
                    launched: instance.launch_time().and_then(to_utc),
                    observed: now,
                }));
            }
        }

        match response.next_token() {
            Some(token) => next_token = Some(token.to_string()),
            None => break,
        }
    }

    debug!(count = resources.len(), "located Ec2Instance");
    Ok(resources)
}

/// A security group; EC2 reports no creation time, so age is store-tracked.
struct SecurityGroup {
    client: Client,
    id: String,
    name: String,
    ignore: bool,
    tracked: TrackedAge,
    observed: DateTime<Utc>,
}

#[async_trait]
impl Resource for SecurityGroup {
    fn kind(&self) -> &'static str {
        "SecurityGroup"
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn id(&self) -> Option<&str> {
        Some(&self.id)
    }

    fn created_time(&self) -> Option<DateTime<Utc>> {
        self.tracked.created_time()
    }

    fn observed_at(&self) -> DateTime<Utc> {
        self.observed
    }

    fn ignore(&self) -> bool {
        self.ignore
    }

    async fn terminate(&self) -> Result<()> {
        self.client
            .delete_security_group()
            .group_id(&self.id)
            .send()
            .await
            .with_context(|| format!("failed to delete security group {}", self.id))?;

        Ok(())
    }

    async fn cleanup(&self) -> Result<()> {
        self.tracked.cleanup().await
    }
}

async fn discover_security_groups(session: &Session) -> Result<Vec<Box<dyn Resource>>> {
    let client = session.aws().ec2_client();
    let store = session.store();
    let now = Utc::now().trunc_subsecs(0);
    let default_vpc = session.default_vpc_id().await?.map(str::to_string);

    let mut resources: Vec<Box<dyn Resource>> = Vec::new();
    let mut next_token: Option<String> = None;

    loop {
        let response = client
            .describe_security_groups()
            .set_next_token(next_token)
            .send()
            .await
            .context("failed to describe security groups")?;

        for sg in response.security_groups() {
            let Some(id) = sg.group_id() else {
                continue;
            };
            let name = sg.group_name().unwrap_or(id).to_string();

            // The "default" group is undeletable, and groups living in the
            // default VPC are shared test infrastructure.
            let ignore = name == "default"
                || (default_vpc.is_some() && sg.vpc_id() == default_vpc.as_deref());

            let tracked = if ignore {
                TrackedAge::unresolved(store, "SecurityGroup", id)
            } else {
                TrackedAge::resolve(store, "SecurityGroup", id, now).await
            };

            resources.push(Box::new(SecurityGroup {
                client: client.clone(),
                id: id.to_string(),
                name,
                ignore,
                tracked,
                observed: now,
            }));
        }

        match response.next_token() {
            Some(token) => next_token = Some(token.to_string()),
            None => break,
        }
    }

    debug!(count = resources.len(), "located SecurityGroup");
    Ok(resources)
}

/// An Elastic IP allocation; store-tracked age with a short limit, since
/// test runs allocate and drop these quickly.
struct ElasticIp {
    client: Client,
    allocation_id: String,
    name: String,
    tracked: TrackedAge,
    observed: DateTime<Utc>,
}

#[async_trait]
impl Resource for ElasticIp {
    fn kind(&self) -> &'static str {
        "ElasticIp"
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn id(&self) -> Option<&str> {
        Some(&self.allocation_id)
    }

    fn created_time(&self) -> Option<DateTime<Utc>> {
        self.tracked.created_time()
    }

    fn observed_at(&self) -> DateTime<Utc> {
        self.observed
    }

    fn age_limit(&self) -> Duration {
        Duration::minutes(40)
    }

    async fn terminate(&self) -> Result<()> {
        self.client
            .release_address()
            .allocation_id(&self.allocation_id)
            .send()
            .await
            .with_context(|| format!("failed to release address {}", self.allocation_id))?;

        Ok(())
    }

    async fn cleanup(&self) -> Result<()> {
        self.tracked.cleanup().await
    }
}

async fn discover_elastic_ips(session: &Session) -> Result<Vec<Box<dyn Resource>>> {
    let client = session.aws().ec2_client();
    let store = session.store();
    let now = Utc::now().trunc_subsecs(0);

    let response = client
        .describe_addresses()
        .send()
        .await
        .context("failed to describe addresses")?;

    let mut resources: Vec<Box<dyn Resource>> = Vec::new();

    for address in response.addresses() {
        let Some(allocation_id) = address.allocation_id() else {
            continue;
        };
        let name = address.public_ip().unwrap_or(allocation_id).to_string();
        let tracked = TrackedAge::resolve(store, "ElasticIp", allocation_id, now).await;

        resources.push(Box::new(ElasticIp {
            client: client.clone(),
            allocation_id: allocation_id.to_string(),
            name,
            tracked,
            observed: now,
        }));
    }

    debug!(count = resources.len(), "located ElasticIp");
    Ok(resources)
}
