//! Cleanup pass orchestration
//!
//! Drives one pass: for every registered handler type, discover instances,
//! classify each as ignored/unsupported/stale/fresh, and terminate per
//! policy. A separate phase purges expired rows from the staleness store.
//!
//! One resource's failure never aborts the pass; a stale resource that
//! fails to delete is simply re-attempted on the next invocation.

use crate::aws::classify_anyhow_error;
use crate::handlers;
use crate::resource::Resource;
use crate::session::Session;
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, SubsecRound, Utc};
use tracing::{debug, error, info, warn};

/// Pseudo-target selecting the staleness-store purge phase.
pub const DATABASE_TARGET: &str = "Database";

/// How long staleness-store rows live before the purge sweep removes them.
/// Independent of any resource type's age limit; the two clocks are
/// deliberately separate.
pub const DEFAULT_PURGE_HORIZON_MINUTES: i64 = 60;

/// Options for one cleanup pass.
#[derive(Debug, Clone)]
pub struct PassOptions {
    /// Dry run: compute and log intended actions, delete nothing
    pub check: bool,
    /// Terminate all discovered resources, bypassing age gating
    pub force: bool,
    /// Restrict the pass to these type names (empty = all)
    pub targets: Vec<String>,
    /// Row age after which the store purge sweep removes entries
    pub purge_horizon: Duration,
}

impl Default for PassOptions {
    fn default() -> Self {
        Self {
            check: false,
            force: false,
            targets: Vec::new(),
            purge_horizon: Duration::minutes(DEFAULT_PURGE_HORIZON_MINUTES),
        }
    }
}

/// Terminal status of one discovered resource within a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Protected resource, never terminated
    Ignored,
    /// No creation time available; staleness cannot be determined
    Unsupported,
    /// Fresh; within its age limit
    Skipped,
    /// Dry run: would have been terminated
    Checked,
    /// Termination attempt issued (success not re-verified)
    Terminated,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Ignored => "ignored",
            Status::Unsupported => "unsupported",
            Status::Skipped => "skipped",
            Status::Checked => "checked",
            Status::Terminated => "terminated",
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the policy says to do with a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    Ignored,
    Terminate,
    Unsupported,
    Skipped,
}

/// Pure policy decision, evaluated in order: ignore dominates everything
/// (including force), then force, then the age gates.
fn decide(ignore: bool, force: bool, has_age: bool, stale: bool) -> Disposition {
    if ignore {
        Disposition::Ignored
    } else if force {
        Disposition::Terminate
    } else if !has_age {
        Disposition::Unsupported
    } else if stale {
        Disposition::Terminate
    } else {
        Disposition::Skipped
    }
}

/// Run one full cleanup pass.
///
/// Store initialization is the only step whose failure is fatal; every
/// later failure is isolated and logged.
pub async fn cleanup(session: &Session, options: &PassOptions) -> Result<()> {
    session
        .store()
        .ensure_ready()
        .await
        .context("staleness store initialization failed")?;

    cleanup_resources(session, options).await;

    let database_selected = options.targets.is_empty()
        || options
            .targets
            .iter()
            .any(|t| t.eq_ignore_ascii_case(DATABASE_TARGET));

    if database_selected {
        if let Err(err) = cleanup_database(session, options).await {
            error!(error = ?err, "staleness store purge failed");
        }
    }

    Ok(())
}

/// Process every selected resource type, one type at a time.
///
/// Types run in case-insensitive lexical order for reproducible passes. A
/// discovery failure is logged and the remaining types still run.
async fn cleanup_resources(session: &Session, options: &PassOptions) {
    for kind in handlers::all_handler_kinds() {
        if !options.targets.is_empty()
            && !options
                .targets
                .iter()
                .any(|t| t.eq_ignore_ascii_case(kind.name))
        {
            continue;
        }

        match kind.discover(session).await {
            Ok(resources) => {
                for resource in &resources {
                    let status =
                        process_resource(resource.as_ref(), options.check, options.force).await;
                    if status == Status::Ignored {
                        debug!(status = %status, resource = %resource, "processed resource");
                    } else {
                        info!(status = %status, resource = %resource, "processed resource");
                    }
                }
            }
            Err(err) => {
                error!(kind = kind.name, error = ?err, "failed to process resource type");
            }
        }
    }
}

/// Apply the pass policy to one resource.
async fn process_resource(resource: &dyn Resource, check: bool, force: bool) -> Status {
    match decide(
        resource.ignore(),
        force,
        resource.age().is_some(),
        resource.is_stale(),
    ) {
        Disposition::Ignored => Status::Ignored,
        Disposition::Unsupported => Status::Unsupported,
        Disposition::Skipped => Status::Skipped,
        Disposition::Terminate => terminate(resource, check).await,
    }
}

/// Issue the termination (or report it in check mode).
///
/// Errors are classified, logged at the matching severity, and the attempt
/// still counts as issued; the provider outcome is re-evaluated next pass.
async fn terminate(resource: &dyn Resource, check: bool) -> Status {
    if check {
        info!(resource = %resource, "check mode, would have terminated");
        return Status::Checked;
    }

    match resource.terminate().await {
        Ok(()) => {
            if let Err(err) = resource.cleanup().await {
                warn!(resource = %resource, error = ?err, "post-termination cleanup failed");
            }
        }
        Err(err) => {
            let kind = classify_anyhow_error(&err);
            if kind.is_throttled() {
                warn!(resource = %resource, error = ?err, "throttled while terminating");
            } else {
                error!(resource = %resource, error = ?err, "error terminating resource");
            }
        }
    }

    Status::Terminated
}

/// What the purge phase will do, decided before touching the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PurgePlan {
    /// Scan cutoff; `None` scans every row (force mode)
    cutoff: Option<DateTime<Utc>>,
    /// Whether matched rows are actually deleted (check mode never deletes)
    delete: bool,
}

fn purge_plan(options: &PassOptions, now: DateTime<Utc>) -> PurgePlan {
    PurgePlan {
        cutoff: if options.force {
            None
        } else {
            Some(now - options.purge_horizon)
        },
        delete: !options.check,
    }
}

/// Purge expired rows from the staleness store.
///
/// The purge horizon is its own clock, unrelated to per-type age limits;
/// force scans every row. Check mode reports matches without deleting.
async fn cleanup_database(session: &Session, options: &PassOptions) -> Result<()> {
    let plan = purge_plan(options, Utc::now().trunc_subsecs(0));

    let keys = session.store().scan_expired(plan.cutoff).await?;

    if keys.is_empty() {
        debug!("no expired staleness store entries");
        return Ok(());
    }

    if plan.delete {
        session.store().delete_batch(&keys).await?;
    }

    let status = if plan.delete { "purged" } else { "checked" };
    for key in &keys {
        info!(status, key = %key, "database item");
    }

    Ok(())
}
