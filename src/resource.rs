//! The resource-handle contract
//!
//! Every cloud resource this tool can terminate is one [`Resource`]
//! implementation. Variants whose provider reports a creation time expose it
//! directly; the rest embed [`TrackedAge`], which resolves a first-seen time
//! from the staleness store.
//!
//! Handler types register themselves through static [`HandlerKind`] entries;
//! there is no runtime discovery of implementations.

use crate::session::Session;
use crate::store::{store_key, StalenessStore};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use futures::future::BoxFuture;
use tracing::warn;

/// Default staleness threshold for a resource type
pub const DEFAULT_AGE_LIMIT_DAYS: i64 = 7;

/// One discovered cloud resource.
///
/// `age` and `is_stale` are derived from the `observed_at` snapshot captured
/// at discovery time, so a resource's verdict cannot drift mid-pass.
#[async_trait]
pub trait Resource: Send + Sync {
    /// The resource-type tag; matches the registering [`HandlerKind`].
    fn kind(&self) -> &'static str;

    /// Human-readable name, always present.
    fn name(&self) -> &str;

    /// Stable provider identifier, when the resource has one.
    fn id(&self) -> Option<&str> {
        None
    }

    /// Creation time; `None` means staleness cannot be determined.
    fn created_time(&self) -> Option<DateTime<Utc>>;

    /// Wall-clock snapshot taken when this resource was discovered.
    fn observed_at(&self) -> DateTime<Utc>;

    /// Protected resources (shared fixtures, provider defaults) are never
    /// terminated, even under force.
    fn ignore(&self) -> bool {
        false
    }

    /// Staleness threshold for this resource type.
    fn age_limit(&self) -> Duration {
        Duration::days(DEFAULT_AGE_LIMIT_DAYS)
    }

    /// Age at discovery time; `None` when no creation time is known.
    fn age(&self) -> Option<Duration> {
        self.created_time().map(|created| self.observed_at() - created)
    }

    /// Whether this resource has outlived its age limit.
    fn is_stale(&self) -> bool {
        self.age().is_some_and(|age| age > self.age_limit())
    }

    /// Issue the provider deletion call(s).
    async fn terminate(&self) -> Result<()>;

    /// Post-termination bookkeeping; failures are logged, never fatal.
    async fn cleanup(&self) -> Result<()> {
        Ok(())
    }
}

impl std::fmt::Display for dyn Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: name={}", self.kind(), self.name())?;
        if let Some(id) = self.id() {
            write!(f, ", id={id}")?;
        }
        match self.age() {
            Some(age) => write!(f, ", age={age}, stale={}", self.is_stale()),
            None => write!(f, ", age=unknown"),
        }
    }
}

/// Discovery entry point for one handler type.
pub type DiscoverFn = for<'a> fn(&'a Session) -> BoxFuture<'a, Result<Vec<Box<dyn Resource>>>>;

/// Registry entry: a resource-type name plus its discovery function.
///
/// Handler modules export these as `KINDS` slices; the registry in
/// `handlers::all_handler_kinds` is the full enumerable set.
pub struct HandlerKind {
    pub name: &'static str,
    pub discover: DiscoverFn,
}

impl HandlerKind {
    pub async fn discover(&self, session: &Session) -> Result<Vec<Box<dyn Resource>>> {
        (self.discover)(session).await
    }
}

impl std::fmt::Debug for HandlerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerKind")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Store-resolved age for resources without a provider creation time.
///
/// On first discovery of an identity this records "now" as first-seen via
/// the store's conditional insert, then reads back whichever value won;
/// concurrent observers converge on a single timestamp. Store failures are
/// swallowed with a warning and the resource stays unsupported this cycle.
pub struct TrackedAge {
    key: String,
    recorded: Option<DateTime<Utc>>,
    store: StalenessStore,
}

impl TrackedAge {
    pub async fn resolve(
        store: &StalenessStore,
        kind: &'static str,
        ident: &str,
        now: DateTime<Utc>,
    ) -> Self {
        let key = store_key(kind, ident);
        let recorded = crate::store::first_seen_or_none(store, &key, now).await;

        Self {
            key,
            recorded,
            store: store.clone(),
        }
    }

    /// An unresolved tracker for ignored resources; nothing is recorded for
    /// resources that will never be terminated.
    pub fn unresolved(store: &StalenessStore, kind: &'static str, ident: &str) -> Self {
        Self {
            key: store_key(kind, ident),
            recorded: None,
            store: store.clone(),
        }
    }

    pub fn created_time(&self) -> Option<DateTime<Utc>> {
        self.recorded
    }

    /// Delete the store row after successful termination. A missing or
    /// never-recorded row is logged, not raised; it must not block the pass.
    pub async fn cleanup(&self) -> Result<()> {
        if self.recorded.is_none() {
            warn!(key = %self.key, "skipping store cleanup, no first-seen entry was recorded");
            return Ok(());
        }

        self.store.delete(&self.key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    struct FakeResource {
        name: String,
        created: Option<DateTime<Utc>>,
        observed: DateTime<Utc>,
        limit: Duration,
    }

    #[async_trait]
    impl Resource for FakeResource {
        fn kind(&self) -> &'static str {
            "FakeResource"
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

        fn age_limit(&self) -> Duration {
            self.limit
        }

        async fn terminate(&self) -> Result<()> {
            Ok(())
        }
    }

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, hour, 0, 0).unwrap()
    }

    #[test]
    fn age_comes_from_discovery_snapshot() {
        let resource = FakeResource {
            name: "r".into(),
            created: Some(at(0)),
            observed: at(10),
            limit: Duration::days(7),
        };

        assert_eq!(resource.age(), Some(Duration::hours(10)));
    }

    #[test]
    fn missing_created_time_means_no_age_and_not_stale() {
        let resource = FakeResource {
            name: "r".into(),
            created: None,
            observed: at(10),
            limit: Duration::days(7),
        };

        assert_eq!(resource.age(), None);
        assert!(!resource.is_stale());
    }

    #[test]
    fn stale_requires_strictly_exceeding_the_limit() {
        let exactly_at_limit = FakeResource {
            name: "r".into(),
            created: Some(at(0)),
            observed: at(2),
            limit: Duration::hours(2),
        };
        assert!(!exactly_at_limit.is_stale());

        let past_limit = FakeResource {
            name: "r".into(),
            created: Some(at(0)),
            observed: at(3),
            limit: Duration::hours(2),
        };
        assert!(past_limit.is_stale());
    }

    #[test]
    fn display_includes_identity_and_staleness() {
        let resource = FakeResource {
            name: "thing".into(),
            created: Some(at(0)),
            observed: at(10),
            limit: Duration::hours(2),
        };

        let rendered = format!("{}", &resource as &dyn Resource);
        assert!(rendered.contains("FakeResource"));
        assert!(rendered.contains("name=thing"));
        assert!(rendered.contains("stale=true"));
    }

    #[test]
    fn display_handles_unknown_age() {
        let resource = FakeResource {
            name: "thing".into(),
            created: None,
            observed: at(10),
            limit: Duration::hours(2),
        };

        let rendered = format!("{}", &resource as &dyn Resource);
        assert!(rendered.contains("age=unknown"));
    }
}
