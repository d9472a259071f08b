//! Stale AWS resource reaper.
//!
//! Scans an account for resources left behind by test runs, decides per
//! resource whether it has exceeded its age limit, and terminates the
//! stale ones. Resources whose provider reports no creation time are
//! aged through a DynamoDB first-seen table instead.

pub mod aws;
pub mod handlers;
pub mod orchestrator;
pub mod resource;
pub mod session;
pub mod store;
pub mod wait;

pub use aws::AwsContext;
pub use orchestrator::{cleanup, PassOptions, Status};
pub use resource::{HandlerKind, Resource};
pub use session::Session;
pub use store::StalenessStore;
