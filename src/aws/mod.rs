//! AWS-facing modules
//!
//! - `context`: shared SDK configuration and client construction
//! - `error`: typed error classification for termination and store failures

pub mod context;
pub mod error;

pub use context::AwsContext;
pub use error::{classify_anyhow_error, classify_aws_error, AwsError};
