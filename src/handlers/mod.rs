//! Resource handler registry
//!
//! Each handler module exports a static `KINDS` slice; this module
//! accumulates them into the enumerable registry. Registration is purely
//! additive and happens at compile time; there is no runtime scan for
//! implementations.

pub mod ec2;
pub mod iam;
pub mod s3;

use crate::resource::HandlerKind;
use chrono::{DateTime, Utc};

/// All registered handler types, deduplicated by case-insensitive name and
/// sorted case-insensitively for deterministic pass ordering.
pub fn all_handler_kinds() -> Vec<&'static HandlerKind> {
    let mut kinds: Vec<&'static HandlerKind> = Vec::new();
    kinds.extend(ec2::KINDS.iter());
    kinds.extend(iam::KINDS.iter());
    kinds.extend(s3::KINDS.iter());

    kinds.sort_by_key(|kind| kind.name.to_ascii_lowercase());
    kinds.dedup_by_key(|kind| kind.name.to_ascii_lowercase());
    kinds
}

/// Find a handler type by case-insensitive name.
pub fn lookup(name: &str) -> Option<&'static HandlerKind> {
    all_handler_kinds()
        .into_iter()
        .find(|kind| kind.name.eq_ignore_ascii_case(name))
}

/// Convert an SDK timestamp into `DateTime<Utc>`.
pub(crate) fn to_utc(ts: &aws_sdk_ec2::primitives::DateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(ts.secs(), ts.subsec_nanos())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_is_sorted_case_insensitively() {
        let names: Vec<&str> = all_handler_kinds().iter().map(|k| k.name).collect();
        let mut sorted = names.clone();
        sorted.sort_by_key(|name| name.to_ascii_lowercase());
        assert_eq!(names, sorted);
    }

    #[test]
    fn registry_names_are_unique() {
        let kinds = all_handler_kinds();
        let mut names: Vec<String> = kinds.iter().map(|k| k.name.to_ascii_lowercase()).collect();
        names.dedup();
        assert_eq!(names.len(), kinds.len());
    }

    #[test]
    fn registry_contains_expected_kinds() {
        let names: Vec<&str> = all_handler_kinds().iter().map(|k| k.name).collect();
        for expected in [
            "Ec2Instance",
            "ElasticIp",
            "FixtureBucketObject",
            "IamRole",
            "S3Bucket",
            "SecurityGroup",
        ] {
            assert!(names.contains(&expected), "missing handler: {expected}");
        }
    }

    #[test]
    fn lookup_is_case_insensitive() {
        assert!(lookup("ec2instance").is_some());
        assert!(lookup("EC2INSTANCE").is_some());
        assert!(lookup("SecurityGroup").is_some());
        assert!(lookup("NoSuchKind").is_none());
    }
}
