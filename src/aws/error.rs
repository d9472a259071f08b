//! AWS error classification
//!
//! Termination and store failures are mapped onto a typed [`AwsError`] kind
//! enum using the SDK's `.code()` metadata, so callers match on kind instead
//! of re-inspecting opaque exceptions.

use thiserror::Error;

/// AWS error categories driving logging severity and cleanup decisions
#[derive(Debug, Error)]
pub enum AwsError {
    /// Resource was not found (safe to treat as already deleted)
    #[error("resource not found: {message}")]
    NotFound { message: String },

    /// Conditional write lost the race or the resource already exists
    #[error("resource already exists")]
    AlreadyExists,

    /// Rate limit exceeded; the attempt still counts as issued
    #[error("rate limit exceeded")]
    Throttled,

    /// Resource has dependent objects (e.g. non-empty bucket, attached ENI)
    #[error("resource has dependent objects")]
    DependencyViolation,

    /// Generic AWS SDK error with code and message
    #[error("AWS error: {message}")]
    Sdk {
        code: Option<String>,
        message: String,
    },
}

impl AwsError {
    /// Check if this is a "not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, AwsError::NotFound { .. })
    }

    /// Check if this is a throttling error (logged at WARN, not ERROR)
    pub fn is_throttled(&self) -> bool {
        matches!(self, AwsError::Throttled)
    }

    /// Check if this is an "already exists" / lost-conditional-write error
    pub fn is_already_exists(&self) -> bool {
        matches!(self, AwsError::AlreadyExists)
    }
}

/// Known AWS error codes for "not found" conditions
const NOT_FOUND_CODES: &[&str] = &[
    "InvalidInstanceID.NotFound",
    "InvalidAllocationID.NotFound",
    "InvalidGroup.NotFound",
    "NoSuchBucket",
    "NoSuchKey",
    "NoSuchEntity",
    "ResourceNotFoundException",
];

/// Known AWS error codes for "already exists" conditions
const ALREADY_EXISTS_CODES: &[&str] = &[
    "ConditionalCheckFailedException",
    "EntityAlreadyExists",
    "BucketAlreadyOwnedByYou",
];

/// Known AWS error codes for throttling/rate limiting
const THROTTLING_CODES: &[&str] = &[
    "Throttling",
    "ThrottlingException",
    "RequestLimitExceeded",
    "TooManyRequestsException",
    "ProvisionedThroughputExceededException",
];

/// Known AWS error codes for dependency violations (resource still in use)
const DEPENDENCY_CODES: &[&str] = &["DependencyViolation", "BucketNotEmpty"];

/// Classify an AWS SDK error using the error code.
pub fn classify_aws_error(code: Option<&str>, message: Option<&str>) -> AwsError {
    let message = message.unwrap_or("unknown error").to_string();

    match code {
        Some(c) if NOT_FOUND_CODES.contains(&c) => AwsError::NotFound { message },
        Some(c) if ALREADY_EXISTS_CODES.contains(&c) => AwsError::AlreadyExists,
        Some(c) if THROTTLING_CODES.contains(&c) => AwsError::Throttled,
        Some(c) if DEPENDENCY_CODES.contains(&c) => AwsError::DependencyViolation,
        _ => AwsError::Sdk {
            code: code.map(|s| s.to_string()),
            message,
        },
    }
}

/// Downcast an error-chain link against a list of SDK operation error types,
/// classifying via `ProvideErrorMetadata` on the first match.
macro_rules! classify_sdk_errors {
    ($cause:expr, [ $( $sdk:ident :: $op:ident :: $err:ident ),+ $(,)? ]) => {
        $(
            if let Some(e) = $cause.downcast_ref::<$sdk::error::SdkError<
                $sdk::operation::$op::$err,
            >>() {
                use $sdk::error::ProvideErrorMetadata;
                let meta = ProvideErrorMetadata::meta(e);
                return classify_aws_error(meta.code(), meta.message());
            }
        )+
    };
}

/// Classify an `anyhow::Error` by extracting the AWS error code.
///
/// Walks the error chain looking for the SDK operation errors this tool
/// issues, then falls back to string matching on the Debug representation.
pub fn classify_anyhow_error(error: &anyhow::Error) -> AwsError {
    for cause in error.chain() {
        classify_sdk_errors!(
            cause,
            [
                aws_sdk_ec2::terminate_instances::TerminateInstancesError,
                aws_sdk_ec2::delete_security_group::DeleteSecurityGroupError,
                aws_sdk_ec2::release_address::ReleaseAddressError,
                aws_sdk_s3::delete_bucket::DeleteBucketError,
                aws_sdk_s3::delete_object::DeleteObjectError,
                aws_sdk_s3::delete_objects::DeleteObjectsError,
                aws_sdk_iam::delete_role::DeleteRoleError,
                aws_sdk_dynamodb::put_item::PutItemError,
                aws_sdk_dynamodb::delete_item::DeleteItemError,
            ]
        );
    }

    // Fallback: extract an error code from the debug representation
    let debug_str = format!("{:?}", error);
    if let Some(code) = extract_error_code(&debug_str) {
        return classify_aws_error(Some(&code), Some(&debug_str));
    }

    AwsError::Sdk {
        code: None,
        message: error.to_string(),
    }
}

/// All known AWS error codes for extraction from debug strings
const ALL_KNOWN_CODES: &[&str] = &[
    "InvalidInstanceID.NotFound",
    "InvalidAllocationID.NotFound",
    "InvalidGroup.NotFound",
    "NoSuchBucket",
    "NoSuchKey",
    "NoSuchEntity",
    "ResourceNotFoundException",
    "ConditionalCheckFailedException",
    "EntityAlreadyExists",
    "BucketAlreadyOwnedByYou",
    "Throttling",
    "ThrottlingException",
    "RequestLimitExceeded",
    "TooManyRequestsException",
    "ProvisionedThroughputExceededException",
    "DependencyViolation",
    "BucketNotEmpty",
];

/// Extract an AWS error code from a debug string representation
fn extract_error_code(debug_str: &str) -> Option<String> {
    for code in ALL_KNOWN_CODES {
        if debug_str.contains(code) {
            return Some((*code).to_string());
        }
    }

    // Try to extract any code from a `code: Some("...")` pattern
    if let Some(start) = debug_str.find("code: Some(\"") {
        let rest = &debug_str[start + 12..];
        if let Some(end) = rest.find('"') {
            return Some(rest[..end].to_string());
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_codes() {
        for code in NOT_FOUND_CODES {
            let err = classify_aws_error(Some(code), Some("some message"));
            assert!(err.is_not_found(), "expected NotFound for code: {code}");
        }
    }

    #[test]
    fn already_exists_codes() {
        for code in ALREADY_EXISTS_CODES {
            let err = classify_aws_error(Some(code), Some("msg"));
            assert!(
                err.is_already_exists(),
                "expected AlreadyExists for code: {code}"
            );
        }
    }

    #[test]
    fn throttling_codes() {
        for code in THROTTLING_CODES {
            let err = classify_aws_error(Some(code), Some("msg"));
            assert!(err.is_throttled(), "expected Throttled for code: {code}");
        }
    }

    #[test]
    fn dependency_violations() {
        for code in ["DependencyViolation", "BucketNotEmpty"] {
            let err = classify_aws_error(Some(code), Some("still in use"));
            assert!(matches!(err, AwsError::DependencyViolation));
        }
    }

    #[test]
    fn unknown_and_missing_codes() {
        let err = classify_aws_error(Some("SomeNewError"), Some("details"));
        assert!(matches!(err, AwsError::Sdk { .. }));

        let err2 = classify_aws_error(None, Some("something failed"));
        assert!(matches!(err2, AwsError::Sdk { code: None, .. }));
    }

    #[test]
    fn extract_known_codes_from_debug_string() {
        for code in ALL_KNOWN_CODES {
            let debug_str = format!("SdkError {{ code: Some(\"{code}\"), message: \"fail\" }}");
            assert!(
                extract_error_code(&debug_str).is_some(),
                "failed to extract code from string containing: {code}"
            );
        }
    }

    #[test]
    fn extract_code_from_code_field() {
        let debug_str = r#"SdkError { code: Some("SomeRandomCode"), message: "fail" }"#;
        assert_eq!(
            extract_error_code(debug_str).as_deref(),
            Some("SomeRandomCode")
        );
    }

    #[test]
    fn extract_none_from_unrelated_string() {
        assert!(extract_error_code("connection refused").is_none());
    }

    #[test]
    fn classify_anyhow_fallback_on_plain_error() {
        let err = anyhow::anyhow!("TooManyRequestsException: slow down");
        assert!(classify_anyhow_error(&err).is_throttled());

        let err2 = anyhow::anyhow!("unrelated failure");
        assert!(matches!(
            classify_anyhow_error(&err2),
            AwsError::Sdk { code: None, .. }
        ));
    }
}
