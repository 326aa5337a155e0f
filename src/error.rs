//! Error types for the valet operator

use thiserror::Error;

/// Main error type for valet operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Validation error for CRD specs
    #[error("validation error: {0}")]
    Validation(String),

    /// Identity-provider error (Graph API, token endpoint, ...)
    #[error("provider error: {0}")]
    Provider(String),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The output Secret is already controlled by a different owner
    #[error("secret {secret} is controlled by another owner ({owner})")]
    OwnerConflict {
        /// Name of the contested Secret
        secret: String,
        /// Name of the conflicting controller owner
        owner: String,
    },

    /// Deletion-time revocation failed for keys that are still usable
    #[error("failed to delete {active} active key(s), will retry")]
    KeyDeletion {
        /// Number of non-expired keys whose revocation failed
        active: usize,
    },

    /// Metric registration error
    #[error("metrics error: {0}")]
    Metrics(String),

    /// A required metadata field (name, namespace, uid) is missing
    #[error("missing object metadata: {0}")]
    MissingMetadata(&'static str),
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a provider error with the given message
    pub fn provider(msg: impl Into<String>) -> Self {
        Self::Provider(msg.into())
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Create a metrics error with the given message
    pub fn metrics(msg: impl Into<String>) -> Self {
        Self::Metrics(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Story: CRD validation catches misconfigurations before provisioning
    ///
    /// When a user creates a resource with an invalid spec, the validation
    /// layer catches it immediately with a clear error message.
    #[test]
    fn story_validation_prevents_invalid_resources() {
        let err = Error::validation("secretRef.name is required");
        assert!(err.to_string().contains("validation error"));
        assert!(err.to_string().contains("secretRef"));

        match Error::validation("any message") {
            Error::Validation(msg) => assert_eq!(msg, "any message"),
            _ => panic!("Expected Validation variant"),
        }
    }

    /// Story: provider errors surface identity-provider failures
    ///
    /// When the external identity provider rejects a call, the error clearly
    /// indicates what failed so operators can tell infra issues from bugs.
    #[test]
    fn story_provider_errors_during_provisioning() {
        let err = Error::provider("graph API error (status 429): throttled");
        assert!(err.to_string().contains("provider error"));
        assert!(err.to_string().contains("429"));
    }

    /// Story: deletion-time failures name the number of blocking keys
    ///
    /// The finalizer stays in place until every usable key is revoked, and the
    /// error message tells the user how many keys are still blocking.
    #[test]
    fn story_key_deletion_error_counts_blocking_keys() {
        let err = Error::KeyDeletion { active: 2 };
        assert_eq!(
            err.to_string(),
            "failed to delete 2 active key(s), will retry"
        );
    }

    /// Story: owner conflicts identify the competing controller
    #[test]
    fn story_owner_conflict_names_both_sides() {
        let err = Error::OwnerConflict {
            secret: "creds".to_string(),
            owner: "other-resource".to_string(),
        };
        assert!(err.to_string().contains("creds"));
        assert!(err.to_string().contains("other-resource"));
    }
}
