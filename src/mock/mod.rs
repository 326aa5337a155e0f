//! Test doubles for the framework
//!
//! [`ClientSecret`] is a mock CRD that implements the managed-resource
//! contract without depending on a real identity provider. Failure modes and
//! validity are configured directly in the spec, making test manifests
//! self-describing. [`MockProvider`] records calls for test assertions.

use chrono::{TimeDelta, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use uuid::Uuid;

use async_trait::async_trait;

use crate::framework::duration::parse_duration;
use crate::framework::{
    CredentialObject, CredentialStatus, Provider, ProvisionResult, SecretReference,
};
use crate::{Error, Result};

/// Default credential lifetime when the spec does not set one
fn default_validity() -> TimeDelta {
    TimeDelta::hours(24)
}

/// Desired state for a mock client secret
///
/// `should_fail_provision` and `should_fail_delete_key` allow per-resource
/// control of failure behavior in tests.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "cso.ngl.cx",
    version = "v1alpha1",
    kind = "ClientSecret",
    namespaced,
    status = "CredentialStatus",
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ClientSecretSpec {
    /// Reference to the output Kubernetes Secret
    pub secret_ref: SecretReference,

    /// Data to include in the provisioned secret
    #[serde(default)]
    pub secret_data: BTreeMap<String, String>,

    /// Overrides the default 24h credential lifetime (e.g. `"1h"`, `"30d"`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validity: Option<String>,

    /// Causes provision calls to return an error
    #[serde(default)]
    pub should_fail_provision: bool,

    /// Causes delete-key calls to return an error
    #[serde(default)]
    pub should_fail_delete_key: bool,
}

impl ClientSecret {
    /// Returns the configured credential lifetime, defaulting to 24h.
    pub fn validity(&self) -> TimeDelta {
        self.spec
            .validity
            .as_deref()
            .and_then(|v| parse_duration(v).ok())
            .and_then(|d| TimeDelta::from_std(d).ok())
            .unwrap_or_else(default_validity)
    }
}

impl CredentialObject for ClientSecret {
    fn secret_ref(&self) -> SecretReference {
        self.spec.secret_ref.clone()
    }

    fn status(&self) -> Option<&CredentialStatus> {
        self.status.as_ref()
    }

    fn status_mut(&mut self) -> &mut CredentialStatus {
        self.status.get_or_insert_with(CredentialStatus::default)
    }

    fn validate(&self) -> Result<()> {
        if self.spec.secret_ref.name.is_empty() {
            return Err(Error::validation("secretRef.name is required"));
        }
        if self.spec.secret_data.is_empty() {
            return Err(Error::validation(
                "secretData must contain at least one key",
            ));
        }
        if let Some(validity) = &self.spec.validity {
            parse_duration(validity)?;
        }
        Ok(())
    }
}

/// Call-recording [`Provider`] for [`ClientSecret`] resources
///
/// Failure behavior is controlled per-resource via the CRD spec fields, so a
/// single shared provider instance can serve tests with mixed expectations.
#[derive(Debug, Default)]
pub struct MockProvider {
    provision_count: AtomicUsize,
    delete_key_calls: Mutex<Vec<String>>,
}

impl MockProvider {
    /// Returns a new mock provider with no recorded calls.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of times provision has been called.
    pub fn provision_count(&self) -> usize {
        self.provision_count.load(Ordering::SeqCst)
    }

    /// Key ids passed to delete-key calls, in call order.
    pub fn delete_key_calls(&self) -> Vec<String> {
        self.delete_key_calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Clears all recorded calls.
    pub fn reset(&self) {
        self.provision_count.store(0, Ordering::SeqCst);
        self.delete_key_calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

#[async_trait]
impl Provider for MockProvider {
    type Object = ClientSecret;

    fn new_object(&self) -> ClientSecret {
        ClientSecret::new("", ClientSecretSpec::default())
    }

    async fn provision(&self, obj: &ClientSecret) -> Result<ProvisionResult> {
        self.provision_count.fetch_add(1, Ordering::SeqCst);

        if obj.spec.should_fail_provision {
            return Err(Error::provider("mock provider failure"));
        }

        let now = Utc::now();
        Ok(ProvisionResult {
            string_data: obj.spec.secret_data.clone(),
            provisioned_at: now,
            valid_until: now + obj.validity(),
            key_id: Uuid::new_v4().to_string(),
        })
    }

    async fn delete_key(&self, obj: &ClientSecret, key_id: &str) -> Result<()> {
        self.delete_key_calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(key_id.to_string());

        if obj.spec.should_fail_delete_key {
            return Err(Error::provider("mock delete key failure"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_spec() -> ClientSecretSpec {
        ClientSecretSpec {
            secret_ref: SecretReference {
                name: "creds".to_string(),
            },
            secret_data: BTreeMap::from([("KEY".to_string(), "v".to_string())]),
            ..Default::default()
        }
    }

    #[test]
    fn test_validate_accepts_complete_spec() {
        let obj = ClientSecret::new("test", sample_spec());
        assert!(obj.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_missing_secret_ref() {
        let mut spec = sample_spec();
        spec.secret_ref.name.clear();
        let obj = ClientSecret::new("test", spec);

        let err = obj.validate().unwrap_err();
        assert!(err.to_string().contains("secretRef"));
    }

    #[test]
    fn test_validate_rejects_empty_secret_data() {
        let mut spec = sample_spec();
        spec.secret_data.clear();
        let obj = ClientSecret::new("test", spec);
        assert!(obj.validate().is_err());
    }

    #[test]
    fn test_validity_defaults_to_24h() {
        let obj = ClientSecret::new("test", sample_spec());
        assert_eq!(obj.validity(), TimeDelta::hours(24));
    }

    #[test]
    fn test_validity_from_spec() {
        let mut spec = sample_spec();
        spec.validity = Some("1h".to_string());
        let obj = ClientSecret::new("test", spec);
        assert_eq!(obj.validity(), TimeDelta::hours(1));
    }

    #[tokio::test]
    async fn test_provision_returns_spec_data_and_unique_keys() {
        let provider = MockProvider::new();
        let obj = ClientSecret::new("test", sample_spec());

        let first = provider.provision(&obj).await.unwrap();
        let second = provider.provision(&obj).await.unwrap();

        assert_eq!(provider.provision_count(), 2);
        assert_eq!(first.string_data, obj.spec.secret_data);
        assert!(!first.key_id.is_empty());
        assert_ne!(first.key_id, second.key_id);
        assert!(first.valid_until > first.provisioned_at);
    }

    #[tokio::test]
    async fn test_provision_fails_when_spec_says_so() {
        let provider = MockProvider::new();
        let mut spec = sample_spec();
        spec.should_fail_provision = true;
        let obj = ClientSecret::new("test", spec);

        let err = provider.provision(&obj).await.unwrap_err();
        assert!(err.to_string().contains("mock provider failure"));
        assert_eq!(provider.provision_count(), 1);
    }

    #[tokio::test]
    async fn test_delete_key_records_calls() {
        let provider = MockProvider::new();
        let obj = ClientSecret::new("test", sample_spec());

        provider.delete_key(&obj, "k1").await.unwrap();
        provider.delete_key(&obj, "k2").await.unwrap();

        assert_eq!(provider.delete_key_calls(), vec!["k1", "k2"]);

        provider.reset();
        assert!(provider.delete_key_calls().is_empty());
        assert_eq!(provider.provision_count(), 0);
    }
}
