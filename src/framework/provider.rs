//! Contracts between the engine, provider plugins, and managed resources
//!
//! A provider plugin supplies exactly three operations: a factory for its CRD
//! type, credential provisioning, and credential revocation. Everything else
//! (finalizers, status, scheduling, the output Secret) is the engine's job.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use k8s_openapi::NamespaceResourceScope;
use kube::Resource;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::status::CredentialStatus;
use crate::Result;

/// Reference to the target output Secret
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct SecretReference {
    /// Name of the Secret to create/update in the resource's namespace
    pub name: String,
}

/// Secret data and metadata returned by a provider's provision call
#[derive(Clone, Debug, PartialEq)]
pub struct ProvisionResult {
    /// Rendered contents of the output Secret, replaced wholesale
    pub string_data: BTreeMap<String, String>,

    /// When the credentials expire
    pub valid_until: DateTime<Utc>,

    /// When the credentials were provisioned
    pub provisioned_at: DateTime<Utc>,

    /// Identifier for the created credential
    ///
    /// May be empty for providers whose backend does not expose per-credential
    /// identifiers; the engine then treats the credential as untracked.
    pub key_id: String,
}

/// Constraint for provider CRD types
///
/// Each provider's CRD struct must be a namespaced Kubernetes resource plus
/// the shared accessors the framework reconciler needs.
pub trait CredentialObject:
    Resource<Scope = NamespaceResourceScope, DynamicType = ()>
    + Clone
    + std::fmt::Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
    /// Returns the reference to the target output Secret.
    fn secret_ref(&self) -> SecretReference;

    /// Returns the shared status, if it has been written before.
    fn status(&self) -> Option<&CredentialStatus>;

    /// Returns the shared status, materializing an empty one if absent.
    fn status_mut(&mut self) -> &mut CredentialStatus;

    /// Performs structural validation of the CRD spec.
    fn validate(&self) -> Result<()>;
}

/// A plugin that provisions credentials at an external identity provider
///
/// Implementations may be shared across all resources served by the same
/// process; providers that are not safe under concurrent calls must serialize
/// internally.
#[async_trait]
pub trait Provider: Send + Sync + 'static {
    /// The CRD type this provider reconciles
    type Object: CredentialObject;

    /// Returns a zero-value instance of the CRD type.
    fn new_object(&self) -> Self::Object;

    /// Creates or renews credentials.
    async fn provision(&self, obj: &Self::Object) -> Result<ProvisionResult>;

    /// Revokes a credential by its key id.
    ///
    /// Must be idempotent: deleting a key the provider has already reaped
    /// succeeds without error.
    async fn delete_key(&self, obj: &Self::Object, key_id: &str) -> Result<()>;
}
