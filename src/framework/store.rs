//! Kubernetes API access behind a mockable trait
//!
//! The engine persists exactly four things: the managed resource (finalizer
//! changes), its status subresource, and the output Secret (create/replace).
//! Putting those behind [`ObjectStore`] lets the reconciler be exercised in
//! tests without an API server, while [`KubeStore`] is the production
//! implementation on top of a [`kube::Client`].

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, PostParams};
use kube::{Client, Resource, ResourceExt};
use std::marker::PhantomData;

#[cfg(test)]
use mockall::automock;

use super::provider::CredentialObject;
use crate::{Error, Result};

/// Persistence operations the engine needs from the API server
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ObjectStore<O: 'static + Sync + Send>: Send + Sync {
    /// Replaces the managed resource (used for finalizer changes).
    async fn update(&self, obj: &O) -> Result<()>;

    /// Persists the resource's status subresource.
    async fn update_status(&self, obj: &O) -> Result<()>;

    /// Fetches a Secret, returning `None` when it does not exist.
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>>;

    /// Creates a new Secret.
    async fn create_secret(&self, secret: &Secret) -> Result<()>;

    /// Replaces an existing Secret.
    async fn replace_secret(&self, secret: &Secret) -> Result<()>;
}

/// Production [`ObjectStore`] backed by the Kubernetes API
pub struct KubeStore<O> {
    client: Client,
    _object: PhantomData<fn() -> O>,
}

impl<O> KubeStore<O> {
    /// Create a new store using the given client.
    pub fn new(client: Client) -> Self {
        Self {
            client,
            _object: PhantomData,
        }
    }
}

impl<O: CredentialObject> KubeStore<O> {
    fn objects(&self, namespace: &str) -> Api<O> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn secrets(&self, namespace: &str) -> Api<Secret> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn object_coordinates(obj: &O) -> Result<(String, String)> {
        let namespace = obj
            .namespace()
            .ok_or(Error::MissingMetadata("namespace"))?;
        let name = obj
            .meta()
            .name
            .clone()
            .ok_or(Error::MissingMetadata("name"))?;
        Ok((namespace, name))
    }
}

#[async_trait]
impl<O: CredentialObject> ObjectStore<O> for KubeStore<O> {
    async fn update(&self, obj: &O) -> Result<()> {
        let (namespace, name) = Self::object_coordinates(obj)?;
        self.objects(&namespace)
            .replace(&name, &PostParams::default(), obj)
            .await?;
        Ok(())
    }

    async fn update_status(&self, obj: &O) -> Result<()> {
        let (namespace, name) = Self::object_coordinates(obj)?;
        // Full replace of the subresource: fields cleared in memory (e.g.
        // lastFailure after recovery, an emptied activeKeys list) must also
        // clear on the server, which a merge patch would leave untouched.
        let data = serde_json::to_vec(obj).map_err(|e| Error::serialization(e.to_string()))?;
        self.objects(&namespace)
            .replace_status(&name, &PostParams::default(), data)
            .await?;
        Ok(())
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>> {
        Ok(self.secrets(namespace).get_opt(name).await?)
    }

    async fn create_secret(&self, secret: &Secret) -> Result<()> {
        let namespace = secret
            .namespace()
            .ok_or(Error::MissingMetadata("namespace"))?;
        self.secrets(&namespace)
            .create(&PostParams::default(), secret)
            .await?;
        Ok(())
    }

    async fn replace_secret(&self, secret: &Secret) -> Result<()> {
        let namespace = secret
            .namespace()
            .ok_or(Error::MissingMetadata("namespace"))?;
        let name = secret
            .meta()
            .name
            .clone()
            .ok_or(Error::MissingMetadata("name"))?;
        self.secrets(&namespace)
            .replace(&name, &PostParams::default(), secret)
            .await?;
        Ok(())
    }
}
