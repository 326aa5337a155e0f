//! Reconcile orchestrator for credential resources
//!
//! A single reconcile pass drives finalizer installation, spec validation,
//! expired-key cleanup, provisioning, output-Secret projection, status
//! mutation, and requeue scheduling. Ordering matters:
//!
//! - The finalizer is persisted before any external side effect, so deletion
//!   can always be intercepted.
//! - The output Secret is written only after a successful provision.
//! - `observed_generation` advances only on the Ready transition, so a spec
//!   edit during a failed reconcile re-triggers instead of being masked.
//! - Cleanup runs before renewal, so rotation never grows an already stale
//!   key set.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::Api;
use kube::runtime::controller::Action;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Client, Resource, ResourceExt};
use tracing::{debug, error, info, instrument, warn};

use super::keys::ActiveKey;
use super::provider::{CredentialObject, Provider, ProvisionResult};
use super::status::CredentialStatus;
use super::store::{KubeStore, ObjectStore};
use super::FINALIZER;
use crate::{Error, Result};

/// Base delay for the error backoff schedule
const BACKOFF_BASE: Duration = Duration::from_secs(5);
/// Upper bound for the error backoff schedule
const BACKOFF_MAX: Duration = Duration::from_secs(300);

/// Shared state for all reconciliations of one provider's resources
pub struct Context<P: Provider> {
    /// API-server access (trait object for testability)
    pub store: Arc<dyn ObjectStore<P::Object>>,
    /// The provider plugin, shared across all resources
    pub provider: Arc<P>,
}

impl<P: Provider> Context<P> {
    /// Create a production context backed by the given Kubernetes client.
    pub fn new(client: Client, provider: P) -> Self {
        Self {
            store: Arc::new(KubeStore::new(client)),
            provider: Arc::new(provider),
        }
    }

    /// Create a context with a custom store implementation.
    ///
    /// This is primarily used for testing with a mock store.
    pub fn with_store(store: Arc<dyn ObjectStore<P::Object>>, provider: Arc<P>) -> Self {
        Self { store, provider }
    }
}

/// Reconcile a credential resource
///
/// Returns an [`Action`] indicating when to requeue the resource, or an error
/// if reconciliation failed (the error policy then applies backoff).
#[instrument(skip(obj, ctx), fields(resource = %obj.name_any(), namespace = %obj.namespace().unwrap_or_default()))]
pub async fn reconcile<P: Provider>(obj: Arc<P::Object>, ctx: Arc<Context<P>>) -> Result<Action> {
    let mut obj = (*obj).clone();

    if obj.meta().deletion_timestamp.is_some() {
        return handle_deletion(&mut obj, &ctx).await;
    }

    // The finalizer must be persisted before any external side effect so
    // deletion can always revoke what was provisioned.
    if !has_finalizer(&obj) {
        obj.meta_mut()
            .finalizers
            .get_or_insert_with(Vec::new)
            .push(FINALIZER.to_string());
        ctx.store.update(&obj).await?;
        return Ok(Action::requeue(Duration::ZERO));
    }

    // Validation failures are permanent until the user edits the spec, which
    // arrives as a new generation and re-triggers reconciliation on its own.
    if let Err(e) = obj.validate() {
        warn!(error = %e, "validation failed");
        let generation = generation(&obj);
        obj.status_mut()
            .set_failed(generation, &format!("invalid config: {e}"));
        ctx.store.update_status(&obj).await?;
        return Ok(Action::await_change());
    }

    handle_cleanup(&mut obj, &ctx).await;

    let secret_has_data = secret_has_data(&obj, ctx.store.as_ref()).await;
    let generation = generation(&obj);
    if obj
        .status()
        .map_or(true, |s| s.needs_renewal(generation, secret_has_data))
    {
        return handle_renewal(&mut obj, &ctx).await;
    }

    Ok(schedule_next(obj.status()))
}

/// Error policy for the controller
///
/// Applies exponential backoff derived from the consecutive-failure counter
/// in the resource status.
pub fn error_policy<P: Provider>(obj: Arc<P::Object>, error: &Error, _ctx: Arc<Context<P>>) -> Action {
    error!(
        error = %error,
        resource = %obj.name_any(),
        "reconciliation failed"
    );

    let failures = obj.status().map_or(0, |s| s.failure_count);
    Action::requeue(backoff_delay(failures))
}

/// Run the controller for the given provider until shutdown.
///
/// Watches the provider's CRD across all namespaces and the Secrets it owns,
/// so an edited or deleted output Secret triggers re-reconciliation.
pub async fn run<P: Provider>(client: Client, provider: P) {
    let context = Arc::new(Context::new(client.clone(), provider));
    let objects: Api<P::Object> = Api::all(client.clone());
    let secrets: Api<Secret> = Api::all(client);

    Controller::new(objects, WatcherConfig::default())
        .owns(secrets, WatcherConfig::default())
        .shutdown_on_signal()
        .run(reconcile::<P>, error_policy::<P>, context)
        .for_each(|result| async move {
            match result {
                Ok((_, action)) => debug!(?action, "reconciliation completed"),
                Err(e) => error!(error = ?e, "reconciliation error"),
            }
        })
        .await;
}

/// Provisions new credentials, writes them to the output Secret, and marks
/// the status Ready.
async fn handle_renewal<P: Provider>(obj: &mut P::Object, ctx: &Context<P>) -> Result<Action> {
    let result = match ctx.provider.provision(obj).await {
        Ok(result) => result,
        Err(e) => return fail_status(obj, ctx, &format!("provisioning failed: {e}"), e).await,
    };

    if let Err(e) = reconcile_output_secret(obj, &result, ctx.store.as_ref()).await {
        return fail_status(obj, ctx, &format!("output secret: {e}"), e).await;
    }

    let generation = generation(obj);
    obj.status_mut().set_ready(generation, &result);
    ctx.store.update_status(obj).await?;

    info!(key_id = %result.key_id, "credentials provisioned");
    Ok(schedule_next(obj.status()))
}

/// Cleans up all managed keys and removes the finalizer.
///
/// Non-expired keys that fail to delete block deletion to prevent orphaning
/// usable credentials; expired keys are best-effort.
async fn handle_deletion<P: Provider>(obj: &mut P::Object, ctx: &Context<P>) -> Result<Action> {
    if !has_finalizer(obj) {
        return Ok(Action::await_change());
    }

    info!("cleaning up managed keys before deletion");
    let now = Utc::now();
    let keys: Vec<ActiveKey> = obj
        .status()
        .map(|s| s.active_keys.iter().cloned().collect())
        .unwrap_or_default();

    let mut active_failures = 0;
    for key in &keys {
        if let Err(e) = ctx.provider.delete_key(obj, &key.key_id).await {
            error!(key_id = %key.key_id, error = %e, "failed to delete key");
            if key.expires_at >= now {
                active_failures += 1;
            }
        }
    }

    if active_failures > 0 {
        return Err(Error::KeyDeletion {
            active: active_failures,
        });
    }

    if let Some(finalizers) = obj.meta_mut().finalizers.as_mut() {
        finalizers.retain(|f| f != FINALIZER);
    }
    ctx.store.update(obj).await?;

    Ok(Action::await_change())
}

/// Attempts to delete expired keys at the provider and removes successfully
/// deleted keys from the status. Failures are logged and the keys retained
/// for retry on the next reconciliation.
async fn handle_cleanup<P: Provider>(obj: &mut P::Object, ctx: &Context<P>) {
    let now = Utc::now();
    let expired: Vec<ActiveKey> = obj
        .status()
        .map(|s| {
            s.active_keys
                .iter()
                .filter(|k| k.expires_at < now)
                .cloned()
                .collect()
        })
        .unwrap_or_default();
    if expired.is_empty() {
        return;
    }

    let mut failed = HashSet::new();
    for key in &expired {
        if let Err(e) = ctx.provider.delete_key(obj, &key.key_id).await {
            warn!(key_id = %key.key_id, error = %e, "failed to delete expired key");
            failed.insert(key.key_id.clone());
        }
    }

    let dropped = obj
        .status_mut()
        .active_keys
        .drop_expired(now, |k| failed.contains(&k.key_id));

    if !dropped.is_empty() {
        if let Err(e) = ctx.store.update_status(obj).await {
            warn!(error = %e, "failed to update status after key cleanup");
        }
    }
}

/// Creates or updates the Kubernetes Secret holding the provisioned
/// credentials. The Secret is owned by the resource so it gets
/// garbage-collected on deletion; a Secret controlled by a different owner
/// fails the reconciliation.
async fn reconcile_output_secret<O: CredentialObject>(
    obj: &O,
    result: &ProvisionResult,
    store: &dyn ObjectStore<O>,
) -> Result<()> {
    let namespace = obj.namespace().ok_or(Error::MissingMetadata("namespace"))?;
    let name = obj.secret_ref().name;
    let owner = obj
        .controller_owner_ref(&())
        .ok_or(Error::MissingMetadata("uid"))?;

    match store.get_secret(&namespace, &name).await? {
        None => {
            let secret = Secret {
                metadata: ObjectMeta {
                    name: Some(name),
                    namespace: Some(namespace),
                    owner_references: Some(vec![owner]),
                    ..Default::default()
                },
                string_data: Some(result.string_data.clone()),
                ..Default::default()
            };
            store.create_secret(&secret).await
        }
        Some(mut existing) => {
            let owners = existing
                .metadata
                .owner_references
                .get_or_insert_with(Vec::new);
            match owners.iter_mut().find(|r| r.controller == Some(true)) {
                Some(controller) if controller.uid != owner.uid => {
                    return Err(Error::OwnerConflict {
                        secret: name,
                        owner: controller.name.clone(),
                    });
                }
                Some(controller) => *controller = owner,
                None => owners.push(owner),
            }
            existing.string_data = Some(result.string_data.clone());
            store.replace_secret(&existing).await
        }
    }
}

/// Persists a failed status and returns the error for backoff retry.
async fn fail_status<P: Provider>(
    obj: &mut P::Object,
    ctx: &Context<P>,
    message: &str,
    err: Error,
) -> Result<Action> {
    let generation = generation(obj);
    obj.status_mut().set_failed(generation, message);
    ctx.store.update_status(obj).await?;
    Err(err)
}

/// Returns an [`Action`] that requeues at the next renewal time, or
/// immediately when no active keys exist.
fn schedule_next(status: Option<&CredentialStatus>) -> Action {
    match status.and_then(CredentialStatus::renewal_duration) {
        Some(delay) => Action::requeue(delay),
        None => Action::requeue(Duration::ZERO),
    }
}

/// Checks whether the output secret exists and contains data.
async fn secret_has_data<O: CredentialObject>(obj: &O, store: &dyn ObjectStore<O>) -> bool {
    let Some(namespace) = obj.namespace() else {
        return false;
    };
    match store.get_secret(&namespace, &obj.secret_ref().name).await {
        Ok(Some(secret)) => secret.data.as_ref().is_some_and(|d| !d.is_empty()),
        _ => false,
    }
}

fn has_finalizer<O: CredentialObject>(obj: &O) -> bool {
    obj.meta()
        .finalizers
        .as_deref()
        .unwrap_or_default()
        .iter()
        .any(|f| f == FINALIZER)
}

fn generation<O: CredentialObject>(obj: &O) -> i64 {
    obj.meta().generation.unwrap_or(0)
}

fn backoff_delay(failure_count: u32) -> Duration {
    let exponent = failure_count.saturating_sub(1).min(16);
    BACKOFF_BASE.saturating_mul(1 << exponent).min(BACKOFF_MAX)
}
