//! Generic reconciliation engine for client-credential resources
//!
//! The engine is parameterized by a [`Provider`] plugin. For each reconcile
//! trigger it performs a single pass that may mutate the resource, the output
//! Secret, and the resource's status, and returns a scheduling directive.
//!
//! # Components
//!
//! - [`keys`] - Ordered set of issued-but-not-yet-reaped credential keys
//! - [`status`] - Pure status transitions (`set_ready`, `set_failed`, ...)
//! - [`provider`] - The contract plugins implement and the contract managed
//!   resources expose to the engine
//! - [`store`] - Kubernetes API access behind a mockable trait
//! - [`reconciler`] - The reconcile orchestrator and controller wiring
//! - [`metrics`] - Prometheus instrumentation decorator for providers

pub mod duration;
pub mod keys;
pub mod metrics;
pub mod provider;
pub mod reconciler;
pub mod status;
pub mod store;

pub use keys::{ActiveKey, ActiveKeys};
pub use metrics::InstrumentedProvider;
pub use provider::{CredentialObject, Provider, ProvisionResult, SecretReference};
pub use reconciler::{error_policy, reconcile, run, Context};
pub use status::{Condition, ConditionStatus, CredentialStatus, Phase};
pub use store::{KubeStore, ObjectStore};

/// Finalizer applied to all managed CRDs to ensure key cleanup on deletion.
///
/// This string is a protocol-visible identifier shared with existing clusters
/// and must not change.
pub const FINALIZER: &str = "cso.ngl.cx/finalizer";

/// Condition type indicating whether credentials are provisioned and up to date.
pub const CONDITION_READY: &str = "Ready";

/// Condition reason set when provisioning succeeded.
pub const REASON_PROVISIONED: &str = "Provisioned";

/// Condition reason set when provisioning failed.
pub const REASON_PROVISIONING_FAILED: &str = "ProvisioningFailed";
