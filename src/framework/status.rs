//! Shared status record and its pure transition algebra
//!
//! All transitions are pure mutations of the in-memory status value; callers
//! persist the result once per reconcile branch. Keeping the algebra free of
//! I/O is what lets the state machine be tested without a Kubernetes client.

use chrono::{DateTime, TimeDelta, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::keys::{renewal_threshold, ActiveKey, ActiveKeys};
use super::provider::ProvisionResult;
use super::{CONDITION_READY, REASON_PROVISIONED, REASON_PROVISIONING_FAILED};

/// Lifecycle phase of a managed credential resource
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[non_exhaustive]
pub enum Phase {
    /// Resource has been created but not yet reconciled
    #[default]
    Pending,
    /// Credentials are provisioned and the output Secret is up to date
    Ready,
    /// The last reconciliation attempt failed
    Failed,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Ready => write!(f, "Ready"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// Condition status following Kubernetes conventions
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    /// Condition is true
    True,
    /// Condition is false
    False,
    /// Condition status is unknown
    #[default]
    Unknown,
}

/// Kubernetes-style condition for status reporting
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition (e.g. Ready)
    #[serde(rename = "type")]
    pub type_: String,

    /// Status of the condition (True, False, Unknown)
    pub status: ConditionStatus,

    /// Machine-readable reason for the condition
    pub reason: String,

    /// Human-readable message
    pub message: String,

    /// Generation of the spec this condition observation refers to
    pub observed_generation: i64,

    /// Last time the condition status changed
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    /// Create a new condition with the current timestamp
    pub fn new(
        type_: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
        observed_generation: i64,
    ) -> Self {
        Self {
            type_: type_.into(),
            status,
            reason: reason.into(),
            message: message.into(),
            observed_generation,
            last_transition_time: Utc::now(),
        }
    }
}

/// Observed state shared by all provider CRDs
///
/// Embedded in each provider's CRD status and managed by the framework
/// reconciler through the [`CredentialObject`](super::CredentialObject)
/// contract.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CredentialStatus {
    /// Generation of the spec that was last successfully reconciled
    #[serde(default)]
    pub observed_generation: i64,

    /// Current lifecycle phase
    #[serde(default)]
    pub phase: Phase,

    /// Identifier of the active credential, or empty if none
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub current_key_id: String,

    /// All credentials not yet confirmed revoked at the provider
    #[serde(default, skip_serializing_if = "ActiveKeys::is_empty")]
    pub active_keys: ActiveKeys,

    /// Consecutive failed reconciles since the last success
    #[serde(default)]
    pub failure_count: u32,

    /// Timestamp of the most recent failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_failure: Option<DateTime<Utc>>,

    /// Error text of the most recent failure
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub last_failure_message: String,

    /// Latest available observations, one per condition type
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl CredentialStatus {
    /// Transitions the status to Ready after successful provisioning.
    ///
    /// Clears failure counters, records the new key in `active_keys` (when the
    /// provider returned a key id), and sets the Ready condition to true.
    /// This is the only transition that advances `observed_generation`.
    pub fn set_ready(&mut self, generation: i64, result: &ProvisionResult) {
        self.phase = Phase::Ready;
        self.observed_generation = generation;
        self.current_key_id = result.key_id.clone();
        self.failure_count = 0;
        self.last_failure = None;
        self.last_failure_message.clear();

        if !result.key_id.is_empty() {
            self.active_keys.push(ActiveKey {
                key_id: result.key_id.clone(),
                created_at: result.provisioned_at,
                expires_at: result.valid_until,
            });
        }

        self.set_condition(Condition::new(
            CONDITION_READY,
            ConditionStatus::True,
            REASON_PROVISIONED,
            "Credentials provisioned successfully",
            generation,
        ));
    }

    /// Transitions the status to Failed.
    ///
    /// Increments the failure counter, records the error, and sets the Ready
    /// condition to false. `observed_generation` is left untouched: a spec
    /// that never reached Ready stays observably unreconciled.
    pub fn set_failed(&mut self, generation: i64, message: &str) {
        self.phase = Phase::Failed;
        self.failure_count += 1;
        self.last_failure = Some(Utc::now());
        self.last_failure_message = message.to_string();

        self.set_condition(Condition::new(
            CONDITION_READY,
            ConditionStatus::False,
            REASON_PROVISIONING_FAILED,
            message,
            generation,
        ));
    }

    /// Reports whether credentials need to be provisioned or renewed.
    ///
    /// True when there are no active keys, the spec generation changed, the
    /// output secret is missing or empty, or the newest key is near expiry.
    pub fn needs_renewal(&self, current_generation: i64, secret_has_data: bool) -> bool {
        if self.observed_generation != current_generation || !secret_has_data {
            return true;
        }
        match self.active_keys.newest() {
            Some(newest) => newest.near_expiry(Utc::now()),
            None => true,
        }
    }

    /// Returns how long to wait before the next renewal check.
    ///
    /// `None` when there are no active keys, signaling an immediate requeue.
    /// The delay is floored at one minute so an already-open renewal window
    /// never produces a tight requeue loop.
    pub fn renewal_duration(&self) -> Option<Duration> {
        let newest = self.active_keys.newest()?;
        let validity = newest.expires_at - newest.created_at;
        let until_renewal = (newest.expires_at - Utc::now()) - renewal_threshold(validity);
        let delay = until_renewal.max(TimeDelta::minutes(1));
        Some(delay.to_std().unwrap_or(Duration::from_secs(60)))
    }

    /// Inserts or updates the condition with the same type.
    ///
    /// `last_transition_time` is preserved when the condition status did not
    /// change, matching Kubernetes condition semantics.
    pub fn set_condition(&mut self, mut condition: Condition) {
        match self
            .conditions
            .iter_mut()
            .find(|c| c.type_ == condition.type_)
        {
            Some(existing) => {
                if existing.status == condition.status {
                    condition.last_transition_time = existing.last_transition_time;
                }
                *existing = condition;
            }
            None => self.conditions.push(condition),
        }
    }

    /// Returns the condition of the given type, if present.
    pub fn condition(&self, type_: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }
}
