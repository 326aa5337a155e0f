//! Prometheus instrumentation for provider plugins
//!
//! [`InstrumentedProvider`] wraps any [`Provider`] and records duration and
//! outcome of every provision and delete-key call, alongside structured log
//! lines. The engine itself stays metrics-free; instrumentation composes at
//! the provider seam.

use async_trait::async_trait;
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry};
use std::time::Instant;
use tracing::{error, info};

use super::provider::{Provider, ProvisionResult};
use crate::{Error, Result};

/// A [`Provider`] decorator that records Prometheus metrics and logs
/// every call's outcome
pub struct InstrumentedProvider<P> {
    inner: P,
    provision_duration: HistogramVec,
    provision_total: IntCounterVec,
    delete_key_duration: HistogramVec,
    delete_key_total: IntCounterVec,
}

impl<P: Provider> InstrumentedProvider<P> {
    /// Wrap a provider, registering its metrics on the given registry.
    pub fn new(inner: P, registry: &Registry) -> Result<Self> {
        let provision_duration = HistogramVec::new(
            HistogramOpts::new(
                "valet_provision_duration_seconds",
                "Duration of provider provision calls in seconds.",
            ),
            &["result"],
        )
        .map_err(|e| Error::metrics(e.to_string()))?;
        let provision_total = IntCounterVec::new(
            Opts::new(
                "valet_provision_total",
                "Total number of provider provision calls.",
            ),
            &["result"],
        )
        .map_err(|e| Error::metrics(e.to_string()))?;
        let delete_key_duration = HistogramVec::new(
            HistogramOpts::new(
                "valet_delete_key_duration_seconds",
                "Duration of provider delete-key calls in seconds.",
            ),
            &["result"],
        )
        .map_err(|e| Error::metrics(e.to_string()))?;
        let delete_key_total = IntCounterVec::new(
            Opts::new(
                "valet_delete_key_total",
                "Total number of provider delete-key calls.",
            ),
            &["result"],
        )
        .map_err(|e| Error::metrics(e.to_string()))?;

        for collector in [
            Box::new(provision_duration.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(provision_total.clone()),
            Box::new(delete_key_duration.clone()),
            Box::new(delete_key_total.clone()),
        ] {
            registry
                .register(collector)
                .map_err(|e| Error::metrics(e.to_string()))?;
        }

        Ok(Self {
            inner,
            provision_duration,
            provision_total,
            delete_key_duration,
            delete_key_total,
        })
    }
}

fn result_label(ok: bool) -> &'static str {
    if ok {
        "success"
    } else {
        "error"
    }
}

#[async_trait]
impl<P: Provider> Provider for InstrumentedProvider<P> {
    type Object = P::Object;

    fn new_object(&self) -> Self::Object {
        self.inner.new_object()
    }

    async fn provision(&self, obj: &Self::Object) -> Result<ProvisionResult> {
        let start = Instant::now();
        let result = self.inner.provision(obj).await;
        let duration = start.elapsed();

        let label = result_label(result.is_ok());
        self.provision_duration
            .with_label_values(&[label])
            .observe(duration.as_secs_f64());
        self.provision_total.with_label_values(&[label]).inc();

        match &result {
            Ok(provisioned) => info!(
                operation = "provision",
                key_id = %provisioned.key_id,
                duration_ms = duration.as_millis() as u64,
                "provision complete"
            ),
            Err(e) => error!(
                operation = "provision",
                error = %e,
                duration_ms = duration.as_millis() as u64,
                "provision failed"
            ),
        }
        result
    }

    async fn delete_key(&self, obj: &Self::Object, key_id: &str) -> Result<()> {
        let start = Instant::now();
        let result = self.inner.delete_key(obj, key_id).await;
        let duration = start.elapsed();

        let label = result_label(result.is_ok());
        self.delete_key_duration
            .with_label_values(&[label])
            .observe(duration.as_secs_f64());
        self.delete_key_total.with_label_values(&[label]).inc();

        match &result {
            Ok(()) => info!(
                operation = "deleteKey",
                key_id,
                duration_ms = duration.as_millis() as u64,
                "delete key complete"
            ),
            Err(e) => error!(
                operation = "deleteKey",
                key_id,
                error = %e,
                duration_ms = duration.as_millis() as u64,
                "delete key failed"
            ),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framework::SecretReference;
    use crate::mock::{ClientSecret, ClientSecretSpec, MockProvider};
    use std::collections::BTreeMap;

    fn object(should_fail: bool) -> ClientSecret {
        ClientSecret::new(
            "test",
            ClientSecretSpec {
                secret_ref: SecretReference {
                    name: "creds".to_string(),
                },
                secret_data: BTreeMap::from([("KEY".to_string(), "v".to_string())]),
                should_fail_provision: should_fail,
                should_fail_delete_key: should_fail,
                ..Default::default()
            },
        )
    }

    fn counter_value(registry: &Registry, name: &str, result: &str) -> u64 {
        registry
            .gather()
            .iter()
            .find(|f| f.get_name() == name)
            .map(|f| {
                f.get_metric()
                    .iter()
                    .filter(|m| m.get_label().iter().any(|l| l.get_value() == result))
                    .map(|m| m.get_counter().get_value() as u64)
                    .sum()
            })
            .unwrap_or(0)
    }

    #[tokio::test]
    async fn test_provision_outcomes_are_counted_by_result() {
        let registry = Registry::new();
        let provider = InstrumentedProvider::new(MockProvider::new(), &registry).unwrap();

        provider.provision(&object(false)).await.unwrap();
        provider.provision(&object(false)).await.unwrap();
        provider.provision(&object(true)).await.unwrap_err();

        assert_eq!(
            counter_value(&registry, "valet_provision_total", "success"),
            2
        );
        assert_eq!(counter_value(&registry, "valet_provision_total", "error"), 1);
    }

    #[tokio::test]
    async fn test_delete_key_delegates_and_counts() {
        let registry = Registry::new();
        let provider = InstrumentedProvider::new(MockProvider::new(), &registry).unwrap();

        provider.delete_key(&object(false), "k1").await.unwrap();
        provider.delete_key(&object(true), "k2").await.unwrap_err();

        assert_eq!(
            counter_value(&registry, "valet_delete_key_total", "success"),
            1
        );
        assert_eq!(
            counter_value(&registry, "valet_delete_key_total", "error"),
            1
        );
    }

    #[test]
    fn test_double_registration_is_rejected() {
        let registry = Registry::new();
        let first = InstrumentedProvider::new(MockProvider::new(), &registry);
        assert!(first.is_ok());

        let second = InstrumentedProvider::new(MockProvider::new(), &registry);
        assert!(matches!(second, Err(Error::Metrics(_))));
    }
}
