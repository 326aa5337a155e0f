//! Microsoft Graph provider implementation
//!
//! Provisioning adds a password credential to the target Azure AD application
//! (`addPassword`), reads the application's client id, and renders the
//! spec's templates into the output Secret data. Revocation removes the
//! password (`removePassword`) and treats already-removed credentials as
//! success.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;
use tracing::info;

use super::auth::{AzureAuthConfig, TokenSource};
use super::{render_template, AzureClientSecret, AzureClientSecretSpec};
use crate::framework::{Provider, ProvisionResult};
use crate::{Error, Result};

/// Microsoft Graph API base URL
const GRAPH_BASE_URL: &str = "https://graph.microsoft.com/v1.0";

/// Wait time before retrying a rate-limited request
const RETRY_DELAY: Duration = Duration::from_millis(500);

/// Maximum number of retries for rate-limited requests
const MAX_RETRIES: u32 = 5;

/// HTTP timeout for Graph API requests
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// [`Provider`] for [`AzureClientSecret`] resources backed by Microsoft Graph
pub struct AzureProvider {
    http: reqwest::Client,
    base_url: String,
    auth: Option<TokenSource>,
    // Graph throttles aggressively on concurrent application writes.
    request_lock: tokio::sync::Mutex<()>,
}

impl AzureProvider {
    /// Create a provider authenticating with the `AZURE_*` environment
    /// variables.
    pub fn from_env() -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::provider(format!("building HTTP client: {e}")))?;
        let auth = TokenSource::new(http.clone(), AzureAuthConfig::from_env()?);

        Ok(Self {
            http,
            base_url: GRAPH_BASE_URL.to_string(),
            auth: Some(auth),
            request_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// Create an unauthenticated provider against a custom base URL.
    ///
    /// Useful for testing against a stubbed Graph endpoint.
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            auth: None,
            request_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Makes an authenticated request to the Graph API and returns the raw
    /// response body.
    async fn graph_request(&self, method: Method, path: &str, body: Option<&Value>) -> Result<String> {
        let mut request = self.http.request(method, format!("{}{}", self.base_url, path));
        if let Some(auth) = &self.auth {
            request = request.bearer_auth(auth.token().await?);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::provider(format!("request failed: {e}")))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| Error::provider(format!("reading response: {e}")))?;

        if !status.is_success() {
            return Err(Error::provider(format!(
                "graph API error (status {}): {}",
                status.as_u16(),
                text
            )));
        }
        Ok(text)
    }
}

#[async_trait]
impl Provider for AzureProvider {
    type Object = AzureClientSecret;

    fn new_object(&self) -> AzureClientSecret {
        AzureClientSecret::new("", AzureClientSecretSpec::default())
    }

    async fn provision(&self, obj: &AzureClientSecret) -> Result<ProvisionResult> {
        let now = Utc::now();
        let end_date_time = now + obj.validity();
        let display_name = format!("valet-{}", now.format("%Y-%m-%d"));

        let add_body = serde_json::to_value(AddPasswordRequest {
            password_credential: PasswordCredential {
                display_name,
                end_date_time: end_date_time.to_rfc3339(),
            },
        })
        .map_err(|e| Error::serialization(e.to_string()))?;

        let _guard = self.request_lock.lock().await;

        let add_path = format!("/applications/{}/addPassword", obj.spec.object_id);
        let response = with_retry(|| self.graph_request(Method::POST, &add_path, Some(&add_body)))
            .await
            .map_err(|e| {
                annotate(
                    e,
                    &format!("adding password to application {}", obj.spec.object_id),
                )
            })?;

        let password: AddPasswordResponse = serde_json::from_str(&response)
            .map_err(|e| Error::serialization(format!("parsing addPassword response: {e}")))?;
        if password.secret_text.is_empty() {
            return Err(Error::provider("no secret text returned from Graph API"));
        }

        // The application's client id is needed for template rendering.
        let app_path = format!("/applications/{}", obj.spec.object_id);
        let response = with_retry(|| self.graph_request(Method::GET, &app_path, None))
            .await
            .map_err(|e| {
                annotate(e, &format!("getting application {}", obj.spec.object_id))
            })?;
        let app: ApplicationResponse = serde_json::from_str(&response)
            .map_err(|e| Error::serialization(format!("parsing application response: {e}")))?;

        let mut string_data = BTreeMap::new();
        for (key, template) in &obj.spec.template {
            string_data.insert(
                key.clone(),
                render_template(template, &app.app_id, &password.secret_text),
            );
        }

        Ok(ProvisionResult {
            string_data,
            provisioned_at: now,
            valid_until: end_date_time,
            key_id: password.key_id,
        })
    }

    async fn delete_key(&self, obj: &AzureClientSecret, key_id: &str) -> Result<()> {
        if key_id.is_empty() {
            return Ok(());
        }

        let body = serde_json::to_value(RemovePasswordRequest {
            key_id: key_id.to_string(),
        })
        .map_err(|e| Error::serialization(e.to_string()))?;

        let _guard = self.request_lock.lock().await;

        let path = format!("/applications/{}/removePassword", obj.spec.object_id);
        match with_retry(|| self.graph_request(Method::POST, &path, Some(&body))).await {
            Ok(_) => Ok(()),
            // Key already deleted at the provider.
            Err(e) if e.to_string().contains("No password credential found") => {
                info!(key_id, object_id = %obj.spec.object_id, "key already deleted");
                Ok(())
            }
            Err(e) => Err(annotate(
                e,
                &format!(
                    "removing password {key_id} from application {}",
                    obj.spec.object_id
                ),
            )),
        }
    }
}

/// Prefixes provider-error messages with call context.
fn annotate(err: Error, context: &str) -> Error {
    match err {
        Error::Provider(msg) => Error::Provider(format!("{context}: {msg}")),
        other => other,
    }
}

/// Reports whether the error looks like Graph API throttling.
fn is_rate_limited(err: &Error) -> bool {
    let msg = err.to_string().to_lowercase();
    msg.contains("concurrent")
        || msg.contains("throttl")
        || msg.contains("rate limit")
        || msg.contains("too many requests")
        || msg.contains("status 429")
}

/// Executes `operation` with retry for rate-limiting errors.
async fn with_retry<T, F, Fut>(mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Err(e) if is_rate_limited(&e) && attempt < MAX_RETRIES => {
                attempt += 1;
                info!(
                    attempt,
                    delay_ms = RETRY_DELAY.as_millis() as u64,
                    "rate limited, retrying"
                );
                tokio::time::sleep(RETRY_DELAY).await;
            }
            other => return other,
        }
    }
}

// Graph API request/response types.

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AddPasswordRequest {
    password_credential: PasswordCredential,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PasswordCredential {
    display_name: String,
    end_date_time: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddPasswordResponse {
    key_id: String,
    secret_text: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApplicationResponse {
    app_id: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RemovePasswordRequest {
    key_id: String,
}
