//! OAuth2 client-credentials tokens for the Microsoft Graph API

use chrono::{DateTime, TimeDelta, Utc};
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::{Error, Result};

const TOKEN_ENDPOINT_TEMPLATE: &str =
    "https://login.microsoftonline.com/{tenant}/oauth2/v2.0/token";

const DEFAULT_SCOPE: &str = "https://graph.microsoft.com/.default";

/// Tokens are refreshed this long before their reported expiry.
fn expiry_margin() -> TimeDelta {
    TimeDelta::minutes(5)
}

/// Credentials for the client-credentials grant
#[derive(Clone, Debug)]
pub struct AzureAuthConfig {
    /// Azure AD tenant id
    pub tenant_id: String,
    /// Client id of the service principal used by the operator
    pub client_id: String,
    /// Client secret of the service principal
    pub client_secret: String,
    /// Token scope, defaulting to the Graph `.default` scope
    pub scope: String,
}

impl AzureAuthConfig {
    /// Reads the configuration from the standard `AZURE_*` environment
    /// variables.
    pub fn from_env() -> Result<Self> {
        let tenant_id = std::env::var("AZURE_TENANT_ID")
            .map_err(|_| Error::validation("missing AZURE_TENANT_ID for Azure auth"))?;
        let client_id = std::env::var("AZURE_CLIENT_ID")
            .map_err(|_| Error::validation("missing AZURE_CLIENT_ID for Azure auth"))?;
        let client_secret = std::env::var("AZURE_CLIENT_SECRET")
            .map_err(|_| Error::validation("missing AZURE_CLIENT_SECRET for Azure auth"))?;
        let scope =
            std::env::var("AZURE_GRAPH_SCOPE").unwrap_or_else(|_| DEFAULT_SCOPE.to_string());

        Ok(Self {
            tenant_id,
            client_id,
            client_secret,
            scope,
        })
    }

    fn token_endpoint(&self) -> String {
        TOKEN_ENDPOINT_TEMPLATE.replace("{tenant}", &self.tenant_id)
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

/// Caching token source for Graph API requests
///
/// Fetches a token via the client-credentials grant on first use and reuses
/// it until shortly before its expiry.
pub struct TokenSource {
    http: reqwest::Client,
    config: AzureAuthConfig,
    cached: Mutex<Option<CachedToken>>,
}

impl TokenSource {
    /// Create a token source using the given HTTP client and credentials.
    pub fn new(http: reqwest::Client, config: AzureAuthConfig) -> Self {
        Self {
            http,
            config,
            cached: Mutex::new(None),
        }
    }

    /// Returns a valid bearer token, refreshing it if necessary.
    pub async fn token(&self) -> Result<String> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.expires_at > Utc::now() + expiry_margin() {
                return Ok(token.token.clone());
            }
        }

        let params = [
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("scope", self.config.scope.as_str()),
            ("grant_type", "client_credentials"),
        ];

        let response = self
            .http
            .post(self.config.token_endpoint())
            .form(&params)
            .send()
            .await
            .map_err(|e| Error::provider(format!("failed to request token: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::provider(format!("failed to read token response: {e}")))?;
        if !status.is_success() {
            return Err(Error::provider(format!(
                "token endpoint rejected the request: {status} {body}"
            )));
        }

        let parsed: TokenResponse = serde_json::from_str(&body)
            .map_err(|e| Error::provider(format!("failed to parse token response: {e}")))?;

        let token = CachedToken {
            token: parsed.access_token,
            expires_at: Utc::now() + TimeDelta::seconds(parsed.expires_in),
        };
        let bearer = token.token.clone();
        *cached = Some(token);
        Ok(bearer)
    }
}
