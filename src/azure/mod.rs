//! Azure AD provider
//!
//! Provisions and rotates client secrets for Azure AD applications through
//! the Microsoft Graph API. The [`AzureClientSecret`] CRD names the target
//! application and a template describing the output Secret's contents.

mod auth;
mod provider;

pub use auth::{AzureAuthConfig, TokenSource};
pub use provider::AzureProvider;

use chrono::TimeDelta;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::framework::duration::parse_duration;
use crate::framework::{CredentialObject, CredentialStatus, SecretReference};
use crate::{Error, Result};

/// Default secret validity (90 days)
fn default_validity() -> TimeDelta {
    TimeDelta::days(90)
}

/// Desired state for an Azure AD client secret
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "cso.ngl.cx",
    version = "v1alpha1",
    kind = "AzureClientSecret",
    shortname = "acs",
    namespaced,
    status = "CredentialStatus",
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct AzureClientSecretSpec {
    /// Kubernetes Secret to create/update with the provisioned credentials
    pub secret_ref: SecretReference,

    /// Object ID of the Azure AD application to manage passwords for
    pub object_id: String,

    /// How long each provisioned credential stays valid (e.g. `"30d"`,
    /// `"2160h"`). Defaults to 90 days.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validity: Option<String>,

    /// Maps output secret keys to template strings. Available placeholders:
    /// `{{ClientID}}`, `{{ClientSecret}}`
    pub template: BTreeMap<String, String>,
}

impl AzureClientSecret {
    /// Returns the configured credential lifetime, defaulting to 90 days.
    pub fn validity(&self) -> TimeDelta {
        self.spec
            .validity
            .as_deref()
            .and_then(|v| parse_duration(v).ok())
            .and_then(|d| TimeDelta::from_std(d).ok())
            .unwrap_or_else(default_validity)
    }
}

impl CredentialObject for AzureClientSecret {
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
        if self.spec.object_id.is_empty() {
            return Err(Error::validation("objectId is required"));
        }
        if self.spec.template.is_empty() {
            return Err(Error::validation("template must have at least one entry"));
        }
        for (key, template) in &self.spec.template {
            validate_template(template).map_err(|e| match e {
                Error::Validation(msg) => Error::validation(format!("template {key:?}: {msg}")),
                other => other,
            })?;
        }
        if let Some(validity) = &self.spec.validity {
            parse_duration(validity)?;
        }
        Ok(())
    }
}

/// Substitutes the supported placeholders into a template string.
pub(crate) fn render_template(template: &str, client_id: &str, client_secret: &str) -> String {
    template
        .replace("{{ClientID}}", client_id)
        .replace("{{ClientSecret}}", client_secret)
}

/// Rejects templates containing placeholders other than the supported ones.
fn validate_template(template: &str) -> Result<()> {
    let rendered = render_template(template, "", "");
    if let Some(start) = rendered.find("{{") {
        let tail = &rendered[start..];
        let placeholder = tail
            .find("}}")
            .map(|end| &tail[..end + 2])
            .unwrap_or(tail);
        return Err(Error::validation(format!(
            "unknown placeholder {placeholder:?}, supported: {{{{ClientID}}}}, {{{{ClientSecret}}}}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_spec() -> AzureClientSecretSpec {
        AzureClientSecretSpec {
            secret_ref: SecretReference {
                name: "app-creds".to_string(),
            },
            object_id: "00000000-0000-0000-0000-000000000001".to_string(),
            validity: None,
            template: BTreeMap::from([
                ("AZURE_CLIENT_ID".to_string(), "{{ClientID}}".to_string()),
                (
                    "AZURE_CLIENT_SECRET".to_string(),
                    "{{ClientSecret}}".to_string(),
                ),
            ]),
        }
    }

    #[test]
    fn test_validate_accepts_complete_spec() {
        let obj = AzureClientSecret::new("test", sample_spec());
        assert!(obj.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_missing_secret_ref() {
        let mut spec = sample_spec();
        spec.secret_ref.name.clear();
        let obj = AzureClientSecret::new("test", spec);

        let err = obj.validate().unwrap_err();
        assert!(err.to_string().contains("secretRef"));
    }

    #[test]
    fn test_validate_rejects_missing_object_id() {
        let mut spec = sample_spec();
        spec.object_id.clear();
        let obj = AzureClientSecret::new("test", spec);

        let err = obj.validate().unwrap_err();
        assert!(err.to_string().contains("objectId"));
    }

    #[test]
    fn test_validate_rejects_empty_template() {
        let mut spec = sample_spec();
        spec.template.clear();
        let obj = AzureClientSecret::new("test", spec);
        assert!(obj.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_unknown_placeholder() {
        let mut spec = sample_spec();
        spec.template.insert(
            "BROKEN".to_string(),
            "{{TenantID}}".to_string(),
        );
        let obj = AzureClientSecret::new("test", spec);

        let err = obj.validate().unwrap_err();
        assert!(err.to_string().contains("BROKEN"));
        assert!(err.to_string().contains("TenantID"));
    }

    #[test]
    fn test_validate_rejects_bad_validity() {
        let mut spec = sample_spec();
        spec.validity = Some("ninety days".to_string());
        let obj = AzureClientSecret::new("test", spec);
        assert!(obj.validate().is_err());
    }

    #[test]
    fn test_validity_defaults_to_90_days() {
        let obj = AzureClientSecret::new("test", sample_spec());
        assert_eq!(obj.validity(), TimeDelta::days(90));
    }

    #[test]
    fn test_validity_from_spec() {
        let mut spec = sample_spec();
        spec.validity = Some("30d".to_string());
        let obj = AzureClientSecret::new("test", spec);
        assert_eq!(obj.validity(), TimeDelta::days(30));
    }

    #[test]
    fn test_render_template_substitutes_both_placeholders() {
        let rendered = render_template(
            "id={{ClientID}};secret={{ClientSecret}}",
            "app-123",
            "s3cret",
        );
        assert_eq!(rendered, "id=app-123;secret=s3cret");
    }

    #[test]
    fn test_render_template_without_placeholders_is_identity() {
        assert_eq!(render_template("static", "a", "b"), "static");
    }
}
