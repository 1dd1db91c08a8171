//! Deployment specification: the immutable input of a reconciliation run.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use super::error::{ConvergeError, Result};
use super::status::ReconciliationStatus;

/// Where the provider should read the template or manifest from.
///
/// Exactly one source exists per spec, so the body/locator exclusivity is
/// carried by the type itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateSource {
    /// Inline template body, passed through to the provider untouched.
    Body(String),
    /// Locator the provider fetches the template from.
    Url(String),
}

impl TemplateSource {
    fn is_empty(&self) -> bool {
        match self {
            TemplateSource::Body(body) => body.trim().is_empty(),
            TemplateSource::Url(url) => url.trim().is_empty(),
        }
    }
}

/// One ordered template parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    pub key: String,
    pub value: String,
}

impl Parameter {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Desired state of one remote target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "SpecDocument", into = "SpecDocument")]
pub struct DeploymentSpec {
    /// Stable identity of the target within its scope.
    pub target_name: String,

    /// Template or manifest handed to the provider as an opaque blob.
    pub template: TemplateSource,

    /// Template parameters, in caller order.
    pub parameters: Vec<Parameter>,

    /// Tags propagated to the target.
    pub tags: BTreeMap<String, String>,

    /// Acknowledgement flags the provider requires (e.g. IAM capabilities).
    pub capabilities: BTreeSet<String>,

    /// Identity override the provider should act as.
    pub credential_role: Option<String>,

    /// Wall-clock budget for the poll loop.
    pub timeout: Duration,

    /// Statuses the caller accepts as non-failure on the update path.
    pub statuses_to_treat_as_success: BTreeSet<ReconciliationStatus>,
}

impl DeploymentSpec {
    /// Create a spec with no parameters, tags, capabilities or overrides.
    pub fn new(
        target_name: impl Into<String>,
        template: TemplateSource,
        timeout: Duration,
    ) -> Self {
        Self {
            target_name: target_name.into(),
            template,
            parameters: Vec::new(),
            tags: BTreeMap::new(),
            capabilities: BTreeSet::new(),
            credential_role: None,
            timeout,
            statuses_to_treat_as_success: BTreeSet::new(),
        }
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.push(Parameter::new(key, value));
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.capabilities.insert(capability.into());
        self
    }

    pub fn with_credential_role(mut self, role: impl Into<String>) -> Self {
        self.credential_role = Some(role.into());
        self
    }

    pub fn with_success_status(mut self, status: ReconciliationStatus) -> Self {
        self.statuses_to_treat_as_success.insert(status);
        self
    }

    /// Copy of this spec aimed at a different target name.
    pub fn renamed(&self, target_name: impl Into<String>) -> Self {
        Self {
            target_name: target_name.into(),
            ..self.clone()
        }
    }

    /// Whether the caller accepts `status` as a non-failure outcome.
    pub fn accepts(&self, status: ReconciliationStatus) -> bool {
        self.statuses_to_treat_as_success.contains(&status)
    }

    /// Check the contract a spec must satisfy before a run starts.
    pub fn validate(&self) -> Result<()> {
        if self.target_name.trim().is_empty() {
            return Err(ConvergeError::InvalidSpec(
                "target_name is empty".to_string(),
            ));
        }
        if self.template.is_empty() {
            return Err(ConvergeError::InvalidSpec(format!(
                "template for {} is empty",
                self.target_name
            )));
        }
        if self.timeout.is_zero() {
            return Err(ConvergeError::InvalidSpec(format!(
                "timeout for {} must be greater than zero",
                self.target_name
            )));
        }
        Ok(())
    }

    /// Parse and validate a JSON spec document.
    pub fn from_json(json: &str) -> Result<Self> {
        let spec: DeploymentSpec = serde_json::from_str(json)?;
        spec.validate()?;
        Ok(spec)
    }
}

/// Wire shape of a [`DeploymentSpec`].
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SpecDocument {
    target_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    template_body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    template_url: Option<String>,
    #[serde(default)]
    parameters: Vec<Parameter>,
    #[serde(default)]
    tags: BTreeMap<String, String>,
    #[serde(default)]
    capabilities: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    credential_role: Option<String>,
    timeout_secs: u64,
    #[serde(default)]
    statuses_to_treat_as_success: BTreeSet<ReconciliationStatus>,
}

impl TryFrom<SpecDocument> for DeploymentSpec {
    type Error = String;

    fn try_from(doc: SpecDocument) -> std::result::Result<Self, Self::Error> {
        let template = match (doc.template_body, doc.template_url) {
            (Some(body), None) => TemplateSource::Body(body),
            (None, Some(url)) => TemplateSource::Url(url),
            (Some(_), Some(_)) => {
                return Err("only one of template_body and template_url may be set".to_string())
            }
            (None, None) => {
                return Err("one of template_body or template_url is required".to_string())
            }
        };
        Ok(DeploymentSpec {
            target_name: doc.target_name,
            template,
            parameters: doc.parameters,
            tags: doc.tags,
            capabilities: doc.capabilities,
            credential_role: doc.credential_role,
            timeout: Duration::from_secs(doc.timeout_secs),
            statuses_to_treat_as_success: doc.statuses_to_treat_as_success,
        })
    }
}

impl From<DeploymentSpec> for SpecDocument {
    fn from(spec: DeploymentSpec) -> Self {
        let (template_body, template_url) = match spec.template {
            TemplateSource::Body(body) => (Some(body), None),
            TemplateSource::Url(url) => (None, Some(url)),
        };
        SpecDocument {
            target_name: spec.target_name,
            template_body,
            template_url,
            parameters: spec.parameters,
            tags: spec.tags,
            capabilities: spec.capabilities,
            credential_role: spec.credential_role,
            timeout_secs: spec.timeout.as_secs(),
            statuses_to_treat_as_success: spec.statuses_to_treat_as_success,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> DeploymentSpec {
        DeploymentSpec::new(
            "network-stack",
            TemplateSource::Body("Resources: {}".to_string()),
            Duration::from_secs(600),
        )
    }

    #[test]
    fn builder_keeps_parameter_order() {
        let spec = spec()
            .with_parameter("VpcCidr", "10.0.0.0/16")
            .with_parameter("AzCount", "3")
            .with_parameter("Env", "prod");
        let keys: Vec<_> = spec.parameters.iter().map(|p| p.key.as_str()).collect();
        assert_eq!(keys, vec!["VpcCidr", "AzCount", "Env"]);
    }

    #[test]
    fn validate_rejects_empty_name_template_and_timeout() {
        let mut bad = spec();
        bad.target_name = "  ".to_string();
        assert!(bad.validate().is_err());

        let mut bad = spec();
        bad.template = TemplateSource::Url(String::new());
        assert!(bad.validate().is_err());

        let mut bad = spec();
        bad.timeout = Duration::ZERO;
        let err = bad.validate().unwrap_err();
        assert!(err.to_string().contains("greater than zero"));

        assert!(spec().validate().is_ok());
    }

    #[test]
    fn json_document_requires_exactly_one_template_source() {
        let both = r#"{"target_name":"s","template_body":"b","template_url":"u","timeout_secs":60}"#;
        assert!(DeploymentSpec::from_json(both).is_err());

        let neither = r#"{"target_name":"s","timeout_secs":60}"#;
        assert!(DeploymentSpec::from_json(neither).is_err());

        let url = r#"{
            "target_name": "s",
            "template_url": "https://templates.example.com/vpc.yaml",
            "timeout_secs": 60,
            "statuses_to_treat_as_success": ["UPDATE_ROLLBACK_COMPLETE"]
        }"#;
        let parsed = DeploymentSpec::from_json(url).expect("parse");
        assert_eq!(
            parsed.template,
            TemplateSource::Url("https://templates.example.com/vpc.yaml".to_string())
        );
        assert!(parsed.accepts(ReconciliationStatus::UpdateRollbackComplete));
        assert_eq!(parsed.timeout, Duration::from_secs(60));
    }

    #[test]
    fn renamed_keeps_everything_else() {
        let original = spec().with_tag("team", "platform");
        let renamed = original.renamed("network-stack__4");
        assert_eq!(renamed.target_name, "network-stack__4");
        assert_eq!(renamed.tags, original.tags);
        assert_eq!(renamed.template, original.template);
    }
}
