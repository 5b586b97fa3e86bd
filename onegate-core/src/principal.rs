use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What kind of caller a [`Principal`] represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrincipalKind {
    User,
    ExternalApp,
}

/// The authenticated caller of one request.
///
/// Constructed by an authenticator, stored in the request context for the
/// lifetime of the request, never persisted by the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Principal {
    pub id: String,
    pub name: String,
    pub kind: PrincipalKind,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub details: Value,
}

impl Principal {
    pub fn user(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind: PrincipalKind::User,
            roles: Vec::new(),
            details: Value::Null,
        }
    }

    pub fn external_app(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind: PrincipalKind::ExternalApp,
            roles: Vec::new(),
            details: Value::Null,
        }
    }

    pub fn with_roles(mut self, roles: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.roles = roles.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    /// Token subject form: `<id>@<name>`.
    pub fn subject(&self) -> String {
        format!("{}@{}", self.id, self.name)
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

/// Mask an identifier for log output: first three characters survive, the
/// rest collapses to `***`.
pub fn mask_identifier(value: &str) -> String {
    let visible: String = value.chars().take(3).collect();
    format!("{visible}***")
}
