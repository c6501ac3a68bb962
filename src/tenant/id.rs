use std::fmt;

use serde::{Deserialize, Serialize};

use super::context::TenantError;

/// Longest tenant identifier accepted from a credential or header
pub const MAX_TENANT_ID_LEN: usize = 128;

/// Opaque token naming one tenant. Never blank once constructed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TenantId(String);

impl TenantId {
    /// Validate and wrap a raw identifier
    pub fn parse(raw: impl Into<String>) -> Result<Self, TenantError> {
        let raw = raw.into();

        if raw.trim().is_empty() {
            return Err(TenantError::Invalid("tenant identifier is blank".to_string()));
        }
        if raw.len() > MAX_TENANT_ID_LEN {
            return Err(TenantError::Invalid(format!(
                "tenant identifier exceeds {} bytes",
                MAX_TENANT_ID_LEN
            )));
        }
        if raw.chars().any(char::is_control) {
            return Err(TenantError::Invalid(
                "tenant identifier contains control characters".to_string(),
            ));
        }

        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for TenantId {
    type Error = TenantError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<TenantId> for String {
    fn from(id: TenantId) -> Self {
        id.0
    }
}

impl AsRef<str> for TenantId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
