use axum::http::{header::AUTHORIZATION, HeaderMap, HeaderName};
use thiserror::Error;

use crate::auth::{decode_jwt, Claims};
use crate::config::AppConfig;

use super::context::{TenantContext, TenantError};
use super::id::TenantId;

pub const DEFAULT_TENANT_HEADER: &str = "x-tenant-id";

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    BadHeader(String),

    #[error(transparent)]
    Tenant(#[from] TenantError),
}

/// Reads the tenant of an inbound request from its credential and headers
#[derive(Debug, Clone)]
pub struct TenantResolver {
    header: HeaderName,
    jwt_secret: String,
}

impl TenantResolver {
    pub fn new(header: HeaderName, jwt_secret: impl Into<String>) -> Self {
        Self {
            header,
            jwt_secret: jwt_secret.into(),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        let header = HeaderName::try_from(config.api.tenant_header.as_str()).unwrap_or_else(|_| {
            tracing::warn!(
                header = %config.api.tenant_header,
                "invalid tenant header name configured, falling back to {}",
                DEFAULT_TENANT_HEADER
            );
            HeaderName::from_static(DEFAULT_TENANT_HEADER)
        });
        Self::new(header, config.security.jwt_secret.clone())
    }

    /// Bind every tenant the request names onto `ctx`.
    ///
    /// The token claim and the header may both be present; they must agree.
    pub fn resolve(&self, headers: &HeaderMap, ctx: &TenantContext) -> Result<(), ResolveError> {
        if let Some(claims) = self.bearer_claims(headers)? {
            if let Some(raw) = claims.tenant_id {
                ctx.set(TenantId::parse(raw)?)?;
            }
        }

        if let Some(value) = headers.get(&self.header) {
            let raw = value
                .to_str()
                .map_err(|_| ResolveError::BadHeader(format!("{} header is not valid UTF-8", self.header)))?;
            let tenant = TenantId::parse(raw)
                .map_err(|e| ResolveError::BadHeader(format!("{} header: {}", self.header, e)))?;
            ctx.set(tenant)?;
        }

        Ok(())
    }

    fn bearer_claims(&self, headers: &HeaderMap) -> Result<Option<Claims>, ResolveError> {
        let Some(value) = headers.get(AUTHORIZATION) else {
            return Ok(None);
        };

        let auth_str = value
            .to_str()
            .map_err(|_| ResolveError::Unauthorized("Invalid Authorization header format".to_string()))?;

        let token = auth_str
            .strip_prefix("Bearer ")
            .ok_or_else(|| ResolveError::Unauthorized("Authorization header must use Bearer token format".to_string()))?;

        if token.trim().is_empty() {
            return Err(ResolveError::Unauthorized("Empty JWT token".to_string()));
        }

        decode_jwt(token, &self.jwt_secret)
            .map(Some)
            .map_err(|e| ResolveError::Unauthorized(e.to_string()))
    }
}
