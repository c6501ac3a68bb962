use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use crate::error::ApiError;
use crate::tenant::{TenantContext, TenantId, TenantResolver};

/// Seeds a fresh [`TenantContext`] for every request and stores it in the
/// request extensions, where handlers pick it up with `Extension`.
///
/// Resolution failures (bad token, conflicting tenants) end the request
/// here, before any handler can check out a connection.
pub async fn tenant_context_middleware(
    State(resolver): State<TenantResolver>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let ctx = TenantContext::new();

    if let Err(e) = resolver.resolve(request.headers(), &ctx) {
        tracing::warn!(
            method = %request.method(),
            path = %request.uri().path(),
            error = %e,
            "tenant resolution failed"
        );
        return Err(e.into());
    }

    tracing::debug!(
        tenant = ctx.get().map(TenantId::as_str),
        path = %request.uri().path(),
        "tenant context resolved"
    );

    request.extensions_mut().insert(ctx);
    Ok(next.run(request).await)
}
