use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::{json, Value};

use crate::app::AppState;
use crate::database::pool::ConnectionManager;
use crate::database::session::RecordStore;
use crate::services::ServiceError;
use crate::tenant::TenantContext;

/// GET / - service banner
pub async fn root() -> Json<Value> {
    Json(json!({
        "success": true,
        "data": {
            "name": "Demeter API",
            "version": env!("CARGO_PKG_VERSION"),
            "endpoints": {
                "health": "/health",
                "products": "/api/v1/products[/:id]",
                "stock_batches": "/api/v1/stock-batches[/:id]",
            }
        }
    }))
}

/// GET /health - ping the backend on an unscoped connection
pub async fn health<M>(State(state): State<AppState<M>>) -> impl IntoResponse
where
    M: ConnectionManager,
    M::Connection: RecordStore,
{
    let now = chrono::Utc::now();

    let ping = state
        .pool
        .with_connection(&TenantContext::new(), |conn| {
            Box::pin(async move { Ok::<_, ServiceError>(conn.ping().await?) })
        })
        .await;

    match ping {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "data": {
                    "status": "ok",
                    "timestamp": now,
                    "database": "ok",
                    "backend": state.backend,
                    "pool": state.pool.stats(),
                }
            })),
        ),
        Err(e) => {
            tracing::error!(error = %e, "health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "success": false,
                    "error": "database unavailable",
                    "data": {
                        "status": "degraded",
                        "timestamp": now,
                        "backend": state.backend,
                        "pool": state.pool.stats(),
                    }
                })),
            )
        }
    }
}
