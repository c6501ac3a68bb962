use axum::extract::{Extension, Path, Query, State};
use axum::Json;
use uuid::Uuid;

use crate::app::AppState;
use crate::database::models::{CreateStockBatchRequest, PagedResponse, StockBatchDto};
use crate::database::pool::ConnectionManager;
use crate::database::session::RecordStore;
use crate::middleware::{ApiResponse, ApiResult};
use crate::tenant::TenantContext;

use super::PageParams;

/// POST /api/v1/stock-batches
pub async fn create<M>(
    State(state): State<AppState<M>>,
    Extension(ctx): Extension<TenantContext>,
    Json(req): Json<CreateStockBatchRequest>,
) -> ApiResult<StockBatchDto>
where
    M: ConnectionManager,
    M::Connection: RecordStore,
{
    let batch = state.stock_batches.create(&ctx, req).await?;
    Ok(ApiResponse::created(batch))
}

/// GET /api/v1/stock-batches?page=&size=
pub async fn list<M>(
    State(state): State<AppState<M>>,
    Extension(ctx): Extension<TenantContext>,
    Query(params): Query<PageParams>,
) -> ApiResult<PagedResponse<StockBatchDto>>
where
    M: ConnectionManager,
    M::Connection: RecordStore,
{
    let (page, size) = state.paging.resolve(&params);
    let batches = state.stock_batches.list(&ctx, page, size).await?;
    Ok(ApiResponse::success(batches))
}

/// GET /api/v1/stock-batches/:id
pub async fn show<M>(
    State(state): State<AppState<M>>,
    Extension(ctx): Extension<TenantContext>,
    Path(id): Path<Uuid>,
) -> ApiResult<StockBatchDto>
where
    M: ConnectionManager,
    M::Connection: RecordStore,
{
    let batch = state.stock_batches.find_by_id(&ctx, id).await?;
    Ok(ApiResponse::success(batch))
}
