use axum::extract::{Extension, Path, Query, State};
use axum::Json;
use uuid::Uuid;

use crate::app::AppState;
use crate::database::models::{CreateProductRequest, PagedResponse, ProductDto};
use crate::database::pool::ConnectionManager;
use crate::database::session::RecordStore;
use crate::middleware::{ApiResponse, ApiResult};
use crate::tenant::TenantContext;

use super::PageParams;

/// POST /api/v1/products
pub async fn create<M>(
    State(state): State<AppState<M>>,
    Extension(ctx): Extension<TenantContext>,
    Json(req): Json<CreateProductRequest>,
) -> ApiResult<ProductDto>
where
    M: ConnectionManager,
    M::Connection: RecordStore,
{
    let product = state.products.create(&ctx, req).await?;
    Ok(ApiResponse::created(product))
}

/// GET /api/v1/products?page=&size=
pub async fn list<M>(
    State(state): State<AppState<M>>,
    Extension(ctx): Extension<TenantContext>,
    Query(params): Query<PageParams>,
) -> ApiResult<PagedResponse<ProductDto>>
where
    M: ConnectionManager,
    M::Connection: RecordStore,
{
    let (page, size) = state.paging.resolve(&params);
    let products = state.products.list(&ctx, page, size).await?;
    Ok(ApiResponse::success(products))
}

/// GET /api/v1/products/:id
pub async fn show<M>(
    State(state): State<AppState<M>>,
    Extension(ctx): Extension<TenantContext>,
    Path(id): Path<Uuid>,
) -> ApiResult<ProductDto>
where
    M: ConnectionManager,
    M::Connection: RecordStore,
{
    let product = state.products.find_by_id(&ctx, id).await?;
    Ok(ApiResponse::success(product))
}
