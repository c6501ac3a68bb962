use tracing::info;
use uuid::Uuid;

use crate::database::models::{CreateStockBatchRequest, PagedResponse, Product, StockBatch, StockBatchDto};
use crate::database::pool::{ConnectionManager, IsolatedPool};
use crate::database::repository::Repository;
use crate::database::session::RecordStore;
use crate::tenant::{TenantContext, TenantId};

use super::ServiceError;

pub struct StockBatchService<M: ConnectionManager> {
    pool: IsolatedPool<M>,
    batches: Repository<StockBatch>,
    products: Repository<Product>,
}

impl<M: ConnectionManager> Clone for StockBatchService<M> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            batches: self.batches,
            products: self.products,
        }
    }
}

impl<M> StockBatchService<M>
where
    M: ConnectionManager,
    M::Connection: RecordStore,
{
    pub fn new(pool: IsolatedPool<M>) -> Self {
        Self {
            pool,
            batches: Repository::new(),
            products: Repository::new(),
        }
    }

    /// The product lookup and the insert share one checkout, so both run
    /// under the same tenant scope.
    pub async fn create(&self, ctx: &TenantContext, req: CreateStockBatchRequest) -> Result<StockBatchDto, ServiceError> {
        req.validate().map_err(ServiceError::Validation)?;
        let batch = StockBatch::from(req);
        let (batches, products) = (self.batches, self.products);

        let created = self
            .pool
            .with_connection(ctx, move |conn| {
                Box::pin(async move {
                    products.select_404(&mut *conn, batch.product_id).await?;
                    Ok::<_, ServiceError>(batches.insert(conn, &batch).await?)
                })
            })
            .await?;

        info!(
            tenant = ctx.get().map(TenantId::as_str),
            batch_id = %created.id,
            product_id = %created.product_id,
            status = ?created.status,
            "stock batch created"
        );
        Ok(created.into())
    }

    pub async fn list(&self, ctx: &TenantContext, page: u32, size: u32) -> Result<PagedResponse<StockBatchDto>, ServiceError> {
        let batches = self.batches;
        let (rows, total) = self
            .pool
            .with_connection(ctx, move |conn| {
                Box::pin(async move { Ok::<_, ServiceError>(batches.select_page(conn, page, size).await?) })
            })
            .await?;

        Ok(PagedResponse::new(rows, page, size, total).map(StockBatchDto::from))
    }

    pub async fn find_by_id(&self, ctx: &TenantContext, id: Uuid) -> Result<StockBatchDto, ServiceError> {
        let batches = self.batches;
        let batch = self
            .pool
            .with_connection(ctx, move |conn| {
                Box::pin(async move { Ok::<_, ServiceError>(batches.select_404(conn, id).await?) })
            })
            .await?;
        Ok(batch.into())
    }
}
