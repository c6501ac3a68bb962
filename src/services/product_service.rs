use tracing::info;
use uuid::Uuid;

use crate::database::models::{CreateProductRequest, PagedResponse, Product, ProductDto};
use crate::database::pool::{ConnectionManager, IsolatedPool};
use crate::database::repository::Repository;
use crate::database::session::RecordStore;
use crate::tenant::{TenantContext, TenantId};

use super::ServiceError;

pub struct ProductService<M: ConnectionManager> {
    pool: IsolatedPool<M>,
    products: Repository<Product>,
}

impl<M: ConnectionManager> Clone for ProductService<M> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            products: self.products,
        }
    }
}

impl<M> ProductService<M>
where
    M: ConnectionManager,
    M::Connection: RecordStore,
{
    pub fn new(pool: IsolatedPool<M>) -> Self {
        Self {
            pool,
            products: Repository::new(),
        }
    }

    pub async fn create(&self, ctx: &TenantContext, req: CreateProductRequest) -> Result<ProductDto, ServiceError> {
        req.validate().map_err(ServiceError::Validation)?;
        let product = Product::from(req);
        let products = self.products;

        let created = self
            .pool
            .with_connection(ctx, move |conn| {
                Box::pin(async move { Ok::<_, ServiceError>(products.insert(conn, &product).await?) })
            })
            .await?;

        info!(
            tenant = ctx.get().map(TenantId::as_str),
            product_id = %created.id,
            sku = %created.sku,
            "product created"
        );
        Ok(created.into())
    }

    /// Zero-based page of the products visible in `ctx`, oldest first
    pub async fn list(&self, ctx: &TenantContext, page: u32, size: u32) -> Result<PagedResponse<ProductDto>, ServiceError> {
        let products = self.products;
        let (rows, total) = self
            .pool
            .with_connection(ctx, move |conn| {
                Box::pin(async move { Ok::<_, ServiceError>(products.select_page(conn, page, size).await?) })
            })
            .await?;

        Ok(PagedResponse::new(rows, page, size, total).map(ProductDto::from))
    }

    pub async fn find_by_id(&self, ctx: &TenantContext, id: Uuid) -> Result<ProductDto, ServiceError> {
        let products = self.products;
        let product = self
            .pool
            .with_connection(ctx, move |conn| {
                Box::pin(async move { Ok::<_, ServiceError>(products.select_404(conn, id).await?) })
            })
            .await?;
        Ok(product.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::manager::DatabaseError;
    use crate::database::memory::MemoryDatabase;
    use crate::database::pool::PoolConfig;

    fn service() -> ProductService<MemoryDatabase> {
        ProductService::new(IsolatedPool::with_rls(MemoryDatabase::new(), PoolConfig::default()))
    }

    fn ctx(t: &str) -> TenantContext {
        TenantContext::for_tenant(TenantId::parse(t).unwrap())
    }

    fn request(sku: &str) -> CreateProductRequest {
        CreateProductRequest {
            sku: sku.to_string(),
            name: format!("Product {}", sku),
            description: None,
        }
    }

    #[tokio::test]
    async fn list_is_scoped_and_paged() {
        let svc = service();
        for sku in ["A-1", "A-2", "A-3"] {
            svc.create(&ctx("alpha"), request(sku)).await.unwrap();
        }
        svc.create(&ctx("beta"), request("B-1")).await.unwrap();

        let page = svc.list(&ctx("alpha"), 0, 2).await.unwrap();
        assert_eq!(page.total_elements, 3);
        assert_eq!(page.content.len(), 2);
        assert_eq!(page.content[0].sku, "A-1");

        let beta = svc.list(&ctx("beta"), 0, 20).await.unwrap();
        assert_eq!(beta.total_elements, 1);
        assert_eq!(beta.content[0].sku, "B-1");
    }

    #[tokio::test]
    async fn create_without_tenant_is_rejected_by_policy() {
        let err = service()
            .create(&TenantContext::new(), request("X-1"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Database(DatabaseError::PolicyViolation(_))));
    }

    #[tokio::test]
    async fn blank_sku_is_a_validation_error() {
        let err = service().create(&ctx("alpha"), request("  ")).await.unwrap_err();
        let ServiceError::Validation(fields) = err else {
            panic!("expected validation error, got {:?}", err);
        };
        assert_eq!(fields.len(), 1);
        assert_eq!(fields["sku"], "must not be blank");
    }

    #[tokio::test]
    async fn foreign_product_is_not_found() {
        let svc = service();
        let created = svc.create(&ctx("alpha"), request("A-1")).await.unwrap();

        assert_eq!(svc.find_by_id(&ctx("alpha"), created.id).await.unwrap(), created);
        let err = svc.find_by_id(&ctx("beta"), created.id).await.unwrap_err();
        assert!(matches!(err, ServiceError::Database(DatabaseError::NotFound(_))));
    }
}
