use axum::{middleware, routing::get, Router};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::AppConfig;
use crate::database::manager::Backend;
use crate::database::memory::MemoryDatabase;
use crate::database::pool::{ConnectionManager, IsolatedPool, PoolConfig};
use crate::database::postgres::PgConnectionManager;
use crate::database::session::RecordStore;
use crate::handlers::{self, Paging};
use crate::middleware::tenant_context_middleware;
use crate::services::{ProductService, StockBatchService};
use crate::tenant::TenantResolver;

/// Shared handler state. One pool per process; services borrow it per call.
pub struct AppState<M: ConnectionManager> {
    pub pool: IsolatedPool<M>,
    pub products: ProductService<M>,
    pub stock_batches: StockBatchService<M>,
    pub paging: Paging,
    pub backend: &'static str,
}

impl<M: ConnectionManager> Clone for AppState<M> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            products: self.products.clone(),
            stock_batches: self.stock_batches.clone(),
            paging: self.paging,
            backend: self.backend,
        }
    }
}

impl<M> AppState<M>
where
    M: ConnectionManager,
    M::Connection: RecordStore,
{
    pub fn new(manager: M, backend: &'static str, config: &AppConfig) -> Self {
        let pool = IsolatedPool::with_rls(manager, PoolConfig::from(&config.database));
        Self {
            products: ProductService::new(pool.clone()),
            stock_batches: StockBatchService::new(pool.clone()),
            pool,
            paging: Paging::from_config(&config.api),
            backend,
        }
    }
}

pub fn router<M>(state: AppState<M>, config: &AppConfig) -> Router
where
    M: ConnectionManager,
    M::Connection: RecordStore,
{
    let resolver = TenantResolver::from_config(config);

    let api = Router::new()
        .route(
            "/api/v1/products",
            get(handlers::products::list::<M>).post(handlers::products::create::<M>),
        )
        .route("/api/v1/products/:id", get(handlers::products::show::<M>))
        .route(
            "/api/v1/stock-batches",
            get(handlers::stock_batches::list::<M>).post(handlers::stock_batches::create::<M>),
        )
        .route("/api/v1/stock-batches/:id", get(handlers::stock_batches::show::<M>))
        .route_layer(middleware::from_fn_with_state(resolver, tenant_context_middleware));

    let app = Router::new()
        .route("/", get(handlers::health::root))
        .route("/health", get(handlers::health::health::<M>))
        .merge(api)
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if config.security.enable_cors {
        app.layer(CorsLayer::permissive())
    } else {
        app
    }
}

/// Pick the backend from `DATABASE_URL` and serve until ctrl-c
pub async fn run(config: &AppConfig) -> anyhow::Result<()> {
    let backend = Backend::from_url(&config.database.url)?;
    tracing::info!(backend = backend.name(), "database backend selected");

    match backend {
        Backend::Memory => serve(AppState::new(MemoryDatabase::new(), "memory", config), config).await,
        Backend::Postgres(options) => {
            serve(AppState::new(PgConnectionManager::new(options), "postgres", config), config).await
        }
    }
}

async fn serve<M>(state: AppState<M>, config: &AppConfig) -> anyhow::Result<()>
where
    M: ConnectionManager,
    M::Connection: RecordStore,
{
    let pool = state.pool.clone();
    let app = router(state, config);

    let bind_addr = format!("0.0.0.0:{}", config.api.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| anyhow::anyhow!("failed to bind {}: {}", bind_addr, e))?;

    tracing::info!("Demeter API listening on http://{}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    pool.close();
    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
