#![allow(dead_code)]

use anyhow::Result;
use axum::body::{Body, Bytes};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use serde_json::Value;
use tower::ServiceExt;

use demeter_api::app::{router, AppState};
use demeter_api::auth::{generate_jwt, Claims};
use demeter_api::config::AppConfig;
use demeter_api::database::memory::MemoryDatabase;
use demeter_api::database::pool::IsolatedPool;

pub const SECRET: &str = "integration-secret";

/// Router on the embedded backend, plus handles to inspect what it did
pub struct TestApp {
    pub router: Router,
    pub db: MemoryDatabase,
    pub pool: IsolatedPool<MemoryDatabase>,
}

pub fn config(max_connections: u32) -> AppConfig {
    let mut config = AppConfig::development();
    config.database.max_connections = max_connections;
    config.database.acquire_timeout_secs = 5;
    config.security.jwt_secret = SECRET.to_string();
    config
}

impl TestApp {
    /// Single-connection pool, so every request reuses the same physical
    /// connection as the one before it
    pub fn new() -> Self {
        Self::with_pool_size(1)
    }

    pub fn with_pool_size(max_connections: u32) -> Self {
        let config = config(max_connections);
        let db = MemoryDatabase::new();
        let state = AppState::new(db.clone(), "memory", &config);
        let pool = state.pool.clone();
        Self {
            router: router(state, &config),
            db,
            pool,
        }
    }

    pub async fn send_raw(&self, request: Request<Body>) -> Result<(StatusCode, Bytes)> {
        let response = self.router.clone().oneshot(request).await?;
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
        Ok((status, bytes))
    }

    pub async fn send(&self, request: Request<Body>) -> Result<(StatusCode, Value)> {
        let (status, bytes) = self.send_raw(request).await?;
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)?
        };
        Ok((status, body))
    }

    pub async fn get(&self, path: &str, tenant: Option<&str>) -> Result<(StatusCode, Value)> {
        self.send(get(path, tenant)?).await
    }

    pub async fn post(&self, path: &str, tenant: Option<&str>, body: Value) -> Result<(StatusCode, Value)> {
        self.send(post(path, tenant, body)?).await
    }

    /// Create a product for `tenant` and return its id
    pub async fn create_product(&self, tenant: &str, sku: &str) -> Result<String> {
        let (status, body) = self
            .post(
                "/api/v1/products",
                Some(tenant),
                serde_json::json!({ "sku": sku, "name": format!("Product {}", sku) }),
            )
            .await?;
        anyhow::ensure!(status == StatusCode::CREATED, "create failed: {} {}", status, body);
        body["data"]["id"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| anyhow::anyhow!("no id in {}", body))
    }
}

pub fn get(path: &str, tenant: Option<&str>) -> Result<Request<Body>> {
    let mut builder = Request::builder().method("GET").uri(path);
    if let Some(t) = tenant {
        builder = builder.header("x-tenant-id", t);
    }
    Ok(builder.body(Body::empty())?)
}

pub fn post(path: &str, tenant: Option<&str>, body: Value) -> Result<Request<Body>> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(path)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(t) = tenant {
        builder = builder.header("x-tenant-id", t);
    }
    Ok(builder.body(Body::from(body.to_string()))?)
}

pub fn bearer(tenant: Option<&str>) -> Result<String> {
    let claims = Claims::new("user-1".into(), tenant.map(str::to_string), vec![], 1);
    Ok(format!("Bearer {}", generate_jwt(&claims, SECRET)?))
}
