mod common;

use std::collections::HashMap;

use anyhow::Result;
use axum::http::StatusCode;
use demeter_api::database::memory::Statement;
use serde_json::json;

use common::TestApp;

#[tokio::test]
async fn failed_reset_evicts_without_failing_the_request() -> Result<()> {
    let app = TestApp::new();
    app.db.fail_next_reset();

    let (status, _) = app
        .post("/api/v1/products", Some("alpha"), json!({ "sku": "A-1", "name": "Seed" }))
        .await?;
    assert_eq!(status, StatusCode::CREATED);

    let stats = app.pool.stats();
    assert_eq!(stats.evicted, 1);
    assert_eq!(stats.open, 0);

    // The next checkout opens a fresh connection, bound only to beta
    let (status, body) = app.get("/api/v1/products", Some("beta")).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["totalElements"], 0);
    assert_eq!(app.pool.stats().opened, 2);

    let per_connection: HashMap<u64, Vec<Statement>> =
        app.db.statements().into_iter().fold(HashMap::new(), |mut acc, s| {
            acc.entry(s.connection).or_default().push(s.statement);
            acc
        });
    assert_eq!(per_connection.len(), 2);
    assert_eq!(per_connection[&2][0], Statement::Bind("beta".into()));
    Ok(())
}

#[tokio::test]
async fn failed_bind_fails_the_request() -> Result<()> {
    let app = TestApp::new();
    app.db.fail_next_bind();

    let (status, body) = app.get("/api/v1/products", Some("alpha")).await?;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["code"], "INTERNAL_SERVER_ERROR");
    assert_eq!(app.pool.stats().evicted, 1);

    let (status, _) = app.get("/api/v1/products", Some("alpha")).await?;
    assert_eq!(status, StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn health_reports_pool_stats() -> Result<()> {
    let app = TestApp::new();
    let (status, body) = app.get("/health", None).await?;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["database"], "ok");
    assert_eq!(body["data"]["backend"], "memory");
    assert_eq!(body["data"]["pool"]["checkouts"], 1);
    assert_eq!(body["data"]["pool"]["idle"], 1);

    // Health never binds a tenant
    assert_eq!(app.db.statements_for(1), vec![Statement::Ping, Statement::Reset]);
    Ok(())
}

#[tokio::test]
async fn health_is_unavailable_when_backend_is_down() -> Result<()> {
    let app = TestApp::new();
    app.db.fail_next_connect();

    let (status, body) = app.get("/health", None).await?;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["success"], false);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_stay_in_their_tenant() -> Result<()> {
    let app = TestApp::with_pool_size(2);
    let tenants = ["alpha", "beta", "gamma"];

    let mut handles = Vec::new();
    for i in 0..30 {
        let tenant = tenants[i % tenants.len()];
        let request = common::post(
            "/api/v1/products",
            Some(tenant),
            json!({ "sku": format!("{}-{}", tenant, i), "name": "Concurrent" }),
        )?;
        let router = app.router.clone();
        handles.push(tokio::spawn(async move {
            use tower::ServiceExt;
            router.oneshot(request).await.map(|r| r.status())
        }));
    }
    for handle in handles {
        assert_eq!(handle.await??, StatusCode::CREATED);
    }

    for tenant in tenants {
        let (_, body) = app.get("/api/v1/products?size=100", Some(tenant)).await?;
        assert_eq!(body["data"]["totalElements"], 10);
        let content = body["data"]["content"].as_array().cloned().unwrap_or_default();
        assert!(content
            .iter()
            .all(|p| p["sku"].as_str().unwrap_or_default().starts_with(tenant)));
    }

    let stats = app.pool.stats();
    assert!(stats.opened <= 2);
    assert_eq!(stats.evicted, 0);
    Ok(())
}
