use clap::Args;
use serde_json::json;

use crate::cli::utils::output_success;
use crate::cli::OutputFormat;
use crate::config::AppConfig;
use crate::database::manager::Backend;
use crate::database::memory::MemoryDatabase;
use crate::database::pool::{ConnectionManager, IsolatedPool, PoolConfig};
use crate::database::postgres::PgConnectionManager;
use crate::database::session::RecordStore;
use crate::tenant::{TenantContext, TenantId};

#[derive(Args, Debug)]
pub struct PingArgs {
    #[arg(long, help = "Tenant to bind on the connection (unscoped if omitted)")]
    pub tenant: Option<String>,
}

pub async fn handle(args: PingArgs, config: &AppConfig, output_format: OutputFormat) -> anyhow::Result<()> {
    let ctx = TenantContext::new();
    if let Some(raw) = args.tenant {
        ctx.set(TenantId::parse(raw)?)?;
    }

    let pool_config = PoolConfig::from(&config.database);
    match Backend::from_url(&config.database.url)? {
        Backend::Memory => ping(IsolatedPool::with_rls(MemoryDatabase::new(), pool_config), &ctx, "memory", &output_format).await,
        Backend::Postgres(options) => {
            ping(
                IsolatedPool::with_rls(PgConnectionManager::new(options), pool_config),
                &ctx,
                "postgres",
                &output_format,
            )
            .await
        }
    }
}

async fn ping<M>(pool: IsolatedPool<M>, ctx: &TenantContext, backend: &str, output_format: &OutputFormat) -> anyhow::Result<()>
where
    M: ConnectionManager,
    M::Connection: RecordStore,
{
    let mut lease = pool.acquire(ctx).await?;
    let connection_id = lease.id();
    let result = lease.ping().await;
    lease.release().await;
    result?;

    let stats = pool.stats();
    pool.close();

    output_success(
        output_format,
        &format!(
            "{} reachable, tenant {}",
            backend,
            ctx.get().map(TenantId::as_str).unwrap_or("<none>")
        ),
        Some(json!({
            "backend": backend,
            "tenant": ctx.get(),
            "connection_id": connection_id,
            "pool": stats,
        })),
    )
}
