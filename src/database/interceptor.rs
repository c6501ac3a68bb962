use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::database::manager::DatabaseError;
use crate::database::session::TenantSession;
use crate::tenant::{TenantContext, TenantId};

/// Failure to scope a freshly checked-out connection
#[derive(Debug, Error)]
pub enum IsolationError {
    #[error("failed to bind tenant '{tenant}' to connection: {source}")]
    Bind {
        tenant: TenantId,
        #[source]
        source: DatabaseError,
    },
}

/// What the pool does with a connection after checkin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseDecision {
    /// Session state is clean; the connection may serve another checkout
    Recycle,
    /// Session state is unknown; destroy the connection
    Evict,
}

/// Lifecycle hooks the pool runs synchronously around every checkout.
///
/// `on_acquire` completes before the caller gets the connection;
/// `on_release` completes before the connection can be checked out again.
#[async_trait]
pub trait PoolInterceptor<C: Send>: Send + Sync {
    async fn on_acquire(&self, conn: &mut C, ctx: &TenantContext) -> Result<(), IsolationError>;

    async fn on_release(&self, conn: &mut C) -> ReleaseDecision;
}

/// Binds the unit of work's tenant on checkout and clears it on checkin
#[derive(Debug, Clone, Copy, Default)]
pub struct RlsInterceptor;

#[async_trait]
impl<C: TenantSession> PoolInterceptor<C> for RlsInterceptor {
    async fn on_acquire(&self, conn: &mut C, ctx: &TenantContext) -> Result<(), IsolationError> {
        let Some(tenant) = ctx.get() else {
            debug!("no tenant in context, connection left unscoped");
            return Ok(());
        };

        conn.bind_tenant(tenant).await.map_err(|source| {
            error!(tenant = %tenant, error = %source, "tenant bind failed");
            IsolationError::Bind {
                tenant: tenant.clone(),
                source,
            }
        })?;

        debug!(tenant = %tenant, "tenant scope bound");
        Ok(())
    }

    async fn on_release(&self, conn: &mut C) -> ReleaseDecision {
        match conn.clear_tenant().await {
            Ok(()) => ReleaseDecision::Recycle,
            Err(e) => {
                warn!(error = %e, "tenant reset failed, connection must be evicted");
                ReleaseDecision::Evict
            }
        }
    }
}
