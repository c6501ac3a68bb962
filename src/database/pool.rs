//! Connection pool that scopes every checkout to one tenant.
//!
//! The pool owns the physical connections and runs a [`PoolInterceptor`] at
//! two fixed points:
//!
//! - after a connection is taken for a checkout and before the caller gets
//!   it (`on_acquire`), so the tenant bind is the first statement of the
//!   checkout;
//! - after the caller gives it back and before it re-enters the idle set or
//!   frees its slot (`on_release`), so nobody can check out a connection
//!   whose reset has not finished.
//!
//! A connection whose bind or reset failed is evicted and replaced by a fresh
//! one on a later checkout. Idle connections are checked before reuse: one
//! that is past its idle timeout or lifetime is retired, and one that fails
//! the backend's liveness check is evicted. Either way the checkout moves on
//! to the next idle connection or a fresh one. Per checkout:
//!
//! ```text
//! IDLE -> BOUND -> RESETTING -> IDLE
//!         BOUND | RESETTING  -> EVICTED
//! ```

use std::ops::{Deref, DerefMut};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, warn};

use crate::config::DatabaseConfig;
use crate::database::interceptor::{IsolationError, PoolInterceptor, ReleaseDecision, RlsInterceptor};
use crate::database::manager::DatabaseError;
use crate::database::session::TenantSession;
use crate::tenant::{TenantContext, TenantId};

/// Pool-assigned identity of one physical connection
pub type ConnectionId = u64;

/// Opens physical connections for the pool
#[async_trait]
pub trait ConnectionManager: Send + Sync + 'static {
    type Connection: TenantSession + Send + 'static;

    async fn connect(&self) -> Result<Self::Connection, DatabaseError>;

    /// Liveness check for an idle connection about to be reused. Must not
    /// issue a statement that changes session state.
    async fn validate(&self, _conn: &mut Self::Connection) -> Result<(), DatabaseError> {
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("timed out after {0:?} waiting for a connection")]
    Timeout(Duration),

    #[error("connection pool is closed")]
    Closed,

    #[error("failed to open connection: {0}")]
    Connect(#[source] DatabaseError),

    #[error(transparent)]
    Isolation(#[from] IsolationError),
}

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub acquire_timeout: Duration,
    /// Idle connections older than this are closed instead of reused
    pub idle_timeout: Option<Duration>,
    /// Connections older than this are closed instead of reused
    pub max_lifetime: Option<Duration>,
    /// Run [`ConnectionManager::validate`] on idle connections before reuse
    pub test_before_acquire: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 5,
            acquire_timeout: Duration::from_secs(30),
            idle_timeout: Some(Duration::from_secs(10 * 60)),
            max_lifetime: Some(Duration::from_secs(30 * 60)),
            test_before_acquire: true,
        }
    }
}

impl From<&DatabaseConfig> for PoolConfig {
    fn from(config: &DatabaseConfig) -> Self {
        Self {
            max_connections: config.max_connections,
            acquire_timeout: config.acquire_timeout(),
            idle_timeout: config.idle_timeout(),
            max_lifetime: config.max_lifetime(),
            test_before_acquire: config.test_before_acquire,
        }
    }
}

/// Point-in-time pool counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Physical connections opened over the pool's lifetime
    pub opened: u64,
    /// Connections destroyed because their tenant scope could not be trusted
    /// or they failed the liveness check
    pub evicted: u64,
    /// Connections closed for reaching their idle timeout or lifetime
    pub retired: u64,
    pub checkouts: u64,
    /// Physical connections currently alive (idle or checked out)
    pub open: usize,
    pub idle: usize,
}

#[derive(Debug, Default)]
struct AtomicPoolStats {
    opened: AtomicU64,
    evicted: AtomicU64,
    retired: AtomicU64,
    checkouts: AtomicU64,
    open: AtomicUsize,
}

/// Keeps `open` exact however the physical connection goes away
struct OpenGuard(Arc<AtomicPoolStats>);

impl OpenGuard {
    fn new(stats: Arc<AtomicPoolStats>) -> Self {
        stats.open.fetch_add(1, Ordering::Relaxed);
        Self(stats)
    }
}

impl Drop for OpenGuard {
    fn drop(&mut self) {
        self.0.open.fetch_sub(1, Ordering::Relaxed);
    }
}

struct Physical<C> {
    id: ConnectionId,
    conn: C,
    opened_at: Instant,
    idle_since: Instant,
    _open: OpenGuard,
}

struct PoolInner<M: ConnectionManager> {
    manager: M,
    interceptor: Box<dyn PoolInterceptor<M::Connection>>,
    config: PoolConfig,
    semaphore: Arc<Semaphore>,
    idle: Mutex<Vec<Physical<M::Connection>>>,
    next_id: AtomicU64,
    stats: Arc<AtomicPoolStats>,
    closed: AtomicBool,
}

impl<M: ConnectionManager> PoolInner<M> {
    fn idle(&self) -> MutexGuard<'_, Vec<Physical<M::Connection>>> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn pop_idle(&self) -> Option<Physical<M::Connection>> {
        self.idle().pop()
    }

    fn push_idle(&self, mut physical: Physical<M::Connection>) {
        physical.idle_since = Instant::now();
        let mut idle = self.idle();
        // Checked under the lock so close() cannot miss it
        if self.closed.load(Ordering::Acquire) {
            debug!(connection_id = physical.id, "pool closed, dropping returned connection");
            return;
        }
        idle.push(physical);
    }

    async fn open(&self) -> Result<Physical<M::Connection>, PoolError> {
        let conn = self.manager.connect().await.map_err(|e| {
            error!(error = %e, "failed to open physical connection");
            PoolError::Connect(e)
        })?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.stats.opened.fetch_add(1, Ordering::Relaxed);
        debug!(connection_id = id, "opened physical connection");

        let now = Instant::now();
        Ok(Physical {
            id,
            conn,
            opened_at: now,
            idle_since: now,
            _open: OpenGuard::new(Arc::clone(&self.stats)),
        })
    }

    fn expired(&self, physical: &Physical<M::Connection>) -> Option<&'static str> {
        let config = &self.config;
        if config.max_lifetime.is_some_and(|max| physical.opened_at.elapsed() >= max) {
            Some("max lifetime reached")
        } else if config.idle_timeout.is_some_and(|max| physical.idle_since.elapsed() >= max) {
            Some("idle timeout reached")
        } else {
            None
        }
    }

    fn retire(&self, physical: Physical<M::Connection>, reason: &'static str) {
        self.stats.retired.fetch_add(1, Ordering::Relaxed);
        debug!(connection_id = physical.id, reason, "connection retired");
        drop(physical);
    }

    /// Next idle connection fit for reuse, or a fresh one
    async fn checkout(&self) -> Result<Physical<M::Connection>, PoolError> {
        while let Some(mut physical) = self.pop_idle() {
            if let Some(reason) = self.expired(&physical) {
                self.retire(physical, reason);
                continue;
            }
            if self.config.test_before_acquire {
                if let Err(e) = self.manager.validate(&mut physical.conn).await {
                    debug!(connection_id = physical.id, error = %e, "idle connection failed liveness check");
                    self.evict(physical, "liveness check failed");
                    continue;
                }
            }
            return Ok(physical);
        }
        self.open().await
    }

    fn evict(&self, physical: Physical<M::Connection>, reason: &'static str) {
        self.stats.evicted.fetch_add(1, Ordering::Relaxed);
        warn!(
            connection_id = physical.id,
            reason,
            event = "connection_evicted",
            "connection evicted from pool"
        );
        drop(physical);
    }

    /// Reset and return one connection. The slot is freed only afterwards.
    async fn checkin(&self, mut physical: Physical<M::Connection>, permit: Option<OwnedSemaphorePermit>) {
        if self.closed.load(Ordering::Acquire) {
            debug!(connection_id = physical.id, "pool closed, dropping returned connection");
        } else {
            match self.interceptor.on_release(&mut physical.conn).await {
                ReleaseDecision::Recycle => {
                    debug!(connection_id = physical.id, "tenant scope cleared, connection back in pool");
                    self.push_idle(physical);
                }
                ReleaseDecision::Evict => self.evict(physical, "tenant reset failed"),
            }
        }
        drop(permit);
    }
}

/// Bounded pool whose every checkout is bound to the caller's tenant.
pub struct IsolatedPool<M: ConnectionManager> {
    inner: Arc<PoolInner<M>>,
}

impl<M: ConnectionManager> Clone for IsolatedPool<M> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<M: ConnectionManager> IsolatedPool<M> {
    pub fn new(
        manager: M,
        interceptor: impl PoolInterceptor<M::Connection> + 'static,
        config: PoolConfig,
    ) -> Self {
        let permits = config.max_connections.max(1) as usize;
        Self {
            inner: Arc::new(PoolInner {
                manager,
                interceptor: Box::new(interceptor),
                config,
                semaphore: Arc::new(Semaphore::new(permits)),
                idle: Mutex::new(Vec::with_capacity(permits)),
                next_id: AtomicU64::new(0),
                stats: Arc::new(AtomicPoolStats::default()),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Pool with the row-level-security interceptor installed
    pub fn with_rls(manager: M, config: PoolConfig) -> Self {
        Self::new(manager, RlsInterceptor, config)
    }

    /// Check out a connection scoped to `ctx`.
    ///
    /// When this returns `Ok`, the tenant bind has already completed on the
    /// connection. A failed bind evicts the connection and is returned as
    /// [`PoolError::Isolation`]; it is not retried on another connection.
    pub async fn acquire(&self, ctx: &TenantContext) -> Result<PooledConnection<M>, PoolError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(PoolError::Closed);
        }

        let timeout = self.inner.config.acquire_timeout;
        let permit = match tokio::time::timeout(timeout, Arc::clone(&self.inner.semaphore).acquire_owned()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(PoolError::Closed),
            Err(_) => {
                warn!(timeout_ms = timeout.as_millis() as u64, "timed out waiting for a connection");
                return Err(PoolError::Timeout(timeout));
            }
        };

        let mut physical = self.inner.checkout().await?;
        self.inner.stats.checkouts.fetch_add(1, Ordering::Relaxed);

        if let Err(e) = self.inner.interceptor.on_acquire(&mut physical.conn, ctx).await {
            self.inner.evict(physical, "tenant bind failed");
            return Err(e.into());
        }

        debug!(
            connection_id = physical.id,
            tenant = ctx.get().map(TenantId::as_str),
            "connection checked out"
        );

        Ok(PooledConnection {
            physical: Some(physical),
            tenant: ctx.get().cloned(),
            permit: Some(permit),
            pool: Arc::clone(&self.inner),
        })
    }

    /// Run `f` on a connection scoped to `ctx`, releasing it on every exit
    /// path. A panic inside `f` is re-raised after the release completes.
    pub async fn with_connection<F, T, E>(&self, ctx: &TenantContext, f: F) -> Result<T, E>
    where
        F: for<'c> FnOnce(&'c mut M::Connection) -> BoxFuture<'c, Result<T, E>> + Send,
        T: Send,
        E: From<PoolError> + Send,
    {
        let mut lease = self.acquire(ctx).await?;
        let outcome = AssertUnwindSafe(f(&mut *lease)).catch_unwind().await;
        lease.release().await;

        match outcome {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }

    /// Refuse new checkouts and drop idle connections. Leases still out are
    /// dropped, not recycled, when they come back.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.semaphore.close();
        let drained = std::mem::take(&mut *self.inner.idle());
        debug!(count = drained.len(), "connection pool closed");
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> PoolStats {
        let stats = &self.inner.stats;
        PoolStats {
            opened: stats.opened.load(Ordering::Relaxed),
            evicted: stats.evicted.load(Ordering::Relaxed),
            retired: stats.retired.load(Ordering::Relaxed),
            checkouts: stats.checkouts.load(Ordering::Relaxed),
            open: stats.open.load(Ordering::Relaxed),
            idle: self.inner.idle().len(),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }
}

/// One checkout of a physical connection.
///
/// Prefer [`release`](Self::release). Dropping the lease instead (early
/// return, panic, cancelled future) hands the reset to the runtime; the slot
/// stays taken until the reset has run.
pub struct PooledConnection<M: ConnectionManager> {
    physical: Option<Physical<M::Connection>>,
    tenant: Option<TenantId>,
    permit: Option<OwnedSemaphorePermit>,
    pool: Arc<PoolInner<M>>,
}

impl<M: ConnectionManager> PooledConnection<M> {
    pub fn id(&self) -> ConnectionId {
        self.physical().id
    }

    /// Tenant bound for this checkout
    pub fn tenant(&self) -> Option<&TenantId> {
        self.tenant.as_ref()
    }

    /// Reset the connection and hand it back to the pool.
    ///
    /// The checkin runs as its own task so that cancelling the caller cannot
    /// interrupt a reset half way.
    pub async fn release(mut self) {
        let Some(physical) = self.physical.take() else {
            return;
        };
        let permit = self.permit.take();
        let pool = Arc::clone(&self.pool);

        if let Err(e) = tokio::spawn(async move { pool.checkin(physical, permit).await }).await {
            error!(error = %e, "connection checkin task failed");
        }
    }

    fn physical(&self) -> &Physical<M::Connection> {
        self.physical
            .as_ref()
            .expect("BUG: PooledConnection used after release")
    }

    fn physical_mut(&mut self) -> &mut Physical<M::Connection> {
        self.physical
            .as_mut()
            .expect("BUG: PooledConnection used after release")
    }
}

impl<M: ConnectionManager> Deref for PooledConnection<M> {
    type Target = M::Connection;

    fn deref(&self) -> &Self::Target {
        &self.physical().conn
    }
}

impl<M: ConnectionManager> DerefMut for PooledConnection<M> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.physical_mut().conn
    }
}

impl<M: ConnectionManager> Drop for PooledConnection<M> {
    fn drop(&mut self) {
        let Some(physical) = self.physical.take() else {
            return;
        };
        let permit = self.permit.take();

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!(connection_id = physical.id, "lease dropped without release, scheduling reset");
                let pool = Arc::clone(&self.pool);
                handle.spawn(async move { pool.checkin(physical, permit).await });
            }
            Err(_) => {
                self.pool.evict(physical, "no runtime available to reset tenant scope");
                drop(permit);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory::{MemoryConnection, MemoryDatabase, Statement};
    use crate::database::session::RecordStore;
    use serde_json::json;

    fn tenant(s: &str) -> TenantId {
        TenantId::parse(s).unwrap()
    }

    fn ctx(s: &str) -> TenantContext {
        TenantContext::for_tenant(tenant(s))
    }

    fn pool_of(size: u32, db: &MemoryDatabase) -> IsolatedPool<MemoryDatabase> {
        IsolatedPool::with_rls(
            db.clone(),
            PoolConfig {
                max_connections: size,
                acquire_timeout: Duration::from_secs(2),
                ..PoolConfig::default()
            },
        )
    }

    fn record(name: &str) -> crate::database::session::RecordMap {
        json!({ "id": uuid::Uuid::new_v4().to_string(), "name": name })
            .as_object()
            .cloned()
            .unwrap()
    }

    async fn names(conn: &mut MemoryConnection) -> Vec<String> {
        conn.select_records("items")
            .await
            .unwrap()
            .into_iter()
            .map(|r| r["name"].as_str().unwrap().to_string())
            .collect()
    }

    #[tokio::test]
    async fn bind_is_first_statement_of_every_checkout() {
        let db = MemoryDatabase::new();
        let pool = pool_of(1, &db);

        let mut lease = pool.acquire(&ctx("alpha")).await.unwrap();
        lease.insert_record("items", record("a1")).await.unwrap();
        let conn_id = lease.id();
        let backend_id = lease.backend_id();
        lease.release().await;

        let lease = pool.acquire(&ctx("beta")).await.unwrap();
        assert_eq!(lease.id(), conn_id);
        lease.release().await;

        assert_eq!(
            db.statements_for(backend_id),
            vec![
                Statement::Bind("alpha".into()),
                Statement::Insert("items".into()),
                Statement::Reset,
                Statement::Bind("beta".into()),
                Statement::Reset,
            ]
        );
    }

    #[tokio::test]
    async fn interleaved_tenants_on_single_connection_never_see_each_other() {
        let db = MemoryDatabase::new();
        let pool = pool_of(1, &db);

        for round in 0..5 {
            for t in ["alpha", "beta"] {
                let mut lease = pool.acquire(&ctx(t)).await.unwrap();
                lease
                    .insert_record("items", record(&format!("{}-{}", t, round)))
                    .await
                    .unwrap();
                let seen = names(&mut lease).await;
                assert_eq!(seen.len(), round + 1);
                assert!(seen.iter().all(|n| n.starts_with(t)), "{} saw {:?}", t, seen);
                lease.release().await;
            }
        }

        assert_eq!(pool.stats().opened, 1);
        assert_eq!(pool.stats().evicted, 0);
    }

    #[tokio::test]
    async fn unscoped_checkout_is_never_bound() {
        let db = MemoryDatabase::new();
        let pool = pool_of(1, &db);

        let mut lease = pool.acquire(&ctx("alpha")).await.unwrap();
        lease.insert_record("items", record("a1")).await.unwrap();
        lease.release().await;

        let mut lease = pool.acquire(&TenantContext::new()).await.unwrap();
        assert!(lease.tenant().is_none());
        assert_eq!(lease.session_tenant(), None);
        assert!(names(&mut lease).await.is_empty());
        lease.release().await;
    }

    #[tokio::test]
    async fn reset_failure_evicts_and_next_checkout_gets_fresh_connection() {
        let db = MemoryDatabase::new();
        let pool = pool_of(1, &db);

        let lease = pool.acquire(&ctx("alpha")).await.unwrap();
        let first = lease.id();
        db.fail_next_reset();
        lease.release().await;

        let stats = pool.stats();
        assert_eq!(stats.evicted, 1);
        assert_eq!(stats.idle, 0);
        assert_eq!(stats.open, 0);

        let lease = pool.acquire(&ctx("beta")).await.unwrap();
        assert_ne!(lease.id(), first);
        assert_eq!(lease.session_tenant(), Some("beta"));
        assert_eq!(pool.stats().opened, 2);
        lease.release().await;
    }

    #[tokio::test]
    async fn bind_failure_reaches_caller_and_evicts() {
        let db = MemoryDatabase::new();
        let pool = pool_of(1, &db);
        db.fail_next_bind();

        let err = pool.acquire(&ctx("alpha")).await.err().unwrap();
        assert!(matches!(err, PoolError::Isolation(IsolationError::Bind { .. })));

        let stats = pool.stats();
        assert_eq!(stats.evicted, 1);
        assert_eq!(stats.open, 0);

        // The slot was released; the next checkout works on a new connection
        let lease = pool.acquire(&ctx("alpha")).await.unwrap();
        assert_eq!(lease.id(), 2);
        lease.release().await;
    }

    #[tokio::test]
    async fn transaction_left_open_cannot_restore_previous_tenant() {
        let db = MemoryDatabase::new();
        let pool = pool_of(1, &db);

        let mut lease = pool.acquire(&ctx("alpha")).await.unwrap();
        lease.insert_record("items", record("a1")).await.unwrap();
        lease.begin().unwrap();
        lease.release().await;
        assert_eq!(pool.stats().evicted, 0);

        let mut lease = pool.acquire(&ctx("beta")).await.unwrap();
        lease.begin().unwrap();
        lease.rollback().unwrap();
        assert_eq!(lease.session_tenant(), Some("beta"));
        assert!(names(&mut lease).await.is_empty());

        let log = db.statements_for(lease.backend_id());
        assert_eq!(
            &log[..6],
            &[
                Statement::Bind("alpha".into()),
                Statement::Insert("items".into()),
                Statement::Begin,
                Statement::Rollback,
                Statement::Reset,
                Statement::Bind("beta".into()),
            ]
        );
        lease.release().await;
    }

    #[tokio::test]
    async fn dead_idle_connection_is_replaced_before_bind() {
        let db = MemoryDatabase::new();
        let pool = pool_of(1, &db);

        let lease = pool.acquire(&ctx("alpha")).await.unwrap();
        let first = lease.id();
        let first_backend = lease.backend_id();
        lease.release().await;
        db.terminate(first_backend);

        let mut lease = pool.acquire(&ctx("alpha")).await.unwrap();
        assert_ne!(lease.id(), first);
        assert_eq!(lease.session_tenant(), Some("alpha"));
        lease.insert_record("items", record("a2")).await.unwrap();
        lease.release().await;

        let stats = pool.stats();
        assert_eq!(stats.evicted, 1);
        assert_eq!(stats.opened, 2);
        assert_eq!(stats.checkouts, 2);
        // The liveness check itself is not a statement
        assert_eq!(
            db.statements_for(first_backend),
            vec![Statement::Bind("alpha".into()), Statement::Reset]
        );
    }

    #[tokio::test]
    async fn liveness_check_can_be_disabled() {
        let db = MemoryDatabase::new();
        let pool = IsolatedPool::with_rls(
            db.clone(),
            PoolConfig {
                max_connections: 1,
                test_before_acquire: false,
                ..PoolConfig::default()
            },
        );

        let lease = pool.acquire(&ctx("alpha")).await.unwrap();
        let backend = lease.backend_id();
        lease.release().await;
        db.terminate(backend);

        let err = pool.acquire(&ctx("alpha")).await.err().unwrap();
        assert!(matches!(err, PoolError::Isolation(IsolationError::Bind { .. })));
        assert_eq!(pool.stats().evicted, 1);
    }

    #[tokio::test]
    async fn idle_and_old_connections_are_retired() {
        let db = MemoryDatabase::new();
        let idle_pool = IsolatedPool::with_rls(
            db.clone(),
            PoolConfig {
                max_connections: 1,
                idle_timeout: Some(Duration::from_millis(20)),
                max_lifetime: None,
                ..PoolConfig::default()
            },
        );

        let lease = idle_pool.acquire(&ctx("alpha")).await.unwrap();
        let first = lease.id();
        lease.release().await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let lease = idle_pool.acquire(&ctx("alpha")).await.unwrap();
        assert_ne!(lease.id(), first);
        lease.release().await;
        let stats = idle_pool.stats();
        assert_eq!((stats.retired, stats.evicted, stats.opened), (1, 0, 2));

        let old_pool = IsolatedPool::with_rls(
            db.clone(),
            PoolConfig {
                max_connections: 1,
                idle_timeout: None,
                max_lifetime: Some(Duration::ZERO),
                ..PoolConfig::default()
            },
        );
        old_pool.acquire(&ctx("alpha")).await.unwrap().release().await;
        old_pool.acquire(&ctx("alpha")).await.unwrap().release().await;
        assert_eq!(old_pool.stats().retired, 1);
        assert_eq!(old_pool.stats().opened, 2);
    }

    #[tokio::test]
    async fn dropped_lease_is_reset_before_reuse() {
        let db = MemoryDatabase::new();
        let pool = pool_of(1, &db);

        let lease = pool.acquire(&ctx("alpha")).await.unwrap();
        let first = lease.id();
        drop(lease);

        let lease = pool.acquire(&ctx("beta")).await.unwrap();
        assert_eq!(lease.id(), first);
        assert_eq!(lease.session_tenant(), Some("beta"));
        let log = db.statements_for(lease.backend_id());
        assert_eq!(
            log,
            vec![
                Statement::Bind("alpha".into()),
                Statement::Reset,
                Statement::Bind("beta".into()),
            ]
        );
        lease.release().await;
    }

    #[tokio::test]
    async fn panic_inside_unit_of_work_still_releases() {
        let db = MemoryDatabase::new();
        let pool = pool_of(1, &db);

        let task_pool = pool.clone();
        let joined = tokio::spawn(async move {
            task_pool
                .with_connection(&ctx("alpha"), |_conn| {
                    Box::pin(async move {
                        if true {
                            panic!("business code blew up");
                        }
                        Ok::<(), PoolError>(())
                    })
                })
                .await
        })
        .await;
        assert!(joined.unwrap_err().is_panic());

        let lease = pool.acquire(&ctx("beta")).await.unwrap();
        assert_eq!(lease.session_tenant(), Some("beta"));
        assert_eq!(pool.stats().opened, 1);
        lease.release().await;
    }

    #[tokio::test]
    async fn cancelled_unit_of_work_still_releases() {
        let db = MemoryDatabase::new();
        let pool = pool_of(1, &db);

        let timed_out = tokio::time::timeout(
            Duration::from_millis(20),
            pool.with_connection(&ctx("alpha"), |_conn| {
                Box::pin(async move {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    Ok::<(), PoolError>(())
                })
            }),
        )
        .await;
        assert!(timed_out.is_err());

        let lease = pool.acquire(&ctx("beta")).await.unwrap();
        assert_eq!(lease.session_tenant(), Some("beta"));
        assert!(db
            .statements_for(lease.backend_id())
            .windows(2)
            .any(|w| w == [Statement::Bind("alpha".into()), Statement::Reset]));
        lease.release().await;
    }

    #[tokio::test]
    async fn with_connection_returns_result_and_releases() {
        let db = MemoryDatabase::new();
        let pool = pool_of(2, &db);

        let count = pool
            .with_connection(&ctx("alpha"), |conn| {
                Box::pin(async move {
                    conn.insert_record("items", record("a1")).await?;
                    let rows = conn.select_records("items").await?;
                    Ok::<_, anyhow::Error>(rows.len())
                })
            })
            .await
            .unwrap();

        assert_eq!(count, 1);
        let stats = pool.stats();
        assert_eq!(stats.idle, 1);
        assert_eq!(stats.open, 1);
    }

    #[tokio::test]
    async fn acquire_times_out_when_exhausted() {
        let db = MemoryDatabase::new();
        let pool = IsolatedPool::with_rls(
            db.clone(),
            PoolConfig {
                max_connections: 1,
                acquire_timeout: Duration::from_millis(20),
                ..PoolConfig::default()
            },
        );

        let held = pool.acquire(&ctx("alpha")).await.unwrap();
        let err = pool.acquire(&ctx("beta")).await.err().unwrap();
        assert!(matches!(err, PoolError::Timeout(_)));
        held.release().await;
    }

    #[tokio::test]
    async fn closed_pool_refuses_checkouts() {
        let db = MemoryDatabase::new();
        let pool = pool_of(2, &db);

        let lease = pool.acquire(&ctx("alpha")).await.unwrap();
        lease.release().await;
        assert_eq!(pool.stats().idle, 1);

        pool.close();
        assert!(pool.is_closed());
        assert_eq!(pool.stats().idle, 0);
        assert!(matches!(pool.acquire(&ctx("alpha")).await, Err(PoolError::Closed)));
    }

    #[tokio::test]
    async fn connect_failure_is_reported() {
        let db = MemoryDatabase::new();
        let pool = pool_of(1, &db);
        db.fail_next_connect();

        let err = pool.acquire(&ctx("alpha")).await.err().unwrap();
        assert!(matches!(err, PoolError::Connect(_)));
        assert_eq!(pool.stats().open, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_tenants_only_observe_their_own_rows() {
        let db = MemoryDatabase::new();
        let pool = pool_of(3, &db);
        let tenants = ["alpha", "beta", "gamma", "delta"];

        let mut handles = Vec::new();
        for worker in 0..40 {
            let pool = pool.clone();
            let t = tenants[worker % tenants.len()];
            handles.push(tokio::spawn(async move {
                let ctx = ctx(t);
                let mut lease = pool.acquire(&ctx).await.unwrap();
                lease
                    .insert_record("items", record(&format!("{}-{}", t, worker)))
                    .await
                    .unwrap();
                tokio::task::yield_now().await;
                let seen = names(&mut lease).await;
                assert!(seen.iter().all(|n| n.starts_with(t)), "{} saw {:?}", t, seen);
                lease.release().await;
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let stats = pool.stats();
        assert!(stats.opened <= 3);
        assert_eq!(stats.evicted, 0);
        assert_eq!(stats.checkouts, 40);
    }
}
