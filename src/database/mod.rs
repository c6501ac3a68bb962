pub mod interceptor;
pub mod manager;
pub mod memory;
pub mod models;
pub mod pool;
pub mod postgres;
pub mod repository;
pub mod session;

pub use interceptor::{IsolationError, PoolInterceptor, ReleaseDecision, RlsInterceptor};
pub use manager::{Backend, DatabaseError};
pub use pool::{ConnectionManager, IsolatedPool, PoolConfig, PoolError, PoolStats, PooledConnection};
pub use session::{RecordMap, RecordStore, TenantSession};
