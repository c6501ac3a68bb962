use async_trait::async_trait;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::database::manager::DatabaseError;
use crate::tenant::TenantId;

/// Column the row-level-security policies compare with the session tenant
pub const TENANT_COLUMN: &str = "tenant_id";

/// JSON object form of one row
pub type RecordMap = Map<String, Value>;

/// Session-local tenant scope of one physical connection.
///
/// These are the only two statements the isolation layer issues. What the
/// row-level-security policies do with the bound value is owned by the schema.
#[async_trait]
pub trait TenantSession: Send {
    /// Bind `tenant` into the session variable the policies read
    async fn bind_tenant(&mut self, tenant: &TenantId) -> Result<(), DatabaseError>;

    /// Return the session to its unscoped state.
    ///
    /// Any transaction the checkout left open is rolled back first: a reset
    /// issued inside it would be undone by that transaction's rollback and
    /// bring the old tenant back.
    async fn clear_tenant(&mut self) -> Result<(), DatabaseError>;
}

/// Row access used by repositories. Every call runs under whatever tenant
/// scope is bound on the connection; implementations never filter by tenant
/// themselves.
#[async_trait]
pub trait RecordStore: Send {
    async fn insert_record(&mut self, table: &str, record: RecordMap) -> Result<RecordMap, DatabaseError>;

    async fn select_records(&mut self, table: &str) -> Result<Vec<RecordMap>, DatabaseError>;

    /// `limit` visible rows ordered by `order_by` (ascending), after skipping `offset`
    async fn select_page(
        &mut self,
        table: &str,
        order_by: &[&str],
        limit: u64,
        offset: u64,
    ) -> Result<Vec<RecordMap>, DatabaseError>;

    async fn count_records(&mut self, table: &str) -> Result<u64, DatabaseError>;

    async fn select_record(&mut self, table: &str, id: Uuid) -> Result<Option<RecordMap>, DatabaseError>;

    async fn ping(&mut self) -> Result<(), DatabaseError>;
}
