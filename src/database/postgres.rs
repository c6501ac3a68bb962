//! PostgreSQL backend.
//!
//! The tenant is bound with `set_config(.., false)` so it is session-scoped
//! and survives transaction boundaries inside one checkout. On checkin any
//! transaction still open is rolled back before `RESET` returns the variable
//! to its unset state; a `SET` or `RESET` made inside a transaction is undone
//! when that transaction rolls back. Rows travel as JSON (`row_to_json` /
//! `jsonb_populate_record`) so repositories stay schema-agnostic.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::{PgConnectOptions, PgRow};
use sqlx::{Connection, Executor, PgConnection, Row};
use uuid::Uuid;

use crate::database::manager::{quote_identifier, validate_column_name, validate_table_name, DatabaseError};
use crate::database::pool::ConnectionManager;
use crate::database::session::{RecordMap, RecordStore, TenantSession, TENANT_COLUMN};
use crate::tenant::TenantId;

/// Session variable read by the row-level-security policies
pub const TENANT_SETTING: &str = "app.current_tenant";

const BIND_TENANT_SQL: &str = "SELECT set_config('app.current_tenant', $1, false)";
/// Outside a transaction this only raises a warning
const END_TRANSACTION_SQL: &str = "ROLLBACK";
const RESET_TENANT_SQL: &str = "RESET app.current_tenant";

/// Opens plain `PgConnection`s for [`IsolatedPool`](crate::database::pool::IsolatedPool)
#[derive(Debug, Clone)]
pub struct PgConnectionManager {
    options: PgConnectOptions,
}

impl PgConnectionManager {
    pub fn new(options: PgConnectOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl ConnectionManager for PgConnectionManager {
    type Connection = PgConnection;

    async fn connect(&self) -> Result<PgConnection, DatabaseError> {
        Ok(PgConnection::connect_with(&self.options).await?)
    }

    async fn validate(&self, conn: &mut PgConnection) -> Result<(), DatabaseError> {
        Connection::ping(conn).await?;
        Ok(())
    }
}

#[async_trait]
impl TenantSession for PgConnection {
    async fn bind_tenant(&mut self, tenant: &TenantId) -> Result<(), DatabaseError> {
        sqlx::query(BIND_TENANT_SQL)
            .bind(tenant.as_str())
            .execute(&mut *self)
            .await?;
        Ok(())
    }

    async fn clear_tenant(&mut self) -> Result<(), DatabaseError> {
        // Simple protocol, like sqlx's own rollback, so it also ends aborted transactions
        (&mut *self).execute(END_TRANSACTION_SQL).await?;
        (&mut *self).execute(RESET_TENANT_SQL).await?;
        Ok(())
    }
}

#[async_trait]
impl RecordStore for PgConnection {
    async fn insert_record(&mut self, table: &str, record: RecordMap) -> Result<RecordMap, DatabaseError> {
        let sql = insert_sql(table)?;
        let row = sqlx::query(&sql)
            .bind(Value::Object(record))
            .fetch_one(&mut *self)
            .await
            .map_err(map_policy_error)?;
        row_to_record(&row)
    }

    async fn select_records(&mut self, table: &str) -> Result<Vec<RecordMap>, DatabaseError> {
        let sql = select_all_sql(table)?;
        let rows = sqlx::query(&sql).fetch_all(&mut *self).await?;
        rows.iter().map(row_to_record).collect()
    }

    async fn select_page(
        &mut self,
        table: &str,
        order_by: &[&str],
        limit: u64,
        offset: u64,
    ) -> Result<Vec<RecordMap>, DatabaseError> {
        let sql = select_page_sql(table, order_by)?;
        let rows = sqlx::query(&sql)
            .bind(to_sql_count(limit))
            .bind(to_sql_count(offset))
            .fetch_all(&mut *self)
            .await?;
        rows.iter().map(row_to_record).collect()
    }

    async fn count_records(&mut self, table: &str) -> Result<u64, DatabaseError> {
        let sql = count_sql(table)?;
        let count: i64 = sqlx::query_scalar(&sql).fetch_one(&mut *self).await?;
        Ok(count.max(0) as u64)
    }

    async fn select_record(&mut self, table: &str, id: Uuid) -> Result<Option<RecordMap>, DatabaseError> {
        let sql = select_by_id_sql(table)?;
        let row = sqlx::query(&sql).bind(id).fetch_optional(&mut *self).await?;
        row.as_ref().map(row_to_record).transpose()
    }

    async fn ping(&mut self) -> Result<(), DatabaseError> {
        Connection::ping(self).await?;
        Ok(())
    }
}

/// The tenant column is filled from the session variable, never from the
/// payload, so a caller cannot write rows into another tenant.
fn insert_sql(table: &str) -> Result<String, DatabaseError> {
    validate_table_name(table)?;
    let t = quote_identifier(table);
    Ok(format!(
        "INSERT INTO {t} SELECT * FROM jsonb_populate_record(NULL::{t}, \
         $1::jsonb || jsonb_build_object('{col}', NULLIF(current_setting('{setting}', true), ''))) \
         RETURNING row_to_json({t}.*) AS row",
        t = t,
        col = TENANT_COLUMN,
        setting = TENANT_SETTING,
    ))
}

fn select_all_sql(table: &str) -> Result<String, DatabaseError> {
    validate_table_name(table)?;
    Ok(format!(
        "SELECT row_to_json(t) AS row FROM (SELECT * FROM {}) t",
        quote_identifier(table)
    ))
}

fn select_page_sql(table: &str, order_by: &[&str]) -> Result<String, DatabaseError> {
    validate_table_name(table)?;
    let mut columns = Vec::with_capacity(order_by.len());
    for column in order_by {
        validate_column_name(column)?;
        columns.push(format!("t.{}", quote_identifier(column)));
    }

    let order = if columns.is_empty() {
        String::new()
    } else {
        format!(" ORDER BY {}", columns.join(", "))
    };
    Ok(format!(
        "SELECT row_to_json(t) AS row FROM {} AS t{} LIMIT $1 OFFSET $2",
        quote_identifier(table),
        order
    ))
}

fn count_sql(table: &str) -> Result<String, DatabaseError> {
    validate_table_name(table)?;
    Ok(format!("SELECT COUNT(*) FROM {}", quote_identifier(table)))
}

fn to_sql_count(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

fn select_by_id_sql(table: &str) -> Result<String, DatabaseError> {
    validate_table_name(table)?;
    Ok(format!(
        "SELECT row_to_json(t) AS row FROM (SELECT * FROM {} WHERE id = $1) t",
        quote_identifier(table)
    ))
}

fn row_to_record(row: &PgRow) -> Result<RecordMap, DatabaseError> {
    match row.try_get::<Value, _>("row")? {
        Value::Object(map) => Ok(map),
        other => Err(DatabaseError::QueryError(format!(
            "expected a JSON object row, got {}",
            other
        ))),
    }
}

/// RLS `WITH CHECK` rejections and a NULL tenant column both mean the
/// session had no tenant bound that may write this row.
fn map_policy_error(err: sqlx::Error) -> DatabaseError {
    if let sqlx::Error::Database(db) = &err {
        let code = db.code();
        let violation = match code.as_deref() {
            Some("42501") => true,
            Some("23502") => db.message().contains(TENANT_COLUMN),
            _ => false,
        };
        if violation {
            return DatabaseError::PolicyViolation(db.message().to_string());
        }
    }
    DatabaseError::Sqlx(err)
}
