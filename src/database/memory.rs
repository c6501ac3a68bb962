//! Embedded backend with row-level security semantics.
//!
//! Rows are tagged with the tenant bound on the connection that inserted
//! them, and every read only sees rows whose tag equals the tenant currently
//! bound on the reading connection. A connection with no tenant bound sees
//! nothing and may not insert (deny-all). This mirrors what the Postgres
//! policies do, so the same services run unchanged against `memory:`.
//!
//! Session scope is transactional the way Postgres settings are: a bind or
//! reset made after [`MemoryConnection::begin`] is undone by
//! [`MemoryConnection::rollback`]. Rows themselves are not.
//!
//! Failures can be injected into the next connect, bind or reset, sessions
//! can be terminated from outside, and every statement is recorded for
//! inspection.

use std::cmp::Ordering as CmpOrdering;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::DateTime;
use serde_json::Value;
use uuid::Uuid;

use crate::database::manager::{validate_column_name, validate_table_name, DatabaseError};
use crate::database::pool::ConnectionManager;
use crate::database::session::{RecordMap, RecordStore, TenantSession, TENANT_COLUMN};
use crate::tenant::TenantId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    Bind(String),
    Reset,
    Begin,
    Rollback,
    Insert(String),
    Select(String),
    Count(String),
    Ping,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggedStatement {
    pub connection: u64,
    pub statement: Statement,
}

#[derive(Debug)]
struct StoredRow {
    tenant: String,
    record: RecordMap,
}

#[derive(Debug, Default)]
struct MemoryState {
    tables: HashMap<String, Vec<StoredRow>>,
    log: Vec<LoggedStatement>,
    next_connection: u64,
    terminated: HashSet<u64>,
}

#[derive(Debug, Default)]
struct Faults {
    connect: AtomicUsize,
    bind: AtomicUsize,
    reset: AtomicUsize,
}

fn take_fault(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

/// Shared in-process database. Clones refer to the same data.
#[derive(Debug, Clone, Default)]
pub struct MemoryDatabase {
    state: Arc<Mutex<MemoryState>>,
    faults: Arc<Faults>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make the next connection attempt fail
    pub fn fail_next_connect(&self) {
        self.faults.connect.fetch_add(1, Ordering::SeqCst);
    }

    /// Make the next tenant bind fail, on whichever connection runs it
    pub fn fail_next_bind(&self) {
        self.faults.bind.fetch_add(1, Ordering::SeqCst);
    }

    /// Make the next tenant reset fail, on whichever connection runs it
    pub fn fail_next_reset(&self) {
        self.faults.reset.fetch_add(1, Ordering::SeqCst);
    }

    /// Kill backend session `connection`; every later statement on it fails
    pub fn terminate(&self, connection: u64) {
        self.state().terminated.insert(connection);
    }

    /// Kill every session opened so far, as a server restart would
    pub fn terminate_all(&self) {
        let mut state = self.state();
        let opened = state.next_connection;
        state.terminated.extend(1..=opened);
    }

    pub fn statements(&self) -> Vec<LoggedStatement> {
        self.state().log.clone()
    }

    pub fn statements_for(&self, connection: u64) -> Vec<Statement> {
        self.state()
            .log
            .iter()
            .filter(|entry| entry.connection == connection)
            .map(|entry| entry.statement.clone())
            .collect()
    }

    /// Rows in `table` across all tenants, bypassing the policy
    pub fn row_count(&self, table: &str) -> usize {
        self.state().tables.get(table).map_or(0, Vec::len)
    }
}

#[async_trait]
impl ConnectionManager for MemoryDatabase {
    type Connection = MemoryConnection;

    async fn connect(&self) -> Result<MemoryConnection, DatabaseError> {
        if take_fault(&self.faults.connect) {
            return Err(DatabaseError::QueryError("injected connect failure".to_string()));
        }

        let id = {
            let mut state = self.state();
            state.next_connection += 1;
            state.next_connection
        };

        Ok(MemoryConnection {
            id,
            db: self.clone(),
            session_tenant: None,
            transaction: None,
        })
    }

    async fn validate(&self, conn: &mut MemoryConnection) -> Result<(), DatabaseError> {
        conn.check_alive(&self.state())
    }
}

/// One session on a [`MemoryDatabase`]
#[derive(Debug)]
pub struct MemoryConnection {
    id: u64,
    db: MemoryDatabase,
    session_tenant: Option<String>,
    /// Session tenant as it was at `begin`, while a transaction is open
    transaction: Option<Option<String>>,
}

impl MemoryConnection {
    /// Backend session number, as used in the statement log
    pub fn backend_id(&self) -> u64 {
        self.id
    }

    /// Tenant currently bound in this session
    pub fn session_tenant(&self) -> Option<&str> {
        self.session_tenant.as_deref()
    }

    pub fn in_transaction(&self) -> bool {
        self.transaction.is_some()
    }

    /// Open a transaction. Like Postgres, a nested `begin` is a no-op.
    pub fn begin(&mut self) -> Result<(), DatabaseError> {
        let db = self.db.clone();
        let mut state = db.state();
        self.check_alive(&state)?;
        self.log(&mut state, Statement::Begin);
        if self.transaction.is_none() {
            self.transaction = Some(self.session_tenant.clone());
        }
        Ok(())
    }

    /// End the open transaction, undoing scope changes made inside it
    pub fn rollback(&mut self) -> Result<(), DatabaseError> {
        let db = self.db.clone();
        let mut state = db.state();
        self.check_alive(&state)?;
        self.log(&mut state, Statement::Rollback);
        if let Some(saved) = self.transaction.take() {
            self.session_tenant = saved;
        }
        Ok(())
    }

    fn check_alive(&self, state: &MemoryState) -> Result<(), DatabaseError> {
        if state.terminated.contains(&self.id) {
            Err(DatabaseError::QueryError(
                "terminating connection due to administrator command".to_string(),
            ))
        } else {
            Ok(())
        }
    }

    fn log(&self, state: &mut MemoryState, statement: Statement) {
        state.log.push(LoggedStatement {
            connection: self.id,
            statement,
        });
    }

    fn visible(&self, row: &StoredRow) -> bool {
        self.session_tenant.as_deref() == Some(row.tenant.as_str())
    }

    fn visible_rows<'a>(&'a self, state: &'a MemoryState, table: &str) -> impl Iterator<Item = &'a RecordMap> + 'a {
        state
            .tables
            .get(table)
            .into_iter()
            .flatten()
            .filter(move |row| self.visible(row))
            .map(|row| &row.record)
    }
}

/// Ascending order with NULLs last. Timestamps compare as instants, so
/// differing fractional precision does not matter.
fn compare_values(a: Option<&Value>, b: Option<&Value>) -> CmpOrdering {
    match (a, b) {
        (None | Some(Value::Null), None | Some(Value::Null)) => CmpOrdering::Equal,
        (None | Some(Value::Null), _) => CmpOrdering::Greater,
        (_, None | Some(Value::Null)) => CmpOrdering::Less,
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(CmpOrdering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => {
            match (DateTime::parse_from_rfc3339(x), DateTime::parse_from_rfc3339(y)) {
                (Ok(x), Ok(y)) => x.cmp(&y),
                _ => x.cmp(y),
            }
        }
        (Some(x), Some(y)) => x.to_string().cmp(&y.to_string()),
    }
}

#[async_trait]
impl TenantSession for MemoryConnection {
    async fn bind_tenant(&mut self, tenant: &TenantId) -> Result<(), DatabaseError> {
        if take_fault(&self.db.faults.bind) {
            return Err(DatabaseError::QueryError("injected bind failure".to_string()));
        }

        let db = self.db.clone();
        let mut state = db.state();
        self.check_alive(&state)?;
        self.log(&mut state, Statement::Bind(tenant.to_string()));
        self.session_tenant = Some(tenant.to_string());
        Ok(())
    }

    async fn clear_tenant(&mut self) -> Result<(), DatabaseError> {
        if take_fault(&self.db.faults.reset) {
            return Err(DatabaseError::QueryError("injected reset failure".to_string()));
        }

        let db = self.db.clone();
        let mut state = db.state();
        self.check_alive(&state)?;
        if self.in_transaction() {
            drop(state);
            self.rollback()?;
            state = db.state();
        }
        self.log(&mut state, Statement::Reset);
        self.session_tenant = None;
        Ok(())
    }
}

#[async_trait]
impl RecordStore for MemoryConnection {
    async fn insert_record(&mut self, table: &str, mut record: RecordMap) -> Result<RecordMap, DatabaseError> {
        validate_table_name(table)?;
        self.check_alive(&self.db.state())?;

        let tenant = self.session_tenant.clone().ok_or_else(|| {
            DatabaseError::PolicyViolation(format!(
                "new row violates row-level security policy for table \"{}\"",
                table
            ))
        })?;

        record.insert(TENANT_COLUMN.to_string(), Value::String(tenant.clone()));

        let db = self.db.clone();
        let mut state = db.state();
        self.log(&mut state, Statement::Insert(table.to_string()));
        state.tables.entry(table.to_string()).or_default().push(StoredRow {
            tenant,
            record: record.clone(),
        });

        Ok(record)
    }

    async fn select_records(&mut self, table: &str) -> Result<Vec<RecordMap>, DatabaseError> {
        validate_table_name(table)?;

        let db = self.db.clone();
        let mut state = db.state();
        self.check_alive(&state)?;
        self.log(&mut state, Statement::Select(table.to_string()));

        Ok(self.visible_rows(&state, table).cloned().collect())
    }

    async fn select_page(
        &mut self,
        table: &str,
        order_by: &[&str],
        limit: u64,
        offset: u64,
    ) -> Result<Vec<RecordMap>, DatabaseError> {
        validate_table_name(table)?;
        for column in order_by {
            validate_column_name(column)?;
        }

        let db = self.db.clone();
        let mut state = db.state();
        self.check_alive(&state)?;
        self.log(&mut state, Statement::Select(table.to_string()));

        let mut rows: Vec<&RecordMap> = self.visible_rows(&state, table).collect();
        rows.sort_by(|a, b| {
            order_by
                .iter()
                .map(|column| compare_values(a.get(*column), b.get(*column)))
                .find(|ord| ord.is_ne())
                .unwrap_or(CmpOrdering::Equal)
        });

        let offset = usize::try_from(offset).unwrap_or(usize::MAX);
        let limit = usize::try_from(limit).unwrap_or(usize::MAX);
        Ok(rows.into_iter().skip(offset).take(limit).cloned().collect())
    }

    async fn count_records(&mut self, table: &str) -> Result<u64, DatabaseError> {
        validate_table_name(table)?;

        let db = self.db.clone();
        let mut state = db.state();
        self.check_alive(&state)?;
        self.log(&mut state, Statement::Count(table.to_string()));

        Ok(self.visible_rows(&state, table).count() as u64)
    }

    async fn select_record(&mut self, table: &str, id: Uuid) -> Result<Option<RecordMap>, DatabaseError> {
        validate_table_name(table)?;

        let wanted = Value::String(id.to_string());
        let db = self.db.clone();
        let mut state = db.state();
        self.check_alive(&state)?;
        self.log(&mut state, Statement::Select(table.to_string()));

        Ok(state.tables.get(table).and_then(|rows| {
            rows.iter()
                .filter(|row| self.visible(row))
                .find(|row| row.record.get("id") == Some(&wanted))
                .map(|row| row.record.clone())
        }))
    }

    async fn ping(&mut self) -> Result<(), DatabaseError> {
        let db = self.db.clone();
        let mut state = db.state();
        self.check_alive(&state)?;
        self.log(&mut state, Statement::Ping);
        Ok(())
    }
}
