use std::marker::PhantomData;

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::database::manager::DatabaseError;
use crate::database::session::{RecordMap, RecordStore};

/// A row type stored in one table
pub trait Entity: Serialize + DeserializeOwned + Send + Sync {
    const TABLE: &'static str;
    /// Human name used in not-found messages
    const NAME: &'static str;
    /// Listing order, ascending
    const ORDER_BY: &'static [&'static str] = &["id"];
}

/// Typed access to one table through whatever connection the caller holds.
///
/// The repository never adds a tenant predicate; visibility is decided by the
/// scope bound on the connection.
pub struct Repository<T> {
    _phantom: PhantomData<fn() -> T>,
}

impl<T> Clone for Repository<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Repository<T> {}

impl<T> Default for Repository<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Repository<T> {
    pub const fn new() -> Self {
        Self { _phantom: PhantomData }
    }
}

impl<T: Entity> Repository<T> {
    pub async fn insert<C>(&self, conn: &mut C, entity: &T) -> Result<T, DatabaseError>
    where
        C: RecordStore + ?Sized,
    {
        let record = to_record(entity)?;
        let stored = conn.insert_record(T::TABLE, record).await?;
        from_record(stored)
    }

    pub async fn select_any<C>(&self, conn: &mut C) -> Result<Vec<T>, DatabaseError>
    where
        C: RecordStore + ?Sized,
    {
        conn.select_records(T::TABLE)
            .await?
            .into_iter()
            .map(from_record)
            .collect()
    }

    /// Zero-based page of the visible rows in `T::ORDER_BY` order, with the
    /// total number of visible rows. Both reads run on `conn`, under one scope.
    pub async fn select_page<C>(&self, conn: &mut C, page: u32, size: u32) -> Result<(Vec<T>, u64), DatabaseError>
    where
        C: RecordStore + ?Sized,
    {
        let offset = u64::from(page) * u64::from(size);
        let rows = conn
            .select_page(T::TABLE, T::ORDER_BY, u64::from(size), offset)
            .await?
            .into_iter()
            .map(from_record)
            .collect::<Result<Vec<T>, _>>()?;
        let total = conn.count_records(T::TABLE).await?;
        Ok((rows, total))
    }

    pub async fn select_one<C>(&self, conn: &mut C, id: Uuid) -> Result<Option<T>, DatabaseError>
    where
        C: RecordStore + ?Sized,
    {
        conn.select_record(T::TABLE, id)
            .await?
            .map(from_record)
            .transpose()
    }

    /// Like `select_one`, but absence is an error. A row hidden by tenant
    /// scope and a row that does not exist give the same error.
    pub async fn select_404<C>(&self, conn: &mut C, id: Uuid) -> Result<T, DatabaseError>
    where
        C: RecordStore + ?Sized,
    {
        self.select_one(conn, id)
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("{} not found", T::NAME)))
    }
}

fn to_record<T: Serialize>(entity: &T) -> Result<RecordMap, DatabaseError> {
    match serde_json::to_value(entity)? {
        Value::Object(map) => Ok(map),
        other => Err(DatabaseError::QueryError(format!(
            "entity did not serialize to an object: {}",
            other
        ))),
    }
}

fn from_record<T: DeserializeOwned>(record: RecordMap) -> Result<T, DatabaseError> {
    Ok(serde_json::from_value(Value::Object(record))?)
}
