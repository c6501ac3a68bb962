use std::str::FromStr;

use sqlx::postgres::PgConnectOptions;
use thiserror::Error;

/// Errors from the database backends
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Missing configuration: {0}")]
    ConfigMissing(&'static str),

    #[error("Invalid database URL: {0}")]
    InvalidDatabaseUrl(String),

    #[error("Invalid table name: {0}")]
    InvalidTableName(String),

    #[error("Invalid column name: {0}")]
    InvalidColumnName(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Row-level security policy violation: {0}")]
    PolicyViolation(String),

    #[error("Query error: {0}")]
    QueryError(String),

    #[error("Row does not match its model: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

/// Which physical database the pool talks to, chosen from `DATABASE_URL`
#[derive(Debug, Clone)]
pub enum Backend {
    Postgres(PgConnectOptions),
    Memory,
}

impl Backend {
    pub fn from_url(raw: &str) -> Result<Self, DatabaseError> {
        if raw.trim().is_empty() {
            return Err(DatabaseError::ConfigMissing("DATABASE_URL"));
        }

        let url = url::Url::parse(raw).map_err(|e| DatabaseError::InvalidDatabaseUrl(e.to_string()))?;

        match url.scheme() {
            "memory" => Ok(Backend::Memory),
            "postgres" | "postgresql" => PgConnectOptions::from_str(raw)
                .map(Backend::Postgres)
                .map_err(|e| DatabaseError::InvalidDatabaseUrl(e.to_string())),
            other => Err(DatabaseError::InvalidDatabaseUrl(format!(
                "unsupported scheme '{}'",
                other
            ))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Backend::Postgres(_) => "postgres",
            Backend::Memory => "memory",
        }
    }
}

/// Quote SQL identifier to prevent injection
pub(crate) fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn is_plain_identifier(name: &str) -> bool {
    !name.is_empty()
        && name.starts_with(|c: char| c.is_ascii_lowercase())
        && name.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

/// Table names are fixed by the models; anything else is refused
pub(crate) fn validate_table_name(name: &str) -> Result<(), DatabaseError> {
    if is_plain_identifier(name) {
        Ok(())
    } else {
        Err(DatabaseError::InvalidTableName(name.to_string()))
    }
}

pub(crate) fn validate_column_name(name: &str) -> Result<(), DatabaseError> {
    if is_plain_identifier(name) {
        Ok(())
    } else {
        Err(DatabaseError::InvalidColumnName(name.to_string()))
    }
}
