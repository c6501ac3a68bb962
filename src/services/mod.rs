pub mod product_service;
pub mod stock_batch_service;

use thiserror::Error;

use crate::database::manager::DatabaseError;
use crate::database::models::FieldErrors;
use crate::database::pool::PoolError;

pub use product_service::ProductService;
pub use stock_batch_service::StockBatchService;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("invalid fields: {}", field_list(.0))]
    Validation(FieldErrors),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Pool(#[from] PoolError),
}

fn field_list(errors: &FieldErrors) -> String {
    let mut fields: Vec<&str> = errors.keys().map(String::as_str).collect();
    fields.sort_unstable();
    fields.join(", ")
}
