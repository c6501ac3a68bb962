pub mod product;
pub mod stock_batch;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

pub use product::{CreateProductRequest, Product, ProductDto};
pub use stock_batch::{BatchStatus, CreateStockBatchRequest, StockBatch, StockBatchDto};

/// Request field name to what is wrong with it
pub type FieldErrors = HashMap<String, String>;

pub(crate) fn require_text(errors: &mut FieldErrors, field: &str, value: &str) {
    if value.trim().is_empty() {
        errors.insert(field.to_string(), "must not be blank".to_string());
    }
}

pub(crate) fn into_result(errors: FieldErrors) -> Result<(), FieldErrors> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// One page of a listing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PagedResponse<T> {
    pub content: Vec<T>,
    pub page: u32,
    pub size: u32,
    pub total_elements: u64,
}

impl<T> PagedResponse<T> {
    pub fn new(content: Vec<T>, page: u32, size: u32, total_elements: u64) -> Self {
        Self {
            content,
            page,
            size,
            total_elements,
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> PagedResponse<U> {
        PagedResponse {
            content: self.content.into_iter().map(f).collect(),
            page: self.page,
            size: self.size,
            total_elements: self.total_elements,
        }
    }
}
