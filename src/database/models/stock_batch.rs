use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{into_result, require_text, FieldErrors};
use crate::database::repository::Entity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchStatus {
    Active,
    Depleted,
}

impl BatchStatus {
    /// Status a batch starts in for the given quantity
    pub fn for_quantity(quantity: Decimal) -> Self {
        if quantity <= Decimal::ZERO {
            BatchStatus::Depleted
        } else {
            BatchStatus::Active
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockBatch {
    pub id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    pub product_id: Uuid,
    pub batch_code: String,
    pub quantity: Decimal,
    pub unit: String,
    pub status: BatchStatus,
    pub entry_date: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Entity for StockBatch {
    const TABLE: &'static str = "stock_batches";
    const NAME: &'static str = "StockBatch";
    const ORDER_BY: &'static [&'static str] = &["created_at", "id"];
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateStockBatchRequest {
    pub product_id: Uuid,
    pub batch_code: String,
    pub quantity: Decimal,
    pub unit: String,
    pub entry_date: Option<DateTime<Utc>>,
}

impl CreateStockBatchRequest {
    pub fn validate(&self) -> Result<(), FieldErrors> {
        let mut errors = FieldErrors::new();
        require_text(&mut errors, "batchCode", &self.batch_code);
        require_text(&mut errors, "unit", &self.unit);
        into_result(errors)
    }
}

impl From<CreateStockBatchRequest> for StockBatch {
    fn from(req: CreateStockBatchRequest) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            tenant_id: None,
            product_id: req.product_id,
            batch_code: req.batch_code.trim().to_string(),
            status: BatchStatus::for_quantity(req.quantity),
            quantity: req.quantity,
            unit: req.unit.trim().to_string(),
            entry_date: req.entry_date.unwrap_or(now),
            created_at: now,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StockBatchDto {
    pub id: Uuid,
    pub product_id: Uuid,
    pub batch_code: String,
    pub quantity: Decimal,
    pub unit: String,
    pub status: BatchStatus,
    pub entry_date: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl From<StockBatch> for StockBatchDto {
    fn from(b: StockBatch) -> Self {
        Self {
            id: b.id,
            product_id: b.product_id,
            batch_code: b.batch_code,
            quantity: b.quantity,
            unit: b.unit,
            status: b.status,
            entry_date: b.entry_date,
            created_at: b.created_at,
        }
    }
}
