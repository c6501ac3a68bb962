use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{into_result, require_text, FieldErrors};
use crate::database::repository::Entity;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub id: Uuid,
    /// Filled in by the backend from the session scope
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    pub sku: String,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Entity for Product {
    const TABLE: &'static str = "products";
    const NAME: &'static str = "Product";
    const ORDER_BY: &'static [&'static str] = &["created_at", "id"];
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateProductRequest {
    pub sku: String,
    pub name: String,
    pub description: Option<String>,
}

impl CreateProductRequest {
    pub fn validate(&self) -> Result<(), FieldErrors> {
        let mut errors = FieldErrors::new();
        require_text(&mut errors, "sku", &self.sku);
        require_text(&mut errors, "name", &self.name);
        if self.sku.len() > 64 {
            errors.insert("sku".to_string(), "must be at most 64 characters".to_string());
        }
        into_result(errors)
    }
}

impl From<CreateProductRequest> for Product {
    fn from(req: CreateProductRequest) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id: None,
            sku: req.sku.trim().to_string(),
            name: req.name.trim().to_string(),
            description: req.description,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProductDto {
    pub id: Uuid,
    pub sku: String,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<Product> for ProductDto {
    fn from(p: Product) -> Self {
        Self {
            id: p.id,
            sku: p.sku,
            name: p.name,
            description: p.description,
            created_at: p.created_at,
        }
    }
}
