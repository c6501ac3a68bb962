// Route handlers. Everything under /api/v1 runs behind the tenant context
// middleware and receives the request's TenantContext as an extension.
pub mod health;
pub mod products;
pub mod stock_batches;

use serde::Deserialize;

use crate::config::ApiConfig;

/// `?page=&size=` query parameters, zero-based
#[derive(Debug, Default, Deserialize)]
pub struct PageParams {
    pub page: Option<u32>,
    pub size: Option<u32>,
}

/// Page size limits applied to every listing
#[derive(Debug, Clone, Copy)]
pub struct Paging {
    pub default_size: u32,
    pub max_size: u32,
}

impl Paging {
    pub fn from_config(api: &ApiConfig) -> Self {
        Self {
            default_size: api.default_page_size.max(1),
            max_size: api.max_page_size.max(1),
        }
    }

    /// `(page, size)` with the size clamped to `1..=max_size`
    pub fn resolve(&self, params: &PageParams) -> (u32, u32) {
        let size = params.size.unwrap_or(self.default_size).clamp(1, self.max_size);
        (params.page.unwrap_or(0), size)
    }
}
