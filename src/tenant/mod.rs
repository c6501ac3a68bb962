pub mod context;
pub mod id;
pub mod resolver;

pub use context::{TenantContext, TenantError};
pub use id::TenantId;
pub use resolver::{ResolveError, TenantResolver};
