use std::sync::{Arc, OnceLock};

use thiserror::Error;

use super::id::TenantId;

/// Errors raised while establishing tenancy for a unit of work
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TenantError {
    #[error("ambiguous tenant: unit of work is bound to '{bound}', refused '{requested}'")]
    Ambiguous { bound: TenantId, requested: TenantId },

    #[error("invalid tenant identifier: {0}")]
    Invalid(String),
}

/// Tenant scope for exactly one unit of work (one request or task).
///
/// A context starts empty and can be bound at most once. Clones share the
/// same slot and are only meant to carry the context through the unit of
/// work that created it; every new unit of work starts from
/// [`TenantContext::new`]. There is no process-wide instance.
#[derive(Debug, Clone, Default)]
pub struct TenantContext {
    slot: Arc<OnceLock<TenantId>>,
}

impl TenantContext {
    /// Empty context: no tenant scope until [`set`](Self::set) is called
    pub fn new() -> Self {
        Self::default()
    }

    /// Context already bound to `tenant`
    pub fn for_tenant(tenant: TenantId) -> Self {
        let slot = OnceLock::new();
        let _ = slot.set(tenant);
        Self { slot: Arc::new(slot) }
    }

    /// Bind the tenant for this unit of work.
    ///
    /// Re-binding the same tenant is a no-op. Binding a different tenant
    /// fails and keeps the original binding.
    pub fn set(&self, tenant: TenantId) -> Result<(), TenantError> {
        match self.slot.set(tenant) {
            Ok(()) => Ok(()),
            Err(requested) => {
                // Someone won the race (or bound earlier); compare with the winner
                let bound = self.slot.get().cloned().unwrap_or_else(|| requested.clone());
                if bound == requested {
                    Ok(())
                } else {
                    Err(TenantError::Ambiguous { bound, requested })
                }
            }
        }
    }

    /// Tenant bound to this unit of work, or `None` for unscoped work
    pub fn get(&self) -> Option<&TenantId> {
        self.slot.get()
    }

    pub fn is_bound(&self) -> bool {
        self.slot.get().is_some()
    }
}
