//! Per-organization write scope

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::config::LedgerConfig;
use crate::types::*;

/// Held for validation, write and audit write of one ledger mutation
pub type OrganizationGuard = OwnedMutexGuard<()>;

/// Serializes writers within an organization while letting organizations
/// proceed in parallel. Readers never touch these locks.
#[derive(Clone)]
pub struct OrganizationLocks {
    scopes: Arc<Mutex<HashMap<OrganizationId, Arc<AsyncMutex<()>>>>>,
    config: LedgerConfig,
}

impl OrganizationLocks {
    pub fn new(config: LedgerConfig) -> Self {
        Self {
            scopes: Arc::new(Mutex::new(HashMap::new())),
            config,
        }
    }

    fn scope(&self, organization_id: OrganizationId) -> LedgerResult<Arc<AsyncMutex<()>>> {
        let mut scopes = self
            .scopes
            .lock()
            .map_err(|_| LedgerError::Storage("organization lock table poisoned".to_string()))?;
        Ok(scopes
            .entry(organization_id)
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone())
    }

    /// Acquire the write scope, retrying once after a backoff before
    /// reporting a conflict.
    pub async fn acquire(&self, organization_id: OrganizationId) -> LedgerResult<OrganizationGuard> {
        let scope = self.scope(organization_id)?;

        if let Ok(guard) =
            tokio::time::timeout(self.config.lock_timeout(), scope.clone().lock_owned()).await
        {
            return Ok(guard);
        }

        tracing::warn!(
            organization = %organization_id,
            "write scope contended, retrying after backoff"
        );
        tokio::time::sleep(self.config.conflict_backoff()).await;

        match tokio::time::timeout(self.config.lock_timeout(), scope.lock_owned()).await {
            Ok(guard) => Ok(guard),
            Err(_) => {
                tracing::warn!(organization = %organization_id, "write scope conflict");
                Err(LedgerError::Conflict(organization_id))
            }
        }
    }
}
