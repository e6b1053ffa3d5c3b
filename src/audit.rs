//! Append-only audit trail.
//!
//! Records are only ever staged into a [`UnitOfWork`](crate::traits::UnitOfWork)
//! alongside the mutation they describe and persisted by the same commit.
//! There is no update or delete path.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::traits::LedgerStorage;
use crate::types::*;

/// Kinds of entity whose mutations are audited
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityType {
    Organization,
    Account,
    Transaction,
    Entry,
    ImportedTransaction,
    MatchRule,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuditOperation {
    Create,
    Update,
    Void,
    /// Only match rules are ever removed
    Delete,
}

/// Immutable fact describing one mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Position in the store-wide log, assigned on commit
    pub sequence: u64,
    pub organization_id: OrganizationId,
    pub entity_type: EntityType,
    pub entity_id: Uuid,
    pub operation: AuditOperation,
    pub actor: ActorId,
    pub timestamp: NaiveDateTime,
    pub before: Option<serde_json::Value>,
    pub after: Option<serde_json::Value>,
}

impl AuditRecord {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        organization_id: OrganizationId,
        entity_type: EntityType,
        entity_id: Uuid,
        operation: AuditOperation,
        actor: ActorId,
        timestamp: NaiveDateTime,
        before: Option<serde_json::Value>,
        after: Option<serde_json::Value>,
    ) -> Self {
        Self {
            sequence: 0,
            organization_id,
            entity_type,
            entity_id,
            operation,
            actor,
            timestamp,
            before,
            after,
        }
    }
}

/// Serialise an entity into an audit snapshot
pub fn snapshot<T: Serialize>(entity: &T) -> LedgerResult<serde_json::Value> {
    serde_json::to_value(entity)
        .map_err(|e| LedgerError::Integrity(format!("failed to snapshot entity: {}", e)))
}

/// Read side of the audit trail
#[derive(Clone)]
pub struct AuditLog<S: LedgerStorage> {
    storage: S,
}

impl<S: LedgerStorage> AuditLog<S> {
    pub fn new(storage: S) -> Self {
        Self { storage }
    }

    /// Every record for one entity, oldest first
    pub async fn query(
        &self,
        organization_id: OrganizationId,
        entity_type: EntityType,
        entity_id: Uuid,
    ) -> LedgerResult<Vec<AuditRecord>> {
        self.storage
            .audit_records(organization_id, entity_type, entity_id, None)
            .await
    }

    /// Records strictly after `sequence`, so a reader can resume where it stopped
    pub async fn query_after(
        &self,
        organization_id: OrganizationId,
        entity_type: EntityType,
        entity_id: Uuid,
        sequence: u64,
    ) -> LedgerResult<Vec<AuditRecord>> {
        self.storage
            .audit_records(organization_id, entity_type, entity_id, Some(sequence))
            .await
    }
}
