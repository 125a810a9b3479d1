//! FC-011: Backend port, the narrow contract the executor drives.
//!
//! A backend owns the records a test creates. Every operation is scoped to
//! the organization set with `set_organization_id`. Implementations must be
//! shareable across tasks: the executor moves each call onto its own task so
//! a step timeout can abandon it.

pub mod memory;

use crate::core::types::{
    ActionKind, ApiPayload, EntityPayload, RelationshipPayload, TransactionPayload,
};
use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::Value;
use std::sync::Arc;

/// One stored record, as returned to the run context.
pub type Record = Value;

/// Operations a test can perform against a system under test.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Current organization scope, if one is set.
    fn organization_id(&self) -> Option<String>;

    /// Scope all following operations to an organization.
    fn set_organization_id(&self, organization_id: &str);

    async fn create_entity(&self, entity: EntityPayload) -> Result<Record, String>;

    async fn create_transaction(&self, transaction: TransactionPayload) -> Result<Record, String>;

    async fn create_relationship(&self, relationship: RelationshipPayload) -> Result<Record, String>;

    async fn set_dynamic_field(
        &self,
        entity_id: &str,
        field_name: &str,
        value: Value,
    ) -> Result<Record, String>;

    /// Raw API request. Backends without an HTTP surface reject it.
    async fn call_api(&self, request: ApiPayload) -> Result<Record, String> {
        Err(format!(
            "{} {}: this backend does not accept api calls",
            request.method, request.endpoint
        ))
    }

    /// Records in `table` (within the current organization) whose columns
    /// equal every condition.
    async fn query(&self, table: &str, conditions: &IndexMap<String, Value>) -> Result<Vec<Record>, String>;
}

/// Execute one backend-bound action kind.
/// Wait and UI interactions never reach a backend.
pub async fn dispatch(backend: &Arc<dyn Backend>, kind: ActionKind) -> Result<Record, String> {
    match kind {
        ActionKind::CreateEntity(p) => backend.create_entity(p).await,
        ActionKind::CreateTransaction(p) => backend.create_transaction(p).await,
        ActionKind::CreateRelationship(p) => backend.create_relationship(p).await,
        ActionKind::SetDynamicField(p) => {
            backend
                .set_dynamic_field(&p.entity_id, &p.field_name, p.field_value)
                .await
        }
        ActionKind::ApiCall(p) => backend.call_api(p).await,
        other => Err(format!("'{}' is not a backend operation", other)),
    }
}
