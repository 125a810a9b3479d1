//! FC-012: In-memory backend.
//!
//! Reference implementation of the backend port over five universal tables.
//! Ids are deterministic (`ent-000001`, `txn-000002`, ...) so runs are
//! reproducible. Relationships and dynamic fields must point at an entity of
//! the current organization.

use super::{Backend, Record};
use crate::core::types::{
    value_to_string, EntityPayload, RelationshipPayload, TransactionPayload,
};
use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::{json, Map, Value};
use std::sync::Mutex;
use std::time::Duration;

pub const ENTITIES: &str = "core_entities";
pub const DYNAMIC_DATA: &str = "core_dynamic_data";
pub const RELATIONSHIPS: &str = "core_relationships";
pub const TRANSACTIONS: &str = "universal_transactions";
pub const TRANSACTION_LINES: &str = "universal_transaction_lines";

/// Every table the memory backend knows.
pub const TABLES: &[&str] = &[
    ENTITIES,
    DYNAMIC_DATA,
    RELATIONSHIPS,
    TRANSACTIONS,
    TRANSACTION_LINES,
];

#[derive(Debug, Default)]
struct MemoryState {
    organization_id: Option<String>,
    tables: IndexMap<String, Vec<Record>>,
    next_id: u64,
}

impl MemoryState {
    fn org(&self) -> Result<String, String> {
        self.organization_id
            .clone()
            .ok_or_else(|| "no organization scope set".to_string())
    }

    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}-{:06}", prefix, self.next_id)
    }

    fn insert(&mut self, table: &str, record: Record) {
        self.tables.entry(table.to_string()).or_default().push(record);
    }

    fn require_entity(&self, org: &str, entity_id: &str) -> Result<(), String> {
        let found = self
            .tables
            .get(ENTITIES)
            .map(|rows| {
                rows.iter()
                    .any(|r| r["id"] == entity_id && r["organization_id"] == org)
            })
            .unwrap_or(false);
        if found {
            Ok(())
        } else {
            Err(format!("entity '{}' not found in organization '{}'", entity_id, org))
        }
    }
}

/// Shared, mutex-guarded in-memory store.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
    latency: Option<Duration>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every operation by `latency` (for timeout testing).
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            state: Mutex::default(),
            latency: Some(latency),
        }
    }

    /// Snapshot of every record in a table, across organizations.
    pub fn records(&self, table: &str) -> Vec<Record> {
        self.state
            .lock()
            .ok()
            .and_then(|s| s.tables.get(table).cloned())
            .unwrap_or_default()
    }

    pub fn count(&self, table: &str) -> usize {
        self.records(table).len()
    }

    async fn simulate_latency(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut MemoryState) -> Result<T, String>) -> Result<T, String> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| "memory backend lock poisoned".to_string())?;
        f(&mut state)
    }
}

fn put_opt(record: &mut Map<String, Value>, key: &str, value: Option<Value>) {
    if let Some(v) = value {
        record.insert(key.to_string(), v);
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    fn organization_id(&self) -> Option<String> {
        self.state.lock().ok().and_then(|s| s.organization_id.clone())
    }

    fn set_organization_id(&self, organization_id: &str) {
        if let Ok(mut state) = self.state.lock() {
            state.organization_id = Some(organization_id.to_string());
        }
    }

    async fn create_entity(&self, entity: EntityPayload) -> Result<Record, String> {
        self.simulate_latency().await;
        self.with_state(|state| {
            let org = state.org()?;
            let id = state.next_id("ent");
            let mut record = Map::new();
            record.insert("id".into(), json!(id));
            record.insert("organization_id".into(), json!(org));
            record.insert("entity_type".into(), json!(entity.entity_type));
            record.insert("entity_name".into(), json!(entity.entity_name));
            put_opt(&mut record, "entity_code", entity.entity_code.map(Value::String));
            record.insert("smart_code".into(), json!(entity.smart_code));
            record.insert("status".into(), json!("active"));
            put_opt(&mut record, "metadata", entity.metadata);
            state.insert(ENTITIES, Value::Object(record.clone()));

            if !entity.dynamic_fields.is_empty() {
                for (name, value) in &entity.dynamic_fields {
                    let field_id = state.next_id("dyn");
                    state.insert(
                        DYNAMIC_DATA,
                        json!({
                            "id": field_id,
                            "organization_id": org,
                            "entity_id": id,
                            "field_name": name,
                            "field_value": value,
                        }),
                    );
                }
                record.insert(
                    "dynamic_fields".into(),
                    Value::Object(entity.dynamic_fields.into_iter().collect()),
                );
            }
            Ok(Value::Object(record))
        })
    }

    async fn create_transaction(&self, transaction: TransactionPayload) -> Result<Record, String> {
        self.simulate_latency().await;
        self.with_state(|state| {
            let org = state.org()?;
            for entity_id in [&transaction.source_entity_id, &transaction.target_entity_id]
                .into_iter()
                .flatten()
            {
                state.require_entity(&org, entity_id)?;
            }
            for item in &transaction.line_items {
                if let Some(entity_id) = &item.entity_id {
                    state.require_entity(&org, entity_id)?;
                }
            }

            let id = state.next_id("txn");
            let mut record = Map::new();
            record.insert("id".into(), json!(id));
            record.insert("organization_id".into(), json!(org));
            record.insert("transaction_type".into(), json!(transaction.transaction_type));
            record.insert("smart_code".into(), json!(transaction.smart_code));
            put_opt(&mut record, "transaction_code", transaction.transaction_code.map(Value::String));
            put_opt(&mut record, "transaction_date", transaction.transaction_date.map(Value::String));
            put_opt(&mut record, "total_amount", transaction.total_amount);
            put_opt(&mut record, "source_entity_id", transaction.source_entity_id.map(Value::String));
            put_opt(&mut record, "target_entity_id", transaction.target_entity_id.map(Value::String));
            record.insert("status".into(), json!("posted"));
            put_opt(&mut record, "metadata", transaction.metadata);
            record.insert("line_count".into(), json!(transaction.line_items.len()));
            state.insert(TRANSACTIONS, Value::Object(record.clone()));

            for (number, item) in transaction.line_items.into_iter().enumerate() {
                let line_id = state.next_id("line");
                let mut line = match serde_json::to_value(item) {
                    Ok(Value::Object(map)) => map,
                    Ok(_) => Map::new(),
                    Err(e) => return Err(format!("cannot store line item: {}", e)),
                };
                line.insert("id".into(), json!(line_id));
                line.insert("organization_id".into(), json!(org));
                line.insert("transaction_id".into(), json!(id));
                line.insert("line_number".into(), json!(number + 1));
                state.insert(TRANSACTION_LINES, Value::Object(line));
            }
            Ok(Value::Object(record))
        })
    }

    async fn create_relationship(&self, relationship: RelationshipPayload) -> Result<Record, String> {
        self.simulate_latency().await;
        self.with_state(|state| {
            let org = state.org()?;
            state.require_entity(&org, &relationship.from_entity_id)?;
            state.require_entity(&org, &relationship.to_entity_id)?;
            let id = state.next_id("rel");
            let mut record = Map::new();
            record.insert("id".into(), json!(id));
            record.insert("organization_id".into(), json!(org));
            record.insert("from_entity_id".into(), json!(relationship.from_entity_id));
            record.insert("to_entity_id".into(), json!(relationship.to_entity_id));
            record.insert("relationship_type".into(), json!(relationship.relationship_type));
            record.insert("smart_code".into(), json!(relationship.smart_code));
            put_opt(&mut record, "metadata", relationship.metadata);
            let record = Value::Object(record);
            state.insert(RELATIONSHIPS, record.clone());
            Ok(record)
        })
    }

    async fn set_dynamic_field(
        &self,
        entity_id: &str,
        field_name: &str,
        value: Value,
    ) -> Result<Record, String> {
        self.simulate_latency().await;
        self.with_state(|state| {
            let org = state.org()?;
            state.require_entity(&org, entity_id)?;
            let id = state.next_id("dyn");
            let record = json!({
                "id": id,
                "organization_id": org,
                "entity_id": entity_id,
                "field_name": field_name,
                "field_value": value,
            });
            state.insert(DYNAMIC_DATA, record.clone());
            Ok(record)
        })
    }

    async fn query(&self, table: &str, conditions: &IndexMap<String, Value>) -> Result<Vec<Record>, String> {
        self.simulate_latency().await;
        if !TABLES.contains(&table) {
            return Err(format!("unknown table '{}'", table));
        }
        self.with_state(|state| {
            let org = state.org()?;
            let rows = state.tables.get(table).map(Vec::as_slice).unwrap_or(&[]);
            Ok(rows
                .iter()
                .filter(|row| row["organization_id"] == org.as_str())
                .filter(|row| {
                    conditions.iter().all(|(column, expected)| match row.get(column) {
                        Some(actual) => {
                            actual == expected || value_to_string(actual) == value_to_string(expected)
                        }
                        None => expected.is_null(),
                    })
                })
                .cloned()
                .collect())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::LineItem;

    fn entity(entity_type: &str, name: &str) -> EntityPayload {
        EntityPayload {
            entity_type: entity_type.into(),
            entity_name: name.into(),
            entity_code: None,
            smart_code: "HERA.SALON.CRM.ENT.CUST.v1".into(),
            dynamic_fields: IndexMap::new(),
            metadata: None,
        }
    }

    fn transaction(source: Option<&str>) -> TransactionPayload {
        TransactionPayload {
            transaction_type: "sale".into(),
            smart_code: "HERA.SALON.POS.TXN.SALE.v1".into(),
            transaction_code: None,
            transaction_date: None,
            total_amount: Some(json!(50)),
            source_entity_id: source.map(String::from),
            target_entity_id: None,
            line_items: vec![],
            metadata: None,
        }
    }

    fn scoped() -> MemoryBackend {
        let b = MemoryBackend::new();
        b.set_organization_id("org-1");
        b
    }

    #[tokio::test]
    async fn test_fc012_requires_organization() {
        let b = MemoryBackend::new();
        assert_eq!(b.organization_id(), None);
        let err = b.create_entity(entity("customer", "A")).await.unwrap_err();
        assert!(err.contains("no organization scope"));
    }

    #[tokio::test]
    async fn test_fc012_entity_ids_deterministic() {
        let b = scoped();
        let first = b.create_entity(entity("customer", "A")).await.unwrap();
        let second = b.create_entity(entity("customer", "B")).await.unwrap();
        assert_eq!(first["id"], "ent-000001");
        assert_eq!(second["id"], "ent-000002");
        assert_eq!(b.count(ENTITIES), 2);
    }

    #[tokio::test]
    async fn test_fc012_dynamic_fields_stored() {
        let b = scoped();
        let mut payload = entity("customer", "A");
        payload.dynamic_fields.insert("phone".into(), json!("555"));
        let record = b.create_entity(payload).await.unwrap();
        assert_eq!(record["dynamic_fields"]["phone"], "555");
        let rows = b.records(DYNAMIC_DATA);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["entity_id"], record["id"]);
    }

    #[tokio::test]
    async fn test_fc012_transaction_with_lines() {
        let b = scoped();
        let customer = b.create_entity(entity("customer", "A")).await.unwrap();
        let mut payload = transaction(customer["id"].as_str());
        payload.line_items = vec![
            LineItem {
                line_type: None,
                entity_id: None,
                quantity: Some(json!(2)),
                unit_price: Some(json!(25)),
                line_amount: Some(json!(50)),
                smart_code: None,
                description: Some("two cuts".into()),
            },
        ];
        let txn = b.create_transaction(payload).await.unwrap();
        assert_eq!(txn["line_count"], 1);
        let lines = b.records(TRANSACTION_LINES);
        assert_eq!(lines[0]["transaction_id"], txn["id"]);
        assert_eq!(lines[0]["line_number"], 1);
        assert_eq!(lines[0]["quantity"], 2);
    }

    #[tokio::test]
    async fn test_fc012_unknown_entity_rejected() {
        let b = scoped();
        let err = b.create_transaction(transaction(Some("ent-999999"))).await.unwrap_err();
        assert!(err.contains("entity 'ent-999999' not found"));
        assert_eq!(b.count(TRANSACTIONS), 0);

        let err = b
            .set_dynamic_field("ent-404", "phone", json!("1"))
            .await
            .unwrap_err();
        assert!(err.contains("not found"));
    }

    #[tokio::test]
    async fn test_fc012_relationship() {
        let b = scoped();
        let a = b.create_entity(entity("customer", "A")).await.unwrap();
        let s = b.create_entity(entity("staff", "S")).await.unwrap();
        let rel = b
            .create_relationship(RelationshipPayload {
                from_entity_id: a["id"].as_str().unwrap().into(),
                to_entity_id: s["id"].as_str().unwrap().into(),
                relationship_type: "assigned_to".into(),
                smart_code: "HERA.SALON.REL.STAFF.ASSIGN.v1".into(),
                metadata: None,
            })
            .await
            .unwrap();
        assert_eq!(rel["relationship_type"], "assigned_to");
        assert_eq!(b.count(RELATIONSHIPS), 1);
    }

    #[tokio::test]
    async fn test_fc012_query_scoped_by_organization() {
        let b = scoped();
        b.create_entity(entity("customer", "A")).await.unwrap();
        b.create_entity(entity("staff", "S")).await.unwrap();
        b.set_organization_id("org-2");
        b.create_entity(entity("customer", "Other")).await.unwrap();

        let mut conditions = IndexMap::new();
        conditions.insert("entity_type".to_string(), json!("customer"));
        assert_eq!(b.query(ENTITIES, &conditions).await.unwrap().len(), 1);

        b.set_organization_id("org-1");
        assert_eq!(b.query(ENTITIES, &IndexMap::new()).await.unwrap().len(), 2);
        let rows = b.query(ENTITIES, &conditions).await.unwrap();
        assert_eq!(rows[0]["entity_name"], "A");
    }

    #[tokio::test]
    async fn test_fc012_query_loose_scalar_match_and_unknown_table() {
        let b = scoped();
        b.create_transaction(transaction(None)).await.unwrap();
        let mut conditions = IndexMap::new();
        conditions.insert("total_amount".to_string(), json!("50"));
        assert_eq!(b.query(TRANSACTIONS, &conditions).await.unwrap().len(), 1);
        assert!(b.query("accounts", &IndexMap::new()).await.is_err());
    }

    #[tokio::test]
    async fn test_fc012_latency() {
        let b = MemoryBackend::with_latency(Duration::from_millis(20));
        b.set_organization_id("org-1");
        let start = std::time::Instant::now();
        b.create_entity(entity("customer", "A")).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(20));
    }
}
