//! FC-004: Run context, the append-only variable store of one run.
//!
//! Entries are seeded from the document context, then extended with action
//! outputs (`store_as`) and step outputs (step id). An existing name is never
//! overwritten. Each step attempt works on a fork that is absorbed only when
//! the attempt passes, so failed attempts leave no trace.

use super::types::TestContext;
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;

/// Names seeded before any action runs.
pub const SEEDED_NAMES: &[&str] = &[
    "timestamp",
    "clock",
    "organization_id",
    "tenant",
    "currency",
    "locale",
];

/// Insertion-ordered, append-only variable map.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct RunContext {
    vars: IndexMap<String, Value>,
}

impl RunContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Context for a live run. `timestamp` is the document clock when set,
    /// otherwise `now`.
    pub fn seeded(context: &TestContext, now: &str) -> Self {
        let mut ctx = Self::for_generation(context);
        if !ctx.contains("timestamp") {
            ctx.insert("timestamp", Value::String(now.to_string()));
        }
        ctx
    }

    /// Context for code generation: no wall-clock value, so output stays a
    /// pure function of the document. `timestamp` is present only when the
    /// document pins a clock.
    pub fn for_generation(context: &TestContext) -> Self {
        let mut ctx = Self::new();
        if let Some(clock) = &context.clock {
            ctx.insert("timestamp", Value::String(clock.clone()));
            ctx.insert("clock", Value::String(clock.clone()));
        }
        ctx.insert(
            "organization_id",
            Value::String(context.organization_id.clone()),
        );
        if let Some(tenant) = &context.tenant {
            ctx.insert("tenant", Value::String(tenant.clone()));
        }
        ctx.insert("currency", Value::String(context.currency.clone()));
        ctx.insert("locale", Value::String(context.locale.clone()));
        ctx
    }

    /// Add a name. Returns false (and leaves the entry untouched) if the
    /// name already exists.
    pub fn insert(&mut self, name: impl Into<String>, value: Value) -> bool {
        let name = name.into();
        if self.vars.contains_key(&name) {
            return false;
        }
        self.vars.insert(name, value);
        true
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    /// Resolve `name` or `name.path.to.field`. Numeric segments index arrays.
    pub fn lookup(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let head = segments.next()?;
        let mut current = self.vars.get(head)?;
        for segment in segments {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.vars.iter()
    }

    /// Working copy for one step attempt.
    pub fn fork(&self) -> Self {
        self.clone()
    }

    /// Append every entry of `other` not yet present, in `other`'s order.
    /// Returns the number of entries added.
    pub fn absorb(&mut self, other: RunContext) -> usize {
        let mut added = 0;
        for (name, value) in other.vars {
            if self.insert(name, value) {
                added += 1;
            }
        }
        added
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn context(clock: Option<&str>) -> TestContext {
        TestContext {
            tenant: Some("acme".into()),
            organization_id: "org-1".into(),
            currency: "EUR".into(),
            locale: "de-DE".into(),
            fiscal_year: Some(2024),
            clock: clock.map(String::from),
        }
    }

    #[test]
    fn test_fc004_seeded_uses_clock() {
        let ctx = RunContext::seeded(&context(Some("2024-01-01T00:00:00Z")), "2030-05-05T00:00:00Z");
        assert_eq!(ctx.get("timestamp"), Some(&json!("2024-01-01T00:00:00Z")));
        assert_eq!(ctx.get("clock"), Some(&json!("2024-01-01T00:00:00Z")));
        assert_eq!(ctx.get("organization_id"), Some(&json!("org-1")));
        assert_eq!(ctx.get("tenant"), Some(&json!("acme")));
        assert_eq!(ctx.get("currency"), Some(&json!("EUR")));
        assert_eq!(ctx.get("locale"), Some(&json!("de-DE")));
        for name in SEEDED_NAMES {
            assert!(ctx.contains(name), "missing {name}");
        }
    }

    #[test]
    fn test_fc004_seeded_without_clock_uses_now() {
        let ctx = RunContext::seeded(&context(None), "2030-05-05T00:00:00Z");
        assert_eq!(ctx.get("timestamp"), Some(&json!("2030-05-05T00:00:00Z")));
        assert!(!ctx.contains("clock"));
    }

    #[test]
    fn test_fc004_generation_context_has_no_wall_clock() {
        let ctx = RunContext::for_generation(&context(None));
        assert!(!ctx.contains("timestamp"));
        assert!(ctx.contains("organization_id"));
    }

    #[test]
    fn test_fc004_insert_never_overwrites() {
        let mut ctx = RunContext::new();
        assert!(ctx.insert("a", json!(1)));
        assert!(!ctx.insert("a", json!(2)));
        assert_eq!(ctx.get("a"), Some(&json!(1)));
        assert_eq!(ctx.len(), 1);
    }

    #[test]
    fn test_fc004_lookup_paths() {
        let mut ctx = RunContext::new();
        ctx.insert(
            "customer",
            json!({"id": "ent-1", "tags": ["vip", "new"], "address": {"city": "Dubai"}}),
        );
        assert_eq!(ctx.lookup("customer.id"), Some(&json!("ent-1")));
        assert_eq!(ctx.lookup("customer.tags.1"), Some(&json!("new")));
        assert_eq!(ctx.lookup("customer.address.city"), Some(&json!("Dubai")));
        assert_eq!(ctx.lookup("customer.missing"), None);
        assert_eq!(ctx.lookup("customer.id.deeper"), None);
        assert_eq!(ctx.lookup("customer.tags.x"), None);
        assert_eq!(ctx.lookup("nobody"), None);
    }

    #[test]
    fn test_fc004_fork_and_absorb() {
        let mut ctx = RunContext::new();
        ctx.insert("a", json!(1));
        let mut scratch = ctx.fork();
        scratch.insert("b", json!(2));
        scratch.insert("c", json!(3));
        assert!(!ctx.contains("b"));
        assert_eq!(ctx.absorb(scratch), 2);
        let names: Vec<&String> = ctx.iter().map(|(k, _)| k).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_fc004_serializes_as_map() {
        let mut ctx = RunContext::new();
        ctx.insert("x", json!("y"));
        assert_eq!(serde_json::to_value(&ctx).unwrap(), json!({"x": "y"}));
    }
}
