//! FC-030: Format generators.
//!
//! Each target reads the validated definition and emits one artifact. Values
//! are resolved against a static context (document context only, no wall
//! clock), so the same definition always produces the same bytes. Anything
//! that still references a runtime result is emitted as a runtime lookup.

pub mod agent;
pub mod jest;
pub mod pgtap;
pub mod playwright;

use crate::core::resolver;
use crate::core::state::RunContext;
use crate::core::types::{Action, ActionKind, HttpMethod, TestDefinition};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// Module the TypeScript targets import their runtime helpers from.
pub const RUNTIME_MODULE: &str = "./flowcheck-runtime";

/// Context used to pre-resolve values at generation time.
pub fn static_context(definition: &TestDefinition) -> RunContext {
    RunContext::for_generation(&definition.context)
}

/// First line of every artifact.
pub fn banner(definition: &TestDefinition) -> String {
    format!(
        "Generated by flowcheck {} from '{}'. Do not edit.",
        env!("CARGO_PKG_VERSION"),
        definition.id
    )
}

/// A JavaScript string literal.
pub fn js_string(s: &str) -> String {
    Value::String(s.to_string()).to_string()
}

/// A JavaScript expression for a value: a literal when it resolves
/// statically, otherwise a `resolve(...)` call evaluated against `ctx`.
pub fn js_value(value: &Value, ctx: &RunContext) -> String {
    let resolved = resolver::resolve_value(value, ctx);
    if resolver::collect_placeholders(&resolved).is_empty() {
        resolved.to_string()
    } else {
        format!("resolve({}, ctx)", resolved)
    }
}

/// [`js_value`] for a string.
pub fn js_text(s: &str, ctx: &RunContext) -> String {
    js_value(&Value::String(s.to_string()), ctx)
}

/// The awaited client call for a backend-bound action, or `None` for local
/// kinds (wait, ui interaction).
pub fn client_call(kind: &ActionKind, ctx: &RunContext) -> Option<String> {
    let call = match kind {
        ActionKind::CreateEntity(p) => format!("client.createEntity({})", payload(p, ctx)),
        ActionKind::CreateTransaction(p) => {
            format!("client.createTransaction({})", payload(p, ctx))
        }
        ActionKind::CreateRelationship(p) => {
            format!("client.createRelationship({})", payload(p, ctx))
        }
        ActionKind::SetDynamicField(p) => format!(
            "client.setDynamicField({}, {}, {})",
            js_text(&p.entity_id, ctx),
            js_text(&p.field_name, ctx),
            js_value(&p.field_value, ctx)
        ),
        ActionKind::ApiCall(p) => {
            let mut call = format!(
                "client.request({}, {}",
                js_string(&p.method.to_string()),
                js_text(&p.endpoint, ctx)
            );
            if let Some(body) = &p.body {
                call.push_str(", ");
                call.push_str(&js_value(body, ctx));
            } else if p.method != HttpMethod::Get && p.method != HttpMethod::Delete {
                call.push_str(", {}");
            }
            call.push(')');
            call
        }
        ActionKind::Wait(_) | ActionKind::UiInteraction(_) => return None,
    };
    Some(format!("await {}", call))
}

/// TypeScript lines for a backend-bound action: the awaited call, its status
/// check, its `store_as` binding and (with `merge`) its merge into the step
/// output object `out`.
pub fn ts_backend_lines(
    action: &Action,
    index: usize,
    ctx: &RunContext,
    merge: bool,
) -> Option<Vec<String>> {
    let call = client_call(&action.kind, ctx)?;
    let var = format!("a{}", index);
    let mut lines = vec![format!("const {} = {};", var, call)];
    if let ActionKind::ApiCall(api) = &action.kind {
        if let Some(status) = api.expect_status {
            lines.push(format!("expect({}.status).toBe({});", var, status));
        }
    }
    if let Some(name) = &action.store_as {
        lines.push(format!("ctx[{}] = {};", js_string(name), var));
    }
    if merge {
        lines.push(format!("Object.assign(out, {});", var));
    }
    Some(lines)
}

/// A value with every placeholder resolved against `ctx`, or `None` when
/// something still depends on runtime results.
pub fn statically_resolved<T: Serialize + DeserializeOwned>(value: &T, ctx: &RunContext) -> Option<T> {
    let raw = serde_json::to_value(value).ok()?;
    let resolved = resolver::resolve_value(&raw, ctx);
    if !resolver::collect_placeholders(&resolved).is_empty() {
        return None;
    }
    serde_json::from_value(resolved).ok()
}

/// Push `lines` onto `out`, each indented by `indent` spaces.
pub fn push_indented(out: &mut Vec<String>, indent: usize, lines: impl IntoIterator<Item = String>) {
    let pad = " ".repeat(indent);
    out.extend(lines.into_iter().map(|line| {
        if line.is_empty() {
            line
        } else {
            format!("{}{}", pad, line)
        }
    }));
}

fn payload<T: Serialize>(p: &T, ctx: &RunContext) -> String {
    js_value(&serde_json::to_value(p).unwrap_or(Value::Null), ctx)
}

/// A SQL literal for a resolved scalar.
pub fn sql_literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => sql_quote(s),
        other => format!("{}::jsonb", sql_quote(&other.to_string())),
    }
}

/// A single-quoted SQL string.
pub fn sql_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

/// A SQL identifier, quoted unless it is a plain lowercase name.
pub fn quote_ident(name: &str) -> String {
    let plain = name
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_lowercase() || c == '_')
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if plain {
        name.to_string()
    } else {
        format!("\"{}\"", name.replace('"', "\"\""))
    }
}

/// Collapse a text to a single line for comments and test names.
pub fn one_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::fixtures;
    use serde_json::json;

    #[test]
    fn test_fc030_js_value_static_and_runtime() {
        let def = fixtures::salon();
        let ctx = static_context(&def);
        assert_eq!(js_value(&json!("{{organization_id}}"), &ctx), "\"org-salon-001\"");
        assert_eq!(
            js_value(&json!({"id": "{{customer.id}}"}), &ctx),
            "resolve({\"id\":\"{{customer.id}}\"}, ctx)"
        );
        assert_eq!(js_text("{{clock+60}}", &ctx), "\"2024-01-01T09:01:00Z\"");
    }

    #[test]
    fn test_fc030_client_call() {
        let def = fixtures::salon();
        let ctx = static_context(&def);
        let step = def.step("book_appointment").unwrap();
        let call = client_call(&step.actions[1].kind, &ctx).unwrap();
        assert!(call.starts_with("await client.setDynamicField(resolve(\"{{customer.id}}\", ctx), \"last_booking\""));
        let ui = &def.step("register_customer").unwrap().actions[0].kind;
        assert!(client_call(ui, &ctx).is_none());
    }

    #[test]
    fn test_fc030_ts_backend_lines() {
        let def = fixtures::salon();
        let ctx = static_context(&def);
        let action = &def.step("register_customer").unwrap().actions[1];
        let lines = ts_backend_lines(action, 1, &ctx, true).unwrap();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("const a1 = await client.createEntity({"));
        assert_eq!(lines[1], "ctx[\"customer\"] = a1;");
        assert_eq!(lines[2], "Object.assign(out, a1);");
    }

    #[test]
    fn test_fc030_statically_resolved() {
        let def = fixtures::salon();
        let ctx = static_context(&def);
        let dated = json!({"at": "{{clock+1}}"});
        assert_eq!(
            statically_resolved(&dated, &ctx),
            Some(json!({"at": "2024-01-01T09:00:01Z"}))
        );
        assert_eq!(statically_resolved(&json!("{{customer.id}}"), &ctx), None);
    }

    #[test]
    fn test_fc030_sql_literal() {
        assert_eq!(sql_literal(&json!("O'Brien")), "'O''Brien'");
        assert_eq!(sql_literal(&json!(3)), "3");
        assert_eq!(sql_literal(&json!(true)), "TRUE");
        assert_eq!(sql_literal(&Value::Null), "NULL");
        assert_eq!(sql_literal(&json!({"a": 1})), "'{\"a\":1}'::jsonb");
    }

    #[test]
    fn test_fc030_quote_ident() {
        assert_eq!(quote_ident("core_entities"), "core_entities");
        assert_eq!(quote_ident("EntityType"), "\"EntityType\"");
        assert_eq!(quote_ident("1col"), "\"1col\"");
    }
}
