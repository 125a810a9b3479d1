//! FC-003: Template resolution over value trees.
//!
//! Resolves `{{name}}`, `{{name.path}}` and `{{clock+N}}` placeholders against
//! a run context. Unresolved placeholders are left verbatim. A string that is
//! exactly one placeholder resolves to the typed value it names.

use super::state::RunContext;
use super::types::value_to_string;
use serde_json::{Map, Value};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

/// Resolve every string inside a value tree. Keys are left as written.
pub fn resolve_value(value: &Value, ctx: &RunContext) -> Value {
    match value {
        Value::String(s) => resolve_string_value(s, ctx),
        Value::Array(items) => Value::Array(items.iter().map(|v| resolve_value(v, ctx)).collect()),
        Value::Object(map) => {
            let mut resolved = Map::with_capacity(map.len());
            for (key, v) in map {
                resolved.insert(key.clone(), resolve_value(v, ctx));
            }
            Value::Object(resolved)
        }
        other => other.clone(),
    }
}

/// Like [`resolve_value`], but every string stays a string.
pub fn resolve_text_value(value: &Value, ctx: &RunContext) -> Value {
    match value {
        Value::String(s) => Value::String(resolve_string(s, ctx)),
        Value::Array(items) => {
            Value::Array(items.iter().map(|v| resolve_text_value(v, ctx)).collect())
        }
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, v)| (key.clone(), resolve_text_value(v, ctx)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn resolve_string_value(s: &str, ctx: &RunContext) -> Value {
    if let Some(key) = sole_placeholder(s) {
        if let Some(value) = lookup(key, ctx) {
            return value;
        }
    }
    Value::String(resolve_string(s, ctx))
}

/// Substitute every resolvable placeholder in a string. Substituted text is
/// not scanned again.
pub fn resolve_string(template: &str, ctx: &RunContext) -> String {
    let mut result = template.to_string();
    let mut start = 0;

    while let Some(open) = result[start..].find("{{") {
        let open = start + open;
        let Some(close) = result[open..].find("}}") else {
            break;
        };
        let close = open + close + 2;
        let key = result[open + 2..close - 2].trim().to_string();

        match lookup(&key, ctx) {
            Some(value) => {
                let text = value_to_string(&value);
                result.replace_range(open..close, &text);
                start = open + text.len();
            }
            None => start = close,
        }
    }

    result
}

/// Resolve one placeholder key.
fn lookup(key: &str, ctx: &RunContext) -> Option<Value> {
    if let Some(offset) = key.strip_prefix("clock") {
        if let Some(seconds) = parse_offset(offset) {
            let clock = ctx.get("clock")?.as_str()?;
            return shift_clock(clock, seconds).map(Value::String);
        }
    }
    ctx.lookup(key).cloned()
}

fn parse_offset(offset: &str) -> Option<i64> {
    let offset = offset.trim();
    if let Some(n) = offset.strip_prefix('+') {
        n.trim().parse::<i64>().ok()
    } else if let Some(n) = offset.strip_prefix('-') {
        n.trim().parse::<i64>().ok().map(|n| -n)
    } else {
        None
    }
}

/// Shift an RFC 3339 instant by whole seconds.
pub fn shift_clock(clock: &str, seconds: i64) -> Option<String> {
    let instant = OffsetDateTime::parse(clock, &Rfc3339).ok()?;
    let shifted = instant.checked_add(time::Duration::seconds(seconds))?;
    shifted.format(&Rfc3339).ok()
}

/// Whether `clock` parses as RFC 3339.
pub fn is_valid_clock(clock: &str) -> bool {
    OffsetDateTime::parse(clock, &Rfc3339).is_ok()
}

/// If the whole string is a single placeholder, its trimmed key.
fn sole_placeholder(s: &str) -> Option<&str> {
    let inner = s.strip_prefix("{{")?.strip_suffix("}}")?;
    if inner.contains("{{") || inner.contains("}}") {
        return None;
    }
    Some(inner.trim())
}

/// Whether a string still contains a `{{...}}` placeholder.
pub fn has_placeholder(s: &str) -> bool {
    s.find("{{")
        .map(|open| s[open..].contains("}}"))
        .unwrap_or(false)
}

/// Placeholder keys in a string, in order of appearance.
pub fn placeholders(s: &str) -> Vec<String> {
    let mut keys = Vec::new();
    let mut start = 0;
    while let Some(open) = s[start..].find("{{") {
        let open = start + open;
        let Some(close) = s[open..].find("}}") else {
            break;
        };
        let close = open + close;
        keys.push(s[open + 2..close].trim().to_string());
        start = close + 2;
    }
    keys
}

/// Every distinct placeholder key in a value tree, in document order.
pub fn collect_placeholders(value: &Value) -> Vec<String> {
    let mut keys = Vec::new();
    collect_into(value, &mut keys);
    keys
}

fn collect_into(value: &Value, keys: &mut Vec<String>) {
    match value {
        Value::String(s) => {
            for key in placeholders(s) {
                if !keys.contains(&key) {
                    keys.push(key);
                }
            }
        }
        Value::Array(items) => items.iter().for_each(|v| collect_into(v, keys)),
        Value::Object(map) => map.values().for_each(|v| collect_into(v, keys)),
        _ => {}
    }
}

/// The context name a placeholder key refers to (`customer` for
/// `customer.id`). `clock+N` keys refer to `clock`.
pub fn root_name(key: &str) -> &str {
    let head = key.split('.').next().unwrap_or(key);
    if head.starts_with("clock") && parse_offset(&head[5..]).is_some() {
        return "clock";
    }
    head
}
