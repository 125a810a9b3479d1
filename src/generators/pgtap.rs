//! FC-033: pgTAP target.
//!
//! One `is(count, expected)` check per database assertion group, each scoped
//! to the document's organization. Conditions that reference run results
//! become psql variables (`:'customer_id'`) to be passed with `-v`.
//! The script runs inside a transaction that is rolled back.

use super::{banner, one_line, quote_ident, sql_literal, sql_quote, static_context};
use crate::core::resolver;
use crate::core::types::{AssertionGroup, TestDefinition};
use serde_json::Value;

pub fn generate(definition: &TestDefinition) -> Result<String, String> {
    let ctx = static_context(definition);
    let organization = &definition.context.organization_id;
    let mut variables: Vec<String> = Vec::new();
    let mut checks: Vec<Vec<String>> = Vec::new();

    for group in &definition.assertions {
        let AssertionGroup::Database(db) = group else {
            continue;
        };
        if db.table.trim().is_empty() {
            return Err("database assertion has an empty table name".to_string());
        }
        let mut predicates = vec![format!("organization_id = {}", sql_quote(organization))];
        for (column, value) in &db.conditions {
            let resolved = resolver::resolve_value(value, &ctx);
            predicates.push(predicate(column, &resolved, &mut variables));
        }
        let description = db.description.as_deref().map(one_line).unwrap_or_else(|| {
            format!("{} has {} matching row(s)", db.table, db.expected_count)
        });

        let mut check = vec![
            format!("-- {}", description),
            "SELECT is(".to_string(),
            format!("  (SELECT count(*) FROM {}", quote_ident(&db.table)),
        ];
        for (i, p) in predicates.iter().enumerate() {
            let keyword = if i == 0 { "    WHERE" } else { "      AND" };
            check.push(format!("{} {}", keyword, p));
        }
        if let Some(last) = check.last_mut() {
            last.push_str("),");
        }
        check.push(format!("  {}::bigint,", db.expected_count));
        check.push(format!("  {}", sql_quote(&description)));
        check.push(");".to_string());
        checks.push(check);
    }

    let mut out = vec![
        format!("-- {}", banner(definition)),
        format!("-- {} ({})", one_line(&definition.title), definition.id),
        format!("-- Organization: {}", organization),
    ];
    if !variables.is_empty() {
        out.push(format!(
            "-- Requires psql variables (pass with -v name=value): {}",
            variables.join(", ")
        ));
    }
    out.push("BEGIN;".to_string());

    if checks.is_empty() {
        out.push("SELECT plan(1);".to_string());
        out.push(String::new());
        out.push(format!(
            "SELECT pass({});",
            sql_quote(&format!("{} declares no database assertions", definition.id))
        ));
    } else {
        out.push(format!("SELECT plan({});", checks.len()));
        for check in checks {
            out.push(String::new());
            out.extend(check);
        }
    }

    out.push(String::new());
    out.push("SELECT * FROM finish();".to_string());
    out.push("ROLLBACK;".to_string());
    Ok(out.join("\n") + "\n")
}

fn predicate(column: &str, value: &Value, variables: &mut Vec<String>) -> String {
    let column = quote_ident(column);
    match value {
        Value::Null => format!("{} IS NULL", column),
        Value::String(s) if resolver::has_placeholder(s) => {
            format!("{} = {}", column, sql_text(s, variables))
        }
        other => format!("{} = {}", column, sql_literal(other)),
    }
}

/// A SQL text expression with placeholders replaced by psql variables.
fn sql_text(template: &str, variables: &mut Vec<String>) -> String {
    let mut parts = Vec::new();
    let mut rest = template;
    while let Some(open) = rest.find("{{") {
        let Some(close) = rest[open..].find("}}") else {
            break;
        };
        if open > 0 {
            parts.push(sql_quote(&rest[..open]));
        }
        let name = variable_name(&rest[open + 2..open + close]);
        parts.push(format!(":'{}'", name));
        if !variables.contains(&name) {
            variables.push(name);
        }
        rest = &rest[open + close + 2..];
    }
    if !rest.is_empty() {
        parts.push(sql_quote(rest));
    }
    parts.join(" || ")
}

/// psql variable for a placeholder key: `customer.id` -> `customer_id`.
fn variable_name(key: &str) -> String {
    key.trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::fixtures;
    use crate::core::parser::{parse_definition, parse_document, DocumentFormat};

    #[test]
    fn test_fc033_salon_script() {
        let sql = generate(&fixtures::salon()).unwrap();
        let expected = "\
BEGIN;
SELECT plan(1);

-- one customer registered
SELECT is(
  (SELECT count(*) FROM core_entities
    WHERE organization_id = 'org-salon-001'
      AND entity_type = 'customer'),
  1::bigint,
  'one customer registered'
);

SELECT * FROM finish();
ROLLBACK;
";
        assert!(sql.starts_with("-- Generated by flowcheck"));
        assert!(sql.contains("-- Organization: org-salon-001\n"));
        assert!(sql.ends_with(expected), "{sql}");
        assert!(!sql.contains("psql variables"));
    }

    #[test]
    fn test_fc033_placeholders_become_variables() {
        let text = fixtures::with_steps(
            "  - id: s\n    persona: owner\n    actions:\n      - type: wait\n        duration_ms: 1\n",
        ) + r#"assertions:
  - type: database
    table: core_dynamic_data
    conditions:
      entity_id: "{{customer.id}}"
      field_name: last_booking
      field_value: "APT-{{appointment.code}}"
      removed_at: null
    expected_count: 1
  - type: database
    table: universal_transactions
    conditions:
      source_entity_id: "{{customer.id}}"
    expected_count: 2
"#;
        let raw = parse_document(&text, DocumentFormat::Yaml).unwrap();
        let def = parse_definition(&raw).unwrap();
        let sql = generate(&def).unwrap();
        assert!(sql.contains("-- Requires psql variables (pass with -v name=value): customer_id, appointment_code"));
        assert!(sql.contains("SELECT plan(2);"));
        assert!(sql.contains("      AND entity_id = :'customer_id'"));
        assert!(sql.contains("      AND field_value = 'APT-' || :'appointment_code'"));
        assert!(sql.contains("      AND removed_at IS NULL),"));
        assert!(sql.contains("'core_dynamic_data has 1 matching row(s)'"));
    }

    #[test]
    fn test_fc033_no_database_groups() {
        let text = fixtures::with_steps(
            "  - id: s\n    persona: owner\n    actions:\n      - type: wait\n        duration_ms: 1\n",
        );
        let raw = parse_document(&text, DocumentFormat::Yaml).unwrap();
        let def = parse_definition(&raw).unwrap();
        let sql = generate(&def).unwrap();
        assert!(sql.contains("SELECT plan(1);\n\nSELECT pass('minimal declares no database assertions');"));
    }

    #[test]
    fn test_fc033_sql_text() {
        let mut vars = Vec::new();
        assert_eq!(sql_text("{{a.b}}", &mut vars), ":'a_b'");
        assert_eq!(sql_text("x{{ a.b }}y", &mut vars), "'x' || :'a_b' || 'y'");
        assert_eq!(vars, vec!["a_b"]);
        assert_eq!(sql_text("it's", &mut vars), "'it''s'");
    }
}
