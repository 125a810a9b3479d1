//! FC-032: Jest target.
//!
//! Data-level test suite: setup in `beforeAll`, cleanup in `afterAll`, one
//! `test` per step, then an `assertions` block. Business rules are checked
//! through the runtime oracles, with expectations precomputed here.

use super::{
    banner, js_string, js_text, js_value, one_line, push_indented, static_context,
    statically_resolved, ts_backend_lines, RUNTIME_MODULE,
};
use crate::core::state::RunContext;
use crate::core::types::{
    Action, ActionKind, AssertionGroup, BusinessRule, Step, TestDefinition,
};
use crate::oracle::{self, tax};

pub fn generate(definition: &TestDefinition) -> Result<String, String> {
    let ctx = static_context(definition);
    let seed = serde_json::to_string(&ctx).map_err(|e| format!("cannot encode context: {}", e))?;
    let retries = definition.steps.iter().map(|s| s.retry).max().unwrap_or(0);

    let mut out = vec![
        format!("// {}", banner(definition)),
        format!(
            "import {{ createClient, holds, lookup, oracles, resolve }} from '{}';",
            RUNTIME_MODULE
        ),
        String::new(),
    ];
    if retries > 0 {
        out.push(format!("jest.retryTimes({});", retries));
        out.push(String::new());
    }
    out.push(format!("describe({}, () => {{", js_string(&definition.title)));
    out.push(format!("  const ctx: Record<string, unknown> = {};", seed));
    out.push(format!(
        "  const client = createClient({{ organizationId: {} }});",
        js_string(&definition.context.organization_id)
    ));

    if !definition.setup.is_empty() {
        out.push(String::new());
        out.push("  beforeAll(async () => {".to_string());
        for (index, action) in definition.setup.iter().enumerate() {
            push_indented(&mut out, 4, action_lines(action, index, &ctx, false));
        }
        out.push("  });".to_string());
    }
    if !definition.cleanup.is_empty() {
        out.push(String::new());
        out.push("  afterAll(async () => {".to_string());
        for (index, action) in definition.cleanup.iter().enumerate() {
            push_indented(&mut out, 4, action_lines(action, index, &ctx, false));
        }
        out.push("  });".to_string());
    }

    for step in &definition.steps {
        out.push(String::new());
        push_indented(&mut out, 2, step_lines(definition, step, &ctx));
    }

    if !definition.assertions.is_empty() {
        out.push(String::new());
        out.push("  describe(\"assertions\", () => {".to_string());
        for (index, group) in definition.assertions.iter().enumerate() {
            if index > 0 {
                out.push(String::new());
            }
            push_indented(&mut out, 4, assertion_lines(index, group, &ctx)?);
        }
        out.push("  });".to_string());
    }

    out.push("});".to_string());
    Ok(out.join("\n") + "\n")
}

fn step_lines(definition: &TestDefinition, step: &Step, ctx: &RunContext) -> Vec<String> {
    let name = if step.description.is_empty() {
        step.id.clone()
    } else {
        format!("{}: {}", step.id, one_line(&step.description))
    };
    let mut lines = vec![
        format!("test({}, async () => {{", js_string(&name)),
        format!("  // persona: {}", step.persona),
    ];
    for condition in &step.preconditions {
        lines.push(format!("  expect(holds({}, ctx)).toBe(true);", js_string(condition)));
    }
    lines.push("  const out: Record<string, unknown> = {};".to_string());
    for (index, action) in step.actions.iter().enumerate() {
        if action.persona.is_some() {
            lines.push(format!("  // as {}", definition.action_persona(step, action)));
        }
        push_indented(&mut lines, 2, action_lines(action, index, ctx, true));
    }
    lines.push(format!("  ctx[{}] = out;", js_string(&step.id)));
    for condition in &step.postconditions {
        lines.push(format!("  expect(holds({}, ctx)).toBe(true);", js_string(condition)));
    }
    lines.push(format!("}}, {});", step.timeout));
    lines
}

fn action_lines(action: &Action, index: usize, ctx: &RunContext, merge: bool) -> Vec<String> {
    if let Some(lines) = ts_backend_lines(action, index, ctx, merge) {
        return lines;
    }
    match &action.kind {
        ActionKind::Wait(wait) => vec![format!(
            "await new Promise((done) => setTimeout(done, {}));",
            wait.duration_ms
        )],
        ActionKind::UiInteraction(ui) => {
            let target = ui
                .selector
                .as_deref()
                .or(ui.url.as_deref())
                .unwrap_or_default();
            vec![format!(
                "// ui: {} {} (browser only, see the playwright target)",
                ui.interaction,
                js_text(target, ctx)
            )]
        }
        _ => Vec::new(),
    }
}

fn assertion_lines(index: usize, group: &AssertionGroup, ctx: &RunContext) -> Result<Vec<String>, String> {
    let name = group
        .description()
        .map(one_line)
        .unwrap_or_else(|| format!("{} #{}", group.kind_name(), index + 1));
    let title = js_string(&name);

    let lines = match group {
        AssertionGroup::Database(db) => {
            let conditions = serde_json::to_value(&db.conditions)
                .map_err(|e| format!("assertion {}: {}", index, e))?;
            vec![
                format!("test({}, async () => {{", title),
                format!(
                    "  const rows = await client.query({}, {});",
                    js_string(&db.table),
                    js_value(&conditions, ctx)
                ),
                format!("  expect(rows).toHaveLength({});", db.expected_count),
                "});".to_string(),
            ]
        }
        AssertionGroup::BusinessRule(br) => {
            let mut lines = vec![format!("test({}, () => {{", title)];
            push_indented(&mut lines, 2, rule_lines(&br.rule, ctx)?);
            lines.push("});".to_string());
            lines
        }
        AssertionGroup::Variable(var) => {
            let subject = format!("lookup(ctx, {})", js_string(&var.path));
            let check = match &var.equals {
                Some(expected) => format!("  expect({}).toEqual({});", subject, js_value(expected, ctx)),
                None => format!("  expect({}).toBeDefined();", subject),
            };
            vec![format!("test({}, () => {{", title), check, "});".to_string()]
        }
        AssertionGroup::Ui(ui) => vec![format!(
            "// {}: {} ui check(s), browser only, see the playwright target",
            name,
            ui.checks.len()
        )],
    };
    Ok(lines)
}

/// Oracle call plus expectations. When every operand is known now, the
/// verdict is computed here and its figures pinned in the test.
fn rule_lines(rule: &BusinessRule, ctx: &RunContext) -> Result<Vec<String>, String> {
    let encoded = serde_json::to_value(rule).map_err(|e| format!("cannot encode rule: {}", e))?;
    let mut lines = Vec::new();

    let Some(resolved) = statically_resolved(rule, ctx) else {
        lines.push("// operands are known only at run time".to_string());
        lines.push(format!("const verdict = oracles.check({});", js_value(&encoded, ctx)));
        lines.push("expect(verdict.valid).toBe(true);".to_string());
        return Ok(lines);
    };

    let verdict = oracle::evaluate_rule(&resolved)?;
    lines.push(format!("// oracle: {}", one_line(&verdict.explanation)));
    if !verdict.passed {
        lines.push("// note: the oracle rejects these operands as written".to_string());
    }
    let literal = serde_json::to_value(&resolved).map_err(|e| format!("cannot encode rule: {}", e))?;
    lines.push(format!("const verdict = oracles.check({});", literal));
    lines.push("expect(verdict.valid).toBe(true);".to_string());

    if let BusinessRule::TaxCalculation {
        amount,
        rate,
        inclusive,
        ..
    } = &resolved
    {
        let breakdown = tax::calculate_tax(
            oracle::decimal_from_value(amount)?,
            oracle::decimal_from_value(rate)?,
            tax::TaxMode::from_inclusive(*inclusive),
        )?;
        lines.push(format!(
            "expect(verdict.breakdown).toMatchObject({{ net: {}, tax: {}, gross: {} }});",
            js_string(&breakdown.net.to_string()),
            js_string(&breakdown.tax.to_string()),
            js_string(&breakdown.gross.to_string())
        ));
    }
    Ok(lines)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::fixtures;
    use crate::core::parser::{parse_definition, parse_document, DocumentFormat};

    fn salon_suite() -> String {
        generate(&fixtures::salon()).unwrap()
    }

    #[test]
    fn test_fc032_structure() {
        let suite = salon_suite();
        assert!(suite.starts_with("// Generated by flowcheck"));
        assert!(suite.contains("describe(\"Salon appointment to payment\", () => {"));
        assert!(suite.contains("  beforeAll(async () => {"));
        assert!(suite.contains("  afterAll(async () => {\n    await new Promise((done) => setTimeout(done, 1));"));
        assert!(!suite.contains("jest.retryTimes"));
        assert!(suite.contains("\n  }, 30000);"));
        assert!(suite.contains("\n  }, 5000);"));
    }

    #[test]
    fn test_fc032_step_body() {
        let suite = salon_suite();
        assert!(suite.contains("    // ui: click \"#new-customer\" (browser only, see the playwright target)"));
        assert!(suite.contains("    expect(holds(\"{{customer.id}}\", ctx)).toBe(true);"));
        assert!(suite.contains("ctx[\"appointment\"] = a0;"));
        assert!(suite.contains("ctx[\"take_payment\"] = out;"));
    }

    #[test]
    fn test_fc032_database_assertion() {
        let suite = salon_suite();
        assert!(suite.contains("test(\"one customer registered\", async () => {"));
        assert!(suite.contains(
            "const rows = await client.query(\"core_entities\", {\"entity_type\":\"customer\"});"
        ));
        assert!(suite.contains("expect(rows).toHaveLength(1);"));
    }

    #[test]
    fn test_fc032_tax_expectations_from_oracle() {
        let suite = salon_suite();
        assert!(suite.contains("// oracle: net 100.00 + tax 5.00 = gross 105.00 at rate 0.05 (exclusive)"));
        assert!(suite.contains(
            "expect(verdict.breakdown).toMatchObject({ net: \"100.00\", tax: \"5.00\", gross: \"105.00\" });"
        ));
        assert!(!suite.contains("oracle rejects"));
    }

    #[test]
    fn test_fc032_runtime_rule_and_retries() {
        let text = fixtures::with_steps(
            r#"  - id: close
    persona: owner
    retry: 3
    actions:
      - type: wait
        duration_ms: 5
"#,
        ) + r#"assertions:
  - type: business_rule
    rule: accounting_equation
    assets: "{{close.assets}}"
    liabilities: 10
    equity: 5
"#;
        let raw = parse_document(&text, DocumentFormat::Yaml).unwrap();
        let def = parse_definition(&raw).unwrap();
        let suite = generate(&def).unwrap();
        assert!(suite.contains("jest.retryTimes(3);"));
        assert!(suite.contains("test(\"business_rule #1\", () => {"));
        assert!(suite.contains("// operands are known only at run time"));
        assert!(suite.contains("oracles.check(resolve({"));
    }

    #[test]
    fn test_fc032_failing_rule_is_flagged() {
        let text = fixtures::with_steps(
            "  - id: s\n    persona: owner\n    actions:\n      - type: wait\n        duration_ms: 1\n",
        ) + r#"assertions:
  - type: business_rule
    rule: status_transition
    from: draft
    to: posted
    transitions:
      draft: [submitted]
"#;
        let raw = parse_document(&text, DocumentFormat::Yaml).unwrap();
        let def = parse_definition(&raw).unwrap();
        let suite = generate(&def).unwrap();
        assert!(suite.contains("// note: the oracle rejects these operands as written"));
    }
}
