//! FC-031: Playwright target.
//!
//! One serial `test.describe` per definition. Setup runs in `beforeAll` on a
//! shared page, each step is a test, cleanup runs in `afterAll`. UI
//! interactions become locator calls; data actions go through the runtime
//! client.

use super::{
    banner, js_string, js_text, js_value, one_line, push_indented, static_context,
    ts_backend_lines, RUNTIME_MODULE,
};
use crate::core::state::RunContext;
use crate::core::types::{
    Action, ActionKind, AssertionGroup, Step, TestDefinition, UiInteraction, UiPayload,
};

pub fn generate(definition: &TestDefinition) -> Result<String, String> {
    let ctx = static_context(definition);
    let seed = serde_json::to_string(&ctx).map_err(|e| format!("cannot encode context: {}", e))?;
    let retries = definition.steps.iter().map(|s| s.retry).max().unwrap_or(0);

    let mut out = vec![
        format!("// {}", banner(definition)),
        "import { test, expect, type Page } from '@playwright/test';".to_string(),
        format!(
            "import {{ createClient, holds, lookup, resolve }} from '{}';",
            RUNTIME_MODULE
        ),
        String::new(),
        format!("test.describe({}, () => {{", js_string(&definition.title)),
        format!(
            "  test.describe.configure({{ mode: 'serial', retries: {} }});",
            retries
        ),
        String::new(),
        format!("  const ctx: Record<string, unknown> = {};", seed),
        format!(
            "  const client = createClient({{ organizationId: {} }});",
            js_string(&definition.context.organization_id)
        ),
        "  let page: Page;".to_string(),
        String::new(),
        "  test.beforeAll(async ({ browser }) => {".to_string(),
        "    page = await browser.newPage();".to_string(),
    ];
    for (index, action) in definition.setup.iter().enumerate() {
        push_indented(&mut out, 4, action_lines(action, index, &ctx, false, "setup")?);
    }
    out.push("  });".to_string());
    out.push(String::new());

    out.push("  test.afterAll(async () => {".to_string());
    for (index, action) in definition.cleanup.iter().enumerate() {
        push_indented(&mut out, 4, action_lines(action, index, &ctx, false, "cleanup")?);
    }
    out.push("    await page.close();".to_string());
    out.push("  });".to_string());

    for step in &definition.steps {
        out.push(String::new());
        push_indented(&mut out, 2, step_lines(definition, step, &ctx)?);
    }

    let checks = assertion_lines(definition, &ctx);
    if !checks.is_empty() {
        out.push(String::new());
        out.push("  test(\"assertions\", async () => {".to_string());
        push_indented(&mut out, 4, checks);
        out.push("  });".to_string());
    }

    out.push("});".to_string());
    Ok(out.join("\n") + "\n")
}

fn step_lines(definition: &TestDefinition, step: &Step, ctx: &RunContext) -> Result<Vec<String>, String> {
    let name = if step.description.is_empty() {
        step.id.clone()
    } else {
        format!("{}: {}", step.id, one_line(&step.description))
    };
    let mut lines = vec![
        format!("test({}, async () => {{", js_string(&name)),
        format!("  test.setTimeout({});", step.timeout),
        format!("  // persona: {}", step.persona),
    ];
    for condition in &step.preconditions {
        lines.push(format!(
            "  expect(holds({}, ctx), {}).toBe(true);",
            js_string(condition),
            js_string(&format!("precondition: {}", condition))
        ));
    }
    lines.push("  const out: Record<string, unknown> = {};".to_string());
    for (index, action) in step.actions.iter().enumerate() {
        if action.persona.is_some() {
            lines.push(format!(
                "  // as {}",
                definition.action_persona(step, action)
            ));
        }
        push_indented(&mut lines, 2, action_lines(action, index, ctx, true, &step.id)?);
    }
    lines.push(format!("  ctx[{}] = out;", js_string(&step.id)));
    for condition in &step.postconditions {
        lines.push(format!(
            "  expect(holds({}, ctx), {}).toBe(true);",
            js_string(condition),
            js_string(&format!("postcondition: {}", condition))
        ));
    }
    lines.push("});".to_string());
    Ok(lines)
}

fn action_lines(
    action: &Action,
    index: usize,
    ctx: &RunContext,
    merge: bool,
    owner: &str,
) -> Result<Vec<String>, String> {
    if let Some(lines) = ts_backend_lines(action, index, ctx, merge) {
        return Ok(lines);
    }
    let line = match &action.kind {
        ActionKind::Wait(wait) => format!("await page.waitForTimeout({});", wait.duration_ms),
        ActionKind::UiInteraction(ui) => ui_line(ui, ctx)
            .map_err(|e| format!("{} action {}: {}", owner, index, e))?,
        other => return Err(format!("{} action {}: no playwright form for '{}'", owner, index, other)),
    };
    Ok(vec![line])
}

fn ui_line(ui: &UiPayload, ctx: &RunContext) -> Result<String, String> {
    let field = |value: &Option<String>, name: &str| {
        value
            .as_deref()
            .map(|v| js_text(v, ctx))
            .ok_or_else(|| format!("{} needs '{}'", ui.interaction, name))
    };
    let locator = || field(&ui.selector, "selector").map(|s| format!("page.locator({})", s));
    Ok(match ui.interaction {
        UiInteraction::Navigate => format!("await page.goto({});", field(&ui.url, "url")?),
        UiInteraction::Click => format!("await {}.click();", locator()?),
        UiInteraction::Check => format!("await {}.check();", locator()?),
        UiInteraction::Fill => format!("await {}.fill({});", locator()?, field(&ui.value, "value")?),
        UiInteraction::Select => format!(
            "await {}.selectOption({});",
            locator()?,
            field(&ui.value, "value")?
        ),
        UiInteraction::Press => format!("await {}.press({});", locator()?, field(&ui.value, "value")?),
    })
}

/// UI and variable groups run here; the others belong to other targets.
fn assertion_lines(definition: &TestDefinition, ctx: &RunContext) -> Vec<String> {
    let mut lines = Vec::new();
    for group in &definition.assertions {
        let label = group.description().map(one_line);
        match group {
            AssertionGroup::Ui(ui) => {
                if let Some(label) = &label {
                    lines.push(format!("// {}", label));
                }
                for check in &ui.checks {
                    let locator = format!("page.locator({})", js_text(&check.selector, ctx));
                    if check.visible == Some(false) {
                        lines.push(format!("await expect({}).toBeHidden();", locator));
                    } else if check.visible == Some(true) || check.text.is_none() {
                        lines.push(format!("await expect({}).toBeVisible();", locator));
                    }
                    if let Some(text) = &check.text {
                        lines.push(format!(
                            "await expect({}).toContainText({});",
                            locator,
                            js_text(text, ctx)
                        ));
                    }
                }
            }
            AssertionGroup::Variable(var) => {
                let subject = format!("lookup(ctx, {})", js_string(&var.path));
                lines.push(match &var.equals {
                    Some(expected) => {
                        format!("expect({}).toEqual({});", subject, js_value(expected, ctx))
                    }
                    None => format!("expect({}).toBeDefined();", subject),
                });
            }
            AssertionGroup::Database(_) => lines.push(format!(
                "// database check {} runs in the pgtap target",
                label.unwrap_or_else(|| "(unnamed)".to_string())
            )),
            AssertionGroup::BusinessRule(br) => lines.push(format!(
                "// {} rule {} runs in the jest target",
                br.rule.name(),
                label.unwrap_or_else(|| "(unnamed)".to_string())
            )),
        }
    }
    lines
}
