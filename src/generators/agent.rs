//! FC-034: Agent target, natural-language test instructions in Markdown.

use super::{banner, one_line, static_context, statically_resolved};
use crate::core::resolver;
use crate::core::state::RunContext;
use crate::core::types::{
    value_to_string, Action, ActionKind, AssertionGroup, TestDefinition, UiInteraction,
};
use crate::oracle;

pub fn generate(definition: &TestDefinition) -> Result<String, String> {
    let ctx = static_context(definition);
    let text = |s: &str| resolver::resolve_string(s, &ctx);
    let mut out = vec![
        format!("<!-- {} -->", banner(definition)),
        format!("# {}", one_line(&definition.title)),
        String::new(),
        format!(
            "Test `{}` for the {} industry, priority {}.",
            definition.id, definition.industry, definition.metadata.priority
        ),
    ];
    if let Some(description) = &definition.description {
        out.push(String::new());
        out.push(one_line(description));
    }
    out.push(String::new());
    out.push(
        "Values written as `{{name.field}}` are results recorded earlier in this test; \
         substitute what you recorded."
            .to_string(),
    );

    let c = &definition.context;
    out.push(String::new());
    out.push("## Context".to_string());
    out.push(String::new());
    out.push(format!("- Organization: `{}`", c.organization_id));
    if let Some(tenant) = &c.tenant {
        out.push(format!("- Tenant: `{}`", tenant));
    }
    out.push(format!("- Currency {}, locale {}", c.currency, c.locale));
    if let Some(year) = c.fiscal_year {
        out.push(format!("- Fiscal year {}", year));
    }
    if let Some(clock) = &c.clock {
        out.push(format!("- Treat the current time as {}", clock));
    }

    out.push(String::new());
    out.push("## Personas".to_string());
    out.push(String::new());
    for (name, persona) in &definition.personas {
        let mut line = format!("- **{}** ({})", name, persona.role);
        if !persona.permissions.is_empty() {
            line.push_str(&format!(": may {}", persona.permissions.join(", ")));
        }
        out.push(line);
    }

    if !definition.setup.is_empty() {
        out.push(String::new());
        out.push("## Setup".to_string());
        out.push(String::new());
        for (i, action) in definition.setup.iter().enumerate() {
            out.push(format!("{}. {}", i + 1, describe_action(action, &ctx)));
        }
    }

    out.push(String::new());
    out.push("## Steps".to_string());
    for (n, step) in definition.steps.iter().enumerate() {
        out.push(String::new());
        let heading = if step.description.is_empty() {
            format!("### {}. {}", n + 1, step.id)
        } else {
            format!("### {}. {}: {}", n + 1, step.id, one_line(&step.description))
        };
        out.push(heading);
        out.push(String::new());
        let mut limits = format!(
            "Acting as **{}**. Finish within {} ms",
            step.persona, step.timeout
        );
        if step.retry > 0 {
            limits.push_str(&format!("; if it fails, start the step over (up to {} more time(s))", step.retry));
        }
        limits.push('.');
        out.push(limits);
        if !step.preconditions.is_empty() {
            out.push(String::new());
            out.push("Before starting, confirm:".to_string());
            for condition in &step.preconditions {
                out.push(format!("- `{}`", text(condition)));
            }
        }
        out.push(String::new());
        for (i, action) in step.actions.iter().enumerate() {
            let mut line = format!("{}. {}", i + 1, describe_action(action, &ctx));
            if action.persona.is_some() {
                line.push_str(&format!(" (as **{}**)", definition.action_persona(step, action)));
            }
            out.push(line);
        }
        out.push(String::new());
        out.push(format!("Record the results of this step as `{}`.", step.id));
        if !step.postconditions.is_empty() {
            out.push(String::new());
            out.push("Afterwards, confirm:".to_string());
            for condition in &step.postconditions {
                out.push(format!("- `{}`", text(condition)));
            }
        }
    }

    if !definition.assertions.is_empty() {
        out.push(String::new());
        out.push("## Verification".to_string());
        out.push(String::new());
        for (i, group) in definition.assertions.iter().enumerate() {
            out.push(format!("{}. {}", i + 1, describe_assertion(group, &ctx)?));
        }
    }

    if !definition.cleanup.is_empty() {
        out.push(String::new());
        out.push("## Cleanup".to_string());
        out.push(String::new());
        out.push("Do this even if an earlier step failed.".to_string());
        out.push(String::new());
        for (i, action) in definition.cleanup.iter().enumerate() {
            out.push(format!("{}. {}", i + 1, describe_action(action, &ctx)));
        }
    }

    Ok(out.join("\n") + "\n")
}

fn describe_action(action: &Action, ctx: &RunContext) -> String {
    let text = |s: &str| resolver::resolve_string(s, ctx);
    let value = |v: &serde_json::Value| value_to_string(&resolver::resolve_value(v, ctx));
    let mut sentence = match &action.kind {
        ActionKind::CreateEntity(e) => {
            let mut s = format!(
                "Create a {} named \"{}\" (smart code `{}`)",
                e.entity_type,
                text(&e.entity_name),
                e.smart_code
            );
            if !e.dynamic_fields.is_empty() {
                let fields: Vec<String> = e
                    .dynamic_fields
                    .iter()
                    .map(|(k, v)| format!("{} = {}", k, value(v)))
                    .collect();
                s.push_str(&format!(" with {}", fields.join(", ")));
            }
            s
        }
        ActionKind::CreateTransaction(t) => {
            let mut s = format!(
                "Record a {} transaction (smart code `{}`)",
                t.transaction_type, t.smart_code
            );
            if let Some(total) = &t.total_amount {
                s.push_str(&format!(" for {}", value(total)));
            }
            if let Some(date) = &t.transaction_date {
                s.push_str(&format!(" dated {}", text(date)));
            }
            if let Some(source) = &t.source_entity_id {
                s.push_str(&format!(" from `{}`", text(source)));
            }
            if let Some(target) = &t.target_entity_id {
                s.push_str(&format!(" to `{}`", text(target)));
            }
            if !t.line_items.is_empty() {
                s.push_str(&format!(" with {} line(s)", t.line_items.len()));
            }
            s
        }
        ActionKind::CreateRelationship(r) => format!(
            "Link `{}` to `{}` as {} (smart code `{}`)",
            text(&r.from_entity_id),
            text(&r.to_entity_id),
            r.relationship_type,
            r.smart_code
        ),
        ActionKind::SetDynamicField(d) => format!(
            "Set field {} of `{}` to {}",
            d.field_name,
            text(&d.entity_id),
            value(&d.field_value)
        ),
        ActionKind::UiInteraction(ui) => {
            let selector = ui.selector.as_deref().map(text).unwrap_or_default();
            let input = ui.value.as_deref().map(text).unwrap_or_default();
            match ui.interaction {
                UiInteraction::Navigate => {
                    format!("Open {}", ui.url.as_deref().map(text).unwrap_or_default())
                }
                UiInteraction::Click => format!("Click `{}`", selector),
                UiInteraction::Fill => format!("Type \"{}\" into `{}`", input, selector),
                UiInteraction::Select => format!("Choose \"{}\" in `{}`", input, selector),
                UiInteraction::Check => format!("Tick `{}`", selector),
                UiInteraction::Press => format!("Press {} in `{}`", input, selector),
            }
        }
        ActionKind::ApiCall(api) => {
            let mut s = format!("Send {} {}", api.method, text(&api.endpoint));
            if let Some(status) = api.expect_status {
                s.push_str(&format!(" and expect status {}", status));
            }
            s
        }
        ActionKind::Wait(w) => format!("Wait {} ms", w.duration_ms),
    };
    if let Some(description) = &action.description {
        sentence.push_str(&format!(" ({})", one_line(description)));
    }
    if let Some(name) = &action.store_as {
        sentence.push_str(&format!("; record the result as `{}`", name));
    }
    sentence.push('.');
    sentence
}

fn describe_assertion(group: &AssertionGroup, ctx: &RunContext) -> Result<String, String> {
    let prefix = group
        .description()
        .map(|d| format!("**{}**: ", one_line(d)))
        .unwrap_or_default();
    let body = match group {
        AssertionGroup::Database(db) => {
            let mut s = format!("`{}` holds exactly {} record(s)", db.table, db.expected_count);
            if !db.conditions.is_empty() {
                let conditions: Vec<String> = db
                    .conditions
                    .iter()
                    .map(|(k, v)| {
                        format!("{} = {}", k, value_to_string(&resolver::resolve_value(v, ctx)))
                    })
                    .collect();
                s.push_str(&format!(" where {}", conditions.join(" and ")));
            }
            s.push('.');
            s
        }
        AssertionGroup::Ui(ui) => {
            let checks: Vec<String> = ui
                .checks
                .iter()
                .map(|check| {
                    let mut s = format!("`{}`", check.selector);
                    match check.visible {
                        Some(false) => s.push_str(" is hidden"),
                        _ => s.push_str(" is visible"),
                    }
                    if let Some(t) = &check.text {
                        s.push_str(&format!(" and shows \"{}\"", resolver::resolve_string(t, ctx)));
                    }
                    s
                })
                .collect();
            format!("On screen, {}.", checks.join("; "))
        }
        AssertionGroup::BusinessRule(br) => match statically_resolved(&br.rule, ctx) {
            Some(rule) => {
                let verdict = oracle::evaluate_rule(&rule)?;
                let mut s = format!(
                    "The {} rule must hold: {}.",
                    rule.name().replace('_', " "),
                    verdict.explanation
                );
                if !verdict.passed {
                    s.push_str(" Warning: with these figures the rule does not hold; report this as a failure.");
                }
                s
            }
            None => format!(
                "The {} rule must hold once the recorded values are filled in.",
                br.rule.name().replace('_', " ")
            ),
        },
        AssertionGroup::Variable(var) => match &var.equals {
            Some(expected) => format!(
                "The recorded `{}` equals \"{}\".",
                var.path,
                value_to_string(&resolver::resolve_value(expected, ctx))
            ),
            None => format!("A value was recorded for `{}`.", var.path),
        },
    };
    Ok(format!("{}{}", prefix, body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::fixtures;

    fn salon_doc() -> String {
        generate(&fixtures::salon()).unwrap()
    }

    #[test]
    fn test_fc034_header_and_context() {
        let doc = salon_doc();
        assert!(doc.starts_with("<!-- Generated by flowcheck"));
        assert!(doc.contains("# Salon appointment to payment\n"));
        assert!(doc.contains("Test `salon-appointment-flow` for the salon industry, priority high."));
        assert!(doc.contains("- Tenant: `hair-talkz`"));
        assert!(doc.contains("- Treat the current time as 2024-01-01T09:00:00Z"));
        assert!(doc.contains("- **cashier** (finance): may transactions:create"));
    }

    #[test]
    fn test_fc034_steps() {
        let doc = salon_doc();
        assert!(doc.contains("### 1. register_customer: Receptionist registers a walk-in customer"));
        assert!(doc.contains("Acting as **cashier**. Finish within 5000 ms."));
        assert!(doc.contains("1. Click `#new-customer`."));
        assert!(doc.contains(
            "2. Create a customer named \"Jane Doe\" (smart code `HERA.SALON.CRM.ENT.CUST.v1`) with phone = +971500000000; record the result as `customer`."
        ));
        assert!(doc.contains("dated 2024-01-01T10:00:00Z from `{{register_customer.id}}`"));
        assert!(doc.contains("(as **stylist**)"));
        assert!(doc.contains("Before starting, confirm:\n- `{{customer.id}}`"));
    }

    #[test]
    fn test_fc034_verification_uses_oracles() {
        let doc = salon_doc();
        assert!(doc.contains(
            "2. **VAT on the haircut**: The tax calculation rule must hold: net 100.00 + tax 5.00 = gross 105.00 at rate 0.05 (exclusive)."
        ));
        assert!(doc.contains("1. **one customer registered**: `core_entities` holds exactly 1 record(s) where entity_type = customer."));
        assert!(doc.contains("On screen, `#receipt` is visible and shows \"105.00\"."));
        assert!(doc.contains("The recorded `customer.entity_name` equals \"Jane Doe\"."));
    }

    #[test]
    fn test_fc034_cleanup_section() {
        let doc = salon_doc();
        let cleanup = doc.find("## Cleanup").unwrap();
        assert!(doc[cleanup..].contains("1. Wait 1 ms."));
        assert!(doc.find("## Verification").unwrap() < cleanup);
    }
}
