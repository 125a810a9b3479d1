//! FC-005: Step pre- and postcondition expressions.
//!
//! A condition is resolved against the run context, then read as either
//! `left == right`, `left != right`, or a bare truthy value. A condition that
//! still contains an unresolved placeholder never holds.

use super::resolver;
use super::state::RunContext;

/// Evaluate one condition.
pub fn holds(expr: &str, ctx: &RunContext) -> bool {
    let resolved = resolver::resolve_string(expr, ctx);
    if resolver::has_placeholder(&resolved) {
        return false;
    }

    if let Some((left, right)) = resolved.split_once("!=") {
        return operand(left) != operand(right);
    }
    if let Some((left, right)) = resolved.split_once("==") {
        return operand(left) == operand(right);
    }
    is_truthy(&resolved)
}

/// First condition in the list that does not hold.
pub fn first_unmet<'a>(exprs: &'a [String], ctx: &RunContext) -> Option<&'a str> {
    exprs
        .iter()
        .find(|expr| !holds(expr, ctx))
        .map(String::as_str)
}

fn operand(raw: &str) -> &str {
    let trimmed = raw.trim();
    for quote in ['"', '\''] {
        if let Some(inner) = trimmed
            .strip_prefix(quote)
            .and_then(|t| t.strip_suffix(quote))
        {
            return inner;
        }
    }
    trimmed
}

fn is_truthy(value: &str) -> bool {
    !matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "" | "false" | "0" | "null" | "no"
    )
}
