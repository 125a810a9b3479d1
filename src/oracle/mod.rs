//! FC-020: Business-rule oracles.
//!
//! Pure, deterministic checks shared by the executor and the generators.
//! Every numeric verdict is computed in `Decimal`.

pub mod accounting;
pub mod smart_code;
pub mod status;
pub mod tax;

use crate::core::resolver;
use crate::core::types::{BusinessRule, LineItem, LineType};
use accounting::JournalLine;
use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;

/// Read a numeric operand: a JSON number or a numeric string.
pub fn decimal_from_value(value: &Value) -> Result<Decimal, String> {
    match value {
        Value::Number(n) => parse_decimal(&n.to_string()),
        Value::String(s) if resolver::has_placeholder(s) => {
            Err(format!("unresolved operand '{s}'"))
        }
        Value::String(s) => parse_decimal(s.trim()),
        other => Err(format!("expected a number, got {other}")),
    }
}

fn parse_decimal(text: &str) -> Result<Decimal, String> {
    Decimal::from_str(text)
        .or_else(|_| Decimal::from_scientific(text))
        .map_err(|_| format!("'{text}' is not a number"))
}

fn optional_decimal(value: Option<&Value>) -> Result<Option<Decimal>, String> {
    value.map(decimal_from_value).transpose()
}

/// Outcome of evaluating one business rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleVerdict {
    pub rule: &'static str,
    pub passed: bool,
    pub explanation: String,
}

/// Evaluate a (resolved) business rule. Errors when an operand is malformed
/// or still a placeholder.
pub fn evaluate_rule(rule: &BusinessRule) -> Result<RuleVerdict, String> {
    let (passed, explanation) = match rule {
        BusinessRule::AccountingEquation {
            assets,
            liabilities,
            equity,
            tolerance,
        } => {
            let v = accounting::check_accounting_equation(
                decimal_from_value(assets)?,
                decimal_from_value(liabilities)?,
                decimal_from_value(equity)?,
                optional_decimal(tolerance.as_ref())?.unwrap_or(accounting::DEFAULT_TOLERANCE),
            )?;
            (
                v.valid,
                format!(
                    "assets {} - liabilities {} - equity {} = {} (tolerance {})",
                    v.assets, v.liabilities, v.equity, v.difference, v.tolerance
                ),
            )
        }
        BusinessRule::JournalBalance { lines, tolerance } => {
            let mut journal = Vec::with_capacity(lines.len());
            for line in lines {
                journal.push(JournalLine {
                    debit: optional_decimal(line.debit.as_ref())?.unwrap_or(Decimal::ZERO),
                    credit: optional_decimal(line.credit.as_ref())?.unwrap_or(Decimal::ZERO),
                });
            }
            let tolerance =
                optional_decimal(tolerance.as_ref())?.unwrap_or(accounting::DEFAULT_TOLERANCE);
            let v = accounting::check_journal_balance(&journal, tolerance)?;
            (
                v.valid,
                format!(
                    "debits {} vs credits {} across {} line(s), difference {}",
                    v.total_debits, v.total_credits, v.lines, v.difference
                ),
            )
        }
        BusinessRule::TaxCalculation {
            amount,
            rate,
            inclusive,
            expected_tax,
            expected_gross,
        } => {
            let v = tax::check_tax(
                decimal_from_value(amount)?,
                decimal_from_value(rate)?,
                tax::TaxMode::from_inclusive(*inclusive),
                optional_decimal(expected_tax.as_ref())?,
                optional_decimal(expected_gross.as_ref())?,
            )?;
            let b = &v.breakdown;
            let mut explanation = format!(
                "net {} + tax {} = gross {} at rate {} ({})",
                b.net,
                b.tax,
                b.gross,
                b.rate,
                if *inclusive { "inclusive" } else { "exclusive" }
            );
            if !v.mismatches.is_empty() {
                explanation.push_str(": ");
                explanation.push_str(&v.mismatches.join("; "));
            }
            (v.valid, explanation)
        }
        BusinessRule::StatusTransition {
            from,
            to,
            transitions,
        } => {
            let v = status::check_transition(from, to, transitions);
            let explanation = v
                .violated_rule
                .clone()
                .unwrap_or_else(|| format!("transition '{from}' -> '{to}' is allowed"));
            (v.valid, explanation)
        }
        BusinessRule::SmartCode { code } => {
            let v = smart_code::validate_smart_code(code);
            (v.valid, v.describe())
        }
    };
    Ok(RuleVerdict {
        rule: rule.name(),
        passed,
        explanation,
    })
}

/// Journal lines of a transaction, for lines that declare a side.
/// Returns `None` when no line declares `line_type`.
pub fn journal_from_line_items(items: &[LineItem]) -> Result<Option<Vec<JournalLine>>, String> {
    let mut journal = Vec::new();
    for (index, item) in items.iter().enumerate() {
        let Some(side) = item.line_type else {
            continue;
        };
        let amount = item
            .line_amount
            .as_ref()
            .ok_or_else(|| format!("line {index} declares {side:?} without line_amount"))
            .and_then(|v| decimal_from_value(v).map_err(|e| format!("line {index}: {e}")))?;
        journal.push(match side {
            LineType::Debit => JournalLine::debit(amount),
            LineType::Credit => JournalLine::credit(amount),
        });
    }
    Ok(if journal.is_empty() { None } else { Some(journal) })
}
