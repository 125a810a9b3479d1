//! FC-021: Accounting equation and journal balance.

use rust_decimal::Decimal;
use serde::Serialize;

/// Tolerance used when a rule leaves it unspecified (0.0001).
pub const DEFAULT_TOLERANCE: Decimal = Decimal::from_parts(1, 0, 0, false, 4);

/// Verdict for `assets = liabilities + equity`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EquationVerdict {
    pub valid: bool,
    pub assets: Decimal,
    pub liabilities: Decimal,
    pub equity: Decimal,
    /// `assets - liabilities - equity`
    pub difference: Decimal,
    pub tolerance: Decimal,
}

/// Check the accounting equation within `tolerance`. Errors when the
/// difference does not fit in a `Decimal`.
pub fn check_accounting_equation(
    assets: Decimal,
    liabilities: Decimal,
    equity: Decimal,
    tolerance: Decimal,
) -> Result<EquationVerdict, String> {
    let difference = assets
        .checked_sub(liabilities)
        .and_then(|d| d.checked_sub(equity))
        .ok_or_else(|| {
            format!("assets {assets} - liabilities {liabilities} - equity {equity} overflows")
        })?;
    Ok(EquationVerdict {
        valid: difference.abs() <= tolerance.abs(),
        assets,
        liabilities,
        equity,
        difference,
        tolerance: tolerance.abs(),
    })
}

/// One journal line. Either side may be zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct JournalLine {
    pub debit: Decimal,
    pub credit: Decimal,
}

impl JournalLine {
    pub fn debit(amount: Decimal) -> Self {
        Self {
            debit: amount,
            credit: Decimal::ZERO,
        }
    }

    pub fn credit(amount: Decimal) -> Self {
        Self {
            debit: Decimal::ZERO,
            credit: amount,
        }
    }
}

/// Verdict for a set of journal lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JournalVerdict {
    pub valid: bool,
    pub total_debits: Decimal,
    pub total_credits: Decimal,
    /// `total_debits - total_credits`
    pub difference: Decimal,
    pub lines: usize,
}

fn checked_total(mut amounts: impl Iterator<Item = Decimal>, side: &str) -> Result<Decimal, String> {
    amounts.try_fold(Decimal::ZERO, |total, amount| {
        total
            .checked_add(amount)
            .ok_or_else(|| format!("total {side} overflow"))
    })
}

/// Check that debits and credits balance within `tolerance`. Errors when a
/// total does not fit in a `Decimal`.
pub fn check_journal_balance(lines: &[JournalLine], tolerance: Decimal) -> Result<JournalVerdict, String> {
    let total_debits = checked_total(lines.iter().map(|l| l.debit), "debits")?;
    let total_credits = checked_total(lines.iter().map(|l| l.credit), "credits")?;
    let difference = total_debits
        .checked_sub(total_credits)
        .ok_or_else(|| format!("debits {total_debits} - credits {total_credits} overflows"))?;
    Ok(JournalVerdict {
        valid: difference.abs() <= tolerance.abs(),
        total_debits,
        total_credits,
        difference,
        lines: lines.len(),
    })
}
