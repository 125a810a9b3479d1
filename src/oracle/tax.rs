//! FC-022: Tax calculation.
//!
//! Rates are fractions in `[0, 1]` (0.05 is five percent). Computed amounts
//! are rounded to two decimal places, midpoint away from zero.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;

/// Decimal places of every computed amount.
pub const TAX_SCALE: u32 = 2;

/// Whether the input amount already includes tax.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaxMode {
    /// Amount is net; tax is added on top
    Exclusive,
    /// Amount is gross; tax is extracted from it
    Inclusive,
}

impl TaxMode {
    pub fn from_inclusive(inclusive: bool) -> Self {
        if inclusive {
            Self::Inclusive
        } else {
            Self::Exclusive
        }
    }
}

/// Net, tax and gross for one amount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaxBreakdown {
    pub net: Decimal,
    pub tax: Decimal,
    pub gross: Decimal,
    pub rate: Decimal,
    pub mode: TaxMode,
}

fn round(value: Decimal) -> Decimal {
    let mut rounded = value.round_dp_with_strategy(TAX_SCALE, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(TAX_SCALE);
    rounded
}

/// Compute the breakdown. Errors on a negative amount, a rate outside
/// `[0, 1]`, or a result that does not fit in a `Decimal`.
pub fn calculate_tax(amount: Decimal, rate: Decimal, mode: TaxMode) -> Result<TaxBreakdown, String> {
    if amount < Decimal::ZERO {
        return Err(format!("taxable amount {amount} is negative"));
    }
    if rate < Decimal::ZERO || rate > Decimal::ONE {
        return Err(format!("tax rate {rate} is outside [0, 1]"));
    }
    let overflow = || format!("tax on {amount} at rate {rate} overflows");
    let (net, tax, gross) = match mode {
        TaxMode::Exclusive => {
            let net = round(amount);
            let tax = amount.checked_mul(rate).map(round).ok_or_else(overflow)?;
            let gross = net.checked_add(tax).ok_or_else(overflow)?;
            (net, tax, gross)
        }
        TaxMode::Inclusive => {
            let net = Decimal::ONE
                .checked_add(rate)
                .and_then(|divisor| amount.checked_div(divisor))
                .map(round)
                .ok_or_else(|| format!("cannot extract tax from {amount} at rate {rate}"))?;
            let gross = round(amount);
            let tax = gross.checked_sub(net).ok_or_else(overflow)?;
            (net, tax, gross)
        }
    };
    Ok(TaxBreakdown {
        net,
        tax,
        gross,
        rate,
        mode,
    })
}

/// Breakdown plus comparison against declared expectations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaxVerdict {
    pub valid: bool,
    pub breakdown: TaxBreakdown,
    pub mismatches: Vec<String>,
}

/// Compute tax and compare with the expected tax and/or gross amount.
pub fn check_tax(
    amount: Decimal,
    rate: Decimal,
    mode: TaxMode,
    expected_tax: Option<Decimal>,
    expected_gross: Option<Decimal>,
) -> Result<TaxVerdict, String> {
    let breakdown = calculate_tax(amount, rate, mode)?;
    let mut mismatches = Vec::new();
    if let Some(expected) = expected_tax {
        if round(expected) != breakdown.tax {
            mismatches.push(format!("expected tax {expected}, computed {}", breakdown.tax));
        }
    }
    if let Some(expected) = expected_gross {
        if round(expected) != breakdown.gross {
            mismatches.push(format!(
                "expected gross {expected}, computed {}",
                breakdown.gross
            ));
        }
    }
    Ok(TaxVerdict {
        valid: mismatches.is_empty(),
        breakdown,
        mismatches,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::str::FromStr;

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_fc022_exclusive() {
        let b = calculate_tax(d("100"), d("0.05"), TaxMode::Exclusive).unwrap();
        assert_eq!(b.net, d("100.00"));
        assert_eq!(b.tax, d("5.00"));
        assert_eq!(b.gross, d("105.00"));
        assert_eq!(b.tax.to_string(), "5.00");
        assert_eq!(b.net.to_string(), "100.00");
    }

    #[test]
    fn test_fc022_inclusive() {
        let b = calculate_tax(d("105"), d("0.05"), TaxMode::Inclusive).unwrap();
        assert_eq!(b.net, d("100.00"));
        assert_eq!(b.tax, d("5.00"));
        assert_eq!(b.gross, d("105.00"));
    }

    #[test]
    fn test_fc022_midpoint_rounds_away_from_zero() {
        // 10.10 * 0.05 = 0.505 -> 0.51
        let b = calculate_tax(d("10.10"), d("0.05"), TaxMode::Exclusive).unwrap();
        assert_eq!(b.tax, d("0.51"));
    }

    #[test]
    fn test_fc022_rate_bounds() {
        assert!(calculate_tax(d("100"), d("1.5"), TaxMode::Exclusive).is_err());
        assert!(calculate_tax(d("100"), d("-0.1"), TaxMode::Exclusive).is_err());
        let err = calculate_tax(d("-100"), d("0.05"), TaxMode::Exclusive).unwrap_err();
        assert!(err.contains("negative"), "{err}");
        assert!(calculate_tax(d("-105"), d("0.05"), TaxMode::Inclusive).is_err());
        assert!(calculate_tax(Decimal::ZERO, d("0.05"), TaxMode::Exclusive).is_ok());
        let zero = calculate_tax(d("100"), Decimal::ZERO, TaxMode::Inclusive).unwrap();
        assert_eq!(zero.tax, Decimal::ZERO);
    }

    #[test]
    fn test_fc022_check_expected() {
        let v = check_tax(d("100"), d("0.05"), TaxMode::Exclusive, Some(d("5")), Some(d("105"))).unwrap();
        assert!(v.valid);
        let v = check_tax(d("100"), d("0.05"), TaxMode::Exclusive, Some(d("6")), None).unwrap();
        assert!(!v.valid);
        assert_eq!(v.mismatches, vec!["expected tax 6, computed 5.00".to_string()]);
    }

    #[test]
    fn test_fc022_mode_from_flag() {
        assert_eq!(TaxMode::from_inclusive(true), TaxMode::Inclusive);
        assert_eq!(TaxMode::from_inclusive(false), TaxMode::Exclusive);
    }

    proptest! {
        #[test]
        fn prop_fc022_net_plus_tax_is_gross(
            cents in 0i64..10_000_000_000,
            basis_points in 0i64..=10_000,
            inclusive in any::<bool>(),
        ) {
            let amount = Decimal::new(cents, 2);
            let rate = Decimal::new(basis_points, 4);
            let b = calculate_tax(amount, rate, TaxMode::from_inclusive(inclusive)).unwrap();
            prop_assert_eq!(b.net + b.tax, b.gross);
            prop_assert!(b.tax >= Decimal::ZERO);
            prop_assert_eq!(b.gross.scale(), TAX_SCALE);
        }
    }
}
