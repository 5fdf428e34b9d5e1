//! Money arithmetic shared by quotes, orders and invoices.
//!
//! Every amount is rounded half-up to two decimals. Line amounts are rounded
//! first and the subtotal is the sum of the rounded lines, so a document always
//! adds up to what its lines print.

use bigdecimal::{BigDecimal, RoundingMode, Zero};
use serde::Serialize;

pub fn round_money(value: &BigDecimal) -> BigDecimal {
    value.with_scale_round(2, RoundingMode::HalfUp)
}

fn percent_of(value: &BigDecimal, percent: &BigDecimal) -> BigDecimal {
    value * percent / BigDecimal::from(100)
}

/// `quantity × unit_price × (1 − discount%/100)`
pub fn line_amount(
    quantity: &BigDecimal,
    unit_price: &BigDecimal,
    discount_percent: &BigDecimal,
) -> BigDecimal {
    let gross = quantity * unit_price;
    let discount = percent_of(&gross, discount_percent);
    round_money(&(gross - discount))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentTotals {
    pub subtotal: BigDecimal,
    pub discount_amount: BigDecimal,
    pub tax_amount: BigDecimal,
    pub total: BigDecimal,
}

impl DocumentTotals {
    pub fn zero() -> Self {
        let zero = round_money(&BigDecimal::zero());
        Self {
            subtotal: zero.clone(),
            discount_amount: zero.clone(),
            tax_amount: zero.clone(),
            total: zero,
        }
    }

    pub fn compute<'a>(
        line_amounts: impl IntoIterator<Item = &'a BigDecimal>,
        discount_percent: &BigDecimal,
        tax_rate: &BigDecimal,
    ) -> Self {
        let subtotal = round_money(
            &line_amounts
                .into_iter()
                .fold(BigDecimal::zero(), |acc, amount| acc + amount),
        );
        let discount_amount = round_money(&percent_of(&subtotal, discount_percent));
        let taxable = &subtotal - &discount_amount;
        let tax_amount = round_money(&percent_of(&taxable, tax_rate));
        let total = round_money(&(taxable + &tax_amount));
        Self {
            subtotal,
            discount_amount,
            tax_amount,
            total,
        }
    }
}

/// Documents that carry the shared totals columns.
pub trait Priced {
    fn discount_percent(&self) -> &BigDecimal;
    fn tax_rate(&self) -> &BigDecimal;
    fn set_totals(&mut self, totals: DocumentTotals);

    fn recalculate<'a>(&mut self, line_amounts: impl IntoIterator<Item = &'a BigDecimal>) {
        let totals =
            DocumentTotals::compute(line_amounts, self.discount_percent(), self.tax_rate());
        self.set_totals(totals);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).expect("decimal")
    }

    #[test]
    fn test_line_amount_applies_discount() {
        assert_eq!(line_amount(&dec("3"), &dec("10.00"), &dec("10")), dec("27.00"));
        assert_eq!(line_amount(&dec("1.5"), &dec("19.99"), &dec("0")), dec("29.99"));
    }

    #[test]
    fn test_line_amount_rounds_half_up() {
        // 0.125 rounds to 0.13
        assert_eq!(line_amount(&dec("1"), &dec("0.125"), &dec("0")), dec("0.13"));
    }

    #[test]
    fn test_document_totals() {
        let lines = [dec("100.00"), dec("50.00")];
        let totals = DocumentTotals::compute(lines.iter(), &dec("10"), &dec("20"));
        assert_eq!(totals.subtotal, dec("150.00"));
        assert_eq!(totals.discount_amount, dec("15.00"));
        assert_eq!(totals.tax_amount, dec("27.00"));
        assert_eq!(totals.total, dec("162.00"));
        assert_eq!(
            totals.total,
            &totals.subtotal - &totals.discount_amount + &totals.tax_amount
        );
    }

    #[test]
    fn test_tax_is_rounded_per_document() {
        let lines = [dec("9.99")];
        let totals = DocumentTotals::compute(lines.iter(), &dec("0"), &dec("7.5"));
        assert_eq!(totals.tax_amount, dec("0.75"));
        assert_eq!(totals.total, dec("10.74"));
    }

    #[test]
    fn test_empty_document_is_zero() {
        let totals = DocumentTotals::compute(std::iter::empty(), &dec("5"), &dec("20"));
        assert_eq!(totals, DocumentTotals::zero());
        assert_eq!(totals.total.to_string(), "0.00");
    }
}
