//! # Money Module
//!
//! Provides the `Pesos` type for Chilean peso amounts.
//!
//! ## Why Integer Pesos?
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  THE CLP RULE                                                           │
//! │                                                                         │
//! │  The Chilean peso has no minor unit. Every amount the tax authority    │
//! │  sees (MntNeto, IVA, MntTotal, PrcItem, MontoItem) is an integer.      │
//! │                                                                         │
//! │  Floating point would drift:                                            │
//! │    44500 / 1.19 = 37394.957983...  ❌ not an amount                     │
//! │                                                                         │
//! │  OUR SOLUTION: i64 pesos + explicit round-half-up                       │
//! │    net = (44500 * 10000 + 5950) / 11900 = 37395                         │
//! │    tax = 44500 - 37395            = 7105                                │
//! │    net + tax == total, always                                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use caja_core::money::Pesos;
//! use caja_core::types::Quantity;
//!
//! let price = Pesos::from_pesos(5_000);
//! let line_total = price.multiply_quantity(Quantity::from_units(2));
//! assert_eq!(line_total.amount(), 10_000);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Sub, SubAssign};
use ts_rs::TS;

use crate::types::{Quantity, TaxRate};

// =============================================================================
// Pesos Type
// =============================================================================

/// A Chilean peso amount (CLP, no decimals).
///
/// ## Design Decisions
/// - **i64 (signed)**: credit notes carry amounts that offset a sale
/// - **Transparent serde**: travels as a plain JSON integer
///
/// ## Where Pesos Flow
/// ```text
/// SaleLine.unit_price ──► multiply_quantity ──► SaleLine.line_total
///                                                      │
///            sum of gross line totals ──► split_gross ─┴─► net / IVA / total
///                                                      │
///                              XML: PrcItem, MontoItem, MntNeto, IVA, MntTotal
/// ```
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS,
)]
#[serde(transparent)]
#[ts(export)]
pub struct Pesos(i64);

impl Pesos {
    /// Creates an amount from whole pesos.
    #[inline]
    pub const fn from_pesos(amount: i64) -> Self {
        Pesos(amount)
    }

    /// Returns the amount in pesos.
    #[inline]
    pub const fn amount(&self) -> i64 {
        self.0
    }

    /// Returns zero pesos.
    #[inline]
    pub const fn zero() -> Self {
        Pesos(0)
    }

    /// Checks if the value is zero.
    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Checks if the value is positive (greater than zero).
    #[inline]
    pub const fn is_positive(&self) -> bool {
        self.0 > 0
    }

    /// Checks if the value is negative (less than zero).
    #[inline]
    pub const fn is_negative(&self) -> bool {
        self.0 < 0
    }

    /// Returns the absolute value.
    #[inline]
    pub const fn abs(&self) -> Self {
        Pesos(self.0.abs())
    }

    /// Calculates tax on a net amount, rounding half away from zero.
    ///
    /// ## Implementation
    /// Integer math: `(amount * bps + 5000) / 10000`.
    /// The +5000 provides rounding (5000/10000 = 0.5).
    ///
    /// ## Example
    /// ```rust
    /// use caja_core::money::Pesos;
    /// use caja_core::IVA_RATE;
    ///
    /// // 19% of 37395 = 7105.05 → 7105
    /// let tax = Pesos::from_pesos(37_395).calculate_tax(IVA_RATE);
    /// assert_eq!(tax.amount(), 7_105);
    /// ```
    pub fn calculate_tax(&self, rate: TaxRate) -> Pesos {
        Pesos(round_div(self.0 as i128 * rate.bps() as i128, 10_000))
    }

    /// Splits a tax-inclusive total into `(net, tax)`.
    ///
    /// The net part is rounded and the tax part absorbs the remainder, so
    /// `net + tax` always equals `self`.
    ///
    /// ## User Workflow
    /// ```text
    /// Boleta total: $44.500 (IVA included)
    ///      │
    ///      ▼
    /// split_gross(19%) ← THIS FUNCTION
    ///      │
    ///      ▼
    /// MntNeto 37395 · IVA 7105 · MntTotal 44500
    /// ```
    pub fn split_gross(&self, rate: TaxRate) -> (Pesos, Pesos) {
        let net = round_div(self.0 as i128 * 10_000, 10_000 + rate.bps() as i128);
        (Pesos(net), Pesos(self.0 - net))
    }

    /// Multiplies a unit price by a fixed-point quantity.
    ///
    /// Quantities carry three decimals; the result is rounded half away
    /// from zero to whole pesos.
    ///
    /// ## Example
    /// ```rust
    /// use caja_core::money::Pesos;
    /// use caja_core::types::Quantity;
    ///
    /// // 1.5 kg at $2.990 = 4485
    /// let total = Pesos::from_pesos(2_990).multiply_quantity(Quantity::from_milli(1_500));
    /// assert_eq!(total.amount(), 4_485);
    ///
    /// // 0.333 kg at $1.000 = 333
    /// let total = Pesos::from_pesos(1_000).multiply_quantity(Quantity::from_milli(333));
    /// assert_eq!(total.amount(), 333);
    /// ```
    pub fn multiply_quantity(&self, qty: Quantity) -> Pesos {
        Pesos(round_div(self.0 as i128 * qty.milli() as i128, 1_000))
    }
}

/// Integer division rounding half away from zero.
fn round_div(numerator: i128, denominator: i128) -> i64 {
    let half = denominator / 2;
    let rounded = if numerator >= 0 {
        (numerator + half) / denominator
    } else {
        (numerator - half) / denominator
    };
    rounded as i64
}

// =============================================================================
// Trait Implementations
// =============================================================================

/// Chilean display format: `$44.500`, `-$1.200`.
impl fmt::Display for Pesos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let digits = self.0.unsigned_abs().to_string();

        let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
        for (i, ch) in digits.chars().enumerate() {
            if i > 0 && (digits.len() - i) % 3 == 0 {
                grouped.push('.');
            }
            grouped.push(ch);
        }

        write!(f, "{}${}", sign, grouped)
    }
}

impl Default for Pesos {
    fn default() -> Self {
        Pesos::zero()
    }
}

impl Add for Pesos {
    type Output = Self;

    #[inline]
    fn add(self, other: Self) -> Self {
        Pesos(self.0 + other.0)
    }
}

impl AddAssign for Pesos {
    #[inline]
    fn add_assign(&mut self, other: Self) {
        self.0 += other.0;
    }
}

impl Sub for Pesos {
    type Output = Self;

    #[inline]
    fn sub(self, other: Self) -> Self {
        Pesos(self.0 - other.0)
    }
}

impl SubAssign for Pesos {
    #[inline]
    fn sub_assign(&mut self, other: Self) {
        self.0 -= other.0;
    }
}

impl Sum for Pesos {
    fn sum<I: Iterator<Item = Pesos>>(iter: I) -> Self {
        iter.fold(Pesos::zero(), Add::add)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::IVA_RATE;
    use proptest::prelude::*;

    #[test]
    fn test_display() {
        assert_eq!(Pesos::from_pesos(44_500).to_string(), "$44.500");
        assert_eq!(Pesos::from_pesos(500).to_string(), "$500");
        assert_eq!(Pesos::from_pesos(1_234_567).to_string(), "$1.234.567");
        assert_eq!(Pesos::from_pesos(-1_200).to_string(), "-$1.200");
        assert_eq!(Pesos::zero().to_string(), "$0");
    }

    #[test]
    fn test_arithmetic() {
        let a = Pesos::from_pesos(1_000);
        let b = Pesos::from_pesos(500);

        assert_eq!((a + b).amount(), 1_500);
        assert_eq!((a - b).amount(), 500);

        let total: Pesos = vec![a, b, b].into_iter().sum();
        assert_eq!(total.amount(), 2_000);
    }

    #[test]
    fn test_split_gross_boleta_scenario() {
        let (net, tax) = Pesos::from_pesos(44_500).split_gross(IVA_RATE);
        assert_eq!(net.amount(), 37_395);
        assert_eq!(tax.amount(), 7_105);
    }

    #[test]
    fn test_calculate_tax_rounds_half_up() {
        // 19% of 50 = 9.5 → 10
        assert_eq!(Pesos::from_pesos(50).calculate_tax(IVA_RATE).amount(), 10);
        // 19% of 10000 = 1900 exactly
        assert_eq!(Pesos::from_pesos(10_000).calculate_tax(IVA_RATE).amount(), 1_900);
    }

    #[test]
    fn test_multiply_quantity() {
        let price = Pesos::from_pesos(34_500);
        assert_eq!(price.multiply_quantity(Quantity::from_units(1)).amount(), 34_500);

        // 0.5 units of $3 = 1.5 → 2
        let price = Pesos::from_pesos(3);
        assert_eq!(price.multiply_quantity(Quantity::from_milli(500)).amount(), 2);
    }

    #[test]
    fn test_negative_amounts_round_symmetrically() {
        let refund = Pesos::from_pesos(-3);
        assert_eq!(refund.multiply_quantity(Quantity::from_milli(500)).amount(), -2);
    }

    proptest! {
        #[test]
        fn split_gross_always_reconciles(total in 0i64..1_000_000_000) {
            let gross = Pesos::from_pesos(total);
            let (net, tax) = gross.split_gross(IVA_RATE);
            prop_assert_eq!(net + tax, gross);
            prop_assert!(!tax.is_negative());
        }

        #[test]
        fn multiply_quantity_is_within_half_a_peso(
            price in 0i64..10_000_000,
            milli in 1i64..1_000_000,
        ) {
            let total = Pesos::from_pesos(price).multiply_quantity(Quantity::from_milli(milli));
            let exact = price as i128 * milli as i128;
            let diff = (total.amount() as i128 * 1_000 - exact).abs();
            prop_assert!(diff <= 500);
        }
    }
}
