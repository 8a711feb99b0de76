//! Fixed-precision currency amounts.
//!
//! Amounts are `rust_decimal::Decimal` values that must fit a declared
//! `numeric(precision, scale)` column. `MoneyColumn::fit` is the single place
//! where a computed amount is brought to its column shape.

use rust_decimal::Decimal;

use crate::error::{DomainError, DomainResult};

/// Shape of a `numeric(precision, scale)` column.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct MoneyColumn {
    pub precision: u32,
    pub scale: u32,
}

/// `purchases.grand_total`: `numeric(10,2)`.
pub const GRAND_TOTAL: MoneyColumn = MoneyColumn::new(10, 2);

/// `purchase_line_items.lineitem_total`: `numeric(6,2)`.
pub const LINE_ITEM_TOTAL: MoneyColumn = MoneyColumn::new(6, 2);

/// `packages.price`: `numeric(6,2)`.
pub const PACKAGE_PRICE: MoneyColumn = MoneyColumn::new(6, 2);

impl MoneyColumn {
    pub const fn new(precision: u32, scale: u32) -> Self {
        Self { precision, scale }
    }

    /// Largest magnitude (exclusive) the column can hold, e.g. `10^4` for `(6,2)`.
    pub fn limit(&self) -> Decimal {
        Decimal::from(10u64.pow(self.precision - self.scale))
    }

    /// Round `value` to the column scale and check it fits the integer digits.
    ///
    /// Uses banker's rounding. Values with at most `scale` places pass through
    /// unchanged apart from scale padding.
    pub fn fit(&self, field: &str, value: Decimal) -> DomainResult<Decimal> {
        let mut rounded = value.round_dp(self.scale);
        if rounded.abs() >= self.limit() {
            return Err(DomainError::validation(format!(
                "{field} {value} exceeds numeric({}, {})",
                self.precision, self.scale
            )));
        }
        rounded.rescale(self.scale);
        Ok(rounded)
    }
}

/// Exact `unit_price * quantity`, sized to the line-item column.
///
/// Fails when the quantity is negative or the product does not fit
/// `numeric(6,2)`.
pub fn multiply(unit_price: Decimal, quantity: i32) -> DomainResult<Decimal> {
    if quantity < 0 {
        return Err(DomainError::validation(format!(
            "quantity must be non-negative (got {quantity})"
        )));
    }
    let product = unit_price
        .checked_mul(Decimal::from(quantity))
        .ok_or_else(|| DomainError::validation("line total overflows decimal range"))?;
    LINE_ITEM_TOTAL.fit("lineitem_total", product)
}

/// Sum of amounts, sized to the grand-total column. An empty input sums to zero.
pub fn sum<I>(amounts: I) -> DomainResult<Decimal>
where
    I: IntoIterator<Item = Decimal>,
{
    let mut total = Decimal::ZERO;
    for amount in amounts {
        total = total
            .checked_add(amount)
            .ok_or_else(|| DomainError::validation("grand total overflows decimal range"))?;
    }
    GRAND_TOTAL.fit("grand_total", total)
}
