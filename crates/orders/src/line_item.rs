use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use checkout_catalog::Package;
use checkout_core::money::{self, LINE_ITEM_TOTAL};
use checkout_core::{DomainError, DomainResult, Entity, LineItemId, PackageId, PurchaseId};

use crate::purchase::Purchase;

/// `price * quantity`, exact, sized to `numeric(6,2)`.
///
/// The only way a line total is ever produced. Stores call it (through
/// [`PurchaseLineItem::reprice`]) before every write.
pub fn compute_line_total(price: Decimal, quantity: i32) -> DomainResult<Decimal> {
    money::multiply(price, quantity)
}

/// One package-and-quantity entry within a purchase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseLineItem {
    id: LineItemId,
    purchase: PurchaseId,
    package: PackageId,
    quantity: i32,
    lineitem_total: Decimal,
}

/// Flat persisted shape of a line item (one row of `purchase_line_items`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItemRecord {
    pub id: LineItemId,
    pub purchase_id: PurchaseId,
    pub package_id: PackageId,
    pub quantity: i32,
    pub lineitem_total: Decimal,
}

impl PurchaseLineItem {
    pub fn new(purchase: PurchaseId, package: &Package, quantity: i32) -> DomainResult<Self> {
        Ok(Self {
            id: LineItemId::new(),
            purchase,
            package: package.id_typed(),
            quantity,
            lineitem_total: compute_line_total(package.price(), quantity)?,
        })
    }

    pub fn id_typed(&self) -> LineItemId {
        self.id
    }

    pub fn purchase(&self) -> PurchaseId {
        self.purchase
    }

    pub fn package(&self) -> PackageId {
        self.package
    }

    pub fn quantity(&self) -> i32 {
        self.quantity
    }

    /// Total as of the last `reprice`.
    pub fn lineitem_total(&self) -> Decimal {
        self.lineitem_total
    }

    /// Change the quantity. The total is refreshed on the next save.
    pub fn set_quantity(&mut self, quantity: i32) -> DomainResult<()> {
        if quantity < 0 {
            return Err(DomainError::validation(format!(
                "quantity must be non-negative (got {quantity})"
            )));
        }
        self.quantity = quantity;
        Ok(())
    }

    /// Overwrite `lineitem_total` from the package's current price.
    pub fn reprice(&mut self, package: &Package) -> DomainResult<Decimal> {
        if package.id_typed() != self.package {
            return Err(DomainError::invariant(format!(
                "line item {} references package {}, got {}",
                self.id,
                self.package,
                package.id_typed()
            )));
        }
        self.lineitem_total = compute_line_total(package.price(), self.quantity)?;
        Ok(self.lineitem_total)
    }

    /// Human-readable label, e.g. `SKU TOUR-001 on order 9F3C...`.
    ///
    /// `package` and `purchase` must be the rows this item references.
    pub fn label(&self, package: &Package, purchase: &Purchase) -> DomainResult<String> {
        if package.id_typed() != self.package || purchase.id_typed() != self.purchase {
            return Err(DomainError::invariant(format!(
                "line item {} references package {} on purchase {}",
                self.id, self.package, self.purchase
            )));
        }
        Ok(format!("SKU {} on order {}", package.sku(), purchase.purchase_number()))
    }

    pub fn to_record(&self) -> LineItemRecord {
        LineItemRecord {
            id: self.id,
            purchase_id: self.purchase,
            package_id: self.package,
            quantity: self.quantity,
            lineitem_total: self.lineitem_total,
        }
    }
}

impl TryFrom<LineItemRecord> for PurchaseLineItem {
    type Error = DomainError;

    fn try_from(record: LineItemRecord) -> Result<Self, Self::Error> {
        if record.quantity < 0 {
            return Err(DomainError::validation(format!(
                "quantity must be non-negative (got {})",
                record.quantity
            )));
        }
        Ok(Self {
            id: record.id,
            purchase: record.purchase_id,
            package: record.package_id,
            quantity: record.quantity,
            lineitem_total: LINE_ITEM_TOTAL.fit("lineitem_total", record.lineitem_total)?,
        })
    }
}

impl Entity for PurchaseLineItem {
    type Id = LineItemId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}
