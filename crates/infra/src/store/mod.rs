//! Checkout persistence boundary.
//!
//! `CheckoutStore` is the only way purchases and line items reach storage.
//! Implementations run the domain recomputation (`ensure_purchase_number`,
//! `reprice`, `recompute_total`) right before each write, so derived fields are
//! never taken from the caller.

pub mod in_memory;
pub mod postgres;

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::Arc;

use checkout_catalog::Package;
use checkout_core::{LineItemId, PackageId, PurchaseId, UserAccountId};
use checkout_orders::{Purchase, PurchaseLineItem};

use crate::error::StoreError;

pub use in_memory::InMemoryCheckoutStore;
pub use postgres::PostgresCheckoutStore;

/// Storage for purchases, their line items and the catalog rows they reference.
///
/// ## Referential integrity
///
/// - Deleting a purchase deletes its line items.
/// - Deleting a package deletes every line item that references it. Grand
///   totals of the affected purchases are **not** recomputed.
/// - Deleting an account is modelled by `detach_user_account`, which clears
///   the owner reference and keeps the purchases.
///
/// ## Totals
///
/// `save_line_item` and `delete_line_item` leave `grand_total` untouched;
/// callers follow up with `update_total`. The `*_and_update_total` variants
/// perform both steps atomically.
#[async_trait]
pub trait CheckoutStore: Send + Sync {
    /// Insert or replace a catalog package.
    async fn upsert_package(&self, package: &Package) -> Result<(), StoreError>;

    async fn get_package(&self, id: PackageId) -> Result<Option<Package>, StoreError>;

    /// Delete a package and, by cascade, its line items. Returns whether it existed.
    async fn delete_package(&self, id: PackageId) -> Result<bool, StoreError>;

    /// Persist a purchase, assigning its purchase number on first save.
    ///
    /// `purchase_number`, `date` and `original_bag` are never rewritten by a
    /// later save.
    async fn save_purchase(&self, purchase: &mut Purchase) -> Result<(), StoreError>;

    async fn get_purchase(&self, id: PurchaseId) -> Result<Option<Purchase>, StoreError>;

    async fn find_by_number(&self, purchase_number: &str) -> Result<Option<Purchase>, StoreError>;

    /// Purchases owned by an account, newest first.
    async fn purchases_for_account(
        &self,
        account: UserAccountId,
    ) -> Result<Vec<Purchase>, StoreError>;

    /// Delete a purchase and, by cascade, its line items. Returns whether it existed.
    async fn delete_purchase(&self, id: PurchaseId) -> Result<bool, StoreError>;

    /// Clear the owner of every purchase held by `account`. Returns the number
    /// of purchases touched.
    async fn detach_user_account(&self, account: UserAccountId) -> Result<u64, StoreError>;

    /// Recompute `lineitem_total` from the stored package price, then persist.
    ///
    /// Fails with `ForeignKeyViolation` when the purchase or package is missing.
    async fn save_line_item(&self, item: &mut PurchaseLineItem) -> Result<(), StoreError>;

    async fn get_line_item(&self, id: LineItemId) -> Result<Option<PurchaseLineItem>, StoreError>;

    /// Line items of a purchase, oldest first.
    async fn line_items(&self, purchase: PurchaseId) -> Result<Vec<PurchaseLineItem>, StoreError>;

    /// Returns whether the line item existed.
    async fn delete_line_item(&self, id: LineItemId) -> Result<bool, StoreError>;

    /// Sum the purchase's line totals into `grand_total` and persist the purchase.
    async fn update_total(&self, purchase: &mut Purchase) -> Result<Decimal, StoreError>;

    /// `save_line_item` followed by `update_total`, as one atomic step.
    async fn save_line_item_and_update_total(
        &self,
        item: &mut PurchaseLineItem,
        purchase: &mut Purchase,
    ) -> Result<Decimal, StoreError>;

    /// `delete_line_item` followed by `update_total`, as one atomic step.
    async fn delete_line_item_and_update_total(
        &self,
        id: LineItemId,
        purchase: &mut Purchase,
    ) -> Result<Decimal, StoreError>;
}

#[async_trait]
impl<S> CheckoutStore for Arc<S>
where
    S: CheckoutStore + ?Sized,
{
    async fn upsert_package(&self, package: &Package) -> Result<(), StoreError> {
        (**self).upsert_package(package).await
    }

    async fn get_package(&self, id: PackageId) -> Result<Option<Package>, StoreError> {
        (**self).get_package(id).await
    }

    async fn delete_package(&self, id: PackageId) -> Result<bool, StoreError> {
        (**self).delete_package(id).await
    }

    async fn save_purchase(&self, purchase: &mut Purchase) -> Result<(), StoreError> {
        (**self).save_purchase(purchase).await
    }

    async fn get_purchase(&self, id: PurchaseId) -> Result<Option<Purchase>, StoreError> {
        (**self).get_purchase(id).await
    }

    async fn find_by_number(&self, purchase_number: &str) -> Result<Option<Purchase>, StoreError> {
        (**self).find_by_number(purchase_number).await
    }

    async fn purchases_for_account(
        &self,
        account: UserAccountId,
    ) -> Result<Vec<Purchase>, StoreError> {
        (**self).purchases_for_account(account).await
    }

    async fn delete_purchase(&self, id: PurchaseId) -> Result<bool, StoreError> {
        (**self).delete_purchase(id).await
    }

    async fn detach_user_account(&self, account: UserAccountId) -> Result<u64, StoreError> {
        (**self).detach_user_account(account).await
    }

    async fn save_line_item(&self, item: &mut PurchaseLineItem) -> Result<(), StoreError> {
        (**self).save_line_item(item).await
    }

    async fn get_line_item(&self, id: LineItemId) -> Result<Option<PurchaseLineItem>, StoreError> {
        (**self).get_line_item(id).await
    }

    async fn line_items(&self, purchase: PurchaseId) -> Result<Vec<PurchaseLineItem>, StoreError> {
        (**self).line_items(purchase).await
    }

    async fn delete_line_item(&self, id: LineItemId) -> Result<bool, StoreError> {
        (**self).delete_line_item(id).await
    }

    async fn update_total(&self, purchase: &mut Purchase) -> Result<Decimal, StoreError> {
        (**self).update_total(purchase).await
    }

    async fn save_line_item_and_update_total(
        &self,
        item: &mut PurchaseLineItem,
        purchase: &mut Purchase,
    ) -> Result<Decimal, StoreError> {
        (**self).save_line_item_and_update_total(item, purchase).await
    }

    async fn delete_line_item_and_update_total(
        &self,
        id: LineItemId,
        purchase: &mut Purchase,
    ) -> Result<Decimal, StoreError> {
        (**self).delete_line_item_and_update_total(id, purchase).await
    }
}
