//! Checkout orchestration on top of a `CheckoutStore`.
//!
//! ```text
//! NewPurchase
//!   ↓
//! 1. Validate and build the purchase (domain)
//!   ↓
//! 2. save_purchase (number assigned on first save)
//!   ↓
//! 3. add_line_item → reprice + upsert line + refresh grand_total, one atomic step
//! ```
//!
//! The service never computes totals itself. It only sequences the store
//! operations so that a purchase's `grand_total` is up to date after every
//! line-item change it performs.

use rust_decimal::Decimal;
use tracing::instrument;

use checkout_core::{LineItemId, PackageId};
use checkout_orders::{NewPurchase, Purchase, PurchaseLineItem};

use crate::error::StoreError;
use crate::store::CheckoutStore;

#[derive(Debug, Clone)]
pub struct CheckoutService<S> {
    store: S,
}

impl<S: CheckoutStore> CheckoutService<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Build a purchase from checkout input and save it.
    #[instrument(skip(self, input), err)]
    pub async fn place_purchase(&self, input: NewPurchase) -> Result<Purchase, StoreError> {
        let mut purchase = Purchase::new(input)?;
        self.store.save_purchase(&mut purchase).await?;
        tracing::info!(
            purchase_id = %purchase.id_typed(),
            purchase_number = purchase.purchase_number(),
            "purchase placed"
        );
        Ok(purchase)
    }

    /// Add `quantity` of a package to the purchase and refresh its total.
    #[instrument(
        skip(self, purchase),
        fields(purchase_id = %purchase.id_typed(), package_id = %package_id),
        err
    )]
    pub async fn add_line_item(
        &self,
        purchase: &mut Purchase,
        package_id: PackageId,
        quantity: i32,
    ) -> Result<PurchaseLineItem, StoreError> {
        let package = self
            .store
            .get_package(package_id)
            .await?
            .ok_or_else(|| {
                StoreError::foreign_key(format!("package {package_id} does not exist"))
            })?;

        let mut item = PurchaseLineItem::new(purchase.id_typed(), &package, quantity)?;
        self.store
            .save_line_item_and_update_total(&mut item, purchase)
            .await?;
        Ok(item)
    }

    #[instrument(
        skip(self, purchase),
        fields(purchase_id = %purchase.id_typed(), line_item_id = %line_item),
        err
    )]
    pub async fn change_quantity(
        &self,
        purchase: &mut Purchase,
        line_item: LineItemId,
        quantity: i32,
    ) -> Result<PurchaseLineItem, StoreError> {
        let mut item = self
            .store
            .get_line_item(line_item)
            .await?
            .ok_or_else(|| StoreError::not_found(format!("line item {line_item}")))?;

        item.set_quantity(quantity)?;
        self.store
            .save_line_item_and_update_total(&mut item, purchase)
            .await?;
        Ok(item)
    }

    /// Remove a line item and refresh the total. Removing a missing item only refreshes.
    #[instrument(
        skip(self, purchase),
        fields(purchase_id = %purchase.id_typed(), line_item_id = %line_item),
        err
    )]
    pub async fn remove_line_item(
        &self,
        purchase: &mut Purchase,
        line_item: LineItemId,
    ) -> Result<Decimal, StoreError> {
        self.store
            .delete_line_item_and_update_total(line_item, purchase)
            .await
    }

    #[instrument(skip(self, purchase), fields(purchase_id = %purchase.id_typed()), err)]
    pub async fn update_total(&self, purchase: &mut Purchase) -> Result<Decimal, StoreError> {
        self.store.update_total(purchase).await
    }
}
