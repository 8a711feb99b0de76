use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use rust_decimal::Decimal;

use checkout_catalog::Package;
use checkout_core::{DomainError, Entity, LineItemId, PackageId, PurchaseId, UserAccountId};
use checkout_orders::{Purchase, PurchaseLineItem};

use super::CheckoutStore;
use crate::error::StoreError;

type Table<E> = HashMap<<E as Entity>::Id, E>;

fn put<E: Entity + Clone>(table: &mut Table<E>, row: &E) {
    table.insert(row.id().clone(), row.clone());
}

#[derive(Debug, Default)]
struct Tables {
    packages: Table<Package>,
    purchases: Table<Purchase>,
    line_items: Table<PurchaseLineItem>,
}

impl Tables {
    fn write_purchase(&mut self, purchase: &mut Purchase) -> Result<(), StoreError> {
        // Immutable columns keep their stored values.
        if let Some(stored) = self.purchases.get(&purchase.id_typed()) {
            let mut record = purchase.to_record();
            record.purchase_number = stored.purchase_number().to_string();
            record.date = stored.date();
            record.original_bag = stored.original_bag().to_string();
            *purchase = Purchase::try_from(record)?;
            put(&mut self.purchases, purchase);
            return Ok(());
        }

        if purchase.ensure_purchase_number() {
            tracing::debug!(
                purchase_id = %purchase.id_typed(),
                purchase_number = purchase.purchase_number(),
                "assigned purchase number"
            );
        }
        if self
            .purchases
            .values()
            .any(|p| p.purchase_number() == purchase.purchase_number())
        {
            return Err(StoreError::unique(format!(
                "purchase_number {} already exists",
                purchase.purchase_number()
            )));
        }
        put(&mut self.purchases, purchase);
        Ok(())
    }

    fn write_line_item(&mut self, item: &mut PurchaseLineItem) -> Result<(), StoreError> {
        let package = self.packages.get(&item.package()).ok_or_else(|| {
            StoreError::foreign_key(format!("package {} does not exist", item.package()))
        })?;
        if !self.purchases.contains_key(&item.purchase()) {
            return Err(StoreError::foreign_key(format!(
                "purchase {} does not exist",
                item.purchase()
            )));
        }

        let total = item.reprice(package)?;
        tracing::debug!(
            line_item_id = %item.id_typed(),
            lineitem_total = %total,
            "recomputed line total"
        );
        put(&mut self.line_items, item);
        Ok(())
    }

    /// Sum the purchase's line totals and save it. Leaves the tables untouched on error.
    fn refresh_total(&mut self, purchase: &mut Purchase) -> Result<Decimal, StoreError> {
        let id = purchase.id_typed();
        let mut updated = purchase.clone();
        let lines = self.line_items.values().filter(|i| i.purchase() == id);
        let total = updated.recompute_total(lines)?;
        self.write_purchase(&mut updated)?;
        *purchase = updated;
        tracing::debug!(purchase_id = %id, grand_total = %total, "updated grand total");
        Ok(total)
    }

    /// Put back the line item row as it was before a failed compound write.
    fn restore_line_item(&mut self, id: LineItemId, previous: Option<PurchaseLineItem>) {
        match previous {
            Some(row) => put(&mut self.line_items, &row),
            None => {
                self.line_items.remove(&id);
            }
        }
    }

    fn ensure_same_purchase(
        item_purchase: PurchaseId,
        purchase: &Purchase,
    ) -> Result<(), StoreError> {
        if item_purchase != purchase.id_typed() {
            return Err(DomainError::invariant(format!(
                "line item belongs to purchase {item_purchase}, not {}",
                purchase.id_typed()
            ))
            .into());
        }
        Ok(())
    }
}

/// In-memory checkout store.
///
/// Intended for tests/dev. Cascades and uniqueness are enforced by hand under a
/// single `RwLock`, so every operation is atomic with respect to the others.
/// Compound writes restore the previous rows when a later step fails.
#[derive(Debug, Default)]
pub struct InMemoryCheckoutStore {
    tables: RwLock<Tables>,
}

impl InMemoryCheckoutStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Tables>, StoreError> {
        self.tables
            .read()
            .map_err(|_| StoreError::Storage("lock poisoned".to_string()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Tables>, StoreError> {
        self.tables
            .write()
            .map_err(|_| StoreError::Storage("lock poisoned".to_string()))
    }
}

#[async_trait]
impl CheckoutStore for InMemoryCheckoutStore {
    async fn upsert_package(&self, package: &Package) -> Result<(), StoreError> {
        put(&mut self.write()?.packages, package);
        Ok(())
    }

    async fn get_package(&self, id: PackageId) -> Result<Option<Package>, StoreError> {
        Ok(self.read()?.packages.get(&id).cloned())
    }

    async fn delete_package(&self, id: PackageId) -> Result<bool, StoreError> {
        let mut tables = self.write()?;
        let existed = tables.packages.remove(&id).is_some();
        let before = tables.line_items.len();
        tables.line_items.retain(|_, item| item.package() != id);
        tracing::debug!(
            package_id = %id,
            removed_line_items = before - tables.line_items.len(),
            "deleted package"
        );
        Ok(existed)
    }

    async fn save_purchase(&self, purchase: &mut Purchase) -> Result<(), StoreError> {
        self.write()?.write_purchase(purchase)
    }

    async fn get_purchase(&self, id: PurchaseId) -> Result<Option<Purchase>, StoreError> {
        Ok(self.read()?.purchases.get(&id).cloned())
    }

    async fn find_by_number(&self, purchase_number: &str) -> Result<Option<Purchase>, StoreError> {
        Ok(self
            .read()?
            .purchases
            .values()
            .find(|p| p.purchase_number() == purchase_number)
            .cloned())
    }

    async fn purchases_for_account(
        &self,
        account: UserAccountId,
    ) -> Result<Vec<Purchase>, StoreError> {
        let mut result: Vec<Purchase> = self
            .read()?
            .purchases
            .values()
            .filter(|p| p.user_account() == Some(account))
            .cloned()
            .collect();
        result.sort_by(|a, b| {
            b.date()
                .cmp(&a.date())
                .then_with(|| b.id_typed().cmp(&a.id_typed()))
        });
        Ok(result)
    }

    async fn delete_purchase(&self, id: PurchaseId) -> Result<bool, StoreError> {
        let mut tables = self.write()?;
        let existed = tables.purchases.remove(&id).is_some();
        tables.line_items.retain(|_, item| item.purchase() != id);
        Ok(existed)
    }

    async fn detach_user_account(&self, account: UserAccountId) -> Result<u64, StoreError> {
        let mut tables = self.write()?;
        let mut touched = 0;
        for purchase in tables.purchases.values_mut() {
            if purchase.user_account() == Some(account) {
                purchase.set_user_account(None);
                touched += 1;
            }
        }
        Ok(touched)
    }

    async fn save_line_item(&self, item: &mut PurchaseLineItem) -> Result<(), StoreError> {
        self.write()?.write_line_item(item)
    }

    async fn get_line_item(&self, id: LineItemId) -> Result<Option<PurchaseLineItem>, StoreError> {
        Ok(self.read()?.line_items.get(&id).cloned())
    }

    async fn line_items(&self, purchase: PurchaseId) -> Result<Vec<PurchaseLineItem>, StoreError> {
        let mut result: Vec<PurchaseLineItem> = self
            .read()?
            .line_items
            .values()
            .filter(|item| item.purchase() == purchase)
            .cloned()
            .collect();
        result.sort_by_key(|item| item.id_typed());
        Ok(result)
    }

    async fn delete_line_item(&self, id: LineItemId) -> Result<bool, StoreError> {
        Ok(self.write()?.line_items.remove(&id).is_some())
    }

    async fn update_total(&self, purchase: &mut Purchase) -> Result<Decimal, StoreError> {
        self.write()?.refresh_total(purchase)
    }

    async fn save_line_item_and_update_total(
        &self,
        item: &mut PurchaseLineItem,
        purchase: &mut Purchase,
    ) -> Result<Decimal, StoreError> {
        Tables::ensure_same_purchase(item.purchase(), purchase)?;
        let mut tables = self.write()?;
        let previous = tables.line_items.get(&item.id_typed()).cloned();

        let mut updated = item.clone();
        tables.write_line_item(&mut updated)?;
        match tables.refresh_total(purchase) {
            Ok(total) => {
                *item = updated;
                Ok(total)
            }
            Err(err) => {
                tables.restore_line_item(item.id_typed(), previous);
                Err(err)
            }
        }
    }

    async fn delete_line_item_and_update_total(
        &self,
        id: LineItemId,
        purchase: &mut Purchase,
    ) -> Result<Decimal, StoreError> {
        let mut tables = self.write()?;
        let previous = match tables.line_items.get(&id) {
            Some(item) => {
                Tables::ensure_same_purchase(item.purchase(), purchase)?;
                tables.line_items.remove(&id)
            }
            None => None,
        };

        match tables.refresh_total(purchase) {
            Ok(total) => Ok(total),
            Err(err) => {
                if previous.is_some() {
                    tables.restore_line_item(id, previous);
                }
                Err(err)
            }
        }
    }
}
