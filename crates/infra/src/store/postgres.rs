//! Postgres-backed checkout store.
//!
//! Referential actions (`ON DELETE CASCADE`) and column constraints live in the
//! schema (`migrations/0001_checkout.sql`); this module adds the derived-field
//! recomputation the schema cannot express.
//!
//! ## Thread Safety
//!
//! `PostgresCheckoutStore` is `Send + Sync` and can be shared across tasks.
//! All operations go through the SQLx connection pool. Multi-statement
//! operations run inside a single transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{FromRow, PgConnection, PgPool, Row};
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

use checkout_catalog::Package;
use checkout_core::{DomainError, LineItemId, PackageId, PurchaseId, UserAccountId};
use checkout_orders::{LineItemRecord, Purchase, PurchaseLineItem, PurchaseRecord};

use super::CheckoutStore;
use crate::config::StoreConfig;
use crate::error::{StoreError, map_sqlx_error};

const SCHEMA: &str = include_str!("../../migrations/0001_checkout.sql");

const PURCHASE_COLUMNS: &str = "id, purchase_number, user_account_id, full_name, email, phone_number, \
     street_address1, street_address2, town_or_city, postcode, county, country, \
     date, grand_total, original_bag, stripe_pid";

/// Postgres-backed checkout store.
#[derive(Debug, Clone)]
pub struct PostgresCheckoutStore {
    pool: Arc<PgPool>,
}

impl PostgresCheckoutStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Open a pool from `config`, applying the schema when `run_migrations` is set.
    #[instrument(skip(config), fields(max_connections = config.max_connections), err)]
    pub async fn connect(config: &StoreConfig) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;

        let store = Self::new(pool);
        if config.run_migrations {
            store.migrate().await?;
        }
        Ok(store)
    }

    /// Create the checkout tables if they do not exist yet.
    #[instrument(skip(self), err)]
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        tracing::info!("checkout schema applied");
        Ok(())
    }

    async fn acquire(&self) -> Result<sqlx::pool::PoolConnection<sqlx::Postgres>, StoreError> {
        self.pool
            .acquire()
            .await
            .map_err(|e| map_sqlx_error("acquire_connection", e))
    }

    async fn begin(&self) -> Result<sqlx::Transaction<'static, sqlx::Postgres>, StoreError> {
        self.pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))
    }
}

#[async_trait]
impl CheckoutStore for PostgresCheckoutStore {
    #[instrument(skip(self, package), fields(package_id = %package.id_typed()), err)]
    async fn upsert_package(&self, package: &Package) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO packages (id, sku, name, price)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE SET
                sku = EXCLUDED.sku,
                name = EXCLUDED.name,
                price = EXCLUDED.price
            "#,
        )
        .bind(package.id_typed().as_uuid())
        .bind(package.sku())
        .bind(package.name())
        .bind(package.price())
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("upsert_package", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(package_id = %id), err)]
    async fn get_package(&self, id: PackageId) -> Result<Option<Package>, StoreError> {
        let mut conn = self.acquire().await?;
        fetch_package(&mut conn, id).await
    }

    #[instrument(skip(self), fields(package_id = %id), err)]
    async fn delete_package(&self, id: PackageId) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM packages WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_package", e))?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, purchase), fields(purchase_id = %purchase.id_typed()), err)]
    async fn save_purchase(&self, purchase: &mut Purchase) -> Result<(), StoreError> {
        let mut conn = self.acquire().await?;
        write_purchase(&mut conn, purchase).await
    }

    #[instrument(skip(self), fields(purchase_id = %id), err)]
    async fn get_purchase(&self, id: PurchaseId) -> Result<Option<Purchase>, StoreError> {
        let sql = format!("SELECT {PURCHASE_COLUMNS} FROM purchases WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_purchase", e))?;
        row.map(|r| decode_purchase(&r)).transpose()
    }

    #[instrument(skip(self), err)]
    async fn find_by_number(&self, purchase_number: &str) -> Result<Option<Purchase>, StoreError> {
        let sql = format!("SELECT {PURCHASE_COLUMNS} FROM purchases WHERE purchase_number = $1");
        let row = sqlx::query(&sql)
            .bind(purchase_number)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_by_number", e))?;
        row.map(|r| decode_purchase(&r)).transpose()
    }

    #[instrument(skip(self), fields(user_account_id = %account), err)]
    async fn purchases_for_account(
        &self,
        account: UserAccountId,
    ) -> Result<Vec<Purchase>, StoreError> {
        let sql = format!(
            "SELECT {PURCHASE_COLUMNS} FROM purchases WHERE user_account_id = $1 ORDER BY date DESC, id DESC"
        );
        let rows = sqlx::query(&sql)
            .bind(account.as_uuid())
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("purchases_for_account", e))?;
        rows.iter().map(decode_purchase).collect()
    }

    #[instrument(skip(self), fields(purchase_id = %id), err)]
    async fn delete_purchase(&self, id: PurchaseId) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM purchases WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_purchase", e))?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self), fields(user_account_id = %account), err)]
    async fn detach_user_account(&self, account: UserAccountId) -> Result<u64, StoreError> {
        let result =
            sqlx::query("UPDATE purchases SET user_account_id = NULL WHERE user_account_id = $1")
                .bind(account.as_uuid())
                .execute(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("detach_user_account", e))?;
        Ok(result.rows_affected())
    }

    #[instrument(skip(self, item), fields(line_item_id = %item.id_typed()), err)]
    async fn save_line_item(&self, item: &mut PurchaseLineItem) -> Result<(), StoreError> {
        let mut conn = self.acquire().await?;
        write_line_item(&mut conn, item).await
    }

    #[instrument(skip(self), fields(line_item_id = %id), err)]
    async fn get_line_item(&self, id: LineItemId) -> Result<Option<PurchaseLineItem>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, purchase_id, package_id, quantity, lineitem_total
            FROM purchase_line_items
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_line_item", e))?;
        row.map(|r| decode_line_item(&r)).transpose()
    }

    #[instrument(skip(self), fields(purchase_id = %purchase), err)]
    async fn line_items(&self, purchase: PurchaseId) -> Result<Vec<PurchaseLineItem>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, purchase_id, package_id, quantity, lineitem_total
            FROM purchase_line_items
            WHERE purchase_id = $1
            ORDER BY id ASC
            "#,
        )
        .bind(purchase.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("line_items", e))?;
        rows.iter().map(decode_line_item).collect()
    }

    #[instrument(skip(self), fields(line_item_id = %id), err)]
    async fn delete_line_item(&self, id: LineItemId) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM purchase_line_items WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_line_item", e))?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, purchase), fields(purchase_id = %purchase.id_typed()), err)]
    async fn update_total(&self, purchase: &mut Purchase) -> Result<Decimal, StoreError> {
        let mut updated = purchase.clone();
        let mut tx = self.begin().await?;
        lock_purchase(&mut tx, purchase.id_typed()).await?;
        let total = refresh_total(&mut tx, &mut updated).await?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        *purchase = updated;
        Ok(total)
    }

    #[instrument(
        skip(self, item, purchase),
        fields(line_item_id = %item.id_typed(), purchase_id = %purchase.id_typed()),
        err
    )]
    async fn save_line_item_and_update_total(
        &self,
        item: &mut PurchaseLineItem,
        purchase: &mut Purchase,
    ) -> Result<Decimal, StoreError> {
        ensure_same_purchase(item.purchase(), purchase)?;

        // Caller copies only change once the transaction commits.
        let mut updated_item = item.clone();
        let mut updated = purchase.clone();
        let mut tx = self.begin().await?;
        lock_purchase(&mut tx, purchase.id_typed()).await?;
        write_line_item(&mut tx, &mut updated_item).await?;
        let total = refresh_total(&mut tx, &mut updated).await?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        *item = updated_item;
        *purchase = updated;
        Ok(total)
    }

    #[instrument(
        skip(self, purchase),
        fields(line_item_id = %id, purchase_id = %purchase.id_typed()),
        err
    )]
    async fn delete_line_item_and_update_total(
        &self,
        id: LineItemId,
        purchase: &mut Purchase,
    ) -> Result<Decimal, StoreError> {
        let mut tx = self.begin().await?;
        lock_purchase(&mut tx, purchase.id_typed()).await?;

        let owner: Option<Uuid> = sqlx::query_scalar(
            "SELECT purchase_id FROM purchase_line_items WHERE id = $1 FOR UPDATE",
        )
        .bind(id.as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("lock_line_item", e))?;

        if let Some(owner) = owner {
            ensure_same_purchase(PurchaseId::from_uuid(owner), purchase)?;
            sqlx::query("DELETE FROM purchase_line_items WHERE id = $1")
                .bind(id.as_uuid())
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("delete_line_item", e))?;
        }

        let mut updated = purchase.clone();
        let total = refresh_total(&mut tx, &mut updated).await?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        *purchase = updated;
        Ok(total)
    }
}

fn ensure_same_purchase(item_purchase: PurchaseId, purchase: &Purchase) -> Result<(), StoreError> {
    if item_purchase != purchase.id_typed() {
        return Err(DomainError::invariant(format!(
            "line item belongs to purchase {item_purchase}, not {}",
            purchase.id_typed()
        ))
        .into());
    }
    Ok(())
}

async fn fetch_package(
    conn: &mut PgConnection,
    id: PackageId,
) -> Result<Option<Package>, StoreError> {
    let row = sqlx::query("SELECT id, sku, name, price FROM packages WHERE id = $1")
        .bind(id.as_uuid())
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("get_package", e))?;

    match row {
        Some(row) => {
            let row = PackageRow::from_row(&row)
                .map_err(|e| StoreError::Storage(format!("failed to decode package row: {e}")))?;
            Ok(Some(Package::with_id(
                PackageId::from_uuid(row.id),
                row.sku,
                row.name,
                row.price,
            )?))
        }
        None => Ok(None),
    }
}

/// Insert or update a purchase, numbering it first if needed.
///
/// `purchase_number`, `date` and `original_bag` are excluded from the update
/// set. The stored row is read back into `purchase`.
async fn write_purchase(
    conn: &mut PgConnection,
    purchase: &mut Purchase,
) -> Result<(), StoreError> {
    if purchase.ensure_purchase_number() {
        tracing::debug!(
            purchase_id = %purchase.id_typed(),
            purchase_number = purchase.purchase_number(),
            "assigned purchase number"
        );
    }

    let record = purchase.to_record();
    let sql = format!(
        r#"
        INSERT INTO purchases ({PURCHASE_COLUMNS})
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
        ON CONFLICT (id) DO UPDATE SET
            user_account_id = EXCLUDED.user_account_id,
            full_name = EXCLUDED.full_name,
            email = EXCLUDED.email,
            phone_number = EXCLUDED.phone_number,
            street_address1 = EXCLUDED.street_address1,
            street_address2 = EXCLUDED.street_address2,
            town_or_city = EXCLUDED.town_or_city,
            postcode = EXCLUDED.postcode,
            county = EXCLUDED.county,
            country = EXCLUDED.country,
            grand_total = EXCLUDED.grand_total,
            stripe_pid = EXCLUDED.stripe_pid
        RETURNING {PURCHASE_COLUMNS}
        "#
    );

    let row = sqlx::query(&sql)
        .bind(record.id.as_uuid())
        .bind(&record.purchase_number)
        .bind(record.user_account.map(|a| *a.as_uuid()))
        .bind(&record.full_name)
        .bind(&record.email)
        .bind(&record.phone_number)
        .bind(&record.street_address1)
        .bind(&record.street_address2)
        .bind(&record.town_or_city)
        .bind(&record.postcode)
        .bind(&record.county)
        .bind(&record.country)
        .bind(record.date)
        .bind(record.grand_total)
        .bind(&record.original_bag)
        .bind(&record.stripe_pid)
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("save_purchase", e))?;

    *purchase = decode_purchase(&row)?;
    Ok(())
}

/// Reprice `item` from the stored package, then upsert it.
async fn write_line_item(
    conn: &mut PgConnection,
    item: &mut PurchaseLineItem,
) -> Result<(), StoreError> {
    let package = fetch_package(&mut *conn, item.package())
        .await?
        .ok_or_else(|| {
            StoreError::foreign_key(format!("package {} does not exist", item.package()))
        })?;

    let total = item.reprice(&package)?;
    tracing::debug!(
        line_item_id = %item.id_typed(),
        lineitem_total = %total,
        "recomputed line total"
    );

    let record = item.to_record();
    sqlx::query(
        r#"
        INSERT INTO purchase_line_items (id, purchase_id, package_id, quantity, lineitem_total)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (id) DO UPDATE SET
            purchase_id = EXCLUDED.purchase_id,
            package_id = EXCLUDED.package_id,
            quantity = EXCLUDED.quantity,
            lineitem_total = EXCLUDED.lineitem_total
        "#,
    )
    .bind(record.id.as_uuid())
    .bind(record.purchase_id.as_uuid())
    .bind(record.package_id.as_uuid())
    .bind(record.quantity)
    .bind(record.lineitem_total)
    .execute(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("save_line_item", e))?;
    Ok(())
}

/// Serialize total refreshes of one purchase.
///
/// Must be the first statement touching the purchase in a transaction. A line
/// item insert takes `KEY SHARE` on the parent row, which a later `FOR UPDATE`
/// would wait on. `NO KEY UPDATE` does not conflict with it. An unsaved purchase
/// has no row to lock.
async fn lock_purchase(conn: &mut PgConnection, id: PurchaseId) -> Result<(), StoreError> {
    sqlx::query("SELECT id FROM purchases WHERE id = $1 FOR NO KEY UPDATE")
        .bind(id.as_uuid())
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("lock_purchase", e))?;
    Ok(())
}

/// Sum the purchase's line totals and persist the result. Callers hold the
/// purchase lock.
async fn refresh_total(
    conn: &mut PgConnection,
    purchase: &mut Purchase,
) -> Result<Decimal, StoreError> {
    let total: Decimal = sqlx::query_scalar(
        "SELECT COALESCE(SUM(lineitem_total), 0) FROM purchase_line_items WHERE purchase_id = $1",
    )
    .bind(purchase.id_typed().as_uuid())
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("sum_line_totals", e))?;

    purchase.apply_grand_total(total)?;
    write_purchase(conn, purchase).await?;
    tracing::debug!(
        purchase_id = %purchase.id_typed(),
        grand_total = %purchase.grand_total(),
        "updated grand total"
    );
    Ok(purchase.grand_total())
}

fn decode_purchase(row: &PgRow) -> Result<Purchase, StoreError> {
    let row = PurchaseRow::from_row(row)
        .map_err(|e| StoreError::Storage(format!("failed to decode purchase row: {e}")))?;
    Ok(Purchase::try_from(PurchaseRecord::from(row))?)
}

fn decode_line_item(row: &PgRow) -> Result<PurchaseLineItem, StoreError> {
    let row = LineItemRow::from_row(row)
        .map_err(|e| StoreError::Storage(format!("failed to decode line item row: {e}")))?;
    Ok(PurchaseLineItem::try_from(LineItemRecord::from(row))?)
}

// SQLx row types

#[derive(Debug)]
struct PackageRow {
    id: Uuid,
    sku: String,
    name: String,
    price: Decimal,
}

impl<'r> FromRow<'r, PgRow> for PackageRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(PackageRow {
            id: row.try_get("id")?,
            sku: row.try_get("sku")?,
            name: row.try_get("name")?,
            price: row.try_get("price")?,
        })
    }
}

#[derive(Debug)]
struct PurchaseRow {
    id: Uuid,
    purchase_number: String,
    user_account_id: Option<Uuid>,
    full_name: String,
    email: String,
    phone_number: String,
    street_address1: String,
    street_address2: Option<String>,
    town_or_city: String,
    postcode: Option<String>,
    county: Option<String>,
    country: String,
    date: DateTime<Utc>,
    grand_total: Decimal,
    original_bag: String,
    stripe_pid: String,
}

impl<'r> FromRow<'r, PgRow> for PurchaseRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(PurchaseRow {
            id: row.try_get("id")?,
            purchase_number: row.try_get("purchase_number")?,
            user_account_id: row.try_get("user_account_id")?,
            full_name: row.try_get("full_name")?,
            email: row.try_get("email")?,
            phone_number: row.try_get("phone_number")?,
            street_address1: row.try_get("street_address1")?,
            street_address2: row.try_get("street_address2")?,
            town_or_city: row.try_get("town_or_city")?,
            postcode: row.try_get("postcode")?,
            county: row.try_get("county")?,
            country: row.try_get("country")?,
            date: row.try_get("date")?,
            grand_total: row.try_get("grand_total")?,
            original_bag: row.try_get("original_bag")?,
            stripe_pid: row.try_get("stripe_pid")?,
        })
    }
}

impl From<PurchaseRow> for PurchaseRecord {
    fn from(row: PurchaseRow) -> Self {
        PurchaseRecord {
            id: PurchaseId::from_uuid(row.id),
            purchase_number: row.purchase_number,
            user_account: row.user_account_id.map(UserAccountId::from_uuid),
            full_name: row.full_name,
            email: row.email,
            phone_number: row.phone_number,
            street_address1: row.street_address1,
            street_address2: row.street_address2,
            town_or_city: row.town_or_city,
            postcode: row.postcode,
            county: row.county,
            country: row.country,
            date: row.date,
            grand_total: row.grand_total,
            original_bag: row.original_bag,
            stripe_pid: row.stripe_pid,
        }
    }
}

#[derive(Debug)]
struct LineItemRow {
    id: Uuid,
    purchase_id: Uuid,
    package_id: Uuid,
    quantity: i32,
    lineitem_total: Decimal,
}

impl<'r> FromRow<'r, PgRow> for LineItemRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(LineItemRow {
            id: row.try_get("id")?,
            purchase_id: row.try_get("purchase_id")?,
            package_id: row.try_get("package_id")?,
            quantity: row.try_get("quantity")?,
            lineitem_total: row.try_get("lineitem_total")?,
        })
    }
}

impl From<LineItemRow> for LineItemRecord {
    fn from(row: LineItemRow) -> Self {
        LineItemRecord {
            id: LineItemId::from_uuid(row.id),
            purchase_id: PurchaseId::from_uuid(row.purchase_id),
            package_id: PackageId::from_uuid(row.package_id),
            quantity: row.quantity,
            lineitem_total: row.lineitem_total,
        }
    }
}
