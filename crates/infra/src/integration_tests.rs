//! Integration tests for the Postgres checkout pipeline.
//!
//! Tests: CheckoutService → PostgresCheckoutStore → Postgres
//!
//! Verifies:
//! - Purchase numbers are assigned once and survive a reload
//! - Grand totals follow line-item changes
//! - Cascades and account detachment are enforced by the schema
//! - Concurrent line-item changes on one purchase all commit
//!
//! Skipped unless `DATABASE_URL` points at a scratch database.

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use checkout_catalog::Package;
    use checkout_core::{DomainError, PackageId, UserAccountId};
    use checkout_orders::{
        ContactDetails, CountryCode, NewPurchase, Purchase, PurchaseLineItem, ShippingAddress,
        is_purchase_number,
    };

    use crate::config::StoreConfig;
    use crate::error::StoreError;
    use crate::service::CheckoutService;
    use crate::store::{CheckoutStore, PostgresCheckoutStore};

    async fn setup() -> Option<CheckoutService<PostgresCheckoutStore>> {
        checkout_observability::init();
        let config = match StoreConfig::from_env() {
            Ok(config) => config,
            Err(_) => {
                eprintln!("DATABASE_URL not set; skipping Postgres checkout tests");
                return None;
            }
        };
        let store = PostgresCheckoutStore::connect(&config).await.unwrap();
        if !config.run_migrations {
            store.migrate().await.unwrap();
        }
        Some(CheckoutService::new(store))
    }

    fn test_new_purchase(account: Option<UserAccountId>) -> NewPurchase {
        NewPurchase {
            user_account: account,
            contact: ContactDetails {
                full_name: "Katherine Johnson".to_string(),
                email: "katherine@example.com".to_string(),
                phone_number: "555-0142".to_string(),
            },
            shipping: ShippingAddress {
                street_address1: "3 Quay Street".to_string(),
                street_address2: Some("Apt 4".to_string()),
                town_or_city: "Cork".to_string(),
                postcode: Some("T12".to_string()),
                county: None,
                country: CountryCode::parse("IE").unwrap(),
            },
            original_bag: r#"{"tour": 3}"#.to_string(),
            stripe_pid: "pi_pg".to_string(),
        }
    }

    async fn seeded_package(store: &PostgresCheckoutStore, sku: &str, cents: i64) -> Package {
        let package = Package::new(sku, "Integration package", Decimal::new(cents, 2)).unwrap();
        store.upsert_package(&package).await.unwrap();
        package
    }

    #[tokio::test]
    async fn purchase_number_is_stable_across_saves_and_reloads() {
        let Some(service) = setup().await else { return };
        let mut purchase = service.place_purchase(test_new_purchase(None)).await.unwrap();
        let number = purchase.purchase_number().to_string();

        service.store().save_purchase(&mut purchase).await.unwrap();
        assert_eq!(purchase.purchase_number(), number);

        let reloaded = service.store().find_by_number(&number).await.unwrap().unwrap();
        assert_eq!(reloaded, purchase);
    }

    #[tokio::test]
    async fn totals_follow_line_item_changes() {
        let Some(service) = setup().await else { return };
        let store = service.store();
        let tour = seeded_package(store, "PG-TOUR", 999).await;
        let map = seeded_package(store, "PG-MAP", 500).await;
        let mut purchase = service.place_purchase(test_new_purchase(None)).await.unwrap();

        let item = service.add_line_item(&mut purchase, tour.id_typed(), 3).await.unwrap();
        assert_eq!(item.lineitem_total(), Decimal::new(2997, 2));
        service.add_line_item(&mut purchase, map.id_typed(), 1).await.unwrap();
        assert_eq!(purchase.grand_total(), Decimal::new(3497, 2));

        service.change_quantity(&mut purchase, item.id_typed(), 2).await.unwrap();
        assert_eq!(purchase.grand_total(), Decimal::new(2498, 2));

        let stored = store.get_purchase(purchase.id_typed()).await.unwrap().unwrap();
        assert_eq!(stored.grand_total(), Decimal::new(2498, 2));
    }

    #[tokio::test]
    async fn plain_save_leaves_total_stale_until_update_total() {
        let Some(service) = setup().await else { return };
        let store = service.store();
        let tour = seeded_package(store, "PG-STALE", 250).await;
        let mut purchase = service.place_purchase(test_new_purchase(None)).await.unwrap();

        let mut item = PurchaseLineItem::new(purchase.id_typed(), &tour, 4).unwrap();
        store.save_line_item(&mut item).await.unwrap();
        let stale = store.get_purchase(purchase.id_typed()).await.unwrap().unwrap();
        assert_eq!(stale.grand_total(), Decimal::ZERO);

        let total = service.update_total(&mut purchase).await.unwrap();
        assert_eq!(total, Decimal::new(1000, 2));
    }

    #[tokio::test]
    async fn cascades_and_detach_are_enforced() {
        let Some(service) = setup().await else { return };
        let store = service.store();
        let account = UserAccountId::new();
        let doomed = seeded_package(store, "PG-DOOMED", 100).await;
        let mut purchase = service.place_purchase(test_new_purchase(Some(account))).await.unwrap();
        service.add_line_item(&mut purchase, doomed.id_typed(), 1).await.unwrap();

        assert!(store.delete_package(doomed.id_typed()).await.unwrap());
        assert!(store.line_items(purchase.id_typed()).await.unwrap().is_empty());

        assert_eq!(store.detach_user_account(account).await.unwrap(), 1);
        let detached = store.get_purchase(purchase.id_typed()).await.unwrap().unwrap();
        assert_eq!(detached.user_account(), None);

        assert!(store.delete_purchase(purchase.id_typed()).await.unwrap());
        assert!(store.get_purchase(purchase.id_typed()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unknown_package_is_rejected() {
        let Some(service) = setup().await else { return };
        let mut purchase = service.place_purchase(test_new_purchase(None)).await.unwrap();

        let err = service
            .add_line_item(&mut purchase, PackageId::new(), 1)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::ForeignKeyViolation(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_atomic_adds_to_one_purchase_all_commit() {
        let Some(service) = setup().await else { return };
        let package = seeded_package(service.store(), "PG-CONCURRENT", 999).await;

        for _round in 0..5 {
            let purchase = service.place_purchase(test_new_purchase(None)).await.unwrap();

            let mut tasks = Vec::new();
            for _ in 0..8 {
                let store = service.store().clone();
                let package = package.clone();
                let mut purchase = purchase.clone();
                tasks.push(tokio::spawn(async move {
                    let mut item = PurchaseLineItem::new(purchase.id_typed(), &package, 1).unwrap();
                    store
                        .save_line_item_and_update_total(&mut item, &mut purchase)
                        .await
                }));
            }
            for task in tasks {
                task.await.unwrap().unwrap();
            }

            let store = service.store();
            let stored = store.get_purchase(purchase.id_typed()).await.unwrap().unwrap();
            assert_eq!(store.line_items(purchase.id_typed()).await.unwrap().len(), 8);
            assert_eq!(stored.grand_total(), Decimal::new(7992, 2));
        }
    }

    #[tokio::test]
    async fn atomic_delete_refuses_items_of_other_purchases() {
        let Some(service) = setup().await else { return };
        let package = seeded_package(service.store(), "PG-OWNER", 300).await;
        let mut owner = service.place_purchase(test_new_purchase(None)).await.unwrap();
        let mut stranger = service.place_purchase(test_new_purchase(None)).await.unwrap();
        let item = service.add_line_item(&mut owner, package.id_typed(), 1).await.unwrap();

        let err = service
            .remove_line_item(&mut stranger, item.id_typed())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Domain(DomainError::InvariantViolation(_))));
        assert!(service.store().get_line_item(item.id_typed()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn update_total_inserts_and_numbers_an_unsaved_purchase() {
        let Some(service) = setup().await else { return };
        let mut purchase = Purchase::new(test_new_purchase(None)).unwrap();

        let total = service.update_total(&mut purchase).await.unwrap();
        assert_eq!(total, Decimal::ZERO);
        assert!(is_purchase_number(purchase.purchase_number()));
        let stored = service.store().get_purchase(purchase.id_typed()).await.unwrap().unwrap();
        assert_eq!(stored, purchase);
    }

    #[tokio::test]
    async fn update_replaces_stripe_pid_but_not_original_bag() {
        let Some(service) = setup().await else { return };
        let purchase = service.place_purchase(test_new_purchase(None)).await.unwrap();

        let mut record = purchase.to_record();
        record.stripe_pid = "pi_retry".to_string();
        record.original_bag = r#"{"tampered": true}"#.to_string();
        let mut edited = Purchase::try_from(record).unwrap();
        service.store().save_purchase(&mut edited).await.unwrap();

        assert_eq!(edited.stripe_pid(), "pi_retry");
        assert_eq!(edited.original_bag(), r#"{"tour": 3}"#);
    }
}
