use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use checkout_core::money::PACKAGE_PRICE;
use checkout_core::{DomainError, DomainResult, Entity, PackageId};

/// A purchasable catalog package, as seen by checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    id: PackageId,
    sku: String,
    name: String,
    price: Decimal,
}

impl Package {
    /// Build a package with a fresh identifier.
    pub fn new(
        sku: impl Into<String>,
        name: impl Into<String>,
        price: Decimal,
    ) -> DomainResult<Self> {
        Self::with_id(PackageId::new(), sku, name, price)
    }

    /// Build a package with a known identifier (rehydration from storage, tests).
    pub fn with_id(
        id: PackageId,
        sku: impl Into<String>,
        name: impl Into<String>,
        price: Decimal,
    ) -> DomainResult<Self> {
        let sku = sku.into();
        let name = name.into();

        if sku.trim().is_empty() {
            return Err(DomainError::validation("sku cannot be empty"));
        }
        if name.trim().is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }
        if price.is_sign_negative() {
            return Err(DomainError::validation("price cannot be negative"));
        }
        let price = PACKAGE_PRICE.fit("price", price)?;

        Ok(Self { id, sku, name, price })
    }

    pub fn id_typed(&self) -> PackageId {
        self.id
    }

    pub fn sku(&self) -> &str {
        &self.sku
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn price(&self) -> Decimal {
        self.price
    }
}

impl Entity for Package {
    type Id = PackageId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn new_package_keeps_price_at_two_places() {
        let package = Package::new("TOUR-001", "City tour", Decimal::new(999, 2)).unwrap();
        assert_eq!(package.price(), Decimal::new(999, 2));
        assert_eq!(package.price().scale(), 2);
        assert_eq!(package.sku(), "TOUR-001");
    }

    #[test]
    fn blank_sku_is_rejected() {
        let err = Package::new("  ", "City tour", Decimal::ONE).unwrap_err();
        match err {
            DomainError::Validation(msg) if msg.contains("sku") => {}
            other => panic!("expected sku validation error, got {other:?}"),
        }
    }

    #[test]
    fn negative_price_is_rejected() {
        let err = Package::new("TOUR-001", "City tour", Decimal::new(-1, 0)).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn price_outside_column_is_rejected() {
        let err = Package::new("TOUR-001", "City tour", Decimal::from(10_000)).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: any non-blank SKU with an in-range price is accepted unchanged.
        #[test]
        fn valid_packages_are_accepted(
            sku in "[A-Z0-9]{1,20}",
            cents in 0i64..1_000_000i64
        ) {
            let package = Package::new(sku.clone(), "Package", Decimal::new(cents, 2)).unwrap();
            prop_assert_eq!(package.sku(), sku.as_str());
            prop_assert_eq!(package.price(), Decimal::new(cents, 2));
        }
    }
}
