use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use checkout_core::money::{self, GRAND_TOTAL};
use checkout_core::{DomainError, DomainResult, Entity, PurchaseId, UserAccountId};

use crate::country::CountryCode;
use crate::fields;
use crate::line_item::PurchaseLineItem;

/// Length of a purchase number: 128 bits as hex.
pub const PURCHASE_NUMBER_LEN: usize = 32;

/// Generate a fresh purchase number: a random UUIDv4 as 32 uppercase hex digits.
pub fn generate_purchase_number() -> String {
    Uuid::new_v4().simple().to_string().to_ascii_uppercase()
}

/// Whether `s` has the shape of a generated purchase number.
pub fn is_purchase_number(s: &str) -> bool {
    s.len() == PURCHASE_NUMBER_LEN
        && s.bytes().all(|b| b.is_ascii_digit() || (b'A'..=b'F').contains(&b))
}

/// Who the purchase is for and how to reach them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactDetails {
    pub full_name: String,
    pub email: String,
    pub phone_number: String,
}

impl ContactDetails {
    pub fn validate(&self) -> DomainResult<()> {
        fields::required("full_name", &self.full_name, 50)?;
        fields::email("email", &self.email, 254)?;
        fields::required("phone_number", &self.phone_number, 20)?;
        Ok(())
    }
}

/// Where the purchase ships to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingAddress {
    pub street_address1: String,
    pub street_address2: Option<String>,
    pub town_or_city: String,
    pub postcode: Option<String>,
    pub county: Option<String>,
    pub country: CountryCode,
}

impl ShippingAddress {
    /// Validate lengths and collapse blank optional lines to `None`.
    pub fn normalized(self) -> DomainResult<Self> {
        fields::required("street_address1", &self.street_address1, 80)?;
        fields::required("town_or_city", &self.town_or_city, 40)?;
        Ok(Self {
            street_address2: fields::optional("street_address2", self.street_address2, 80)?,
            postcode: fields::optional("postcode", self.postcode, 20)?,
            county: fields::optional("county", self.county, 80)?,
            ..self
        })
    }
}

/// Input for a new purchase, as produced by the checkout flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPurchase {
    pub user_account: Option<UserAccountId>,
    pub contact: ContactDetails,
    pub shipping: ShippingAddress,
    /// Snapshot of the cart at checkout time. Opaque to this layer.
    pub original_bag: String,
    /// Payment processor transaction reference.
    pub stripe_pid: String,
}

/// Header record for a completed checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Purchase {
    id: PurchaseId,
    purchase_number: String,
    user_account: Option<UserAccountId>,
    contact: ContactDetails,
    shipping: ShippingAddress,
    date: DateTime<Utc>,
    grand_total: Decimal,
    original_bag: String,
    stripe_pid: String,
}

/// Flat persisted shape of a purchase (one row of `purchases`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseRecord {
    pub id: PurchaseId,
    pub purchase_number: String,
    pub user_account: Option<UserAccountId>,
    pub full_name: String,
    pub email: String,
    pub phone_number: String,
    pub street_address1: String,
    pub street_address2: Option<String>,
    pub town_or_city: String,
    pub postcode: Option<String>,
    pub county: Option<String>,
    pub country: String,
    pub date: DateTime<Utc>,
    pub grand_total: Decimal,
    pub original_bag: String,
    pub stripe_pid: String,
}

impl Purchase {
    /// Build an unsaved purchase. The number stays empty until the first save;
    /// `date` is fixed here and never changes afterwards.
    pub fn new(input: NewPurchase) -> DomainResult<Self> {
        Self::new_at(input, Utc::now())
    }

    pub fn new_at(input: NewPurchase, date: DateTime<Utc>) -> DomainResult<Self> {
        input.contact.validate()?;
        let shipping = input.shipping.normalized()?;
        Self::validate_payment_fields(&input.original_bag, &input.stripe_pid)?;

        Ok(Self {
            id: PurchaseId::new(),
            purchase_number: String::new(),
            user_account: input.user_account,
            contact: input.contact,
            shipping,
            date,
            grand_total: GRAND_TOTAL.fit("grand_total", Decimal::ZERO)?,
            original_bag: input.original_bag,
            stripe_pid: input.stripe_pid,
        })
    }

    fn validate_payment_fields(original_bag: &str, stripe_pid: &str) -> DomainResult<()> {
        if original_bag.trim().is_empty() {
            return Err(DomainError::validation("original_bag is required"));
        }
        fields::required("stripe_pid", stripe_pid, 254)
    }

    pub fn id_typed(&self) -> PurchaseId {
        self.id
    }

    /// Empty until the purchase has been saved once.
    pub fn purchase_number(&self) -> &str {
        &self.purchase_number
    }

    pub fn is_numbered(&self) -> bool {
        !self.purchase_number.is_empty()
    }

    pub fn user_account(&self) -> Option<UserAccountId> {
        self.user_account
    }

    pub fn contact(&self) -> &ContactDetails {
        &self.contact
    }

    pub fn shipping(&self) -> &ShippingAddress {
        &self.shipping
    }

    pub fn date(&self) -> DateTime<Utc> {
        self.date
    }

    pub fn grand_total(&self) -> Decimal {
        self.grand_total
    }

    pub fn original_bag(&self) -> &str {
        &self.original_bag
    }

    pub fn stripe_pid(&self) -> &str {
        &self.stripe_pid
    }

    /// First half of `save`: assign a purchase number if there is none yet.
    ///
    /// Returns `true` when a number was assigned. An existing number is never
    /// replaced.
    pub fn ensure_purchase_number(&mut self) -> bool {
        if self.is_numbered() {
            return false;
        }
        self.purchase_number = generate_purchase_number();
        true
    }

    /// Replace the contact details (e.g. a correction before fulfilment).
    pub fn set_contact(&mut self, contact: ContactDetails) -> DomainResult<()> {
        contact.validate()?;
        self.contact = contact;
        Ok(())
    }

    pub fn set_shipping(&mut self, shipping: ShippingAddress) -> DomainResult<()> {
        self.shipping = shipping.normalized()?;
        Ok(())
    }

    pub fn set_user_account(&mut self, user_account: Option<UserAccountId>) {
        self.user_account = user_account;
    }

    /// Store a grand total computed elsewhere (e.g. an SQL `SUM`).
    pub fn apply_grand_total(&mut self, total: Decimal) -> DomainResult<()> {
        self.grand_total = GRAND_TOTAL.fit("grand_total", total)?;
        Ok(())
    }

    /// Recompute `grand_total` from the purchase's line items.
    ///
    /// Every item must belong to this purchase. No items sums to zero.
    pub fn recompute_total<'a, I>(&mut self, items: I) -> DomainResult<Decimal>
    where
        I: IntoIterator<Item = &'a PurchaseLineItem>,
    {
        let mut totals = Vec::new();
        for item in items {
            if item.purchase() != self.id {
                return Err(DomainError::invariant(format!(
                    "line item {} belongs to purchase {}, not {}",
                    item.id_typed(),
                    item.purchase(),
                    self.id
                )));
            }
            totals.push(item.lineitem_total());
        }
        self.grand_total = money::sum(totals)?;
        Ok(self.grand_total)
    }

    /// Flatten into the persisted row shape.
    pub fn to_record(&self) -> PurchaseRecord {
        PurchaseRecord {
            id: self.id,
            purchase_number: self.purchase_number.clone(),
            user_account: self.user_account,
            full_name: self.contact.full_name.clone(),
            email: self.contact.email.clone(),
            phone_number: self.contact.phone_number.clone(),
            street_address1: self.shipping.street_address1.clone(),
            street_address2: self.shipping.street_address2.clone(),
            town_or_city: self.shipping.town_or_city.clone(),
            postcode: self.shipping.postcode.clone(),
            county: self.shipping.county.clone(),
            country: self.shipping.country.as_str().to_string(),
            date: self.date,
            grand_total: self.grand_total,
            original_bag: self.original_bag.clone(),
            stripe_pid: self.stripe_pid.clone(),
        }
    }
}

impl TryFrom<PurchaseRecord> for Purchase {
    type Error = DomainError;

    /// Rehydrate from storage, re-checking every column constraint.
    fn try_from(record: PurchaseRecord) -> Result<Self, Self::Error> {
        if !record.purchase_number.is_empty() && !is_purchase_number(&record.purchase_number) {
            return Err(DomainError::validation(format!(
                "purchase_number '{}' is not {PURCHASE_NUMBER_LEN} uppercase hex digits",
                record.purchase_number
            )));
        }

        let contact = ContactDetails {
            full_name: record.full_name,
            email: record.email,
            phone_number: record.phone_number,
        };
        contact.validate()?;

        let shipping = ShippingAddress {
            street_address1: record.street_address1,
            street_address2: record.street_address2,
            town_or_city: record.town_or_city,
            postcode: record.postcode,
            county: record.county,
            country: CountryCode::parse(&record.country)?,
        }
        .normalized()?;

        Self::validate_payment_fields(&record.original_bag, &record.stripe_pid)?;

        Ok(Self {
            id: record.id,
            purchase_number: record.purchase_number,
            user_account: record.user_account,
            contact,
            shipping,
            date: record.date,
            grand_total: GRAND_TOTAL.fit("grand_total", record.grand_total)?,
            original_bag: record.original_bag,
            stripe_pid: record.stripe_pid,
        })
    }
}

impl Entity for Purchase {
    type Id = PurchaseId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl core::fmt::Display for Purchase {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.purchase_number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use checkout_catalog::Package;
    use proptest::prelude::*;

    fn test_new_purchase() -> NewPurchase {
        NewPurchase {
            user_account: None,
            contact: ContactDetails {
                full_name: "Ada Lovelace".to_string(),
                email: "ada@example.com".to_string(),
                phone_number: "+353 1 555 0100".to_string(),
            },
            shipping: ShippingAddress {
                street_address1: "1 Harbour Road".to_string(),
                street_address2: Some(String::new()),
                town_or_city: "Dingle".to_string(),
                postcode: None,
                county: Some("Kerry".to_string()),
                country: CountryCode::parse("IE").unwrap(),
            },
            original_bag: r#"{"pkg-1": 2}"#.to_string(),
            stripe_pid: "pi_3Nabc123".to_string(),
        }
    }

    fn test_package(cents: i64) -> Package {
        Package::new("TOUR-001", "City tour", Decimal::new(cents, 2)).unwrap()
    }

    #[test]
    fn generated_numbers_are_32_uppercase_hex() {
        let number = generate_purchase_number();
        assert_eq!(number.len(), PURCHASE_NUMBER_LEN);
        assert!(is_purchase_number(&number));
        assert_ne!(number, generate_purchase_number());
    }

    #[test]
    fn new_purchase_is_unnumbered_with_zero_total() {
        let purchase = Purchase::new(test_new_purchase()).unwrap();
        assert!(!purchase.is_numbered());
        assert_eq!(purchase.grand_total(), Decimal::ZERO);
        assert_eq!(purchase.shipping().street_address2, None);
    }

    #[test]
    fn ensure_purchase_number_assigns_once() {
        let mut purchase = Purchase::new(test_new_purchase()).unwrap();
        assert!(purchase.ensure_purchase_number());
        let first = purchase.purchase_number().to_string();
        assert!(is_purchase_number(&first));

        assert!(!purchase.ensure_purchase_number());
        assert_eq!(purchase.purchase_number(), first);
        assert_eq!(purchase.to_string(), first);
    }

    #[test]
    fn blank_required_field_is_rejected() {
        let mut input = test_new_purchase();
        input.contact.full_name = " ".to_string();
        let err = Purchase::new(input).unwrap_err();
        match err {
            DomainError::Validation(msg) => assert_eq!(msg, "full_name is required"),
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn over_length_field_is_rejected() {
        let mut input = test_new_purchase();
        input.shipping.postcode = Some("X".repeat(21));
        assert!(matches!(Purchase::new(input), Err(DomainError::Validation(_))));
    }

    #[test]
    fn blank_bag_or_payment_reference_is_rejected() {
        let mut input = test_new_purchase();
        input.original_bag = String::new();
        assert!(Purchase::new(input).is_err());

        let mut input = test_new_purchase();
        input.stripe_pid = String::new();
        assert!(Purchase::new(input).is_err());
    }

    #[test]
    fn recompute_total_with_no_items_is_zero() {
        let mut purchase = Purchase::new(test_new_purchase()).unwrap();
        purchase.apply_grand_total(Decimal::new(1234, 2)).unwrap();
        let total = purchase.recompute_total(std::iter::empty()).unwrap();
        assert_eq!(total, Decimal::ZERO);
        assert_eq!(purchase.grand_total(), Decimal::ZERO);
    }

    #[test]
    fn recompute_total_sums_line_items() {
        let mut purchase = Purchase::new(test_new_purchase()).unwrap();
        let a = PurchaseLineItem::new(purchase.id_typed(), &test_package(999), 2).unwrap();
        let b = PurchaseLineItem::new(purchase.id_typed(), &test_package(500), 1).unwrap();
        assert_eq!(a.lineitem_total(), Decimal::new(1998, 2));

        let total = purchase.recompute_total([&a, &b]).unwrap();
        assert_eq!(total, Decimal::new(2498, 2));
    }

    #[test]
    fn recompute_total_rejects_foreign_items() {
        let mut purchase = Purchase::new(test_new_purchase()).unwrap();
        let other = PurchaseLineItem::new(PurchaseId::new(), &test_package(100), 1).unwrap();
        let err = purchase.recompute_total([&other]).unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn record_round_trip_preserves_identity_and_date() {
        let mut purchase = Purchase::new(test_new_purchase()).unwrap();
        purchase.ensure_purchase_number();
        let restored = Purchase::try_from(purchase.to_record()).unwrap();
        assert_eq!(restored, purchase);
    }

    #[test]
    fn record_with_malformed_number_is_rejected() {
        let purchase = Purchase::new(test_new_purchase()).unwrap();
        let mut record = purchase.to_record();
        record.purchase_number = "abc".to_string();
        assert!(Purchase::try_from(record).is_err());
    }

    #[test]
    fn serializes_grand_total_and_country() {
        let purchase = Purchase::new(test_new_purchase()).unwrap();
        let json = serde_json::to_value(purchase.to_record()).unwrap();
        assert_eq!(json["country"], "IE");
        assert_eq!(json["grand_total"], "0.00");
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: the grand total equals the sum of line totals in cents.
        #[test]
        fn grand_total_is_sum_of_lines(
            lines in prop::collection::vec((0i64..5_000i64, 0i32..2i32), 0..12)
        ) {
            let mut purchase = Purchase::new(test_new_purchase()).unwrap();
            let items: Vec<PurchaseLineItem> = lines
                .iter()
                .map(|(cents, qty)| {
                    PurchaseLineItem::new(purchase.id_typed(), &test_package(*cents), *qty).unwrap()
                })
                .collect();

            let expected: i64 = lines.iter().map(|(cents, qty)| cents * *qty as i64).sum();
            let total = purchase.recompute_total(&items).unwrap();
            prop_assert_eq!(total, Decimal::new(expected, 2));
        }
    }
}
