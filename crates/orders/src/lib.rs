//! Checkout orders module (purchases and their line items).
//!
//! This crate contains the business rules for completed checkouts, implemented
//! purely as deterministic domain logic (no IO, no HTTP, no storage). Storage
//! adapters in `checkout-infra` call into these types before every write.

pub mod country;
pub mod fields;
pub mod line_item;
pub mod purchase;

pub use country::CountryCode;
pub use line_item::{LineItemRecord, PurchaseLineItem, compute_line_total};
pub use purchase::{
    ContactDetails, NewPurchase, PURCHASE_NUMBER_LEN, Purchase, PurchaseRecord, ShippingAddress,
    generate_purchase_number, is_purchase_number,
};
