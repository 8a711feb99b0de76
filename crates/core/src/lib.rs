//! `checkout-core` — domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod entity;
pub mod error;
pub mod id;
pub mod money;

pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::{LineItemId, PackageId, PurchaseId, UserAccountId};

pub use rust_decimal::Decimal;
