//! Infrastructure layer: checkout persistence, configuration and orchestration.

pub mod config;
pub mod error;
pub mod service;
pub mod store;

pub use config::StoreConfig;
pub use error::StoreError;
pub use service::CheckoutService;
pub use store::{CheckoutStore, InMemoryCheckoutStore, PostgresCheckoutStore};

#[cfg(test)]
mod integration_tests;
