//! Catalog collaborator module.
//!
//! The catalog subsystem owns packages; checkout only needs the identity, SKU
//! and unit price of whatever is being bought. This crate models exactly that
//! shape and nothing more.

pub mod package;

pub use package::Package;
