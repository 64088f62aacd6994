//! # Depot Store
//!
//! Document store contract for Depot collections.
//!
//! This crate provides:
//! - [`Document`] and [`Query`] value types (thin wrappers over JSON maps)
//! - The [`Store`] trait consumed by the collection pipeline
//! - [`MemoryStore`] for tests and ephemeral data
//! - [`FileStore`] for JSON-file persistence

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod document;
mod error;
mod file;
mod memory;
mod store;

pub use document::{Document, Query, ID_KEY};
pub use error::{StoreError, StoreResult};
pub use file::FileStore;
pub use memory::MemoryStore;
pub use store::Store;
