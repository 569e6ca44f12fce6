//! # storage-adapters
//!
//! Implementations of the `domains` repository ports.
//! `MemoryStore` is always compiled; `SqliteStore` needs the `db-sqlite` feature.

pub mod memory;
#[cfg(feature = "db-sqlite")]
pub mod sqlite;

pub use memory::MemoryStore;
#[cfg(feature = "db-sqlite")]
pub use sqlite::SqliteStore;
