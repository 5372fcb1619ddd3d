//! # Durandal Store
//!
//! `DocumentStore` implementations for the Durandal memory substrate.

pub mod in_memory;
pub mod sqlite;

pub use in_memory::InMemoryStore;
pub use sqlite::SqliteStore;
