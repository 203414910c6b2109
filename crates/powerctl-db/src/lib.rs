//! Durable storage for topology mappings, transitions, tasks, and outbox
//! events. Ships two implementations of [`Store`]: a Postgres-backed
//! one for production and an in-memory one for tests that don't need a live
//! database.

pub mod error;
pub mod memory;
pub mod normalize;
pub mod postgres;
pub mod store_trait;

pub use error::StoreError;
pub use memory::InMemoryStore;
pub use postgres::PostgresStore;
pub use store_trait::{ReplaceCounts, ResolvedMappings, Store};
