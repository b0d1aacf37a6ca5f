//! Order cycle persistence boundary.
//!
//! A synchronous store trait plus two implementations: an in-memory store for
//! tests/dev and a Postgres store for deployments.

mod integrity;

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryOrderCycleStore;
pub use postgres::PostgresOrderCycleStore;
pub use r#trait::{OrderCycleStore, StoreError};
