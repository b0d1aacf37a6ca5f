//! Order cycle domain (pure).
//!
//! Scheduling windows, the exchange graph between enterprises, distribution
//! and access resolution. Deterministic logic only: no IO, no storage, no
//! clock reads. Callers pass `now` explicitly.

pub mod access;
pub mod catalog;
pub mod distribution;
pub mod exchange;
pub mod order_cycle;
pub mod scope;
pub mod snapshot;

pub use catalog::{Catalog, Enterprise, EnterpriseFee, Order, Product, Variant};
pub use distribution::Distribution;
pub use exchange::{Exchange, ExchangeDirection, NewExchange};
pub use order_cycle::{OrderCycle, OrderCycleDraft, COPY_PREFIX};
pub use scope::{
    first_closing_for, first_opening_for, most_recently_closed_for, CycleFilter, CycleOrdering, CycleQuery,
    RECENTLY_CLOSED_DAYS,
};
pub use snapshot::{OrderCycleRecord, Snapshot};
