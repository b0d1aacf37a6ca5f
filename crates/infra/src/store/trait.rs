use std::sync::Arc;

use thiserror::Error;

use cyclekit_core::{DomainError, ExchangeId, OrderCycleId};
use cyclekit_order_cycles::{Exchange, NewExchange, OrderCycle, OrderCycleDraft, OrderCycleRecord, Snapshot};

/// Order cycle store operation error.
///
/// Infrastructure failures (integrity, connectivity) as opposed to the
/// deterministic domain failures carried in `Domain`.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Validation or lookup failure raised before anything was written.
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// A referential or uniqueness constraint rejected the write.
    #[error("constraint violated: {0}")]
    Constraint(String),

    #[error("storage failure: {0}")]
    Storage(String),
}

impl StoreError {
    pub fn not_found_cycle(id: OrderCycleId) -> Self {
        Self::Domain(DomainError::not_found("order cycle", id))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::Domain(DomainError::NotFound { .. }))
    }
}

/// Durable home of order cycles and their exchange graphs.
///
/// ## Reads
///
/// `snapshot()` hands out the latest committed state. Snapshots are immutable,
/// so any number of readers can run queries against them concurrently.
///
/// ## Writes
///
/// Every write is atomic. Multi-step writes (`delete_order_cycle`,
/// `clone_order_cycle`) either commit every step or none of them; a failed
/// write leaves the previous snapshot in place.
///
/// ## Integrity
///
/// Implementations must reject references to enterprises, fees or variants
/// the catalog does not know about (`StoreError::Constraint`).
pub trait OrderCycleStore: Send + Sync {
    fn snapshot(&self) -> Result<Arc<Snapshot>, StoreError>;

    /// One committed order cycle with its exchanges.
    ///
    /// Backends that can read a single cycle cheaply should override this.
    fn record(&self, id: OrderCycleId) -> Result<Option<OrderCycleRecord>, StoreError> {
        Ok(self.snapshot()?.record(id))
    }

    /// Validate and persist a new order cycle.
    fn create_order_cycle(&self, draft: OrderCycleDraft) -> Result<OrderCycle, StoreError>;

    /// Replace the scalar fields and fee set of an existing order cycle.
    fn update_order_cycle(&self, order_cycle: OrderCycle) -> Result<OrderCycle, StoreError>;

    /// Delete an order cycle together with every exchange it owns.
    fn delete_order_cycle(&self, id: OrderCycleId) -> Result<OrderCycleRecord, StoreError>;

    fn add_exchange(&self, order_cycle_id: OrderCycleId, exchange: NewExchange) -> Result<Exchange, StoreError>;

    fn remove_exchange(&self, id: ExchangeId) -> Result<Exchange, StoreError>;

    /// Duplicate an order cycle and its exchanges under a new, undated cycle.
    ///
    /// Returns the reloaded copy with its new exchanges.
    fn clone_order_cycle(&self, id: OrderCycleId) -> Result<OrderCycleRecord, StoreError>;
}

impl<S> OrderCycleStore for Arc<S>
where
    S: OrderCycleStore + ?Sized,
{
    fn snapshot(&self) -> Result<Arc<Snapshot>, StoreError> {
        (**self).snapshot()
    }

    fn record(&self, id: OrderCycleId) -> Result<Option<OrderCycleRecord>, StoreError> {
        (**self).record(id)
    }

    fn create_order_cycle(&self, draft: OrderCycleDraft) -> Result<OrderCycle, StoreError> {
        (**self).create_order_cycle(draft)
    }

    fn update_order_cycle(&self, order_cycle: OrderCycle) -> Result<OrderCycle, StoreError> {
        (**self).update_order_cycle(order_cycle)
    }

    fn delete_order_cycle(&self, id: OrderCycleId) -> Result<OrderCycleRecord, StoreError> {
        (**self).delete_order_cycle(id)
    }

    fn add_exchange(&self, order_cycle_id: OrderCycleId, exchange: NewExchange) -> Result<Exchange, StoreError> {
        (**self).add_exchange(order_cycle_id, exchange)
    }

    fn remove_exchange(&self, id: ExchangeId) -> Result<Exchange, StoreError> {
        (**self).remove_exchange(id)
    }

    fn clone_order_cycle(&self, id: OrderCycleId) -> Result<OrderCycleRecord, StoreError> {
        (**self).clone_order_cycle(id)
    }
}
