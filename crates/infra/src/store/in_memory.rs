use std::sync::{Arc, RwLock};

use tracing::{debug, instrument};

use cyclekit_core::{DomainError, ExchangeId, OrderCycleId};
use cyclekit_order_cycles::{Catalog, Exchange, NewExchange, OrderCycle, OrderCycleDraft, OrderCycleRecord, Snapshot};

use super::integrity::{check_exchange, check_order_cycle};
use super::r#trait::{OrderCycleStore, StoreError};

/// In-memory order cycle store.
///
/// Writers stage their changes on a private copy of the current snapshot and
/// swap it in only when every step succeeded, so readers never observe a
/// half-applied write. Intended for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryOrderCycleStore {
    current: RwLock<Arc<Snapshot>>,
}

impl InMemoryOrderCycleStore {
    pub fn new(catalog: Catalog) -> Self {
        Self::from_snapshot(Snapshot::new(catalog))
    }

    /// Seed the store with previously loaded state (e.g. from Postgres).
    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        Self {
            current: RwLock::new(Arc::new(snapshot)),
        }
    }

    /// Apply a change to the reference catalog.
    pub fn update_catalog(&self, change: impl FnOnce(&mut Catalog)) -> Result<(), StoreError> {
        self.transaction(|staged| {
            change(staged.catalog_mut());
            Ok(())
        })
    }

    fn transaction<T>(&self, op: impl FnOnce(&mut Snapshot) -> Result<T, StoreError>) -> Result<T, StoreError> {
        let mut current = self
            .current
            .write()
            .map_err(|_| StoreError::Storage("lock poisoned".to_string()))?;

        let mut staged = Snapshot::clone(&current);
        let out = op(&mut staged)?;
        *current = Arc::new(staged);
        Ok(out)
    }
}

/// Copy `id` and its exchanges inside a staged snapshot.
fn clone_within(staged: &mut Snapshot, id: OrderCycleId) -> Result<OrderCycleRecord, StoreError> {
    let source = staged
        .record(id)
        .ok_or_else(|| StoreError::not_found_cycle(id))?;

    let copy = source.order_cycle.duplicate().into_order_cycle(OrderCycleId::new())?;
    check_order_cycle(staged.catalog(), &copy)?;
    let copy_id = copy.id;
    staged.put_order_cycle(copy);

    for exchange in &source.exchanges {
        let new = exchange.to_new();
        check_exchange(staged.catalog(), &new)?;
        staged.push_exchange(Exchange::from_new(ExchangeId::new(), copy_id, new));
    }

    staged
        .record(copy_id)
        .ok_or_else(|| StoreError::Storage(format!("order cycle {copy_id} vanished while cloning")))
}

impl OrderCycleStore for InMemoryOrderCycleStore {
    fn snapshot(&self) -> Result<Arc<Snapshot>, StoreError> {
        let current = self
            .current
            .read()
            .map_err(|_| StoreError::Storage("lock poisoned".to_string()))?;
        Ok(Arc::clone(&current))
    }

    #[instrument(skip(self, draft), fields(name = %draft.name), err)]
    fn create_order_cycle(&self, draft: OrderCycleDraft) -> Result<OrderCycle, StoreError> {
        let order_cycle = draft.into_order_cycle(OrderCycleId::new())?;
        self.transaction(|staged| {
            check_order_cycle(staged.catalog(), &order_cycle)?;
            staged.put_order_cycle(order_cycle.clone());
            Ok(order_cycle)
        })
    }

    #[instrument(skip(self, order_cycle), fields(order_cycle_id = %order_cycle.id), err)]
    fn update_order_cycle(&self, order_cycle: OrderCycle) -> Result<OrderCycle, StoreError> {
        order_cycle.validate()?;
        self.transaction(|staged| {
            if staged.order_cycle(order_cycle.id).is_none() {
                return Err(StoreError::not_found_cycle(order_cycle.id));
            }
            check_order_cycle(staged.catalog(), &order_cycle)?;
            staged.put_order_cycle(order_cycle.clone());
            Ok(order_cycle)
        })
    }

    #[instrument(skip(self), err)]
    fn delete_order_cycle(&self, id: OrderCycleId) -> Result<OrderCycleRecord, StoreError> {
        let removed = self.transaction(|staged| {
            staged
                .remove_order_cycle(id)
                .ok_or_else(|| StoreError::not_found_cycle(id))
        })?;
        debug!(exchanges = removed.exchanges.len(), "order cycle deleted");
        Ok(removed)
    }

    #[instrument(skip(self, exchange), fields(direction = ?exchange.direction), err)]
    fn add_exchange(&self, order_cycle_id: OrderCycleId, exchange: NewExchange) -> Result<Exchange, StoreError> {
        self.transaction(|staged| {
            if staged.order_cycle(order_cycle_id).is_none() {
                return Err(StoreError::not_found_cycle(order_cycle_id));
            }
            check_exchange(staged.catalog(), &exchange)?;
            let exchange = Exchange::from_new(ExchangeId::new(), order_cycle_id, exchange);
            staged.push_exchange(exchange.clone());
            Ok(exchange)
        })
    }

    #[instrument(skip(self), err)]
    fn remove_exchange(&self, id: ExchangeId) -> Result<Exchange, StoreError> {
        self.transaction(|staged| {
            staged
                .remove_exchange(id)
                .ok_or_else(|| StoreError::Domain(DomainError::not_found("exchange", id)))
        })
    }

    #[instrument(skip(self), err)]
    fn clone_order_cycle(&self, id: OrderCycleId) -> Result<OrderCycleRecord, StoreError> {
        let copy = self.transaction(|staged| clone_within(staged, id))?;
        debug!(
            copy_id = %copy.order_cycle.id,
            exchanges = copy.exchanges.len(),
            "order cycle cloned"
        );
        Ok(copy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cyclekit_core::{EnterpriseFeeId, EnterpriseId};
    use cyclekit_order_cycles::{Enterprise, EnterpriseFee};

    fn store_with_coordinator() -> (InMemoryOrderCycleStore, EnterpriseId) {
        let coordinator = EnterpriseId::new();
        let mut catalog = Catalog::new();
        catalog.insert_enterprise(Enterprise::new(coordinator, "Hub"));
        (InMemoryOrderCycleStore::new(catalog), coordinator)
    }

    #[test]
    fn create_then_snapshot_sees_cycle() {
        let (store, coordinator) = store_with_coordinator();
        let oc = store
            .create_order_cycle(OrderCycleDraft::new("Week 1", coordinator))
            .unwrap();

        let snapshot = store.snapshot().unwrap();
        assert_eq!(snapshot.order_cycle(oc.id), Some(&oc));
    }

    #[test]
    fn old_snapshots_are_not_affected_by_later_writes() {
        let (store, coordinator) = store_with_coordinator();
        let before = store.snapshot().unwrap();
        store
            .create_order_cycle(OrderCycleDraft::new("Week 1", coordinator))
            .unwrap();

        assert!(before.is_empty());
        assert_eq!(store.snapshot().unwrap().len(), 1);
    }

    #[test]
    fn unknown_coordinator_is_a_constraint_violation() {
        let (store, _) = store_with_coordinator();
        let err = store
            .create_order_cycle(OrderCycleDraft::new("Week 1", EnterpriseId::new()))
            .unwrap_err();

        assert!(matches!(err, StoreError::Constraint(_)));
        assert!(store.snapshot().unwrap().is_empty());
    }

    #[test]
    fn unknown_fee_is_rejected() {
        let (store, coordinator) = store_with_coordinator();
        let err = store
            .create_order_cycle(OrderCycleDraft::new("Week 1", coordinator).with_fees([EnterpriseFeeId::new()]))
            .unwrap_err();
        assert!(matches!(err, StoreError::Constraint(_)));
    }

    #[test]
    fn update_of_missing_cycle_is_not_found() {
        let (store, coordinator) = store_with_coordinator();
        let ghost = OrderCycleDraft::new("Ghost", coordinator)
            .into_order_cycle(OrderCycleId::new())
            .unwrap();

        let err = store.update_order_cycle(ghost).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn update_keeps_exchanges() {
        let (store, coordinator) = store_with_coordinator();
        let mut oc = store
            .create_order_cycle(OrderCycleDraft::new("Week 1", coordinator))
            .unwrap();
        store
            .add_exchange(oc.id, NewExchange::outgoing(coordinator, coordinator))
            .unwrap();

        oc.name = "Week 1 (renamed)".to_string();
        store.update_order_cycle(oc.clone()).unwrap();

        let snapshot = store.snapshot().unwrap();
        assert_eq!(snapshot.order_cycle(oc.id).unwrap().name, "Week 1 (renamed)");
        assert_eq!(snapshot.exchanges_of(oc.id).len(), 1);
    }

    #[test]
    fn remove_exchange_detaches_it() {
        let (store, coordinator) = store_with_coordinator();
        let oc = store
            .create_order_cycle(OrderCycleDraft::new("Week 1", coordinator))
            .unwrap();
        let exchange = store
            .add_exchange(oc.id, NewExchange::outgoing(coordinator, coordinator))
            .unwrap();

        assert_eq!(store.remove_exchange(exchange.id).unwrap(), exchange);
        assert!(store.snapshot().unwrap().exchanges_of(oc.id).is_empty());
        assert!(store.remove_exchange(exchange.id).unwrap_err().is_not_found());
    }

    #[test]
    fn clone_fails_atomically_when_a_fee_is_retired() {
        let (store, coordinator) = store_with_coordinator();
        let fee = EnterpriseFeeId::new();
        store
            .update_catalog(|catalog| {
                catalog.insert_fee(EnterpriseFee {
                    id: fee,
                    enterprise_id: coordinator,
                    name: "Packing".to_string(),
                })
            })
            .unwrap();
        let oc = store
            .create_order_cycle(OrderCycleDraft::new("Week 1", coordinator).with_fees([fee]))
            .unwrap();
        store
            .update_catalog(|catalog| {
                catalog.remove_fee(fee);
            })
            .unwrap();

        let before = store.snapshot().unwrap();
        assert!(matches!(store.clone_order_cycle(oc.id), Err(StoreError::Constraint(_))));
        assert_eq!(*store.snapshot().unwrap(), *before);
    }
}
