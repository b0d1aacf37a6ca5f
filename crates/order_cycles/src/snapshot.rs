//! Committed, immutable view of every order cycle, its exchanges and the
//! reference catalog. All read queries run against one `Snapshot`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use cyclekit_core::{ExchangeId, OrderCycleId};

use crate::catalog::Catalog;
use crate::distribution::Distribution;
use crate::exchange::Exchange;
use crate::order_cycle::OrderCycle;

/// An order cycle together with the exchanges it owns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCycleRecord {
    pub order_cycle: OrderCycle,
    pub exchanges: Vec<Exchange>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    order_cycles: BTreeMap<OrderCycleId, OrderCycle>,
    /// Exchanges grouped by owning cycle, in insertion order.
    exchanges: BTreeMap<OrderCycleId, Vec<Exchange>>,
    catalog: Catalog,
}

impl Snapshot {
    pub fn new(catalog: Catalog) -> Self {
        Self {
            catalog,
            ..Self::default()
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn catalog_mut(&mut self) -> &mut Catalog {
        &mut self.catalog
    }

    /// All order cycles, ordered by id.
    pub fn order_cycles(&self) -> impl Iterator<Item = &OrderCycle> {
        self.order_cycles.values()
    }

    pub fn order_cycle(&self, id: OrderCycleId) -> Option<&OrderCycle> {
        self.order_cycles.get(&id)
    }

    pub fn len(&self) -> usize {
        self.order_cycles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order_cycles.is_empty()
    }

    pub fn exchanges_of(&self, id: OrderCycleId) -> &[Exchange] {
        self.exchanges.get(&id).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn exchange(&self, id: ExchangeId) -> Option<&Exchange> {
        self.exchanges.values().flatten().find(|e| e.id == id)
    }

    /// The cycle plus copies of its exchanges, as returned to callers after a write.
    pub fn record(&self, id: OrderCycleId) -> Option<OrderCycleRecord> {
        let order_cycle = self.order_cycle(id)?.clone();
        Some(OrderCycleRecord {
            order_cycle,
            exchanges: self.exchanges_of(id).to_vec(),
        })
    }

    /// Distribution resolver bound to one order cycle.
    pub fn distribution(&self, id: OrderCycleId) -> Option<Distribution<'_>> {
        let order_cycle = self.order_cycle(id)?;
        Some(Distribution::new(order_cycle, self.exchanges_of(id), &self.catalog))
    }

    /// Insert or replace an order cycle. Its exchanges are left alone.
    pub fn put_order_cycle(&mut self, order_cycle: OrderCycle) -> Option<OrderCycle> {
        self.order_cycles.insert(order_cycle.id, order_cycle)
    }

    /// Remove an order cycle and every exchange it owns.
    pub fn remove_order_cycle(&mut self, id: OrderCycleId) -> Option<OrderCycleRecord> {
        let order_cycle = self.order_cycles.remove(&id)?;
        let exchanges = self.exchanges.remove(&id).unwrap_or_default();
        Some(OrderCycleRecord {
            order_cycle,
            exchanges,
        })
    }

    /// Append an exchange to its owning cycle's collection.
    ///
    /// The caller guarantees the owner exists.
    pub fn push_exchange(&mut self, exchange: Exchange) {
        self.exchanges
            .entry(exchange.order_cycle_id)
            .or_default()
            .push(exchange);
    }

    pub fn remove_exchange(&mut self, id: ExchangeId) -> Option<Exchange> {
        for exchanges in self.exchanges.values_mut() {
            if let Some(pos) = exchanges.iter().position(|e| e.id == id) {
                return Some(exchanges.remove(pos));
            }
        }
        None
    }
}
