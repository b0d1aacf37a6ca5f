//! Access scope resolver: which order cycles an actor may see or manage.
//!
//! Resolution is always two steps. First the actor's `EnterpriseScope` is
//! computed (everything for admins, the managed set otherwise); then each
//! cycle's coordinator and each exchange's sender and receiver are tested for
//! membership. Cycles without exchanges are still matched on their
//! coordinator.

use std::collections::BTreeSet;

use cyclekit_auth::{EnterpriseScope, Principal};
use cyclekit_core::OrderCycleId;

use crate::exchange::{Exchange, ExchangeDirection};
use crate::order_cycle::OrderCycle;
use crate::snapshot::Snapshot;

/// Coordinator is within scope.
pub fn is_managed(order_cycle: &OrderCycle, scope: &EnterpriseScope) -> bool {
    scope.contains(order_cycle.coordinator_id)
}

/// Coordinator, or any sender or receiver, is within scope.
pub fn is_accessible(order_cycle: &OrderCycle, exchanges: &[Exchange], scope: &EnterpriseScope) -> bool {
    scope.is_unrestricted()
        || is_managed(order_cycle, scope)
        || exchanges
            .iter()
            .any(|e| scope.contains(e.sender_id) || scope.contains(e.receiver_id))
}

/// Some exchange of `direction` has a sender or receiver within scope.
///
/// Admins have every enterprise in scope, so for them this only asks whether
/// such an exchange exists at all.
pub fn involves(exchanges: &[Exchange], direction: ExchangeDirection, scope: &EnterpriseScope) -> bool {
    exchanges
        .iter()
        .filter(|e| e.direction == direction)
        .any(|e| scope.contains(e.sender_id) || scope.contains(e.receiver_id))
}

/// Every cycle for admins, otherwise those coordinated by a managed enterprise.
pub fn managed_by<'a>(snapshot: &'a Snapshot, principal: &Principal) -> Vec<&'a OrderCycle> {
    let scope = principal.enterprise_scope();
    snapshot
        .order_cycles()
        .filter(|oc| is_managed(oc, &scope))
        .collect()
}

/// Every cycle for admins, otherwise the distinct union of cycles the actor
/// coordinates, sends into or receives from.
pub fn accessible_by<'a>(snapshot: &'a Snapshot, principal: &Principal) -> Vec<&'a OrderCycle> {
    let scope = principal.enterprise_scope();
    if scope.is_unrestricted() {
        return snapshot.order_cycles().collect();
    }

    let mut ids: BTreeSet<OrderCycleId> = snapshot
        .order_cycles()
        .filter(|oc| is_managed(oc, &scope))
        .map(|oc| oc.id)
        .collect();

    for oc in snapshot.order_cycles() {
        if snapshot
            .exchanges_of(oc.id)
            .iter()
            .any(|e| scope.contains(e.sender_id) || scope.contains(e.receiver_id))
        {
            ids.insert(oc.id);
        }
    }

    ids.into_iter()
        .filter_map(|id| snapshot.order_cycle(id))
        .collect()
}

/// Cycles where a managed enterprise sits at either end of an outgoing exchange.
pub fn involving_managed_distributors_of<'a>(snapshot: &'a Snapshot, principal: &Principal) -> Vec<&'a OrderCycle> {
    involving(snapshot, principal, ExchangeDirection::Outgoing)
}

/// Cycles where a managed enterprise sits at either end of an incoming exchange.
pub fn involving_managed_producers_of<'a>(snapshot: &'a Snapshot, principal: &Principal) -> Vec<&'a OrderCycle> {
    involving(snapshot, principal, ExchangeDirection::Incoming)
}

fn involving<'a>(snapshot: &'a Snapshot, principal: &Principal, direction: ExchangeDirection) -> Vec<&'a OrderCycle> {
    let scope = principal.enterprise_scope();
    snapshot
        .order_cycles()
        .filter(|oc| involves(snapshot.exchanges_of(oc.id), direction, &scope))
        .collect()
}
