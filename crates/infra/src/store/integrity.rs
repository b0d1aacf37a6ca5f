//! Referential checks shared by the store implementations that cannot lean
//! on database foreign keys.

use cyclekit_order_cycles::{Catalog, NewExchange, OrderCycle};

use super::StoreError;

pub(crate) fn check_order_cycle(catalog: &Catalog, order_cycle: &OrderCycle) -> Result<(), StoreError> {
    if catalog.enterprise(order_cycle.coordinator_id).is_none() {
        return Err(StoreError::Constraint(format!(
            "coordinator {} is not a known enterprise",
            order_cycle.coordinator_id
        )));
    }
    if let Some(fee) = order_cycle
        .coordinator_fee_ids
        .iter()
        .find(|id| catalog.fee(**id).is_none())
    {
        return Err(StoreError::Constraint(format!("enterprise fee {fee} does not exist")));
    }
    Ok(())
}

pub(crate) fn check_exchange(catalog: &Catalog, exchange: &NewExchange) -> Result<(), StoreError> {
    for enterprise in [exchange.sender_id, exchange.receiver_id] {
        if catalog.enterprise(enterprise).is_none() {
            return Err(StoreError::Constraint(format!(
                "exchange party {enterprise} is not a known enterprise"
            )));
        }
    }
    // Soft-deleted variants may stay linked; unknown ones may not.
    if let Some(variant) = exchange
        .variant_ids
        .iter()
        .find(|id| catalog.variant(**id).is_none())
    {
        return Err(StoreError::Constraint(format!("variant {variant} does not exist")));
    }
    Ok(())
}
