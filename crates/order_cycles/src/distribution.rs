//! Distribution resolver: who supplies and receives goods in one order cycle,
//! and which variants and products each distributor may sell.
//!
//! Every enumeration of variants filters soft-deleted variants explicitly.
//! Results preserve exchange order and are deduplicated by identity.

use std::collections::BTreeSet;

use cyclekit_core::entity::distinct_by_id;
use cyclekit_core::{EnterpriseId, VariantId};

use crate::catalog::{Catalog, Enterprise, Order, Product, Variant};
use crate::exchange::Exchange;
use crate::order_cycle::OrderCycle;

/// Resolver bound to one order cycle, its exchanges and the catalog.
#[derive(Debug, Clone, Copy)]
pub struct Distribution<'a> {
    order_cycle: &'a OrderCycle,
    exchanges: &'a [Exchange],
    catalog: &'a Catalog,
}

impl<'a> Distribution<'a> {
    pub fn new(order_cycle: &'a OrderCycle, exchanges: &'a [Exchange], catalog: &'a Catalog) -> Self {
        Self {
            order_cycle,
            exchanges,
            catalog,
        }
    }

    pub fn order_cycle(&self) -> &'a OrderCycle {
        self.order_cycle
    }

    pub fn exchanges(&self) -> &'a [Exchange] {
        self.exchanges
    }

    fn incoming(&self) -> impl Iterator<Item = &'a Exchange> + 'a {
        self.exchanges.iter().filter(|e| e.is_incoming())
    }

    fn outgoing(&self) -> impl Iterator<Item = &'a Exchange> + 'a {
        self.exchanges.iter().filter(|e| e.is_outgoing())
    }

    fn enterprises(&self, ids: impl Iterator<Item = EnterpriseId>) -> Vec<&'a Enterprise> {
        let catalog = self.catalog;
        distinct_by_id(ids.filter_map(|id| catalog.enterprise(id)))
    }

    fn live_variants(&self, exchanges: impl Iterator<Item = &'a Exchange>) -> Vec<&'a Variant> {
        let catalog = self.catalog;
        distinct_by_id(
            exchanges
                .flat_map(|e| e.variant_ids.iter())
                .filter_map(|id| catalog.live_variant(*id)),
        )
    }

    fn parent_products(&self, variants: &[&'a Variant]) -> Vec<&'a Product> {
        let catalog = self.catalog;
        distinct_by_id(variants.iter().filter_map(|v| catalog.product(v.product_id)))
    }

    /// Senders of incoming exchanges.
    pub fn suppliers(&self) -> Vec<&'a Enterprise> {
        self.enterprises(self.incoming().map(|e| e.sender_id))
    }

    /// Receivers of outgoing exchanges.
    pub fn distributors(&self) -> Vec<&'a Enterprise> {
        self.enterprises(self.outgoing().map(|e| e.receiver_id))
    }

    /// Every live variant on any exchange of the cycle.
    pub fn variants(&self) -> Vec<&'a Variant> {
        self.live_variants(self.exchanges.iter())
    }

    /// Live variants on outgoing exchanges only.
    pub fn distributed_variants(&self) -> Vec<&'a Variant> {
        self.live_variants(self.outgoing())
    }

    /// Live variants on the outgoing exchanges received by `distributor`.
    pub fn variants_distributed_by(&self, distributor: EnterpriseId) -> Vec<&'a Variant> {
        self.live_variants(self.outgoing().filter(move |e| e.receiver_id == distributor))
    }

    /// Parent products of every live variant in the cycle.
    pub fn products(&self) -> Vec<&'a Product> {
        self.parent_products(&self.variants())
    }

    pub fn products_distributed_by(&self, distributor: EnterpriseId) -> Vec<&'a Product> {
        self.parent_products(&self.variants_distributed_by(distributor))
    }

    /// `products_distributed_by` without products whose only presence is an
    /// obsolete master.
    ///
    /// A product that was added while it had only its master, and later gained
    /// real variants that were never linked into this distribution, must not
    /// stay purchasable through the stale master.
    pub fn valid_products_distributed_by(&self, distributor: EnterpriseId) -> Vec<&'a Product> {
        let variants = self.variants_distributed_by(distributor);
        let distributed: BTreeSet<VariantId> = variants.iter().map(|v| v.id).collect();

        self.parent_products(&variants)
            .into_iter()
            .filter(|p| !self.has_only_obsolete_master(p, &distributed))
            .collect()
    }

    fn has_only_obsolete_master(&self, product: &Product, distributed: &BTreeSet<VariantId>) -> bool {
        self.catalog.has_variants(product)
            && distributed.contains(&product.master_id)
            && !product.variant_ids.iter().any(|id| distributed.contains(id))
    }

    pub fn has_distributor(&self, distributor: EnterpriseId) -> bool {
        self.outgoing().any(|e| e.receiver_id == distributor)
    }

    pub fn has_variant(&self, variant: VariantId) -> bool {
        self.variants().iter().any(|v| v.id == variant)
    }

    /// First outgoing exchange received by `distributor`.
    pub fn exchange_for_distributor(&self, distributor: EnterpriseId) -> Option<&'a Exchange> {
        self.exchanges.iter().find(|e| e.distributes_to(distributor))
    }

    /// Pickup time on the distributor's exchange, falling back to the
    /// distributor's own collection schedule.
    pub fn pickup_time_for(&self, distributor: EnterpriseId) -> Option<&'a str> {
        self.exchange_for_distributor(distributor)
            .and_then(|e| e.pickup_time.as_deref())
            .or_else(|| {
                self.catalog
                    .enterprise(distributor)
                    .and_then(|d| d.next_collection_at.as_deref())
            })
    }

    pub fn pickup_instructions_for(&self, distributor: EnterpriseId) -> Option<&'a str> {
        self.exchange_for_distributor(distributor)
            .and_then(|e| e.pickup_instructions.as_deref())
    }

    /// Exchanges supplying `distributor` that carry `variant`.
    pub fn exchanges_carrying(&self, variant: VariantId, distributor: EnterpriseId) -> Vec<&'a Exchange> {
        self.exchanges
            .iter()
            .filter(|e| e.supplies(distributor) && e.carries(variant))
            .collect()
    }

    /// Exchanges supplying the order's distributor that carry any of its variants.
    pub fn exchanges_supplying(&self, order: &Order) -> Vec<&'a Exchange> {
        self.exchanges
            .iter()
            .filter(|e| e.supplies(order.distributor_id) && e.carries_any(&order.variant_ids))
            .collect()
    }
}
