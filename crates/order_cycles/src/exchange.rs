//! The exchange graph: directed enterprise-to-enterprise links inside an
//! order cycle, each carrying a set of tradeable variants.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use cyclekit_core::{Entity, EnterpriseId, ExchangeId, OrderCycleId, VariantId};

/// Direction of an exchange relative to the order cycle's coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeDirection {
    /// A supplier delivers into the coordinator.
    Incoming,
    /// A distributor takes goods from the coordinator.
    Outgoing,
}

impl ExchangeDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeDirection::Incoming => "incoming",
            ExchangeDirection::Outgoing => "outgoing",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "incoming" => Some(ExchangeDirection::Incoming),
            "outgoing" => Some(ExchangeDirection::Outgoing),
            _ => None,
        }
    }
}

/// A directed link between two enterprises within one order cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exchange {
    pub id: ExchangeId,
    pub order_cycle_id: OrderCycleId,
    pub sender_id: EnterpriseId,
    pub receiver_id: EnterpriseId,
    pub direction: ExchangeDirection,
    pub variant_ids: BTreeSet<VariantId>,
    /// Only meaningful on outgoing exchanges.
    pub pickup_time: Option<String>,
    pub pickup_instructions: Option<String>,
}

impl Exchange {
    /// Materialize a new exchange owned by `order_cycle_id`.
    pub fn from_new(id: ExchangeId, order_cycle_id: OrderCycleId, new: NewExchange) -> Self {
        Self {
            id,
            order_cycle_id,
            sender_id: new.sender_id,
            receiver_id: new.receiver_id,
            direction: new.direction,
            variant_ids: new.variant_ids,
            pickup_time: new.pickup_time,
            pickup_instructions: new.pickup_instructions,
        }
    }

    pub fn is_incoming(&self) -> bool {
        self.direction == ExchangeDirection::Incoming
    }

    pub fn is_outgoing(&self) -> bool {
        self.direction == ExchangeDirection::Outgoing
    }

    /// Outgoing exchange whose receiver is `distributor`.
    pub fn distributes_to(&self, distributor: EnterpriseId) -> bool {
        self.is_outgoing() && self.receiver_id == distributor
    }

    /// Whether goods on this link can end up at `distributor`.
    ///
    /// Every incoming exchange feeds the coordinator and therefore every
    /// distributor; an outgoing exchange only feeds its own receiver.
    pub fn supplies(&self, distributor: EnterpriseId) -> bool {
        self.is_incoming() || self.receiver_id == distributor
    }

    /// Sender or receiver is `enterprise`.
    pub fn involves(&self, enterprise: EnterpriseId) -> bool {
        self.sender_id == enterprise || self.receiver_id == enterprise
    }

    pub fn carries(&self, variant: VariantId) -> bool {
        self.variant_ids.contains(&variant)
    }

    pub fn carries_any<'a>(&self, variants: impl IntoIterator<Item = &'a VariantId>) -> bool {
        variants.into_iter().any(|v| self.carries(*v))
    }

    /// Everything needed to recreate this link under another order cycle.
    pub fn to_new(&self) -> NewExchange {
        NewExchange {
            sender_id: self.sender_id,
            receiver_id: self.receiver_id,
            direction: self.direction,
            variant_ids: self.variant_ids.clone(),
            pickup_time: self.pickup_time.clone(),
            pickup_instructions: self.pickup_instructions.clone(),
        }
    }
}

impl Entity for Exchange {
    type Id = ExchangeId;

    fn id(&self) -> ExchangeId {
        self.id
    }
}

/// An exchange that has not been attached to an order cycle yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewExchange {
    pub sender_id: EnterpriseId,
    pub receiver_id: EnterpriseId,
    pub direction: ExchangeDirection,
    pub variant_ids: BTreeSet<VariantId>,
    pub pickup_time: Option<String>,
    pub pickup_instructions: Option<String>,
}

impl NewExchange {
    /// Supplier `sender` delivering into `coordinator`.
    pub fn incoming(sender: EnterpriseId, coordinator: EnterpriseId) -> Self {
        Self {
            sender_id: sender,
            receiver_id: coordinator,
            direction: ExchangeDirection::Incoming,
            variant_ids: BTreeSet::new(),
            pickup_time: None,
            pickup_instructions: None,
        }
    }

    /// `coordinator` handing goods to distributor `receiver`.
    pub fn outgoing(coordinator: EnterpriseId, receiver: EnterpriseId) -> Self {
        Self {
            direction: ExchangeDirection::Outgoing,
            ..Self::incoming(coordinator, receiver)
        }
    }

    pub fn with_variants(mut self, variants: impl IntoIterator<Item = VariantId>) -> Self {
        self.variant_ids.extend(variants);
        self
    }

    pub fn with_pickup(mut self, time: impl Into<String>, instructions: Option<String>) -> Self {
        self.pickup_time = Some(time.into());
        self.pickup_instructions = instructions;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outgoing_to(receiver: EnterpriseId) -> Exchange {
        let coordinator = EnterpriseId::new();
        Exchange::from_new(
            ExchangeId::new(),
            OrderCycleId::new(),
            NewExchange::outgoing(coordinator, receiver),
        )
    }

    #[test]
    fn outgoing_builder_keeps_sender_and_receiver() {
        let coordinator = EnterpriseId::new();
        let shop = EnterpriseId::new();
        let new = NewExchange::outgoing(coordinator, shop);
        assert_eq!(new.sender_id, coordinator);
        assert_eq!(new.receiver_id, shop);
        assert_eq!(new.direction, ExchangeDirection::Outgoing);
    }

    #[test]
    fn outgoing_exchange_supplies_only_its_receiver() {
        let shop = EnterpriseId::new();
        let exchange = outgoing_to(shop);
        assert!(exchange.distributes_to(shop));
        assert!(exchange.supplies(shop));
        assert!(!exchange.supplies(EnterpriseId::new()));
    }

    #[test]
    fn incoming_exchange_supplies_every_distributor() {
        let farm = EnterpriseId::new();
        let hub = EnterpriseId::new();
        let exchange = Exchange::from_new(
            ExchangeId::new(),
            OrderCycleId::new(),
            NewExchange::incoming(farm, hub),
        );
        assert!(exchange.supplies(EnterpriseId::new()));
        assert!(!exchange.distributes_to(hub));
        assert!(exchange.involves(farm));
        assert!(exchange.involves(hub));
    }

    #[test]
    fn to_new_preserves_everything_but_ownership() {
        let variant = VariantId::new();
        let mut exchange = outgoing_to(EnterpriseId::new());
        exchange.variant_ids.insert(variant);
        exchange.pickup_time = Some("Friday 5pm".into());
        exchange.pickup_instructions = Some("Back door".into());

        let copy = Exchange::from_new(ExchangeId::new(), OrderCycleId::new(), exchange.to_new());
        assert_eq!(copy.sender_id, exchange.sender_id);
        assert_eq!(copy.receiver_id, exchange.receiver_id);
        assert_eq!(copy.direction, exchange.direction);
        assert_eq!(copy.variant_ids, exchange.variant_ids);
        assert_eq!(copy.pickup_time, exchange.pickup_time);
        assert_eq!(copy.pickup_instructions, exchange.pickup_instructions);
        assert_ne!(copy.id, exchange.id);
    }

    #[test]
    fn direction_serializes_lowercase() {
        let json = serde_json::to_string(&ExchangeDirection::Outgoing).unwrap();
        assert_eq!(json, "\"outgoing\"");
        assert_eq!(ExchangeDirection::parse(ExchangeDirection::Outgoing.as_str()), Some(ExchangeDirection::Outgoing));
        assert_eq!(ExchangeDirection::parse("sideways"), None);
    }

    #[test]
    fn carries_any_matches_one_of_many() {
        let wanted = VariantId::new();
        let mut exchange = outgoing_to(EnterpriseId::new());
        exchange.variant_ids.insert(wanted);
        assert!(exchange.carries_any(&[VariantId::new(), wanted]));
        assert!(!exchange.carries_any(&[VariantId::new()]));
    }
}
