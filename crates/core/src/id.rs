//! Strongly-typed identifiers.
//!
//! Every record the engine owns or references gets its own newtype so an
//! enterprise id can never be passed where a variant id is expected.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $t:ident, $name:literal) => {
        $(#[$meta])*
        #[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $t(Uuid);

        impl $t {
            /// Create a new identifier.
            ///
            /// Uses UUIDv7, so ids minted later sort later.
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $t {
            fn default() -> Self {
                Self::new()
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<Uuid> for $t {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }

        impl From<$t> for Uuid {
            fn from(value: $t) -> Self {
                value.0
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let uuid = Uuid::from_str(s)
                    .map_err(|e| DomainError::invalid_id(format!("{}: {}", $name, e)))?;
                Ok(Self(uuid))
            }
        }
    };
}

uuid_id!(
    /// Identifier of an order cycle.
    OrderCycleId,
    "OrderCycleId"
);
uuid_id!(
    /// Identifier of an exchange (one directed link inside an order cycle).
    ExchangeId,
    "ExchangeId"
);
uuid_id!(
    /// Identifier of an enterprise (coordinator, supplier or distributor).
    EnterpriseId,
    "EnterpriseId"
);
uuid_id!(
    /// Identifier of a product variant.
    VariantId,
    "VariantId"
);
uuid_id!(ProductId, "ProductId");
uuid_id!(EnterpriseFeeId, "EnterpriseFeeId");
uuid_id!(
    /// Identifier of a user acting on the engine.
    UserId,
    "UserId"
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_rejects_garbage_with_type_name() {
        let err = "not-a-uuid".parse::<EnterpriseId>().unwrap_err();
        match err {
            DomainError::InvalidId(msg) => assert!(msg.starts_with("EnterpriseId")),
            other => panic!("expected InvalidId, got {other:?}"),
        }
    }

    #[test]
    fn display_and_parse_agree() {
        let id = OrderCycleId::new();
        let parsed: OrderCycleId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn ids_serialize_as_bare_uuid_strings() {
        let id = VariantId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id.as_uuid()));
    }
}
