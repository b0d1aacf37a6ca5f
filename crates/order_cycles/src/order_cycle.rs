//! Order cycles and their derived temporal status.
//!
//! Status is never stored. `undated`, `upcoming`, `open` and `closed` are
//! recomputed from the two timestamps and a caller-supplied `now` every time
//! they are asked for.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use cyclekit_core::{DomainError, DomainResult, Entity, EnterpriseFeeId, EnterpriseId, OrderCycleId};

/// Prefix given to the name of a cloned order cycle.
pub const COPY_PREFIX: &str = "COPY OF ";

/// A named, time-windowed trading round coordinated by one enterprise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCycle {
    pub id: OrderCycleId,
    pub name: String,
    pub coordinator_id: EnterpriseId,
    pub orders_open_at: Option<DateTime<Utc>>,
    pub orders_close_at: Option<DateTime<Utc>>,
    pub coordinator_fee_ids: BTreeSet<EnterpriseFeeId>,
}

impl OrderCycle {
    /// Both timestamps absent.
    pub fn is_undated(&self) -> bool {
        self.orders_open_at.is_none() && self.orders_close_at.is_none()
    }

    /// Opening lies strictly in the future.
    pub fn is_upcoming(&self, now: DateTime<Utc>) -> bool {
        self.orders_open_at.is_some_and(|open| now < open)
    }

    /// Strictly between opening and closing.
    ///
    /// A cycle with only one timestamp is never open.
    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        match (self.orders_open_at, self.orders_close_at) {
            (Some(open), Some(close)) => open < now && now < close,
            _ => false,
        }
    }

    /// Closing lies strictly in the past.
    pub fn is_closed(&self, now: DateTime<Utc>) -> bool {
        self.orders_close_at.is_some_and(|close| now > close)
    }

    /// `open_at <= now <= close_at`. Inclusive at both ends, unlike `is_open`.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        match (self.orders_open_at, self.orders_close_at) {
            (Some(open), Some(close)) => open <= now && now <= close,
            _ => false,
        }
    }

    /// Opened at some point up to and including `now`.
    pub fn is_active_or_complete(&self, now: DateTime<Utc>) -> bool {
        self.orders_open_at.is_some_and(|open| open <= now)
    }

    /// Not yet open, or already closed.
    pub fn is_inactive(&self, now: DateTime<Utc>) -> bool {
        self.is_upcoming(now) || self.is_closed(now)
    }

    /// Re-validate an edited cycle before it is written back.
    pub fn validate(&self) -> DomainResult<()> {
        validate_name(&self.name)
    }

    /// The draft a clone of this cycle starts from: renamed, undated, same
    /// coordinator and fees.
    pub fn duplicate(&self) -> OrderCycleDraft {
        OrderCycleDraft {
            name: format!("{COPY_PREFIX}{}", self.name),
            coordinator_id: Some(self.coordinator_id),
            orders_open_at: None,
            orders_close_at: None,
            coordinator_fee_ids: self.coordinator_fee_ids.clone(),
        }
    }
}

impl Entity for OrderCycle {
    type Id = OrderCycleId;

    fn id(&self) -> OrderCycleId {
        self.id
    }
}

/// Unvalidated input for creating an order cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCycleDraft {
    pub name: String,
    pub coordinator_id: Option<EnterpriseId>,
    pub orders_open_at: Option<DateTime<Utc>>,
    pub orders_close_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub coordinator_fee_ids: BTreeSet<EnterpriseFeeId>,
}

impl OrderCycleDraft {
    pub fn new(name: impl Into<String>, coordinator_id: EnterpriseId) -> Self {
        Self {
            name: name.into(),
            coordinator_id: Some(coordinator_id),
            ..Self::default()
        }
    }

    pub fn with_window(mut self, open_at: DateTime<Utc>, close_at: DateTime<Utc>) -> Self {
        self.orders_open_at = Some(open_at);
        self.orders_close_at = Some(close_at);
        self
    }

    pub fn with_fees(mut self, fees: impl IntoIterator<Item = EnterpriseFeeId>) -> Self {
        self.coordinator_fee_ids.extend(fees);
        self
    }

    pub fn validate(&self) -> DomainResult<EnterpriseId> {
        validate_name(&self.name)?;
        self.coordinator_id
            .ok_or_else(|| DomainError::validation("coordinator is required"))
    }

    /// Validate and assign an identity.
    ///
    /// Nothing about the window is checked: half-dated and inverted windows
    /// are accepted as-is.
    pub fn into_order_cycle(self, id: OrderCycleId) -> DomainResult<OrderCycle> {
        let coordinator_id = self.validate()?;
        Ok(OrderCycle {
            id,
            name: self.name,
            coordinator_id,
            orders_open_at: self.orders_open_at,
            orders_close_at: self.orders_close_at,
            coordinator_fee_ids: self.coordinator_fee_ids,
        })
    }
}

fn validate_name(name: &str) -> DomainResult<()> {
    if name.trim().is_empty() {
        return Err(DomainError::validation("name cannot be empty"));
    }
    Ok(())
}
