//! Application-level orchestration over an `OrderCycleStore`.
//!
//! The service owns the clock and the actor checks. Every call reads the clock
//! at most once, so one call never mixes two notions of "now". Reads return
//! owned values; nothing borrowed from a snapshot escapes.

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use tracing::instrument;

use cyclekit_auth::{authorize_manage, AuthzError, Principal};
use cyclekit_core::{DomainError, EnterpriseId, ExchangeId, OrderCycleId, TimeSource};
use cyclekit_order_cycles::{
    first_closing_for, first_opening_for, most_recently_closed_for, CycleQuery, Distribution, Exchange, NewExchange,
    OrderCycle, OrderCycleDraft, OrderCycleRecord, RECENTLY_CLOSED_DAYS,
};

use crate::config::InfraConfig;
use crate::store::{OrderCycleStore, StoreError};

#[derive(Debug, Error)]
pub enum ServiceError {
    /// Deterministic input failure; nothing was written.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    #[error(transparent)]
    Unauthorized(#[from] AuthzError),

    /// A concurrent write won the race; the call may be retried.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for ServiceError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Domain(domain) => domain.into(),
            other => ServiceError::Store(other),
        }
    }
}

impl From<DomainError> for ServiceError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) | DomainError::InvalidId(msg) => ServiceError::Validation(msg),
            DomainError::NotFound { kind, id } => ServiceError::NotFound { kind, id },
            DomainError::Conflict(msg) => ServiceError::Conflict(msg),
            other => ServiceError::Store(StoreError::Domain(other)),
        }
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Order cycle use cases on top of a store and a clock.
pub struct OrderCycleService<S, T> {
    store: S,
    clock: T,
    recently_closed: Duration,
}

impl<S, T> OrderCycleService<S, T>
where
    S: OrderCycleStore,
    T: TimeSource,
{
    pub fn new(store: S, clock: T) -> Self {
        Self {
            store,
            clock,
            recently_closed: Duration::days(RECENTLY_CLOSED_DAYS),
        }
    }

    pub fn with_config(store: S, clock: T, config: &InfraConfig) -> Self {
        Self {
            recently_closed: config.recently_closed_window(),
            ..Self::new(store, clock)
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn existing(&self, id: OrderCycleId) -> ServiceResult<OrderCycle> {
        self.get(id).map(|record| record.order_cycle)
    }

    // Writes

    #[instrument(skip(self, actor, draft), fields(user_id = %actor.user_id, name = %draft.name), err)]
    pub fn create_order_cycle(&self, actor: &Principal, draft: OrderCycleDraft) -> ServiceResult<OrderCycle> {
        let coordinator_id = draft.validate()?;
        authorize_manage(actor, coordinator_id)?;
        Ok(self.store.create_order_cycle(draft)?)
    }

    /// Both the current and the requested coordinator must be managed by `actor`.
    #[instrument(skip(self, actor, order_cycle), fields(user_id = %actor.user_id, order_cycle_id = %order_cycle.id), err)]
    pub fn update_order_cycle(&self, actor: &Principal, order_cycle: OrderCycle) -> ServiceResult<OrderCycle> {
        order_cycle.validate()?;
        let current = self.existing(order_cycle.id)?;
        authorize_manage(actor, current.coordinator_id)?;
        authorize_manage(actor, order_cycle.coordinator_id)?;
        Ok(self.store.update_order_cycle(order_cycle)?)
    }

    #[instrument(skip(self, actor), fields(user_id = %actor.user_id), err)]
    pub fn delete_order_cycle(&self, actor: &Principal, id: OrderCycleId) -> ServiceResult<OrderCycleRecord> {
        let current = self.existing(id)?;
        authorize_manage(actor, current.coordinator_id)?;
        Ok(self.store.delete_order_cycle(id)?)
    }

    #[instrument(skip(self, actor, exchange), fields(user_id = %actor.user_id), err)]
    pub fn add_exchange(&self, actor: &Principal, order_cycle_id: OrderCycleId, exchange: NewExchange) -> ServiceResult<Exchange> {
        let current = self.existing(order_cycle_id)?;
        authorize_manage(actor, current.coordinator_id)?;
        Ok(self.store.add_exchange(order_cycle_id, exchange)?)
    }

    #[instrument(skip(self, actor), fields(user_id = %actor.user_id), err)]
    pub fn remove_exchange(&self, actor: &Principal, id: ExchangeId) -> ServiceResult<Exchange> {
        let snapshot = self.store.snapshot()?;
        let coordinator_id = snapshot
            .exchange(id)
            .and_then(|exchange| snapshot.order_cycle(exchange.order_cycle_id))
            .map(|oc| oc.coordinator_id)
            .ok_or_else(|| DomainError::not_found("exchange", id))?;
        authorize_manage(actor, coordinator_id)?;
        Ok(self.store.remove_exchange(id)?)
    }

    /// Duplicate a cycle and its exchanges as an undated "COPY OF" cycle.
    #[instrument(skip(self, actor), fields(user_id = %actor.user_id), err)]
    pub fn clone_order_cycle(&self, actor: &Principal, id: OrderCycleId) -> ServiceResult<OrderCycleRecord> {
        let source = self.existing(id)?;
        authorize_manage(actor, source.coordinator_id)?;
        Ok(self.store.clone_order_cycle(id)?)
    }

    // Reads

    pub fn get(&self, id: OrderCycleId) -> ServiceResult<OrderCycleRecord> {
        self.store
            .record(id)?
            .ok_or_else(|| DomainError::not_found("order cycle", id).into())
    }

    /// Run a composed query with the clock read once.
    pub fn find(&self, query: &CycleQuery) -> ServiceResult<Vec<OrderCycle>> {
        let snapshot = self.store.snapshot()?;
        let now = self.now();
        Ok(query.run(&snapshot, now).into_iter().cloned().collect())
    }

    pub fn active(&self) -> ServiceResult<Vec<OrderCycle>> {
        self.find(&CycleQuery::active())
    }

    pub fn upcoming(&self) -> ServiceResult<Vec<OrderCycle>> {
        self.find(&CycleQuery::upcoming())
    }

    pub fn closed(&self) -> ServiceResult<Vec<OrderCycle>> {
        self.find(&CycleQuery::closed())
    }

    /// Closed within the configured look-back window.
    pub fn recently_closed(&self) -> ServiceResult<Vec<OrderCycle>> {
        self.find(&CycleQuery::recently_closed_within(self.recently_closed))
    }

    pub fn accessible_by(&self, actor: &Principal) -> ServiceResult<Vec<OrderCycle>> {
        self.find(&CycleQuery::accessible_by(actor))
    }

    pub fn managed_by(&self, actor: &Principal) -> ServiceResult<Vec<OrderCycle>> {
        self.find(&CycleQuery::managed_by(actor))
    }

    pub fn first_opening_for(&self, distributor: EnterpriseId) -> ServiceResult<Option<OrderCycle>> {
        let snapshot = self.store.snapshot()?;
        Ok(first_opening_for(&snapshot, distributor, self.now()).cloned())
    }

    pub fn first_closing_for(&self, distributor: EnterpriseId) -> ServiceResult<Option<OrderCycle>> {
        let snapshot = self.store.snapshot()?;
        Ok(first_closing_for(&snapshot, distributor, self.now()).cloned())
    }

    pub fn most_recently_closed_for(&self, distributor: EnterpriseId) -> ServiceResult<Option<OrderCycle>> {
        let snapshot = self.store.snapshot()?;
        Ok(most_recently_closed_for(&snapshot, distributor, self.now()).cloned())
    }

    /// Run `read` against the distribution resolver of one cycle.
    ///
    /// The resolver borrows the committed snapshot, so `read` must return
    /// owned data.
    pub fn with_distribution<R>(&self, id: OrderCycleId, read: impl FnOnce(Distribution<'_>) -> R) -> ServiceResult<R> {
        let snapshot = self.store.snapshot()?;
        let distribution = snapshot
            .distribution(id)
            .ok_or_else(|| DomainError::not_found("order cycle", id))?;
        Ok(read(distribution))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lost_race_surfaces_as_conflict() {
        let err: ServiceError = StoreError::Domain(DomainError::conflict("could not serialize access")).into();
        assert!(matches!(err, ServiceError::Conflict(msg) if msg.contains("serialize")));
    }

    #[test]
    fn constraint_failures_stay_store_errors() {
        let err: ServiceError = StoreError::Constraint("unknown fee".into()).into();
        assert!(matches!(err, ServiceError::Store(StoreError::Constraint(_))));

        let err: ServiceError = StoreError::not_found_cycle(OrderCycleId::new()).into();
        assert!(matches!(err, ServiceError::NotFound { kind: "order cycle", .. }));
    }
}
