//! Composable selection scopes over order cycles.
//!
//! A `CycleQuery` is a conjunction of `CycleFilter`s plus an optional ordering
//! and limit. Actor-dependent filters capture their `EnterpriseScope` when the
//! query is built; time-dependent filters read `now` only when the query runs.

use core::cmp::Ordering;

use chrono::{DateTime, Duration, Utc};

use cyclekit_auth::{EnterpriseScope, Principal};
use cyclekit_core::{EnterpriseId, ProductId};

use crate::access;
use crate::exchange::ExchangeDirection;
use crate::order_cycle::OrderCycle;
use crate::snapshot::Snapshot;

/// How far back `recently_closed` looks by default.
pub const RECENTLY_CLOSED_DAYS: i64 = 31;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleFilter {
    /// `open_at <= now <= close_at`.
    Active,
    /// `open_at <= now`.
    ActiveOrComplete,
    /// `open_at > now` or `close_at < now`.
    Inactive,
    Upcoming,
    Closed,
    Undated,
    /// `close_at >= now - window`.
    ClosedWithin(Duration),
    /// Has an outgoing exchange received by the enterprise.
    WithDistributor(EnterpriseId),
    /// Has an outgoing exchange carrying a live variant of the product.
    DistributingProduct(ProductId),
    ManagedBy(EnterpriseScope),
    AccessibleBy(EnterpriseScope),
    InvolvingManagedDistributors(EnterpriseScope),
    InvolvingManagedProducers(EnterpriseScope),
}

impl CycleFilter {
    pub fn matches(&self, oc: &OrderCycle, snapshot: &Snapshot, now: DateTime<Utc>) -> bool {
        match self {
            CycleFilter::Active => oc.is_active(now),
            CycleFilter::ActiveOrComplete => oc.is_active_or_complete(now),
            CycleFilter::Inactive => oc.is_inactive(now),
            CycleFilter::Upcoming => oc.is_upcoming(now),
            CycleFilter::Closed => oc.is_closed(now),
            CycleFilter::Undated => oc.is_undated(),
            CycleFilter::ClosedWithin(window) => oc.orders_close_at.is_some_and(|close| {
                // A window reaching past the representable range has no lower bound.
                now.checked_sub_signed(*window).is_none_or(|floor| close >= floor)
            }),
            CycleFilter::WithDistributor(distributor) => snapshot
                .exchanges_of(oc.id)
                .iter()
                .any(|e| e.distributes_to(*distributor)),
            CycleFilter::DistributingProduct(product) => {
                let catalog = snapshot.catalog();
                snapshot
                    .exchanges_of(oc.id)
                    .iter()
                    .filter(|e| e.is_outgoing())
                    .flat_map(|e| e.variant_ids.iter())
                    .filter_map(|v| catalog.live_variant(*v))
                    .any(|v| v.product_id == *product)
            }
            CycleFilter::ManagedBy(scope) => access::is_managed(oc, scope),
            CycleFilter::AccessibleBy(scope) => {
                access::is_accessible(oc, snapshot.exchanges_of(oc.id), scope)
            }
            CycleFilter::InvolvingManagedDistributors(scope) => {
                access::involves(snapshot.exchanges_of(oc.id), ExchangeDirection::Outgoing, scope)
            }
            CycleFilter::InvolvingManagedProducers(scope) => {
                access::involves(snapshot.exchanges_of(oc.id), ExchangeDirection::Incoming, scope)
            }
        }
    }
}

/// Result ordering. Absent timestamps sort last; ties break on id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOrdering {
    OpensAtAsc,
    ClosesAtAsc,
    ClosesAtDesc,
}

impl CycleOrdering {
    fn compare(self, a: &OrderCycle, b: &OrderCycle) -> Ordering {
        let by_time = match self {
            CycleOrdering::OpensAtAsc => nulls_last(a.orders_open_at, b.orders_open_at, false),
            CycleOrdering::ClosesAtAsc => nulls_last(a.orders_close_at, b.orders_close_at, false),
            CycleOrdering::ClosesAtDesc => nulls_last(a.orders_close_at, b.orders_close_at, true),
        };
        by_time.then_with(|| a.id.cmp(&b.id))
    }
}

fn nulls_last(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>, descending: bool) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) if descending => b.cmp(&a),
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// A lazily evaluated selection of order cycles.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleQuery {
    filters: Vec<CycleFilter>,
    ordering: Option<CycleOrdering>,
    limit: Option<usize>,
}

impl CycleQuery {
    /// Every order cycle, ordered by id.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn filter(mut self, filter: CycleFilter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn order_by(mut self, ordering: CycleOrdering) -> Self {
        self.ordering = Some(ordering);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Conjunction of both queries. `other`'s ordering wins when set; the
    /// tighter limit wins.
    pub fn and(mut self, other: CycleQuery) -> Self {
        self.filters.extend(other.filters);
        self.ordering = other.ordering.or(self.ordering);
        self.limit = match (self.limit, other.limit) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        self
    }

    pub fn filters(&self) -> &[CycleFilter] {
        &self.filters
    }

    pub fn active() -> Self {
        Self::all().filter(CycleFilter::Active)
    }

    pub fn active_or_complete() -> Self {
        Self::all().filter(CycleFilter::ActiveOrComplete)
    }

    pub fn inactive() -> Self {
        Self::all().filter(CycleFilter::Inactive)
    }

    pub fn upcoming() -> Self {
        Self::all().filter(CycleFilter::Upcoming)
    }

    pub fn closed() -> Self {
        Self::all().filter(CycleFilter::Closed)
    }

    pub fn undated() -> Self {
        Self::all().filter(CycleFilter::Undated)
    }

    /// Active cycles, soonest closing first.
    pub fn soonest_closing() -> Self {
        Self::active().order_by(CycleOrdering::ClosesAtAsc)
    }

    /// Upcoming cycles, soonest opening first.
    pub fn soonest_opening() -> Self {
        Self::upcoming().order_by(CycleOrdering::OpensAtAsc)
    }

    /// Closed cycles, latest close first.
    pub fn most_recently_closed() -> Self {
        Self::closed().order_by(CycleOrdering::ClosesAtDesc)
    }

    /// Cycles closed within the last 31 days, latest close first.
    pub fn recently_closed() -> Self {
        Self::recently_closed_within(Duration::days(RECENTLY_CLOSED_DAYS))
    }

    pub fn recently_closed_within(window: Duration) -> Self {
        Self::most_recently_closed().filter(CycleFilter::ClosedWithin(window))
    }

    pub fn with_distributor(distributor: EnterpriseId) -> Self {
        Self::all().filter(CycleFilter::WithDistributor(distributor))
    }

    pub fn distributing_product(product: ProductId) -> Self {
        Self::all().filter(CycleFilter::DistributingProduct(product))
    }

    pub fn managed_by(principal: &Principal) -> Self {
        Self::all().filter(CycleFilter::ManagedBy(principal.enterprise_scope()))
    }

    pub fn accessible_by(principal: &Principal) -> Self {
        Self::all().filter(CycleFilter::AccessibleBy(principal.enterprise_scope()))
    }

    pub fn involving_managed_distributors_of(principal: &Principal) -> Self {
        Self::all().filter(CycleFilter::InvolvingManagedDistributors(principal.enterprise_scope()))
    }

    pub fn involving_managed_producers_of(principal: &Principal) -> Self {
        Self::all().filter(CycleFilter::InvolvingManagedProducers(principal.enterprise_scope()))
    }

    /// Materialize the query against a snapshot as of `now`.
    pub fn run<'a>(&self, snapshot: &'a Snapshot, now: DateTime<Utc>) -> Vec<&'a OrderCycle> {
        let mut cycles: Vec<&OrderCycle> = snapshot
            .order_cycles()
            .filter(|oc| self.filters.iter().all(|f| f.matches(oc, snapshot, now)))
            .collect();

        if let Some(ordering) = self.ordering {
            cycles.sort_by(|a, b| ordering.compare(a, b));
        }
        if let Some(limit) = self.limit {
            cycles.truncate(limit);
        }
        cycles
    }

    pub fn first<'a>(&self, snapshot: &'a Snapshot, now: DateTime<Utc>) -> Option<&'a OrderCycle> {
        self.clone().limit(1).run(snapshot, now).into_iter().next()
    }
}

/// The distributor's upcoming cycle that opens soonest.
pub fn first_opening_for(snapshot: &Snapshot, distributor: EnterpriseId, now: DateTime<Utc>) -> Option<&OrderCycle> {
    CycleQuery::with_distributor(distributor)
        .and(CycleQuery::soonest_opening())
        .first(snapshot, now)
}

/// The distributor's active cycle that closes soonest.
pub fn first_closing_for(snapshot: &Snapshot, distributor: EnterpriseId, now: DateTime<Utc>) -> Option<&OrderCycle> {
    CycleQuery::with_distributor(distributor)
        .and(CycleQuery::soonest_closing())
        .first(snapshot, now)
}

pub fn most_recently_closed_for(snapshot: &Snapshot, distributor: EnterpriseId, now: DateTime<Utc>) -> Option<&OrderCycle> {
    CycleQuery::with_distributor(distributor)
        .and(CycleQuery::most_recently_closed())
        .first(snapshot, now)
}
