//! `cyclekit-core`: shared domain building blocks.
//!
//! Identifiers, the domain error model, the `Entity` trait and the time source
//! used by every time-derived predicate. No infrastructure concerns live here.

pub mod entity;
pub mod error;
pub mod id;
pub mod time;

pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::{EnterpriseFeeId, EnterpriseId, ExchangeId, OrderCycleId, ProductId, UserId, VariantId};
pub use time::{FixedTimeSource, SystemTimeSource, TimeSource};
