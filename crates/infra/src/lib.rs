//! Infrastructure layer: order cycle storage, application services, config.

pub mod config;
pub mod services;
pub mod store;


pub use config::InfraConfig;
pub use services::{OrderCycleService, ServiceError, ServiceResult};
pub use store::{InMemoryOrderCycleStore, OrderCycleStore, PostgresOrderCycleStore, StoreError};
