pub mod broker;
pub mod config;
pub mod error;
pub mod routes;

pub use broker::{BrokerServices, MemoryBrokerStore, PgBrokerStore, ResolverConfig};
pub use error::{BrokerError, BrokerResult};
