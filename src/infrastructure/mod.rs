pub mod event_bus;
pub mod http_client_factory;
pub mod repositories;

pub use event_bus::EventBus;
pub use repositories::{InMemoryStore, SqliteLedger, SqliteUnitOfWorkFactory};

pub mod brokerage;
pub mod evaluator_adapter;
pub mod fx;
pub mod locks;
pub mod market_data;
pub mod observability;
pub mod optimizer_adapter;
