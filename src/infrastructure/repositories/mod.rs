pub mod in_memory;
pub mod sqlite;

pub use in_memory::{InMemoryStore, InMemoryUnitOfWork};
pub use sqlite::{SqliteLedger, SqliteUnitOfWork, SqliteUnitOfWorkFactory};
