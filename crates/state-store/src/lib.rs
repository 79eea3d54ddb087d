pub mod error;
pub mod memory;
pub mod postgres;
pub mod store;

pub use error::{Result, StateStoreError};
pub use memory::InMemoryStateStore;
pub use postgres::PostgresStateStore;
pub use store::StateStore;
