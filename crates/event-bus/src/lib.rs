pub mod bus;
pub mod memory;

pub use bus::{BusError, EventBus, EventEnvelope, EventHandler, Result};
pub use memory::InMemoryEventBus;
