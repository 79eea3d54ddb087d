pub mod context;
pub mod id;

pub use context::{Context, merge_context};
pub use id::WorkflowId;
