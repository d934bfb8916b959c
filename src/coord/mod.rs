//! Completion-order coordination
//!
//! Jobs run concurrently on tokio; the coordinator drains them in the order
//! they finish, reacts to each once, then runs a final step.

pub mod types;
pub mod hooks;
pub mod job;
pub mod chain;
pub mod coordinator;

pub use types::*;
pub use hooks::*;
pub use job::*;
pub use chain::*;
pub use coordinator::*;
