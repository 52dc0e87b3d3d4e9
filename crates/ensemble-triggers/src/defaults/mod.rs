//! Default implementations for the pluggable dispatcher traits.
//!
//! These let a dispatcher start with nothing but a trigger directory. Each
//! can be replaced through the dispatcher builder.

pub mod command_submitter;
pub mod file_state_store;
pub mod in_memory_state;
pub use command_submitter::CommandSubmitter;
pub use file_state_store::FileStateStore;
pub use in_memory_state::InMemoryStateStore;
