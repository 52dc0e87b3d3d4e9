//! Value types exchanged between the control plane, the dispatcher and its
//! workers.
//!
//! Every persisted map is a `BTreeMap` so the snapshot files serialize in a
//! stable order.

pub mod state;
pub mod triggers;

pub use state::*;
pub use triggers::*;
