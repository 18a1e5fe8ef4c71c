//! Flutter-facing bindings for the plan core.
//!
//! Every exported function is synchronous, opens the plan store, runs one
//! use case and returns a plain envelope. Nothing here holds state besides
//! the resolved database path.

pub mod api;
