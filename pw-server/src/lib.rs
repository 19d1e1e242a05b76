//! Pitwall Replay server library
//!
//! Exposed as a library so the router can be exercised from integration tests.

pub mod api;
pub mod replay;
pub mod state;
