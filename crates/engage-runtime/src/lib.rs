//! Runtime layer for the engagement monitor.
//!
//! Owns the session state machine, the per-session tick loop, the command
//! dispatcher that starts and stops it, and the command sources and
//! simulated devices the binary wires together.

pub mod dispatcher;
pub mod orchestrator;
pub mod remote;
pub mod session_manager;
pub mod signals;
pub mod simulated;

#[cfg(test)]
mod test_support;

pub use engage_core as core;
pub use engage_data as data;
