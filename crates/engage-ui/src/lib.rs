//! Terminal presentation for the engagement monitor.
//!
//! Provides the glanceable single-line engagement bar used as the
//! indicator collaborator, plus the colour palette it draws with.

pub mod indicator;
pub mod themes;

pub use indicator::TerminalIndicator;
