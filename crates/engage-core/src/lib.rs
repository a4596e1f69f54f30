//! Core domain layer for the engagement monitor.
//!
//! Holds the data model, the scoring algorithm, wire payloads, collaborator
//! contracts, the error taxonomy and configuration handling. Nothing in this
//! crate performs scheduling or owns long-lived resources.

pub mod collaborators;
pub mod config;
pub mod error;
pub mod models;
pub mod payloads;
pub mod scorer;
pub mod settings;
pub mod time_utils;
