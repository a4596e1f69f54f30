//! Storage layer for the engagement monitor.
//!
//! A filesystem-backed session store laid out like the remote document
//! store (`sessions/<id>/session.json` plus a `ticks.jsonl` timeline), and a
//! polled command inbox that stands in for the remote command collection.

pub mod inbox;
pub mod store;

pub use engage_core as core;
