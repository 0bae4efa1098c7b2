//! Command execution engine
//!
//! [`sequence`] orchestrates a request's command list, intercepting `cd` and
//! `export` for native state tracking; [`executor`] is the per-command
//! protocol engine handling terminators, sudo elevation, secrets, validation
//! and extraction.

pub mod executor;
pub mod sequence;

pub use sequence::run_extract;
