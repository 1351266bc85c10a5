//! Subcommand implementations.

pub mod classify;
pub mod push;
pub mod schema;
