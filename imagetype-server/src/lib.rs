//! Imagetype Server Library - HTTP surface of the image classification pipeline
//!
//! This library exposes the server components for use in integration tests.
//! The main binary uses these same components.

pub mod config;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;
pub mod validation;

pub use config::{Config, LogFormat, ServerRole};
pub use error::ApiError;
pub use routes::{create_router, create_router_with_config};
pub use state::AppState;
