//! HTTP request handlers
//!
//! This module contains all the request handlers for the API endpoints.

pub mod classify;
pub mod health;
pub mod push;

pub use crate::state::AppState;
pub use classify::classify_handler;
pub use health::{health, HealthResponse};
pub use push::{push_handler, PushRequest};
