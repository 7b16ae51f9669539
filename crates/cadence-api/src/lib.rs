//! Cadence API - HTTP surface of the campaign engine
//!
//! This crate provides the scheduler trigger, the tracking and unsubscribe
//! endpoints hit from sent mail, and the campaign management API.

pub mod auth;
pub mod handlers;
pub mod routes;

pub use auth::AppState;
pub use routes::create_router;
