//! API request handlers

pub mod campaigns;
pub mod cron;
pub mod health;
pub mod metrics;
pub mod tracking;

pub use health::*;
