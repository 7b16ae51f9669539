//! Cadence Storage - persistence for the campaign engine
//!
//! PostgreSQL repositories behind the [`SequenceStore`] trait, plus an
//! in-memory implementation of the same trait.

pub mod db;
pub mod memory;
pub mod models;
pub mod repository;
pub mod store;

pub use db::DatabasePool;
pub use memory::MemorySequenceStore;
pub use models::*;
pub use repository::*;
pub use store::{PgSequenceStore, SequenceStore};
