//! SQLite backend for Consult.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated thread
//! without blocking the async runtime. The store also owns the in-process
//! [`ChangeFeed`] that serves as its notification channel; events are
//! published on the database thread, so each entity's stream follows commit
//! order.

mod encode;
mod schema;
mod store;

pub mod error;
pub mod feed;

pub use error::{Error, Result};
pub use feed::{ChangeFeed, FeedStream};
pub use store::SqliteStore;

#[cfg(test)]
mod tests;
