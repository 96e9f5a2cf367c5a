//! Core types and trait definitions for Consult.
//!
//! This crate is deliberately free of HTTP, database and runtime
//! dependencies. All other crates depend on it.

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod actor;
pub mod case;
pub mod channel;
pub mod error;
pub mod event;
pub mod lifecycle;
pub mod message;
pub mod store;

pub use error::{Error, Result};
