//! Core types and trait definitions for the Ristak reconciliation core.
//!
//! This crate is deliberately free of HTTP and database dependencies.
//! The store backend, the reconciliation services and the operator API all
//! depend on it.

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod error;
pub mod identity;
pub mod store;
pub mod tracking;

pub use error::{Error, Result};
