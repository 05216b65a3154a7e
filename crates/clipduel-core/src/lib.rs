//! Core types and trait definitions for the clipduel pairwise voting engine.
//!
//! This crate is deliberately free of HTTP and database dependencies.
//! Storage backends implement [`store::BallotStore`]; request handlers talk to
//! the [`ballot::Ballot`] service object.

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod ballot;
pub mod error;
pub mod item;
pub mod ratelimit;
pub mod store;
pub mod user;
pub mod vote;

pub use error::{Error, Result};
