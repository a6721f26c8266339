//! Post model and storage contracts for Slate.
//!
//! This crate defines the durable side of the engine:
//! - **Types**: the `Post` record and its status state machine
//! - **Store**: the `PostStore` trait the worker and stream glue run against,
//!   plus an in-memory implementation for tests and single-process embeddings
//! - **Cache**: short-TTL Redis cache for per-user post views

pub mod cache;
mod error;
mod store;
mod types;

pub use cache::{NoopCache, RedisViewCache, ViewCache};
pub use error::StoreError;
pub use store::{MemoryStore, PostStore};
pub use types::{Channel, Post, PostStatus};
