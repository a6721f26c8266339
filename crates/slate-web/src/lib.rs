//! Live post stream glue for Slate.
//!
//! Converts notifier events plus periodic snapshots into a Server-Sent
//! Events feed for one connected client: an initial snapshot, then a fresh
//! snapshot whenever the user's posts change (detected by fingerprint), and
//! keepalives to hold the transport open.

mod fingerprint;
mod sse;

pub use fingerprint::fingerprint;
pub use sse::{StreamConfig, post_stream};
