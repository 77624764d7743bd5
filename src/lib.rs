//! DeltaGlider — an S3-compatible object storage wrapper that transparently
//! delta-compresses structurally similar binary artifacts (tarballs,
//! archives, database dumps) against a per-deltaspace reference, while
//! passing through anything else untouched.

pub mod cache;
pub mod clock;
pub mod config;
pub mod diff;
pub mod error;
pub mod extensions;
pub mod hash;
pub mod metrics;
pub mod service;
pub mod stats;
pub mod store;
pub mod types;

pub use error::DeltaError;
pub use service::{DeltaService, DynDeltaService};
