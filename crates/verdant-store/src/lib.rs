//! Verdant store - access layer for the configuration bucket.
//!
//! The bucket is the single source of truth for catalog, registry,
//! forecast, and schedule documents. This crate wraps `object_store`
//! with JSON helpers and atomic temp-then-rename writes so readers
//! never observe a partially written document.
//!
//! Supports local filesystem, in-memory, S3, and GCS backends.

pub mod bucket;
pub mod error;
pub mod layout;

pub use bucket::{BucketConfig, BucketStore};
pub use error::{Result, StoreError};
