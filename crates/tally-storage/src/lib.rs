//! Tally Storage Library
//!
//! Object storage for archived receipt images. The `Storage` trait is
//! implemented for S3-compatible providers and the local filesystem.
//!
//! # Storage key format
//!
//! Receipt images live under `receipts/{unix_millis}-{filename}`. Keys must
//! not contain `..` or a leading `/`. Key generation lives in the `keys`
//! module so every backend and the archiver agree on the layout.

pub mod factory;
pub mod keys;
#[cfg(feature = "storage-local")]
pub mod local;
#[cfg(feature = "storage-s3")]
pub mod s3;
pub mod traits;

// Re-export commonly used types
pub use factory::create_storage;
#[cfg(feature = "storage-local")]
pub use local::LocalStorage;
#[cfg(feature = "storage-s3")]
pub use s3::S3Storage;
pub use tally_core::StorageBackend;
pub use traits::{Storage, StorageError, StorageResult};
