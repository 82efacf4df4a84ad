//! Error types for the cache engine.
//!
//! `CacheError` is crate-internal plumbing: it gives [`crate::disk::store::DiskStore`]
//! and the codec adapter a typed `Result` to propagate with `?`. None of it crosses
//! the public API boundary — callers of [`crate::HybridCache`] see `Option<T>` or
//! `()`, never a `CacheError`, per the "no exceptions escape" policy.

use thiserror::Error;

/// Internal error type unifying the failure kinds the disk tier can produce.
#[derive(Error, Debug)]
pub enum CacheError {
    /// The codec could not turn a caller value into bytes. Always a programmer error.
    #[error("encode failed: {0}")]
    EncodeFailed(String),

    /// The codec could not turn stored bytes back into the requested type. Always a
    /// programmer error (corrupt data or a mismatched type at the call site).
    #[error("decode failed: {0}")]
    DecodeFailed(String),

    /// A sidecar file read or write failed.
    #[error("sidecar file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// The embedded database returned an error.
    #[error("disk store failure: {0}")]
    Disk(#[from] rusqlite::Error),

    /// The database could not be closed because statements were still live, or it
    /// reported SQLITE_BUSY/SQLITE_LOCKED. Callers retry after finalizing statements.
    #[error("database busy, retry after finalizing statements")]
    Transient,
}
