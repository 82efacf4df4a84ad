//! The disk tier: a SQLite-backed store plus the mutex/executor wrapper that
//! exposes it to callers.

pub mod store;
pub mod tier;

pub use store::{DiskStore, OldestItem};
pub use tier::DiskTier;
