//! SessionStore - durable byte-level key/value storage
//!
//! A deliberately small storage layer: values are opaque byte strings keyed by
//! short ASCII names. Serialization, retries, and record semantics live in the
//! caller; this crate only guarantees that a `put` is either fully visible or
//! not visible at all.
//!
//! # Backends
//!
//! - [`FileStore`] - one file per key in a directory, atomic replace on write,
//!   exclusive advisory lock on the directory for the lifetime of the store
//! - [`MemoryStore`] - in-process map with write-failure injection for tests

mod error;
mod file;
mod memory;

pub use error::{StoreError, StoreResult};
pub use file::FileStore;
pub use memory::MemoryStore;

/// Byte-level key/value storage
///
/// Implementations must make `put` atomic with respect to crashes: a reader
/// after a crash sees either the previous value or the new one, never a mix.
pub trait KvStore: Send + Sync {
    /// Read the value stored under `key`
    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Replace the value stored under `key`
    fn put(&self, key: &str, value: &[u8]) -> StoreResult<()>;

    /// Remove `key`; removing an absent key is not an error
    fn delete(&self, key: &str) -> StoreResult<()>;
}

/// Check that a key is usable as a file name on every platform
pub fn validate_key(key: &str) -> StoreResult<()> {
    let valid = !key.is_empty()
        && key.len() <= 64
        && key
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidKey(key.to_string()))
    }
}
