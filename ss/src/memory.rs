//! In-memory store for tests and ephemeral runs

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use log::debug;

use crate::{KvStore, StoreError, StoreResult, validate_key};

/// Key/value store held in process memory
///
/// Supports failure injection: after [`fail_next_writes`](Self::fail_next_writes)
/// the next `n` calls to `put` or `delete` return [`StoreError::Injected`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<BTreeMap<String, Vec<u8>>>,
    failing_writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` writes fail
    pub fn fail_next_writes(&self, n: usize) {
        debug!("MemoryStore::fail_next_writes: {}", n);
        self.failing_writes.store(n, Ordering::SeqCst);
    }

    fn take_injected_failure(&self, key: &str) -> StoreResult<()> {
        let consumed = self
            .failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match consumed {
            Ok(_) => Err(StoreError::Injected(key.to_string())),
            Err(_) => Ok(()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Vec<u8>>> {
        self.values.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        validate_key(key)?;
        Ok(self.lock().get(key).cloned())
    }

    fn put(&self, key: &str, value: &[u8]) -> StoreResult<()> {
        validate_key(key)?;
        self.take_injected_failure(key)?;
        self.lock().insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> StoreResult<()> {
        validate_key(key)?;
        self.take_injected_failure(key)?;
        self.lock().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_roundtrip() {
        let store = MemoryStore::new();
        store.put("a", b"1").unwrap();
        store.put("b", b"2").unwrap();
        assert_eq!(store.get("a").unwrap().unwrap(), b"1");
        assert_eq!(store.get("b").unwrap().unwrap(), b"2");
        store.delete("a").unwrap();
        assert!(store.get("a").unwrap().is_none());
    }

    #[test]
    fn test_injected_failures_are_consumed() {
        let store = MemoryStore::new();
        store.fail_next_writes(2);

        assert!(matches!(store.put("a", b"1"), Err(StoreError::Injected(_))));
        assert!(matches!(store.delete("a"), Err(StoreError::Injected(_))));
        store.put("a", b"1").unwrap();
        assert_eq!(store.get("a").unwrap().unwrap(), b"1");
    }

    #[test]
    fn test_reads_are_not_affected_by_injection() {
        let store = MemoryStore::new();
        store.put("a", b"1").unwrap();
        store.fail_next_writes(1);
        assert_eq!(store.get("a").unwrap().unwrap(), b"1");
    }
}
