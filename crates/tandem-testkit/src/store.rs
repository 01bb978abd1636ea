//! In-memory transactional store
//!
//! Optimistic concurrency: a transaction reads through to the shared map,
//! remembering the version of every key it read and the keys and versions
//! every prefix scan returned. Writes are buffered. `commit` re-validates
//! all of it under the lock and rejects the transaction with `Conflict` if
//! anything it saw changed in the meantime.

use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tandem_core::{Result, StoreTransaction, TandemError, TransactionalStore};

#[derive(Debug, Clone)]
struct Versioned {
    version: u64,
    value: Vec<u8>,
}

#[derive(Debug, Default)]
struct Shared {
    data: BTreeMap<String, Versioned>,
    next_version: u64,
    commits: u64,
    injected_conflicts: u32,
}

impl Shared {
    fn version(&self, key: &str) -> Option<u64> {
        self.data.get(key).map(|v| v.version)
    }

    fn scan_versions(&self, prefix: &str) -> Vec<(String, u64)> {
        self.data
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, v)| (key.clone(), v.version))
            .collect()
    }
}

/// Shared in-memory store; clones share the same data
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    shared: Arc<Mutex<Shared>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` commits fail with `Conflict`
    pub fn inject_conflicts(&self, count: u32) {
        self.shared.lock().injected_conflicts = count;
    }

    /// Number of successful commits so far
    pub fn commit_count(&self) -> u64 {
        self.shared.lock().commits
    }

    /// Committed keys under `prefix`
    pub fn keys(&self, prefix: &str) -> Vec<String> {
        self.shared
            .lock()
            .scan_versions(prefix)
            .into_iter()
            .map(|(key, _)| key)
            .collect()
    }

    /// Number of committed keys
    pub fn len(&self) -> usize {
        self.shared.lock().data.len()
    }

    /// Whether nothing is committed
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One open transaction on a `MemoryStore`
pub struct MemoryTransaction {
    shared: Arc<Mutex<Shared>>,
    reads: HashMap<String, Option<u64>>,
    scans: HashMap<String, Vec<(String, u64)>>,
    writes: BTreeMap<String, Option<Vec<u8>>>,
}

impl MemoryTransaction {
    fn read_committed(&mut self, key: &str) -> Option<Vec<u8>> {
        let shared = self.shared.lock();
        let entry = shared.data.get(key);
        self.reads
            .entry(key.to_string())
            .or_insert_with(|| entry.map(|v| v.version));
        entry.map(|v| v.value.clone())
    }
}

impl StoreTransaction for MemoryTransaction {
    fn get(&mut self, key: &str) -> Result<Option<Vec<u8>>> {
        if let Some(pending) = self.writes.get(key) {
            return Ok(pending.clone());
        }
        Ok(self.read_committed(key))
    }

    fn put(&mut self, key: &str, value: Vec<u8>) -> Result<()> {
        self.writes.insert(key.to_string(), Some(value));
        Ok(())
    }

    fn delete(&mut self, key: &str) -> Result<bool> {
        let existed = self.get(key)?.is_some();
        self.writes.insert(key.to_string(), None);
        Ok(existed)
    }

    fn scan_prefix(&mut self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let mut merged: BTreeMap<String, Vec<u8>> = {
            let shared = self.shared.lock();
            let committed: Vec<(String, Versioned)> = shared
                .data
                .range(prefix.to_string()..)
                .take_while(|(key, _)| key.starts_with(prefix))
                .map(|(key, v)| (key.clone(), v.clone()))
                .collect();
            self.scans.entry(prefix.to_string()).or_insert_with(|| {
                committed
                    .iter()
                    .map(|(key, v)| (key.clone(), v.version))
                    .collect()
            });
            committed
                .into_iter()
                .map(|(key, v)| (key, v.value))
                .collect()
        };
        for (key, pending) in self
            .writes
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
        {
            match pending {
                Some(value) => merged.insert(key.clone(), value.clone()),
                None => merged.remove(key),
            };
        }
        Ok(merged.into_iter().collect())
    }
}

impl TransactionalStore for MemoryStore {
    type Transaction = MemoryTransaction;

    fn begin(&self) -> Self::Transaction {
        MemoryTransaction {
            shared: Arc::clone(&self.shared),
            reads: HashMap::new(),
            scans: HashMap::new(),
            writes: BTreeMap::new(),
        }
    }

    fn commit(&self, tx: Self::Transaction) -> Result<()> {
        let mut shared = self.shared.lock();
        if shared.injected_conflicts > 0 {
            shared.injected_conflicts -= 1;
            return Err(TandemError::conflict("injected conflict"));
        }
        for (key, seen) in &tx.reads {
            if shared.version(key) != *seen {
                return Err(TandemError::conflict(format!("{key} changed since read")));
            }
        }
        for (prefix, seen) in &tx.scans {
            if shared.scan_versions(prefix) != *seen {
                return Err(TandemError::conflict(format!(
                    "entries under {prefix} changed since scan"
                )));
            }
        }
        for (key, pending) in tx.writes {
            match pending {
                Some(value) => {
                    shared.next_version += 1;
                    let version = shared.next_version;
                    shared.data.insert(key, Versioned { version, value });
                }
                None => {
                    shared.data.remove(&key);
                }
            }
        }
        shared.commits += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transaction_sees_its_own_writes() {
        let store = MemoryStore::new();
        let mut tx = store.begin();
        tx.put("a/1", vec![1]).unwrap();
        tx.put("a/2", vec![2]).unwrap();
        tx.put("b/1", vec![3]).unwrap();
        assert_eq!(tx.get("a/1").unwrap(), Some(vec![1]));
        assert_eq!(tx.scan_prefix("a/").unwrap().len(), 2);
        assert!(store.is_empty());
        store.commit(tx).unwrap();
        assert_eq!(store.keys("a/"), vec!["a/1".to_string(), "a/2".to_string()]);
    }

    #[test]
    fn dropped_transaction_leaves_nothing() {
        let store = MemoryStore::new();
        {
            let mut tx = store.begin();
            tx.put("k", vec![1]).unwrap();
        }
        assert!(store.is_empty());
    }

    #[test]
    fn stale_read_conflicts() {
        let store = MemoryStore::new();
        let mut first = store.begin();
        let mut second = store.begin();
        assert_eq!(first.get("k").unwrap(), None);
        assert_eq!(second.get("k").unwrap(), None);
        first.put("k", vec![1]).unwrap();
        second.put("k", vec![2]).unwrap();
        store.commit(first).unwrap();
        let err = store.commit(second).unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn phantom_insert_under_scanned_prefix_conflicts() {
        let store = MemoryStore::new();
        let mut scanner = store.begin();
        assert!(scanner.scan_prefix("p/").unwrap().is_empty());
        scanner.put("other", vec![0]).unwrap();

        let mut writer = store.begin();
        writer.put("p/new", vec![1]).unwrap();
        store.commit(writer).unwrap();

        assert!(matches!(
            store.commit(scanner),
            Err(TandemError::Conflict { .. })
        ));
    }

    #[test]
    fn delete_hides_committed_value() {
        let store = MemoryStore::new();
        let mut tx = store.begin();
        tx.put("p/a", vec![1]).unwrap();
        store.commit(tx).unwrap();

        let mut tx = store.begin();
        assert!(tx.delete("p/a").unwrap());
        assert!(tx.scan_prefix("p/").unwrap().is_empty());
        store.commit(tx).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn injected_conflicts_are_consumed() {
        let store = MemoryStore::new();
        store.inject_conflicts(1);
        assert!(store.commit(store.begin()).is_err());
        assert!(store.commit(store.begin()).is_ok());
        assert_eq!(store.commit_count(), 1);
    }
}
