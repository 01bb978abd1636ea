//! Transactional store contract
//!
//! The engine persists everything through a transactional key-value store.
//! Keys are `/`-separated strings so related records share a prefix and can
//! be queried with `scan_prefix`. A transaction sees its own writes; nothing
//! becomes visible to other transactions until `commit` succeeds. Stores are
//! expected to detect conflicting concurrent commits and reject the later one
//! with `TandemError::Conflict`.
//!
//! Stores need not support nested transactions. [`Savepoint`] stages writes
//! on top of any open transaction so a part of the work can be abandoned on
//! its own.

use std::collections::BTreeMap;

use crate::errors::Result;

/// One open transaction
pub trait StoreTransaction: Send {
    /// Read a value
    fn get(&mut self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Insert or replace a value
    fn put(&mut self, key: &str, value: Vec<u8>) -> Result<()>;

    /// Remove a value, returning whether it existed
    fn delete(&mut self, key: &str) -> Result<bool>;

    /// Every entry whose key starts with `prefix`, in key order
    fn scan_prefix(&mut self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>>;

    /// Whether a key exists
    fn contains(&mut self, key: &str) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }
}

/// A store able to open and commit transactions
pub trait TransactionalStore: Send + Sync {
    /// Transaction type handed out by `begin`
    type Transaction: StoreTransaction + 'static;

    /// Open a transaction
    fn begin(&self) -> Self::Transaction;

    /// Atomically apply every write of `tx`
    fn commit(&self, tx: Self::Transaction) -> Result<()>;
}

/// Writes staged on top of an open transaction.
///
/// Reads see the staged writes first, then the parent. `release` applies
/// the staged writes to the parent; dropping the savepoint discards them.
pub struct Savepoint<'a> {
    parent: &'a mut dyn StoreTransaction,
    writes: BTreeMap<String, Option<Vec<u8>>>,
}

impl<'a> Savepoint<'a> {
    /// Start staging on top of `parent`
    pub fn new(parent: &'a mut dyn StoreTransaction) -> Self {
        Self {
            parent,
            writes: BTreeMap::new(),
        }
    }

    /// Number of staged puts and deletes
    pub fn staged(&self) -> usize {
        self.writes.len()
    }

    /// Apply every staged write to the parent transaction
    pub fn release(self) -> Result<()> {
        let Self { parent, writes } = self;
        for (key, pending) in writes {
            match pending {
                Some(value) => parent.put(&key, value)?,
                None => {
                    parent.delete(&key)?;
                }
            }
        }
        Ok(())
    }
}

impl StoreTransaction for Savepoint<'_> {
    fn get(&mut self, key: &str) -> Result<Option<Vec<u8>>> {
        match self.writes.get(key) {
            Some(pending) => Ok(pending.clone()),
            None => self.parent.get(key),
        }
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
        let mut merged: BTreeMap<String, Vec<u8>> =
            self.parent.scan_prefix(prefix)?.into_iter().collect();
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

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct MapTransaction(BTreeMap<String, Vec<u8>>);

    impl StoreTransaction for MapTransaction {
        fn get(&mut self, key: &str) -> Result<Option<Vec<u8>>> {
            Ok(self.0.get(key).cloned())
        }

        fn put(&mut self, key: &str, value: Vec<u8>) -> Result<()> {
            self.0.insert(key.to_string(), value);
            Ok(())
        }

        fn delete(&mut self, key: &str) -> Result<bool> {
            Ok(self.0.remove(key).is_some())
        }

        fn scan_prefix(&mut self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
            Ok(self
                .0
                .iter()
                .filter(|(key, _)| key.starts_with(prefix))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect())
        }
    }

    fn seeded() -> MapTransaction {
        let mut tx = MapTransaction::default();
        tx.put("a/1", vec![1]).unwrap();
        tx.put("a/2", vec![2]).unwrap();
        tx
    }

    #[test]
    fn staged_writes_shadow_the_parent() {
        let mut parent = seeded();
        let mut savepoint = Savepoint::new(&mut parent);
        savepoint.put("a/3", vec![3]).unwrap();
        assert!(savepoint.delete("a/1").unwrap());
        assert!(!savepoint.contains("a/1").unwrap());
        assert_eq!(
            savepoint.scan_prefix("a/").unwrap(),
            vec![("a/2".to_string(), vec![2]), ("a/3".to_string(), vec![3])]
        );
        assert_eq!(savepoint.staged(), 2);
    }

    #[test]
    fn dropping_discards_and_release_applies() {
        let mut parent = seeded();
        {
            let mut savepoint = Savepoint::new(&mut parent);
            savepoint.delete("a/1").unwrap();
            savepoint.put("b", vec![9]).unwrap();
        }
        assert_eq!(parent.get("a/1").unwrap(), Some(vec![1]));
        assert_eq!(parent.get("b").unwrap(), None);

        let mut savepoint = Savepoint::new(&mut parent);
        savepoint.delete("a/1").unwrap();
        savepoint.put("b", vec![9]).unwrap();
        savepoint.release().unwrap();
        assert_eq!(parent.get("a/1").unwrap(), None);
        assert_eq!(parent.get("b").unwrap(), Some(vec![9]));
    }
}
