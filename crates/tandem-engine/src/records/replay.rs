//! Replay guards
//!
//! Append-only set of signatures already accepted, per owned identity. The
//! key is a blake3 digest of the signature; the value keeps the raw bytes.

use tandem_core::{IdentityKey, Result, Signature, StoreTransaction};

use super::owned_prefix;

const FAMILY: &str = "replay";

fn key(owned: &IdentityKey, signature: &Signature) -> String {
    let digest = blake3::hash(signature.as_bytes());
    format!("{}{}", owned_prefix(FAMILY, owned), hex::encode(digest.as_bytes()))
}

/// Whether `signature` was already accepted under `owned`
pub fn contains(
    tx: &mut dyn StoreTransaction,
    owned: &IdentityKey,
    signature: &Signature,
) -> Result<bool> {
    tx.contains(&key(owned, signature))
}

/// Record an accepted signature
pub fn insert(
    tx: &mut dyn StoreTransaction,
    owned: &IdentityKey,
    signature: &Signature,
) -> Result<()> {
    tx.put(&key(owned, signature), signature.as_bytes().to_vec())
}

/// Forget every signature recorded under `owned`
pub fn delete_all(tx: &mut dyn StoreTransaction, owned: &IdentityKey) -> Result<usize> {
    let keys: Vec<String> = tx
        .scan_prefix(&owned_prefix(FAMILY, owned))?
        .into_iter()
        .map(|(key, _)| key)
        .collect();
    for key in &keys {
        tx.delete(key)?;
    }
    Ok(keys.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_core::TransactionalStore;
    use tandem_testkit::MemoryStore;

    #[test]
    fn guard_is_per_owned_identity() {
        let store = MemoryStore::new();
        let mut tx = store.begin();
        let alice = IdentityKey::from_bytes([1; 32]);
        let bob = IdentityKey::from_bytes([2; 32]);
        let signature = Signature(vec![7; 64]);

        assert!(!contains(&mut tx, &alice, &signature).unwrap());
        insert(&mut tx, &alice, &signature).unwrap();
        insert(&mut tx, &alice, &Signature(vec![8; 64])).unwrap();
        insert(&mut tx, &bob, &signature).unwrap();
        assert!(contains(&mut tx, &alice, &signature).unwrap());

        assert_eq!(delete_all(&mut tx, &alice).unwrap(), 2);
        assert!(!contains(&mut tx, &alice, &signature).unwrap());
        assert!(contains(&mut tx, &bob, &signature).unwrap());
    }
}
