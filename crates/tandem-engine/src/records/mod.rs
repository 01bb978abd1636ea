//! Durable engine records
//!
//! Every record family is a set of free functions over the ambient
//! `StoreTransaction`; nothing is cached in memory between transactions.
//! Records are bincode-encoded under `protocol/<family>/<owned>/...` keys so
//! each family can be scanned per owned identity.

pub mod inbox;
pub mod instances;
pub mod links;
pub mod replay;
pub mod waiting;

use serde::de::DeserializeOwned;
use serde::Serialize;

use tandem_core::{IdentityKey, Result, StoreTransaction};

pub(crate) fn family_prefix(family: &str) -> String {
    format!("protocol/{family}/")
}

pub(crate) fn owned_prefix(family: &str, owned: &IdentityKey) -> String {
    format!("protocol/{family}/{}/", owned.to_hex())
}

pub(crate) fn write<T: Serialize>(
    tx: &mut dyn StoreTransaction,
    key: &str,
    record: &T,
) -> Result<()> {
    tx.put(key, bincode::serialize(record)?)
}

pub(crate) fn read<T: DeserializeOwned>(
    tx: &mut dyn StoreTransaction,
    key: &str,
) -> Result<Option<T>> {
    match tx.get(key)? {
        Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
        None => Ok(None),
    }
}

pub(crate) fn scan<T: DeserializeOwned>(
    tx: &mut dyn StoreTransaction,
    prefix: &str,
) -> Result<Vec<(String, T)>> {
    tx.scan_prefix(prefix)?
        .into_iter()
        .map(|(key, bytes)| Ok((key, bincode::deserialize(&bytes)?)))
        .collect()
}
