//! In-memory identity store
//!
//! Stateless handler: everything lives in the ambient transaction under
//! `identity/<owned_hex>/...`, so identity mutations commit and roll back
//! with the protocol step that made them.

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use tandem_core::effects::{Contact, GroupV2, IdentityEffects, LegacyGroup};
use tandem_core::{DeviceUid, GroupId, IdentityKey, Result, StoreTransaction, TandemError};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OwnedIdentityRecord {
    current_device: DeviceUid,
    other_devices: Vec<DeviceUid>,
}

fn owned_key(owned: &IdentityKey) -> String {
    format!("identity/{}/owned", owned.to_hex())
}

fn contact_prefix(owned: &IdentityKey) -> String {
    format!("identity/{}/contact/", owned.to_hex())
}

fn contact_key(owned: &IdentityKey, contact: &IdentityKey) -> String {
    format!("{}{}", contact_prefix(owned), contact.to_hex())
}

fn legacy_group_prefix(owned: &IdentityKey) -> String {
    format!("identity/{}/legacy_group/", owned.to_hex())
}

fn legacy_group_key(owned: &IdentityKey, group_id: &GroupId) -> String {
    format!("{}{}", legacy_group_prefix(owned), group_id.uuid())
}

fn group_v2_prefix(owned: &IdentityKey) -> String {
    format!("identity/{}/group_v2/", owned.to_hex())
}

fn group_v2_key(owned: &IdentityKey, group_id: &GroupId) -> String {
    format!("{}{}", group_v2_prefix(owned), group_id.uuid())
}

fn read<T: DeserializeOwned>(tx: &mut dyn StoreTransaction, key: &str) -> Result<Option<T>> {
    tx.get(key)?
        .map(|bytes| bincode::deserialize(&bytes).map_err(TandemError::from))
        .transpose()
}

fn write<T: Serialize>(tx: &mut dyn StoreTransaction, key: &str, value: &T) -> Result<()> {
    tx.put(key, bincode::serialize(value)?)
}

fn scan<T: DeserializeOwned>(tx: &mut dyn StoreTransaction, prefix: &str) -> Result<Vec<T>> {
    tx.scan_prefix(prefix)?
        .into_iter()
        .map(|(_, bytes)| bincode::deserialize(&bytes).map_err(TandemError::from))
        .collect()
}

/// Identity handler backed by the ambient transaction
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryIdentityStore;

impl MemoryIdentityStore {
    /// Create the handler
    pub fn new() -> Self {
        Self
    }

    /// Register an owned identity with its devices
    pub fn add_owned_identity(
        &self,
        tx: &mut dyn StoreTransaction,
        owned: &IdentityKey,
        current_device: DeviceUid,
        other_devices: Vec<DeviceUid>,
    ) -> Result<()> {
        write(
            tx,
            &owned_key(owned),
            &OwnedIdentityRecord {
                current_device,
                other_devices,
            },
        )
    }

    fn owned_record(
        &self,
        tx: &mut dyn StoreTransaction,
        owned: &IdentityKey,
    ) -> Result<OwnedIdentityRecord> {
        read(tx, &owned_key(owned))?
            .ok_or_else(|| TandemError::not_found(format!("owned identity {owned}")))
    }
}

impl IdentityEffects for MemoryIdentityStore {
    fn is_owned(&self, tx: &mut dyn StoreTransaction, identity: &IdentityKey) -> Result<bool> {
        tx.contains(&owned_key(identity))
    }

    fn current_device(
        &self,
        tx: &mut dyn StoreTransaction,
        owned: &IdentityKey,
    ) -> Result<DeviceUid> {
        Ok(self.owned_record(tx, owned)?.current_device)
    }

    fn other_owned_devices(
        &self,
        tx: &mut dyn StoreTransaction,
        owned: &IdentityKey,
    ) -> Result<Vec<DeviceUid>> {
        Ok(self.owned_record(tx, owned)?.other_devices)
    }

    fn delete_owned_identity(
        &self,
        tx: &mut dyn StoreTransaction,
        owned: &IdentityKey,
    ) -> Result<()> {
        if !tx.delete(&owned_key(owned))? {
            return Err(TandemError::not_found(format!("owned identity {owned}")));
        }
        Ok(())
    }

    fn contact(
        &self,
        tx: &mut dyn StoreTransaction,
        owned: &IdentityKey,
        contact: &IdentityKey,
    ) -> Result<Option<Contact>> {
        read(tx, &contact_key(owned, contact))
    }

    fn contacts(&self, tx: &mut dyn StoreTransaction, owned: &IdentityKey) -> Result<Vec<Contact>> {
        scan(tx, &contact_prefix(owned))
    }

    fn upsert_contact(
        &self,
        tx: &mut dyn StoreTransaction,
        owned: &IdentityKey,
        contact: Contact,
    ) -> Result<()> {
        write(tx, &contact_key(owned, &contact.identity), &contact)
    }

    fn delete_contact(
        &self,
        tx: &mut dyn StoreTransaction,
        owned: &IdentityKey,
        contact: &IdentityKey,
    ) -> Result<bool> {
        tx.delete(&contact_key(owned, contact))
    }

    fn legacy_group(
        &self,
        tx: &mut dyn StoreTransaction,
        owned: &IdentityKey,
        group_id: &GroupId,
    ) -> Result<Option<LegacyGroup>> {
        read(tx, &legacy_group_key(owned, group_id))
    }

    fn legacy_groups(
        &self,
        tx: &mut dyn StoreTransaction,
        owned: &IdentityKey,
    ) -> Result<Vec<LegacyGroup>> {
        scan(tx, &legacy_group_prefix(owned))
    }

    fn upsert_legacy_group(
        &self,
        tx: &mut dyn StoreTransaction,
        owned: &IdentityKey,
        group: LegacyGroup,
    ) -> Result<()> {
        write(tx, &legacy_group_key(owned, &group.group_id), &group)
    }

    fn delete_legacy_group(
        &self,
        tx: &mut dyn StoreTransaction,
        owned: &IdentityKey,
        group_id: &GroupId,
    ) -> Result<bool> {
        tx.delete(&legacy_group_key(owned, group_id))
    }

    fn group_v2(
        &self,
        tx: &mut dyn StoreTransaction,
        owned: &IdentityKey,
        group_id: &GroupId,
    ) -> Result<Option<GroupV2>> {
        read(tx, &group_v2_key(owned, group_id))
    }

    fn groups_v2(
        &self,
        tx: &mut dyn StoreTransaction,
        owned: &IdentityKey,
    ) -> Result<Vec<GroupV2>> {
        scan(tx, &group_v2_prefix(owned))
    }

    fn upsert_group_v2(
        &self,
        tx: &mut dyn StoreTransaction,
        owned: &IdentityKey,
        group: GroupV2,
    ) -> Result<()> {
        write(tx, &group_v2_key(owned, &group.group_id), &group)
    }

    fn delete_group_v2(
        &self,
        tx: &mut dyn StoreTransaction,
        owned: &IdentityKey,
        group_id: &GroupId,
    ) -> Result<bool> {
        tx.delete(&group_v2_key(owned, group_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use tandem_core::{TransactionalStore, TrustLevel};

    #[test]
    fn contacts_are_scoped_per_owned_identity() {
        let store = MemoryStore::new();
        let identity = MemoryIdentityStore::new();
        let alice = IdentityKey::from_bytes([1; 32]);
        let bob = IdentityKey::from_bytes([2; 32]);
        let carol = IdentityKey::from_bytes([3; 32]);

        let mut tx = store.begin();
        identity
            .add_owned_identity(&mut tx, &alice, DeviceUid::random(), vec![])
            .unwrap();
        identity
            .upsert_contact(&mut tx, &alice, Contact::new(carol, TrustLevel::new(2)))
            .unwrap();
        store.commit(tx).unwrap();

        let mut tx = store.begin();
        assert!(identity.is_owned(&mut tx, &alice).unwrap());
        assert!(!identity.is_owned(&mut tx, &bob).unwrap());
        assert_eq!(identity.contacts(&mut tx, &alice).unwrap().len(), 1);
        assert!(identity.contacts(&mut tx, &bob).unwrap().is_empty());
        assert!(identity.delete_contact(&mut tx, &alice, &carol).unwrap());
        assert!(!identity.delete_contact(&mut tx, &alice, &carol).unwrap());
    }

    #[test]
    fn deleting_unknown_owned_identity_fails() {
        let store = MemoryStore::new();
        let mut tx = store.begin();
        let err = MemoryIdentityStore::new()
            .delete_owned_identity(&mut tx, &IdentityKey::from_bytes([9; 32]))
            .unwrap_err();
        assert!(matches!(err, TandemError::NotFound { .. }));
    }
}
