//! Simulated installations
//!
//! `TestInstallation` bundles one store with the in-memory collaborators and
//! seeds owned identities, contacts and groups in committed transactions.

use std::sync::Arc;

use tandem_core::effects::{Contact, GroupV2, IdentityEffects, LegacyGroup};
use tandem_core::{
    DeviceUid, GroupId, IdentityKey, OutboundMessage, Result, StoreTransaction, TransactionalStore,
    TrustLevel,
};

use crate::challenges::Ed25519Challenges;
use crate::channels::RecordingChannels;
use crate::identity::MemoryIdentityStore;
use crate::store::{MemoryStore, MemoryTransaction};

/// One simulated device with its store and collaborators
#[derive(Debug, Clone)]
pub struct TestInstallation {
    /// Backing store
    pub store: MemoryStore,
    /// Identity handler
    pub identity: Arc<MemoryIdentityStore>,
    /// Channel handler
    pub channels: Arc<RecordingChannels>,
    /// Challenge handler; share one across installations so each can
    /// verify the others
    pub challenges: Arc<Ed25519Challenges>,
}

impl TestInstallation {
    /// Fresh installation using the given challenge handler
    pub fn new(challenges: Arc<Ed25519Challenges>) -> Self {
        Self {
            store: MemoryStore::new(),
            identity: Arc::new(MemoryIdentityStore::new()),
            channels: Arc::new(RecordingChannels::new()),
            challenges,
        }
    }

    /// Run `f` in a transaction and commit it
    pub fn with_tx<T>(&self, f: impl FnOnce(&mut MemoryTransaction) -> Result<T>) -> Result<T> {
        let mut tx = self.store.begin();
        let value = f(&mut tx)?;
        self.store.commit(tx)?;
        Ok(value)
    }

    /// Generate and register an owned identity; returns it with its device
    pub fn add_owned_identity(
        &self,
        label: &str,
        other_devices: Vec<DeviceUid>,
    ) -> Result<(IdentityKey, DeviceUid)> {
        let owned = self.challenges.identity_for(label);
        let device = DeviceUid::random();
        self.with_tx(|tx| {
            self.identity
                .add_owned_identity(tx, &owned, device, other_devices)
        })?;
        Ok((owned, device))
    }

    /// Add a contact with a confirmed channel to each of its devices
    pub fn add_contact(
        &self,
        owned: &IdentityKey,
        contact: &IdentityKey,
        trust_level: TrustLevel,
        one_to_one: bool,
        devices: Vec<DeviceUid>,
    ) -> Result<()> {
        use tandem_core::effects::ChannelEffects;
        self.with_tx(|tx| {
            for device in &devices {
                self.channels
                    .create_confirmed_channel(tx, owned, contact, device)?;
            }
            self.identity.upsert_contact(
                tx,
                owned,
                Contact {
                    identity: *contact,
                    trust_level,
                    one_to_one,
                    devices,
                },
            )
        })
    }

    /// Add a legacy group
    pub fn add_legacy_group(
        &self,
        owned: &IdentityKey,
        owner: IdentityKey,
        members: Vec<IdentityKey>,
    ) -> Result<GroupId> {
        let group_id = GroupId::random();
        self.with_tx(|tx| {
            self.identity.upsert_legacy_group(
                tx,
                owned,
                LegacyGroup {
                    group_id,
                    owner,
                    members,
                },
            )
        })?;
        Ok(group_id)
    }

    /// Add a v2 group administered by `admins` (and by us when `is_admin`)
    pub fn add_group_v2(
        &self,
        owned: &IdentityKey,
        members: Vec<IdentityKey>,
        admins: Vec<IdentityKey>,
        is_admin: bool,
    ) -> Result<GroupId> {
        let group_id = GroupId::random();
        self.with_tx(|tx| {
            self.identity.upsert_group_v2(
                tx,
                owned,
                GroupV2 {
                    group_id,
                    members,
                    admins,
                    is_admin,
                },
            )
        })?;
        Ok(group_id)
    }

    /// Read a contact
    pub fn contact(&self, owned: &IdentityKey, contact: &IdentityKey) -> Result<Option<Contact>> {
        self.read(|tx| self.identity.contact(tx, owned, contact))
    }

    /// Drain messages the installation posted to the transport
    pub fn take_outbox(&self) -> Result<Vec<OutboundMessage>> {
        self.with_tx(|tx| self.channels.take_outbox(tx))
    }

    /// Run `f` in a transaction that is discarded
    pub fn read<T>(&self, f: impl FnOnce(&mut dyn StoreTransaction) -> Result<T>) -> Result<T> {
        let mut tx = self.store.begin();
        f(&mut tx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeding_is_committed() {
        let installation = TestInstallation::new(Arc::new(Ed25519Challenges::new()));
        let (alice, _) = installation.add_owned_identity("alice", vec![]).unwrap();
        let bob = installation.challenges.identity_for("bob");
        let bob_device = DeviceUid::random();
        installation
            .add_contact(&alice, &bob, TrustLevel::new(3), true, vec![bob_device])
            .unwrap();

        let contact = installation.contact(&alice, &bob).unwrap().unwrap();
        assert_eq!(contact.trust_level, TrustLevel::new(3));
        let channels = installation
            .read(|tx| installation.channels.channels(tx, &alice))
            .unwrap();
        assert_eq!(channels, vec![(bob, bob_device)]);
    }
}
