//! Recording channel handler
//!
//! `post` appends the outbound message to a transactional outbox instead of
//! touching a network, so a rolled-back step leaves no trace. Tests drain
//! the outbox and deliver messages by hand.

use tandem_core::effects::ChannelEffects;
use tandem_core::{
    DeviceUid, IdentityKey, MessageHandle, OutboundMessage, Result, StoreTransaction, TandemError,
};

const OUTBOX_PREFIX: &str = "transport/outbox/";
const OUTBOX_SEQUENCE: &str = "transport/sequence";

fn channel_prefix(owned: &IdentityKey) -> String {
    format!("transport/channel/{}/", owned.to_hex())
}

fn contact_channel_prefix(owned: &IdentityKey, remote: &IdentityKey) -> String {
    format!("{}{}/", channel_prefix(owned), remote.to_hex())
}

fn channel_key(owned: &IdentityKey, remote: &IdentityKey, device: &DeviceUid) -> String {
    format!("{}{}", contact_channel_prefix(owned, remote), device.uuid())
}

/// Channel handler that records instead of sending
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordingChannels;

impl RecordingChannels {
    /// Create the handler
    pub fn new() -> Self {
        Self
    }

    /// Outbound messages posted so far, in posting order
    pub fn outbox(&self, tx: &mut dyn StoreTransaction) -> Result<Vec<OutboundMessage>> {
        tx.scan_prefix(OUTBOX_PREFIX)?
            .into_iter()
            .map(|(_, bytes)| bincode::deserialize(&bytes).map_err(TandemError::from))
            .collect()
    }

    /// Drain the outbox
    pub fn take_outbox(&self, tx: &mut dyn StoreTransaction) -> Result<Vec<OutboundMessage>> {
        let entries = tx.scan_prefix(OUTBOX_PREFIX)?;
        let mut messages = Vec::with_capacity(entries.len());
        for (key, bytes) in entries {
            tx.delete(&key)?;
            messages.push(bincode::deserialize(&bytes)?);
        }
        Ok(messages)
    }

    /// Remote `(identity, device)` pairs `owned` has a confirmed channel with
    pub fn channels(
        &self,
        tx: &mut dyn StoreTransaction,
        owned: &IdentityKey,
    ) -> Result<Vec<(IdentityKey, DeviceUid)>> {
        tx.scan_prefix(&channel_prefix(owned))?
            .into_iter()
            .map(|(_, bytes)| bincode::deserialize(&bytes).map_err(TandemError::from))
            .collect()
    }

    fn next_sequence(&self, tx: &mut dyn StoreTransaction) -> Result<u64> {
        let current: u64 = match tx.get(OUTBOX_SEQUENCE)? {
            Some(bytes) => bincode::deserialize(&bytes)?,
            None => 0,
        };
        tx.put(OUTBOX_SEQUENCE, bincode::serialize(&(current + 1))?)?;
        Ok(current)
    }
}

impl ChannelEffects for RecordingChannels {
    fn post(
        &self,
        tx: &mut dyn StoreTransaction,
        message: OutboundMessage,
    ) -> Result<MessageHandle> {
        let sequence = self.next_sequence(tx)?;
        tx.put(
            &format!("{OUTBOX_PREFIX}{sequence:020}"),
            bincode::serialize(&message)?,
        )?;
        Ok(MessageHandle::random())
    }

    fn create_confirmed_channel(
        &self,
        tx: &mut dyn StoreTransaction,
        owned: &IdentityKey,
        remote_identity: &IdentityKey,
        remote_device: &DeviceUid,
    ) -> Result<()> {
        tx.put(
            &channel_key(owned, remote_identity, remote_device),
            bincode::serialize(&(*remote_identity, *remote_device))?,
        )
    }

    fn has_confirmed_channel(
        &self,
        tx: &mut dyn StoreTransaction,
        owned: &IdentityKey,
        remote_identity: &IdentityKey,
        remote_device: &DeviceUid,
    ) -> Result<bool> {
        tx.contains(&channel_key(owned, remote_identity, remote_device))
    }

    fn delete_channels_with_contact(
        &self,
        tx: &mut dyn StoreTransaction,
        owned: &IdentityKey,
        contact: &IdentityKey,
    ) -> Result<usize> {
        let keys: Vec<String> = tx
            .scan_prefix(&contact_channel_prefix(owned, contact))?
            .into_iter()
            .map(|(key, _)| key)
            .collect();
        for key in &keys {
            tx.delete(key)?;
        }
        Ok(keys.len())
    }

    fn delete_all_channels(
        &self,
        tx: &mut dyn StoreTransaction,
        owned: &IdentityKey,
    ) -> Result<usize> {
        let keys: Vec<String> = tx
            .scan_prefix(&channel_prefix(owned))?
            .into_iter()
            .map(|(key, _)| key)
            .collect();
        for key in &keys {
            tx.delete(key)?;
        }
        Ok(keys.len())
    }
}
