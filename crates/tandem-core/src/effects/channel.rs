//! Channel and transport effect interface

use crate::errors::Result;
use crate::identifiers::{DeviceUid, IdentityKey, MessageHandle};
use crate::messages::OutboundMessage;
use crate::store::StoreTransaction;

/// Secure channels and message delivery
///
/// `post` only hands the message off; delivery is asynchronous and
/// best-effort at-least-once. Implementations must not block on the network
/// inside the transaction.
pub trait ChannelEffects: Send + Sync {
    /// Hand a message to the transport
    fn post(&self, tx: &mut dyn StoreTransaction, message: OutboundMessage)
        -> Result<MessageHandle>;

    /// Record a confirmed secure channel with a remote device
    fn create_confirmed_channel(
        &self,
        tx: &mut dyn StoreTransaction,
        owned: &IdentityKey,
        remote_identity: &IdentityKey,
        remote_device: &DeviceUid,
    ) -> Result<()>;

    /// Whether a confirmed channel with the remote device exists
    fn has_confirmed_channel(
        &self,
        tx: &mut dyn StoreTransaction,
        owned: &IdentityKey,
        remote_identity: &IdentityKey,
        remote_device: &DeviceUid,
    ) -> Result<bool>;

    /// Sever every channel with a contact's devices, returning how many
    fn delete_channels_with_contact(
        &self,
        tx: &mut dyn StoreTransaction,
        owned: &IdentityKey,
        contact: &IdentityKey,
    ) -> Result<usize>;

    /// Sever every channel of the owned identity, returning how many
    fn delete_all_channels(&self, tx: &mut dyn StoreTransaction, owned: &IdentityKey)
        -> Result<usize>;
}
