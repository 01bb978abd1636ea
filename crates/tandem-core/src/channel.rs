//! Channel provenance and emission targets
//!
//! `ReceptionChannelInfo` records how a message reached us. Steps declare a
//! `ChannelRequirement`; the dispatcher refuses to run a step whose
//! requirement the provenance does not meet.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::identifiers::{DeviceUid, IdentityKey};

/// How an inbound message arrived
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReceptionChannelInfo {
    /// Posted by this device to itself
    Local,
    /// Unauthenticated broadcast addressed to an identity; only signed
    /// identity-to-identity assertions travel this way
    AsymmetricBroadcast,
    /// Authenticated secure channel with one remote device
    ObliviousChannel {
        /// Identity owning the remote device
        remote_identity: IdentityKey,
        /// The remote device
        remote_device: DeviceUid,
        /// Whether the channel is known to be confirmed on both ends
        confirmed: bool,
    },
}

impl ReceptionChannelInfo {
    /// Remote identity of an oblivious channel, if any
    pub fn remote_identity(&self) -> Option<&IdentityKey> {
        match self {
            Self::ObliviousChannel {
                remote_identity, ..
            } => Some(remote_identity),
            _ => None,
        }
    }

    /// Remote device of an oblivious channel, if any
    pub fn remote_device(&self) -> Option<DeviceUid> {
        match self {
            Self::ObliviousChannel { remote_device, .. } => Some(*remote_device),
            _ => None,
        }
    }

    /// Whether the message was posted locally
    pub fn is_local(&self) -> bool {
        matches!(self, Self::Local)
    }
}

/// Channel class a step accepts its triggering message from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelRequirement {
    /// Local loopback only
    Local,
    /// Confirmed secure channel with a device of some other identity
    ContactDevice,
    /// Confirmed secure channel with another device of the owned identity
    OwnedDevice,
    /// Unauthenticated broadcast
    AsymmetricBroadcast,
}

impl ChannelRequirement {
    /// Whether `info` satisfies this requirement for `owned_identity`
    pub fn accepts(&self, info: &ReceptionChannelInfo, owned_identity: &IdentityKey) -> bool {
        match (self, info) {
            (Self::Local, ReceptionChannelInfo::Local) => true,
            (Self::AsymmetricBroadcast, ReceptionChannelInfo::AsymmetricBroadcast) => true,
            (
                Self::ContactDevice,
                ReceptionChannelInfo::ObliviousChannel {
                    remote_identity,
                    confirmed,
                    ..
                },
            ) => *confirmed && remote_identity != owned_identity,
            (
                Self::OwnedDevice,
                ReceptionChannelInfo::ObliviousChannel {
                    remote_identity,
                    confirmed,
                    ..
                },
            ) => *confirmed && remote_identity == owned_identity,
            _ => false,
        }
    }
}

impl fmt::Display for ChannelRequirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Local => "local",
            Self::ContactDevice => "contact-device",
            Self::OwnedDevice => "owned-device",
            Self::AsymmetricBroadcast => "asymmetric-broadcast",
        };
        f.write_str(name)
    }
}

/// Where an emitted message should be delivered
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SendChannelTarget {
    /// Loop back into this device's inbox
    Local,
    /// Unauthenticated broadcast to every device of an identity
    AsymmetricBroadcast {
        /// Recipient identity
        to_identity: IdentityKey,
    },
    /// Every secure channel with a contact's devices
    AllContactDevices {
        /// Recipient contact
        contact: IdentityKey,
    },
    /// The secure channel with one contact device
    ContactDevice {
        /// Recipient contact
        contact: IdentityKey,
        /// Recipient device
        device: DeviceUid,
    },
    /// Every secure channel with the owned identity's other devices
    AllOwnedDevices,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn oblivious(remote: IdentityKey, confirmed: bool) -> ReceptionChannelInfo {
        ReceptionChannelInfo::ObliviousChannel {
            remote_identity: remote,
            remote_device: DeviceUid::random(),
            confirmed,
        }
    }

    #[test]
    fn broadcast_never_satisfies_authenticated_requirements() {
        let owned = IdentityKey::from_bytes([1; 32]);
        let info = ReceptionChannelInfo::AsymmetricBroadcast;
        assert!(!ChannelRequirement::ContactDevice.accepts(&info, &owned));
        assert!(!ChannelRequirement::OwnedDevice.accepts(&info, &owned));
        assert!(!ChannelRequirement::Local.accepts(&info, &owned));
        assert!(ChannelRequirement::AsymmetricBroadcast.accepts(&info, &owned));
    }

    #[test]
    fn oblivious_channels_split_by_remote_identity() {
        let owned = IdentityKey::from_bytes([1; 32]);
        let contact = IdentityKey::from_bytes([2; 32]);
        assert!(ChannelRequirement::ContactDevice.accepts(&oblivious(contact, true), &owned));
        assert!(!ChannelRequirement::ContactDevice.accepts(&oblivious(owned, true), &owned));
        assert!(ChannelRequirement::OwnedDevice.accepts(&oblivious(owned, true), &owned));
        assert!(!ChannelRequirement::ContactDevice.accepts(&oblivious(contact, false), &owned));
    }
}
