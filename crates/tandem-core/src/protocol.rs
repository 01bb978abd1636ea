//! Protocol discriminators
//!
//! The small integers persisted alongside instances and messages. Concrete
//! state and message types live with each protocol in `tandem-engine`.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::TandemError;

/// Which concrete protocol an instance or message belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum ProtocolKind {
    /// Secure channel establishment with a contact device
    ChannelCreation = 0,
    /// Mutual contact verification by scanning each other's codes
    ContactMutualScan = 1,
    /// Legacy owner-centric group management
    GroupManagement = 2,
    /// Administrator-model groups
    GroupV2 = 3,
    /// Cascading deletion of an owned identity
    OwnedIdentityDeletion = 4,
}

impl ProtocolKind {
    /// Every protocol kind, in code order
    pub const ALL: [ProtocolKind; 5] = [
        Self::ChannelCreation,
        Self::ContactMutualScan,
        Self::GroupManagement,
        Self::GroupV2,
        Self::OwnedIdentityDeletion,
    ];

    /// Stable numeric code
    pub fn code(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for ProtocolKind {
    type Error = TandemError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.code() == code)
            .ok_or_else(|| TandemError::invalid(format!("unknown protocol kind {code}")))
    }
}

impl fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ChannelCreation => "channel-creation",
            Self::ContactMutualScan => "contact-mutual-scan",
            Self::GroupManagement => "group-management",
            Self::GroupV2 => "group-v2",
            Self::OwnedIdentityDeletion => "owned-identity-deletion",
        };
        f.write_str(name)
    }
}

/// Discriminator of a protocol state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StateKind(pub u8);

impl fmt::Display for StateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "state-{}", self.0)
    }
}

/// Discriminator of a protocol message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageKind(pub u8);

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "message-{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_kind_codes_are_stable() {
        for kind in ProtocolKind::ALL {
            assert_eq!(ProtocolKind::try_from(kind.code()).unwrap(), kind);
        }
        assert!(ProtocolKind::try_from(200).is_err());
    }
}
