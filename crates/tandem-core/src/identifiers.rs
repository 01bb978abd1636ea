//! Core identifier types used across the Tandem engine
//!
//! Identities are raw public keys; everything else (devices, protocol
//! instances, messages, groups) is a UUID newtype.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::errors::TandemError;

/// Cryptographic identity of a user (owned or contact)
///
/// Holds the 32-byte public signing key of the identity. Two devices of the
/// same user share one `IdentityKey`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IdentityKey(pub [u8; 32]);

impl IdentityKey {
    /// Create from raw public key bytes
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Raw public key bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex rendering, used in store keys
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IdentityKey({})", &self.to_hex()[..8])
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "identity-{}", &self.to_hex()[..8])
    }
}

impl FromStr for IdentityKey {
    type Err = TandemError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s)
            .map_err(|e| TandemError::invalid(format!("identity key is not hex: {e}")))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| TandemError::invalid("identity key must be 32 bytes"))?;
        Ok(Self(bytes))
    }
}

macro_rules! uuid_identifier {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Create a new random identifier
            pub fn random() -> Self {
                Self(Uuid::new_v4())
            }

            /// Create from a UUID
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Get the inner UUID
            pub fn uuid(&self) -> Uuid {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "-{}"), self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }
    };
}

uuid_identifier!(
    /// One device of an identity
    DeviceUid,
    "device"
);

uuid_identifier!(
    /// Identifier of a protocol instance, unique per owned identity
    ProtocolInstanceUid,
    "protocol"
);

uuid_identifier!(
    /// Identifier of a received protocol message, unique per owned identity
    MessageUid,
    "message"
);

uuid_identifier!(
    /// Identifier of a group (legacy or v2)
    GroupId,
    "group"
);

uuid_identifier!(
    /// Handle returned by the transport when a message is accepted for delivery
    MessageHandle,
    "handle"
);

/// Trust a local identity places in a contact
///
/// Ordered: higher means more trusted. Waiting registries compare against it.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct TrustLevel(pub u8);

impl TrustLevel {
    /// Create a trust level
    pub fn new(level: u8) -> Self {
        Self(level)
    }

    /// Numeric value
    pub fn value(&self) -> u8 {
        self.0
    }
}

impl fmt::Display for TrustLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "trust-{}", self.0)
    }
}

/// Detached signature bytes produced by the challenge collaborator
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Signature(#[serde(with = "serde_bytes")] pub Vec<u8>);

impl Signature {
    /// Wrap raw signature bytes
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Raw signature bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shown = self.0.len().min(8);
        write!(f, "Signature({}..)", hex::encode(&self.0[..shown]))
    }
}
