//! Challenge/signature effect interface
//!
//! Signed assertions that are not bound to an authenticated channel are
//! built from a `Challenge`: a domain-separated byte string naming the
//! purpose and the parties, so a signature for one purpose or recipient can
//! never be accepted for another.

use serde::{Deserialize, Serialize};

use crate::errors::Result;
use crate::identifiers::{DeviceUid, IdentityKey, Signature};

/// A challenge an identity signs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Challenge {
    /// `deleted` announces its own deletion to `contact`
    OwnedIdentityDeletion {
        /// Identity being deleted (the signer)
        deleted: IdentityKey,
        /// Contact being told
        contact: IdentityKey,
    },
    /// Code `scanned` displays for `scanner` to scan. `scanner` hands the
    /// signature back as proof, so only `scanned` needs to verify it.
    MutualScan {
        /// Identity allowed to scan
        scanner: IdentityKey,
        /// Identity displaying the code (the signer)
        scanned: IdentityKey,
    },
    /// `initiator` asks `responder` to open a channel with one of its devices
    ChannelCreation {
        /// Initiating identity (the signer)
        initiator: IdentityKey,
        /// Initiating device
        initiator_device: DeviceUid,
        /// Responding identity
        responder: IdentityKey,
    },
}

impl Challenge {
    /// Domain-separated bytes to sign
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(128);
        match self {
            Self::OwnedIdentityDeletion { deleted, contact } => {
                out.extend_from_slice(b"tandem/challenge/owned-identity-deletion");
                out.extend_from_slice(deleted.as_bytes());
                out.extend_from_slice(contact.as_bytes());
            }
            Self::MutualScan { scanner, scanned } => {
                out.extend_from_slice(b"tandem/challenge/mutual-scan");
                out.extend_from_slice(scanner.as_bytes());
                out.extend_from_slice(scanned.as_bytes());
            }
            Self::ChannelCreation {
                initiator,
                initiator_device,
                responder,
            } => {
                out.extend_from_slice(b"tandem/challenge/channel-creation");
                out.extend_from_slice(initiator.as_bytes());
                out.extend_from_slice(initiator_device.uuid().as_bytes());
                out.extend_from_slice(responder.as_bytes());
            }
        }
        out
    }
}

/// Solve and check challenges
pub trait ChallengeEffects: Send + Sync {
    /// Sign `challenge` as `signer` (must be an owned identity)
    fn solve_challenge(&self, challenge: &Challenge, signer: &IdentityKey) -> Result<Signature>;

    /// Whether `signature` is `claimed_signer`'s signature of `challenge`
    fn check_response(
        &self,
        signature: &Signature,
        challenge: &Challenge,
        claimed_signer: &IdentityKey,
    ) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn challenges_are_domain_separated() {
        let a = IdentityKey::from_bytes([1; 32]);
        let b = IdentityKey::from_bytes([2; 32]);
        let deletion = Challenge::OwnedIdentityDeletion {
            deleted: a,
            contact: b,
        };
        let scan = Challenge::MutualScan {
            scanner: a,
            scanned: b,
        };
        assert_ne!(deletion.to_bytes(), scan.to_bytes());

        let swapped = Challenge::OwnedIdentityDeletion {
            deleted: b,
            contact: a,
        };
        assert_ne!(deletion.to_bytes(), swapped.to_bytes());
    }
}
