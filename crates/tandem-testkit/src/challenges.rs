//! Ed25519 challenge handler
//!
//! Identity keys are Ed25519 verifying keys. The handler keeps the signing
//! keys of every identity it generated, so one instance can sign on behalf
//! of every simulated installation in a test.

use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use parking_lot::RwLock;
use std::collections::HashMap;

use tandem_core::effects::{Challenge, ChallengeEffects};
use tandem_core::{IdentityKey, Result, Signature, TandemError};

/// Challenge handler holding test signing keys
#[derive(Debug, Default)]
pub struct Ed25519Challenges {
    keys: RwLock<HashMap<IdentityKey, SigningKey>>,
}

impl Ed25519Challenges {
    /// Create a handler with no keys
    pub fn new() -> Self {
        Self::default()
    }

    /// Deterministically generate an identity from a seed and keep its key
    pub fn generate_identity(&self, seed: [u8; 32]) -> IdentityKey {
        let signing_key = SigningKey::from_bytes(&seed);
        let identity = IdentityKey::from_bytes(signing_key.verifying_key().to_bytes());
        self.keys.write().insert(identity, signing_key);
        identity
    }

    /// Generate an identity from a label
    pub fn identity_for(&self, label: &str) -> IdentityKey {
        self.generate_identity(*blake3::hash(label.as_bytes()).as_bytes())
    }
}

impl ChallengeEffects for Ed25519Challenges {
    fn solve_challenge(&self, challenge: &Challenge, signer: &IdentityKey) -> Result<Signature> {
        let keys = self.keys.read();
        let signing_key = keys
            .get(signer)
            .ok_or_else(|| TandemError::crypto(format!("no signing key for {signer}")))?;
        let signature = signing_key.sign(&challenge.to_bytes());
        Ok(Signature::from_bytes(signature.to_bytes().to_vec()))
    }

    fn check_response(
        &self,
        signature: &Signature,
        challenge: &Challenge,
        claimed_signer: &IdentityKey,
    ) -> bool {
        let Ok(verifying_key) = VerifyingKey::from_bytes(claimed_signer.as_bytes()) else {
            return false;
        };
        let Ok(signature) = ed25519_dalek::Signature::from_slice(signature.as_bytes()) else {
            return false;
        };
        verifying_key
            .verify(&challenge.to_bytes(), &signature)
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_binds_signer_and_challenge() {
        let challenges = Ed25519Challenges::new();
        let alice = challenges.identity_for("alice");
        let bob = challenges.identity_for("bob");
        let challenge = Challenge::MutualScan {
            scanner: alice,
            scanned: bob,
        };
        let signature = challenges.solve_challenge(&challenge, &alice).unwrap();

        assert!(challenges.check_response(&signature, &challenge, &alice));
        assert!(!challenges.check_response(&signature, &challenge, &bob));

        let other = Challenge::MutualScan {
            scanner: bob,
            scanned: alice,
        };
        assert!(!challenges.check_response(&signature, &other, &alice));
    }

    #[test]
    fn garbage_signature_is_rejected() {
        let challenges = Ed25519Challenges::new();
        let alice = challenges.identity_for("alice");
        let challenge = Challenge::OwnedIdentityDeletion {
            deleted: alice,
            contact: challenges.identity_for("bob"),
        };
        assert!(!challenges.check_response(
            &Signature::from_bytes(vec![7; 5]),
            &challenge,
            &alice
        ));
    }

    #[test]
    fn unknown_signer_cannot_sign() {
        let challenges = Ed25519Challenges::new();
        let stranger = IdentityKey::from_bytes([4; 32]);
        let challenge = Challenge::MutualScan {
            scanner: stranger,
            scanned: stranger,
        };
        assert!(challenges.solve_challenge(&challenge, &stranger).is_err());
    }
}
