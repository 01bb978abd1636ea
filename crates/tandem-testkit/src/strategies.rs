//! Property test strategies for Tandem types
//!
//! Identifiers are derived from small integer seeds through blake3, so
//! shrunk failures stay readable and reproducible.

use proptest::prelude::*;

pub use proptest;

use tandem_core::{DeviceUid, Encoded, GroupId, IdentityKey, MessageUid, TrustLevel};
use uuid::Uuid;

fn seeded_uuid(domain: &str, seed: u64) -> Uuid {
    let hash = blake3::hash(format!("{domain}-{seed}").as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&hash.as_bytes()[..16]);
    Uuid::from_bytes(bytes)
}

/// Strategy for deterministic identity keys
///
/// These are not valid Ed25519 keys; use `Ed25519Challenges` when a test
/// needs signatures.
pub fn arb_identity_key() -> impl Strategy<Value = IdentityKey> {
    (0u64..10000).prop_map(|seed| {
        IdentityKey::from_bytes(*blake3::hash(format!("identity-{seed}").as_bytes()).as_bytes())
    })
}

/// Strategy for deterministic device uids
pub fn arb_device_uid() -> impl Strategy<Value = DeviceUid> {
    (0u64..10000).prop_map(|seed| DeviceUid::from_uuid(seeded_uuid("device", seed)))
}

/// Strategy for deterministic group ids
pub fn arb_group_id() -> impl Strategy<Value = GroupId> {
    (0u64..10000).prop_map(|seed| GroupId::from_uuid(seeded_uuid("group", seed)))
}

/// Strategy for deterministic message uids
pub fn arb_message_uid() -> impl Strategy<Value = MessageUid> {
    (0u64..10000).prop_map(|seed| MessageUid::from_uuid(seeded_uuid("message", seed)))
}

/// Strategy for trust levels
pub fn arb_trust_level() -> impl Strategy<Value = TrustLevel> {
    (0u8..=5).prop_map(TrustLevel::new)
}

/// Strategy for arbitrary argument lists, mostly garbage
pub fn arb_arguments(max_len: usize) -> impl Strategy<Value = Vec<Encoded>> {
    prop::collection::vec(prop::collection::vec(any::<u8>(), 0..48), 0..=max_len)
        .prop_map(|raw| raw.into_iter().map(Encoded).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn identity_keys_are_stable(seed in 0u64..100) {
            let a = IdentityKey::from_bytes(*blake3::hash(format!("identity-{seed}").as_bytes()).as_bytes());
            let b = IdentityKey::from_bytes(*blake3::hash(format!("identity-{seed}").as_bytes()).as_bytes());
            prop_assert_eq!(a, b);
        }

        #[test]
        fn argument_lists_respect_bound(args in arb_arguments(4)) {
            prop_assert!(args.len() <= 4);
        }
    }
}
