//! Waiting-condition registries
//!
//! A waiting record parks a protocol instance until a contact satisfies a
//! condition. Two registries share the record shape: one waits for a trust
//! level, the other for the contact to become a one-to-one contact. Nothing
//! polls them; whoever changes a contact's trust calls `take_satisfied`.

use serde::{Deserialize, Serialize};

use tandem_core::{
    IdentityKey, MessageKind, ProtocolInstanceUid, ProtocolKind, Result, StoreTransaction,
    TrustLevel,
};

use super::{owned_prefix, scan, write};

const FAMILY: &str = "waiting";

/// What the instance waits for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WaitingCondition {
    /// Contact trust at least this level
    TrustLevelAtLeast(TrustLevel),
    /// Contact is one-to-one and trusted at least this level
    OneToOneUpgrade {
        /// Trust the contact must also have
        min_trust_level: TrustLevel,
    },
}

impl WaitingCondition {
    fn registry(&self) -> &'static str {
        match self {
            Self::TrustLevelAtLeast(_) => "trust",
            Self::OneToOneUpgrade { .. } => "upgrade",
        }
    }

    /// Whether a contact at `level` / `one_to_one` satisfies the condition
    pub fn is_satisfied(&self, level: TrustLevel, one_to_one: bool) -> bool {
        match self {
            Self::TrustLevelAtLeast(target) => *target <= level,
            Self::OneToOneUpgrade { min_trust_level } => one_to_one && *min_trust_level <= level,
        }
    }
}

/// Persisted waiting record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitingRecord {
    /// Identity the waiting instance runs under
    pub owned_identity: IdentityKey,
    /// Contact the condition is about
    pub contact: IdentityKey,
    /// Protocol of the waiting instance
    pub protocol_kind: ProtocolKind,
    /// Waiting instance
    pub instance_uid: ProtocolInstanceUid,
    /// Condition to satisfy
    pub condition: WaitingCondition,
    /// Message posted to the instance once satisfied
    pub message_kind: MessageKind,
}

const REGISTRIES: [&str; 2] = ["trust", "upgrade"];

fn contact_prefix(owned: &IdentityKey, registry: &str, contact: &IdentityKey) -> String {
    format!("{}{registry}/{}/", owned_prefix(FAMILY, owned), contact.to_hex())
}

fn key(record: &WaitingRecord) -> String {
    format!(
        "{}{}/{}",
        contact_prefix(
            &record.owned_identity,
            record.condition.registry(),
            &record.contact
        ),
        record.instance_uid.uuid(),
        record.message_kind.0
    )
}

/// Register (or replace) a waiting record
pub fn register(tx: &mut dyn StoreTransaction, record: &WaitingRecord) -> Result<()> {
    write(tx, &key(record), record)
}

/// Records about `contact`, in both registries
pub fn for_contact(
    tx: &mut dyn StoreTransaction,
    owned: &IdentityKey,
    contact: &IdentityKey,
) -> Result<Vec<WaitingRecord>> {
    let mut records = Vec::new();
    for registry in REGISTRIES {
        records.extend(
            scan::<WaitingRecord>(tx, &contact_prefix(owned, registry, contact))?
                .into_iter()
                .map(|(_, record)| record),
        );
    }
    Ok(records)
}

/// Remove and return every record about `contact` that the new trust level
/// and one-to-one flag satisfy
pub fn take_satisfied(
    tx: &mut dyn StoreTransaction,
    owned: &IdentityKey,
    contact: &IdentityKey,
    level: TrustLevel,
    one_to_one: bool,
) -> Result<Vec<WaitingRecord>> {
    let mut satisfied = Vec::new();
    for registry in REGISTRIES {
        for (key, record) in scan::<WaitingRecord>(tx, &contact_prefix(owned, registry, contact))? {
            if record.condition.is_satisfied(level, one_to_one) {
                tx.delete(&key)?;
                satisfied.push(record);
            }
        }
    }
    Ok(satisfied)
}

/// Drop every record registered for `instance`
pub fn delete_for_instance(
    tx: &mut dyn StoreTransaction,
    owned: &IdentityKey,
    instance: &ProtocolInstanceUid,
) -> Result<usize> {
    let mut deleted = 0;
    for (key, record) in scan::<WaitingRecord>(tx, &owned_prefix(FAMILY, owned))? {
        if record.instance_uid == *instance {
            tx.delete(&key)?;
            deleted += 1;
        }
    }
    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trust_condition_uses_at_least() {
        let condition = WaitingCondition::TrustLevelAtLeast(TrustLevel::new(3));
        assert!(!condition.is_satisfied(TrustLevel::new(2), true));
        assert!(condition.is_satisfied(TrustLevel::new(3), false));
        assert!(condition.is_satisfied(TrustLevel::new(5), false));
    }

    #[test]
    fn upgrade_condition_needs_both_flags() {
        let condition = WaitingCondition::OneToOneUpgrade {
            min_trust_level: TrustLevel::new(1),
        };
        assert!(!condition.is_satisfied(TrustLevel::new(4), false));
        assert!(!condition.is_satisfied(TrustLevel::new(0), true));
        assert!(condition.is_satisfied(TrustLevel::new(1), true));
    }
}
