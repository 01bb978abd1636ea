//! Identity store effect interface
//!
//! Owned identities, contacts and group membership. Every call runs inside
//! the ambient transaction so its mutations commit or roll back together
//! with the protocol step that made them.

use serde::{Deserialize, Serialize};

use crate::errors::Result;
use crate::identifiers::{DeviceUid, GroupId, IdentityKey, TrustLevel};
use crate::store::StoreTransaction;

/// A remote identity known to an owned identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    /// Contact identity
    pub identity: IdentityKey,
    /// Trust placed in the contact
    pub trust_level: TrustLevel,
    /// Whether the contact is a confirmed mutual (one-to-one) contact
    pub one_to_one: bool,
    /// Known devices of the contact
    pub devices: Vec<DeviceUid>,
}

impl Contact {
    /// Contact with no devices, not one-to-one
    pub fn new(identity: IdentityKey, trust_level: TrustLevel) -> Self {
        Self {
            identity,
            trust_level,
            one_to_one: false,
            devices: Vec::new(),
        }
    }
}

/// A legacy group: one owner decides membership
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyGroup {
    /// Group identifier
    pub group_id: GroupId,
    /// Owning identity (possibly the owned identity itself)
    pub owner: IdentityKey,
    /// Members other than the local owned identity
    pub members: Vec<IdentityKey>,
}

/// A v2 group: any administrator may change membership
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupV2 {
    /// Group identifier
    pub group_id: GroupId,
    /// Members other than the local owned identity
    pub members: Vec<IdentityKey>,
    /// Administrators among `members`
    pub admins: Vec<IdentityKey>,
    /// Whether the local owned identity administers the group
    pub is_admin: bool,
}

impl GroupV2 {
    /// Whether `identity` administers the group from our point of view
    pub fn is_administered_by(&self, identity: &IdentityKey) -> bool {
        self.admins.contains(identity) && self.members.contains(identity)
    }
}

/// Identity, contact and group queries and mutations
pub trait IdentityEffects: Send + Sync {
    /// Whether `identity` is owned by this installation
    fn is_owned(&self, tx: &mut dyn StoreTransaction, identity: &IdentityKey) -> Result<bool>;

    /// Device of this installation for `owned`
    fn current_device(
        &self,
        tx: &mut dyn StoreTransaction,
        owned: &IdentityKey,
    ) -> Result<DeviceUid>;

    /// Other devices of `owned`
    fn other_owned_devices(
        &self,
        tx: &mut dyn StoreTransaction,
        owned: &IdentityKey,
    ) -> Result<Vec<DeviceUid>>;

    /// Delete the owned identity and whatever the store still keeps for it
    fn delete_owned_identity(&self, tx: &mut dyn StoreTransaction, owned: &IdentityKey)
        -> Result<()>;

    /// One contact
    fn contact(
        &self,
        tx: &mut dyn StoreTransaction,
        owned: &IdentityKey,
        contact: &IdentityKey,
    ) -> Result<Option<Contact>>;

    /// Every contact of `owned`
    fn contacts(&self, tx: &mut dyn StoreTransaction, owned: &IdentityKey) -> Result<Vec<Contact>>;

    /// Insert or replace a contact
    fn upsert_contact(
        &self,
        tx: &mut dyn StoreTransaction,
        owned: &IdentityKey,
        contact: Contact,
    ) -> Result<()>;

    /// Delete a contact, returning whether it existed
    fn delete_contact(
        &self,
        tx: &mut dyn StoreTransaction,
        owned: &IdentityKey,
        contact: &IdentityKey,
    ) -> Result<bool>;

    /// One legacy group
    fn legacy_group(
        &self,
        tx: &mut dyn StoreTransaction,
        owned: &IdentityKey,
        group_id: &GroupId,
    ) -> Result<Option<LegacyGroup>>;

    /// Every legacy group `owned` owns or belongs to
    fn legacy_groups(
        &self,
        tx: &mut dyn StoreTransaction,
        owned: &IdentityKey,
    ) -> Result<Vec<LegacyGroup>>;

    /// Insert or replace a legacy group
    fn upsert_legacy_group(
        &self,
        tx: &mut dyn StoreTransaction,
        owned: &IdentityKey,
        group: LegacyGroup,
    ) -> Result<()>;

    /// Delete a legacy group locally, returning whether it existed
    fn delete_legacy_group(
        &self,
        tx: &mut dyn StoreTransaction,
        owned: &IdentityKey,
        group_id: &GroupId,
    ) -> Result<bool>;

    /// One v2 group
    fn group_v2(
        &self,
        tx: &mut dyn StoreTransaction,
        owned: &IdentityKey,
        group_id: &GroupId,
    ) -> Result<Option<GroupV2>>;

    /// Every v2 group `owned` belongs to
    fn groups_v2(&self, tx: &mut dyn StoreTransaction, owned: &IdentityKey)
        -> Result<Vec<GroupV2>>;

    /// Insert or replace a v2 group
    fn upsert_group_v2(
        &self,
        tx: &mut dyn StoreTransaction,
        owned: &IdentityKey,
        group: GroupV2,
    ) -> Result<()>;

    /// Delete a v2 group locally, returning whether it existed
    fn delete_group_v2(
        &self,
        tx: &mut dyn StoreTransaction,
        owned: &IdentityKey,
        group_id: &GroupId,
    ) -> Result<bool>;
}

/// Remove `member` from a legacy group, returning whether it was a member
pub fn remove_legacy_group_member(
    identity: &dyn IdentityEffects,
    tx: &mut dyn StoreTransaction,
    owned: &IdentityKey,
    group_id: &GroupId,
    member: &IdentityKey,
) -> Result<bool> {
    let Some(mut group) = identity.legacy_group(tx, owned, group_id)? else {
        return Ok(false);
    };
    let before = group.members.len();
    group.members.retain(|m| m != member);
    if group.members.len() == before {
        return Ok(false);
    }
    identity.upsert_legacy_group(tx, owned, group)?;
    Ok(true)
}

/// Remove `member` from a v2 group, returning whether it was a member
pub fn remove_group_v2_member(
    identity: &dyn IdentityEffects,
    tx: &mut dyn StoreTransaction,
    owned: &IdentityKey,
    group_id: &GroupId,
    member: &IdentityKey,
) -> Result<bool> {
    let Some(mut group) = identity.group_v2(tx, owned, group_id)? else {
        return Ok(false);
    };
    let before = group.members.len();
    group.members.retain(|m| m != member);
    if group.members.len() == before {
        return Ok(false);
    }
    group.admins.retain(|m| m != member);
    identity.upsert_group_v2(tx, owned, group)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn administrator_must_still_be_a_member() {
        let admin = IdentityKey::from_bytes([1; 32]);
        let member = IdentityKey::from_bytes([2; 32]);
        let mut group = GroupV2 {
            group_id: GroupId::random(),
            members: vec![admin, member],
            admins: vec![admin],
            is_admin: false,
        };
        assert!(group.is_administered_by(&admin));
        assert!(!group.is_administered_by(&member));

        group.members.retain(|m| *m != admin);
        assert!(!group.is_administered_by(&admin));
    }
}
