//! Parent/child links between protocol instances
//!
//! A link says: when child instance `child_uid` reaches `expected_child_state`,
//! send `message_kind` to the parent. Several links may name the same child,
//! at the same or different states; each fires once and is then consumed.

use serde::{Deserialize, Serialize};

use tandem_core::{
    IdentityKey, MessageKind, ProtocolInstanceUid, ProtocolKind, Result, StateKind,
    StoreTransaction,
};

use super::{owned_prefix, scan, write};

const FAMILY: &str = "link";

/// Persisted parent interest in a child state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkRecord {
    /// Identity both instances run under
    pub owned_identity: IdentityKey,
    /// Protocol of the parent
    pub parent_kind: ProtocolKind,
    /// Parent instance
    pub parent_uid: ProtocolInstanceUid,
    /// Child instance
    pub child_uid: ProtocolInstanceUid,
    /// Child state that fires the link
    pub expected_child_state: StateKind,
    /// Message sent to the parent when the link fires
    pub message_kind: MessageKind,
}

fn child_prefix(owned: &IdentityKey, child: &ProtocolInstanceUid) -> String {
    format!("{}{}/", owned_prefix(FAMILY, owned), child.uuid())
}

fn key(link: &LinkRecord) -> String {
    format!(
        "{}{}/{}/{}",
        child_prefix(&link.owned_identity, &link.child_uid),
        link.parent_uid.uuid(),
        link.expected_child_state.0,
        link.message_kind.0
    )
}

/// Register a link; returns false if the identical link already exists
pub fn register(tx: &mut dyn StoreTransaction, link: &LinkRecord) -> Result<bool> {
    let key = key(link);
    if tx.contains(&key)? {
        return Ok(false);
    }
    write(tx, &key, link)?;
    Ok(true)
}

/// Links registered on one child
pub fn for_child(
    tx: &mut dyn StoreTransaction,
    owned: &IdentityKey,
    child: &ProtocolInstanceUid,
) -> Result<Vec<LinkRecord>> {
    Ok(scan(tx, &child_prefix(owned, child))?
        .into_iter()
        .map(|(_, link)| link)
        .collect())
}

/// Remove and return every link on `child` waiting for `state`
pub fn take_matching(
    tx: &mut dyn StoreTransaction,
    owned: &IdentityKey,
    child: &ProtocolInstanceUid,
    state: StateKind,
) -> Result<Vec<LinkRecord>> {
    let mut fired = Vec::new();
    for (key, link) in scan::<LinkRecord>(tx, &child_prefix(owned, child))? {
        if link.expected_child_state == state {
            tx.delete(&key)?;
            fired.push(link);
        }
    }
    Ok(fired)
}

/// Drop every link registered by `parent`
pub fn delete_for_parent(
    tx: &mut dyn StoreTransaction,
    owned: &IdentityKey,
    parent: &ProtocolInstanceUid,
) -> Result<usize> {
    let mut deleted = 0;
    for (key, link) in scan::<LinkRecord>(tx, &owned_prefix(FAMILY, owned))? {
        if link.parent_uid == *parent {
            tx.delete(&key)?;
            deleted += 1;
        }
    }
    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_core::TransactionalStore;
    use tandem_testkit::MemoryStore;

    fn link(owned: IdentityKey, parent: ProtocolInstanceUid, child: ProtocolInstanceUid, state: u8) -> LinkRecord {
        LinkRecord {
            owned_identity: owned,
            parent_kind: ProtocolKind::ContactMutualScan,
            parent_uid: parent,
            child_uid: child,
            expected_child_state: StateKind(state),
            message_kind: MessageKind(4),
        }
    }

    #[test]
    fn identical_link_registers_once() {
        let store = MemoryStore::new();
        let mut tx = store.begin();
        let owned = IdentityKey::from_bytes([2; 32]);
        let child = ProtocolInstanceUid::random();
        let first = link(owned, ProtocolInstanceUid::random(), child, 3);
        assert!(register(&mut tx, &first).unwrap());
        assert!(!register(&mut tx, &first).unwrap());
        assert_eq!(for_child(&mut tx, &owned, &child).unwrap(), vec![first]);
    }

    #[test]
    fn only_links_for_the_reached_state_fire() {
        let store = MemoryStore::new();
        let mut tx = store.begin();
        let owned = IdentityKey::from_bytes([2; 32]);
        let child = ProtocolInstanceUid::random();
        let on_confirmed = link(owned, ProtocolInstanceUid::random(), child, 3);
        let on_other = link(owned, ProtocolInstanceUid::random(), child, 1);
        register(&mut tx, &on_confirmed).unwrap();
        register(&mut tx, &on_other).unwrap();

        let fired = take_matching(&mut tx, &owned, &child, StateKind(3)).unwrap();
        assert_eq!(fired, vec![on_confirmed]);
        assert!(take_matching(&mut tx, &owned, &child, StateKind(3)).unwrap().is_empty());
        assert_eq!(for_child(&mut tx, &owned, &child).unwrap(), vec![on_other]);
    }

    #[test]
    fn parent_deletion_drops_its_links_only() {
        let store = MemoryStore::new();
        let mut tx = store.begin();
        let owned = IdentityKey::from_bytes([2; 32]);
        let parent = ProtocolInstanceUid::random();
        let kept = link(owned, ProtocolInstanceUid::random(), ProtocolInstanceUid::random(), 2);
        register(&mut tx, &link(owned, parent, ProtocolInstanceUid::random(), 2)).unwrap();
        register(&mut tx, &link(owned, parent, ProtocolInstanceUid::random(), 3)).unwrap();
        register(&mut tx, &kept).unwrap();

        assert_eq!(delete_for_parent(&mut tx, &owned, &parent).unwrap(), 2);
        assert_eq!(for_child(&mut tx, &owned, &kept.child_uid).unwrap(), vec![kept]);
    }
}
