//! Protocol instance store
//!
//! One record per running protocol instance, keyed by `(owned identity,
//! uid)`. The state discriminator and payload are always written together.
//! Deleting an instance also deletes what only makes sense while it runs:
//! its queued messages, the links it registered as a parent and its waiting
//! records.

use serde::{Deserialize, Serialize};

use tandem_core::{
    now_ms, Encoded, IdentityKey, ProtocolInstanceUid, ProtocolKind, Result, StateKind,
    StoreTransaction, TandemError,
};

use super::{family_prefix, inbox, links, owned_prefix, read, scan, waiting, write};

const FAMILY: &str = "instance";

/// Persisted protocol instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolInstanceRecord {
    /// Owning identity
    pub owned_identity: IdentityKey,
    /// Instance uid
    pub uid: ProtocolInstanceUid,
    /// Protocol the instance runs
    pub protocol_kind: ProtocolKind,
    /// Current state discriminator
    pub state_kind: StateKind,
    /// Current state payload
    pub state: Encoded,
    /// Creation time in milliseconds since the Unix epoch
    pub created_at_ms: u64,
}

impl ProtocolInstanceRecord {
    /// Handle naming this instance
    pub fn handle(&self) -> InstanceHandle {
        InstanceHandle {
            owned_identity: self.owned_identity,
            uid: self.uid,
            protocol_kind: self.protocol_kind,
        }
    }
}

/// Immutable identity of a stored instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstanceHandle {
    /// Owning identity
    pub owned_identity: IdentityKey,
    /// Instance uid
    pub uid: ProtocolInstanceUid,
    /// Protocol the instance runs
    pub protocol_kind: ProtocolKind,
}

fn key(owned: &IdentityKey, uid: &ProtocolInstanceUid) -> String {
    format!("{}{}", owned_prefix(FAMILY, owned), uid.uuid())
}

/// Create an instance; fails with `AlreadyExists` if the pair is taken
pub fn create(
    tx: &mut dyn StoreTransaction,
    owned_identity: IdentityKey,
    protocol_kind: ProtocolKind,
    uid: ProtocolInstanceUid,
    state_kind: StateKind,
    state: Encoded,
) -> Result<InstanceHandle> {
    let key = key(&owned_identity, &uid);
    if tx.contains(&key)? {
        return Err(TandemError::already_exists(format!(
            "protocol instance {uid} for {owned_identity}"
        )));
    }
    let record = ProtocolInstanceRecord {
        owned_identity,
        uid,
        protocol_kind,
        state_kind,
        state,
        created_at_ms: now_ms(),
    };
    write(tx, &key, &record)?;
    Ok(record.handle())
}

/// Load an instance
pub fn get(
    tx: &mut dyn StoreTransaction,
    owned: &IdentityKey,
    uid: &ProtocolInstanceUid,
) -> Result<Option<ProtocolInstanceRecord>> {
    read(tx, &key(owned, uid))
}

/// Replace the state of an existing instance
pub fn update_state(
    tx: &mut dyn StoreTransaction,
    handle: &InstanceHandle,
    state_kind: StateKind,
    state: Encoded,
) -> Result<()> {
    let key = key(&handle.owned_identity, &handle.uid);
    let mut record: ProtocolInstanceRecord = read(tx, &key)?.ok_or_else(|| {
        TandemError::unknown_protocol_instance(format!(
            "{} for {}",
            handle.uid, handle.owned_identity
        ))
    })?;
    if record.protocol_kind != handle.protocol_kind {
        return Err(TandemError::internal(format!(
            "instance {} runs {}, not {}",
            handle.uid, record.protocol_kind, handle.protocol_kind
        )));
    }
    record.state_kind = state_kind;
    record.state = state;
    write(tx, &key, &record)
}

/// Delete an instance with its queued messages, parent links and waiters
pub fn delete(
    tx: &mut dyn StoreTransaction,
    owned: &IdentityKey,
    uid: &ProtocolInstanceUid,
) -> Result<bool> {
    let existed = tx.delete(&key(owned, uid))?;
    inbox::delete_for_instance(tx, owned, uid)?;
    links::delete_for_parent(tx, owned, uid)?;
    waiting::delete_for_instance(tx, owned, uid)?;
    Ok(existed)
}

/// Every instance of one owned identity
pub fn list(tx: &mut dyn StoreTransaction, owned: &IdentityKey) -> Result<Vec<ProtocolInstanceRecord>> {
    Ok(scan(tx, &owned_prefix(FAMILY, owned))?
        .into_iter()
        .map(|(_, record)| record)
        .collect())
}

/// Every instance of every owned identity
pub fn list_all(tx: &mut dyn StoreTransaction) -> Result<Vec<ProtocolInstanceRecord>> {
    Ok(scan(tx, &family_prefix(FAMILY))?
        .into_iter()
        .map(|(_, record)| record)
        .collect())
}

/// Delete every instance of `owned` except `keep`, returning how many went
pub fn delete_all_except(
    tx: &mut dyn StoreTransaction,
    owned: &IdentityKey,
    keep: &ProtocolInstanceUid,
) -> Result<usize> {
    let mut deleted = 0;
    for record in list(tx, owned)? {
        if record.uid == *keep {
            continue;
        }
        if delete(tx, owned, &record.uid)? {
            deleted += 1;
        }
    }
    Ok(deleted)
}

/// Up to `limit` instances whose state `is_final` declares terminal
pub fn find_final(
    tx: &mut dyn StoreTransaction,
    is_final: impl Fn(ProtocolKind, StateKind) -> bool,
    limit: usize,
) -> Result<Vec<InstanceHandle>> {
    Ok(list_all(tx)?
        .into_iter()
        .filter(|record| is_final(record.protocol_kind, record.state_kind))
        .take(limit)
        .map(|record| record.handle())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_core::{
        MessageKind, ProtocolEnvelope, ReceivedMessage, ReceptionChannelInfo, TransactionalStore,
    };
    use tandem_testkit::MemoryStore;

    use crate::records::links::LinkRecord;

    const OWNED: IdentityKey = IdentityKey([4; 32]);

    fn create_in(tx: &mut dyn StoreTransaction, state: u8) -> InstanceHandle {
        create(
            tx,
            OWNED,
            ProtocolKind::GroupV2,
            ProtocolInstanceUid::random(),
            StateKind(state),
            Encoded(vec![state]),
        )
        .unwrap()
    }

    #[test]
    fn uid_is_unique_per_owned_identity() {
        let store = MemoryStore::new();
        let mut tx = store.begin();
        let handle = create_in(&mut tx, 0);
        let again = create(
            &mut tx,
            OWNED,
            ProtocolKind::GroupV2,
            handle.uid,
            StateKind(0),
            Encoded(Vec::new()),
        );
        assert!(matches!(again, Err(TandemError::AlreadyExists { .. })));
    }

    #[test]
    fn state_updates_keep_kind_and_payload_together() {
        let store = MemoryStore::new();
        let mut tx = store.begin();
        let handle = create_in(&mut tx, 0);
        update_state(&mut tx, &handle, StateKind(2), Encoded(vec![2, 2])).unwrap();
        let record = get(&mut tx, &OWNED, &handle.uid).unwrap().unwrap();
        assert_eq!(record.state_kind, StateKind(2));
        assert_eq!(record.state, Encoded(vec![2, 2]));

        let foreign = InstanceHandle {
            protocol_kind: ProtocolKind::ChannelCreation,
            ..handle
        };
        assert!(update_state(&mut tx, &foreign, StateKind(1), Encoded(Vec::new())).is_err());

        let missing = InstanceHandle {
            uid: ProtocolInstanceUid::random(),
            ..handle
        };
        assert!(matches!(
            update_state(&mut tx, &missing, StateKind(1), Encoded(Vec::new())),
            Err(TandemError::UnknownProtocolInstance { .. })
        ));
    }

    #[test]
    fn delete_cascades_to_queued_messages_and_links() {
        let store = MemoryStore::new();
        let mut tx = store.begin();
        let handle = create_in(&mut tx, 0);
        let envelope = ProtocolEnvelope {
            owned_identity: OWNED,
            protocol_kind: ProtocolKind::GroupV2,
            instance_uid: handle.uid,
            message_kind: MessageKind(0),
            arguments: Vec::new(),
        };
        inbox::insert(&mut tx, &ReceivedMessage::new(envelope, ReceptionChannelInfo::Local)).unwrap();
        let child = ProtocolInstanceUid::random();
        links::register(
            &mut tx,
            &LinkRecord {
                owned_identity: OWNED,
                parent_kind: ProtocolKind::GroupV2,
                parent_uid: handle.uid,
                child_uid: child,
                expected_child_state: StateKind(1),
                message_kind: MessageKind(1),
            },
        )
        .unwrap();

        assert!(delete(&mut tx, &OWNED, &handle.uid).unwrap());
        assert!(get(&mut tx, &OWNED, &handle.uid).unwrap().is_none());
        assert!(inbox::list_all(&mut tx).unwrap().is_empty());
        assert!(links::for_child(&mut tx, &OWNED, &child).unwrap().is_empty());
        assert!(!delete(&mut tx, &OWNED, &handle.uid).unwrap());
    }

    #[test]
    fn sweeps_select_by_state_and_keep_the_survivor() {
        let store = MemoryStore::new();
        let mut tx = store.begin();
        let running = create_in(&mut tx, 0);
        for _ in 0..3 {
            create_in(&mut tx, 2);
        }
        let finals = find_final(&mut tx, |_, state| state == StateKind(2), 2).unwrap();
        assert_eq!(finals.len(), 2);
        assert!(finals.iter().all(|handle| handle.uid != running.uid));

        assert_eq!(delete_all_except(&mut tx, &OWNED, &running.uid).unwrap(), 3);
        let left: Vec<_> = list(&mut tx, &OWNED).unwrap().into_iter().map(|r| r.uid).collect();
        assert_eq!(left, vec![running.uid]);
    }
}
