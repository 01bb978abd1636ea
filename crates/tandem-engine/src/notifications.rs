//! Engine-generated notifications
//!
//! Fired links and satisfied waiting records both turn into local messages
//! queued in the inbox of the instance that registered them, inside the
//! transaction that caused them.

use tracing::debug;

use tandem_core::{
    IdentityKey, ProtocolEnvelope, ReceivedMessage, ReceptionChannelInfo, Result, StateKind,
    StoreTransaction, TrustLevel,
};

use crate::protocol::{LinkNotification, WaitingNotification};
use crate::records::instances::InstanceHandle;
use crate::records::{inbox, links, waiting};

/// Queue one notification per link waiting for `child` to reach `state`,
/// consuming the links. Returns how many fired.
pub(crate) fn fire_links(
    tx: &mut dyn StoreTransaction,
    child: &InstanceHandle,
    state: StateKind,
) -> Result<usize> {
    let fired = links::take_matching(tx, &child.owned_identity, &child.uid, state)?;
    for link in &fired {
        let notification = LinkNotification {
            child_uid: child.uid,
            child_state: state,
        };
        let envelope = ProtocolEnvelope {
            owned_identity: link.owned_identity,
            protocol_kind: link.parent_kind,
            instance_uid: link.parent_uid,
            message_kind: link.message_kind,
            arguments: notification.encode()?,
        };
        inbox::insert(tx, &ReceivedMessage::new(envelope, ReceptionChannelInfo::Local))?;
        debug!(
            child = %child.uid,
            parent = %link.parent_uid,
            state = %state,
            "Link fired"
        );
    }
    Ok(fired.len())
}

/// Queue the recorded message of every waiting record about `contact` that
/// `level` and `one_to_one` now satisfy, consuming the records. Returns how
/// many were resolved.
pub(crate) fn resolve_waiters(
    tx: &mut dyn StoreTransaction,
    owned: &IdentityKey,
    contact: &IdentityKey,
    level: TrustLevel,
    one_to_one: bool,
) -> Result<usize> {
    let satisfied = waiting::take_satisfied(tx, owned, contact, level, one_to_one)?;
    for record in &satisfied {
        let envelope = ProtocolEnvelope {
            owned_identity: record.owned_identity,
            protocol_kind: record.protocol_kind,
            instance_uid: record.instance_uid,
            message_kind: record.message_kind,
            arguments: WaitingNotification { contact: *contact }.encode()?,
        };
        inbox::insert(tx, &ReceivedMessage::new(envelope, ReceptionChannelInfo::Local))?;
        debug!(
            contact = %contact,
            instance = %record.instance_uid,
            level = level.value(),
            "Waiting condition satisfied"
        );
    }
    Ok(satisfied.len())
}
