//! Message inbox
//!
//! Durable queue of received messages, keyed by `(owned identity, message
//! uid)`. A message leaves the inbox in the same transaction that processes
//! it, which is what makes processing at-most-once.

use tandem_core::{
    IdentityKey, MessageUid, ProtocolInstanceUid, ReceivedMessage, Result, StoreTransaction,
};

use super::{family_prefix, owned_prefix, read, scan, write};

const FAMILY: &str = "inbox";

fn key(owned: &IdentityKey, uid: &MessageUid) -> String {
    format!("{}{}", owned_prefix(FAMILY, owned), uid.uuid())
}

fn by_arrival(messages: &mut [ReceivedMessage]) {
    messages.sort_by(|a, b| {
        a.timestamp_ms
            .cmp(&b.timestamp_ms)
            .then_with(|| a.uid.cmp(&b.uid))
    });
}

/// Queue a message; returns false if a message with that uid is already queued
pub fn insert(tx: &mut dyn StoreTransaction, message: &ReceivedMessage) -> Result<bool> {
    let key = key(message.owned_identity(), &message.uid);
    if tx.contains(&key)? {
        return Ok(false);
    }
    write(tx, &key, message)?;
    Ok(true)
}

/// Load one queued message
pub fn get(
    tx: &mut dyn StoreTransaction,
    owned: &IdentityKey,
    uid: &MessageUid,
) -> Result<Option<ReceivedMessage>> {
    read(tx, &key(owned, uid))
}

/// Remove one queued message, returning whether it was queued
pub fn remove(tx: &mut dyn StoreTransaction, owned: &IdentityKey, uid: &MessageUid) -> Result<bool> {
    tx.delete(&key(owned, uid))
}

/// Messages queued for one instance, oldest first
pub fn pending_for_instance(
    tx: &mut dyn StoreTransaction,
    owned: &IdentityKey,
    instance: &ProtocolInstanceUid,
) -> Result<Vec<ReceivedMessage>> {
    let mut messages: Vec<ReceivedMessage> = scan(tx, &owned_prefix(FAMILY, owned))?
        .into_iter()
        .map(|(_, message)| message)
        .filter(|message: &ReceivedMessage| message.envelope.instance_uid == *instance)
        .collect();
    by_arrival(&mut messages);
    Ok(messages)
}

/// Oldest message queued for one instance
pub fn next_for_instance(
    tx: &mut dyn StoreTransaction,
    owned: &IdentityKey,
    instance: &ProtocolInstanceUid,
) -> Result<Option<ReceivedMessage>> {
    Ok(pending_for_instance(tx, owned, instance)?.into_iter().next())
}

/// Every queued message, oldest first
pub fn list_all(tx: &mut dyn StoreTransaction) -> Result<Vec<ReceivedMessage>> {
    let mut messages: Vec<ReceivedMessage> = scan(tx, &family_prefix(FAMILY))?
        .into_iter()
        .map(|(_, message)| message)
        .collect();
    by_arrival(&mut messages);
    Ok(messages)
}

/// Drop every message queued for one instance
pub fn delete_for_instance(
    tx: &mut dyn StoreTransaction,
    owned: &IdentityKey,
    instance: &ProtocolInstanceUid,
) -> Result<usize> {
    let pending = pending_for_instance(tx, owned, instance)?;
    for message in &pending {
        tx.delete(&key(owned, &message.uid))?;
    }
    Ok(pending.len())
}
