//! Public engine API
//!
//! `ProtocolEngine` owns a transactional store and a dispatcher. Every public
//! operation opens its own transaction, and commits it only if the work
//! succeeded. A commit rejected with `Conflict` re-runs the whole operation
//! in a fresh transaction, up to `max_commit_retries` times.

use std::collections::HashSet;
use tracing::{debug, error, info, warn};

use tandem_core::{
    IdentityKey, MessageUid, ProtocolInstanceUid, ReceivedMessage, ReceptionChannelInfo, Result,
    StoreTransaction, TandemError, TransactionalStore, TrustLevel,
};

use crate::config::EngineConfig;
use crate::context::EngineEffects;
use crate::dispatcher::{DispatchOutcome, Dispatcher};
use crate::notifications;
use crate::protocol::{decode_state, envelope_for, Protocol, ProtocolMessage};
use crate::protocols;
use crate::records::instances::{self, ProtocolInstanceRecord};
use crate::records::inbox;

/// Result of processing one queued message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// No such message is queued (already consumed, or never submitted)
    Missing,
    /// The message was consumed
    Dispatched(DispatchOutcome),
}

/// Summary of an inbox drain
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessingReport {
    /// Messages that ran a step
    pub executed: usize,
    /// Messages consumed without running a step
    pub dropped: usize,
    /// Messages left queued because processing failed
    pub failed: Vec<(MessageUid, TandemError)>,
}

impl ProcessingReport {
    /// Fold another report into this one
    pub fn merge(&mut self, other: ProcessingReport) {
        self.executed += other.executed;
        self.dropped += other.dropped;
        self.failed.extend(other.failed);
    }

    /// Whether no message failed
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    fn record(&mut self, outcome: ProcessOutcome) {
        match outcome {
            ProcessOutcome::Dispatched(outcome) if outcome.is_executed() => self.executed += 1,
            ProcessOutcome::Dispatched(_) => self.dropped += 1,
            ProcessOutcome::Missing => {}
        }
    }
}

/// The protocol execution engine
pub struct ProtocolEngine<S: TransactionalStore> {
    store: S,
    dispatcher: Dispatcher,
}

impl<S: TransactionalStore> ProtocolEngine<S> {
    /// Create an engine over `store`; fails if `config` does not validate
    pub fn new(store: S, effects: EngineEffects, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            store,
            dispatcher: Dispatcher::new(effects, config),
        })
    }

    /// Underlying store
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Engine configuration
    pub fn config(&self) -> &EngineConfig {
        self.dispatcher.config()
    }

    /// Queue an inbound message. Submitting a uid that is still queued is a
    /// no-op.
    pub fn submit(&self, message: ReceivedMessage) -> Result<MessageUid> {
        let uid = message.uid;
        let queued = self.with_retries(|tx| inbox::insert(tx, &message))?;
        if queued {
            debug!(
                message = %uid,
                protocol = %message.envelope.protocol_kind,
                instance = %message.envelope.instance_uid,
                "Message queued"
            );
        } else {
            debug!(message = %uid, "Message already queued");
        }
        Ok(uid)
    }

    /// Start a protocol locally: queue `message` for a fresh instance
    pub fn start_protocol<M: ProtocolMessage>(
        &self,
        owned_identity: IdentityKey,
        message: &M,
    ) -> Result<ProtocolInstanceUid> {
        let instance_uid = ProtocolInstanceUid::random();
        let envelope = envelope_for(owned_identity, instance_uid, message)?;
        self.submit(ReceivedMessage::new(envelope, ReceptionChannelInfo::Local))?;
        Ok(instance_uid)
    }

    /// Consume one queued message and dispatch it
    pub fn process_message(
        &self,
        owned_identity: &IdentityKey,
        message_uid: &MessageUid,
    ) -> Result<ProcessOutcome> {
        self.with_retries(|tx| {
            let Some(message) = inbox::get(tx, owned_identity, message_uid)? else {
                return Ok(ProcessOutcome::Missing);
            };
            inbox::remove(tx, owned_identity, message_uid)?;
            let outcome = self.dispatcher.dispatch(tx, &message)?;
            Ok(ProcessOutcome::Dispatched(outcome))
        })
    }

    /// Process the oldest message queued for one instance
    pub fn process_next(
        &self,
        owned_identity: &IdentityKey,
        instance_uid: &ProtocolInstanceUid,
    ) -> Result<Option<ProcessOutcome>> {
        let next = self.read(|tx| inbox::next_for_instance(tx, owned_identity, instance_uid))?;
        match next {
            Some(message) => Ok(Some(self.process_message(owned_identity, &message.uid)?)),
            None => Ok(None),
        }
    }

    /// Drain the inbox, including messages queued while draining. A message
    /// whose processing fails stays queued and is not retried within the
    /// same drain.
    pub fn process_pending(&self) -> Result<ProcessingReport> {
        let mut report = ProcessingReport::default();
        let mut failed: HashSet<MessageUid> = HashSet::new();
        loop {
            let batch: Vec<ReceivedMessage> = self
                .read(inbox::list_all)?
                .into_iter()
                .filter(|message| !failed.contains(&message.uid))
                .collect();
            if batch.is_empty() {
                break;
            }
            for message in batch {
                match self.process_message(message.owned_identity(), &message.uid) {
                    Ok(outcome) => report.record(outcome),
                    Err(e) => {
                        error!(
                            message = %message.uid,
                            protocol = %message.envelope.protocol_kind,
                            instance = %message.envelope.instance_uid,
                            error = %e,
                            "Message processing aborted"
                        );
                        failed.insert(message.uid);
                        report.failed.push((message.uid, e));
                    }
                }
            }
        }
        Ok(report)
    }

    /// Delete every instance sitting in a final state, one batch per
    /// transaction. Returns how many were deleted.
    pub fn delete_all_final_instances(&self) -> Result<usize> {
        let batch_size = self.config().sweep_batch_size;
        let mut total = 0;
        loop {
            let deleted = self.with_retries(|tx| {
                let batch = instances::find_final(tx, protocols::is_final_state, batch_size)?;
                for handle in &batch {
                    instances::delete(tx, &handle.owned_identity, &handle.uid)?;
                }
                Ok(batch.len())
            })?;
            total += deleted;
            if deleted < batch_size {
                break;
            }
        }
        if total > 0 {
            info!(deleted = total, "Final protocol instances swept");
        }
        Ok(total)
    }

    /// Delete every instance of `owned_identity` except `keep`
    pub fn delete_all_except(
        &self,
        owned_identity: &IdentityKey,
        keep: &ProtocolInstanceUid,
    ) -> Result<usize> {
        let deleted =
            self.with_retries(|tx| instances::delete_all_except(tx, owned_identity, keep))?;
        info!(owned = %owned_identity, kept = %keep, deleted, "Protocol instances deleted");
        Ok(deleted)
    }

    /// Resolve waiting records after `contact`'s trust level or one-to-one
    /// status changed. Returns how many notifications were queued.
    pub fn notify_trust_level_or_upgrade_changed(
        &self,
        owned_identity: &IdentityKey,
        contact: &IdentityKey,
        level: TrustLevel,
        one_to_one: bool,
    ) -> Result<usize> {
        self.with_retries(|tx| {
            notifications::resolve_waiters(tx, owned_identity, contact, level, one_to_one)
        })
    }

    /// Load one instance record
    pub fn instance(
        &self,
        owned_identity: &IdentityKey,
        uid: &ProtocolInstanceUid,
    ) -> Result<Option<ProtocolInstanceRecord>> {
        self.read(|tx| instances::get(tx, owned_identity, uid))
    }

    /// Decoded state of one instance of protocol `P`
    pub fn instance_state<P: Protocol>(
        &self,
        owned_identity: &IdentityKey,
        uid: &ProtocolInstanceUid,
    ) -> Result<Option<P::State>> {
        match self.instance(owned_identity, uid)? {
            Some(record) if record.protocol_kind == P::KIND => {
                Ok(Some(decode_state(record.state_kind, &record.state)?))
            }
            Some(record) => Err(TandemError::invalid(format!(
                "instance {uid} runs {}, not {}",
                record.protocol_kind,
                P::KIND
            ))),
            None => Ok(None),
        }
    }

    /// Every instance of `owned_identity`
    pub fn instances(&self, owned_identity: &IdentityKey) -> Result<Vec<ProtocolInstanceRecord>> {
        self.read(|tx| instances::list(tx, owned_identity))
    }

    /// Number of queued messages across all owned identities
    pub fn pending_message_count(&self) -> Result<usize> {
        Ok(self.read(inbox::list_all)?.len())
    }

    fn read<T>(&self, f: impl FnOnce(&mut dyn StoreTransaction) -> Result<T>) -> Result<T> {
        let mut tx = self.store.begin();
        f(&mut tx)
    }

    fn with_retries<T>(
        &self,
        mut f: impl FnMut(&mut dyn StoreTransaction) -> Result<T>,
    ) -> Result<T> {
        let max_retries = self.config().max_commit_retries;
        let mut attempt = 0;
        loop {
            let mut tx = self.store.begin();
            let value = f(&mut tx)?;
            match self.store.commit(tx) {
                Ok(()) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < max_retries => {
                    attempt += 1;
                    warn!(attempt, error = %e, "Commit conflict, retrying");
                }
                Err(e) => return Err(e),
            }
        }
    }
}
