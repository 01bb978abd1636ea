//! Step execution context
//!
//! Everything a step may touch is passed in explicitly: the ambient
//! transaction, the collaborators, the engine configuration and the
//! dispatcher (for synchronous sub-protocols). Steps never hold on to any of
//! it past their own execution.

use std::sync::Arc;
use tracing::debug;

use tandem_core::effects::{ChallengeEffects, ChannelEffects, IdentityEffects};
use tandem_core::{
    IdentityKey, MessageHandle, MessageKind, MessageUid, OutboundMessage, ProtocolInstanceUid,
    ProtocolKind, ReceivedMessage, ReceptionChannelInfo, Result, Savepoint, SendChannelTarget,
    Signature, StateKind, StoreTransaction, TandemError, TrustLevel,
};

use crate::config::EngineConfig;
use crate::dispatcher::{DispatchOutcome, Dispatcher};
use crate::notifications;
use crate::protocol::{envelope_for, ProtocolMessage};
use crate::records::links::LinkRecord;
use crate::records::waiting::{WaitingCondition, WaitingRecord};
use crate::records::{inbox, instances, links, replay, waiting};

/// Collaborators shared by every step
#[derive(Clone)]
pub struct EngineEffects {
    /// Identity, contact and group store
    pub identity: Arc<dyn IdentityEffects>,
    /// Secure channels and transport
    pub channels: Arc<dyn ChannelEffects>,
    /// Challenge signing and checking
    pub challenges: Arc<dyn ChallengeEffects>,
}

impl EngineEffects {
    /// Bundle collaborators
    pub fn new(
        identity: Arc<dyn IdentityEffects>,
        channels: Arc<dyn ChannelEffects>,
        challenges: Arc<dyn ChallengeEffects>,
    ) -> Self {
        Self {
            identity,
            channels,
            challenges,
        }
    }
}

/// Result of a synchronous sub-protocol run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubProtocolOutcome {
    /// Instance created for the run
    pub instance_uid: ProtocolInstanceUid,
    /// State the instance ended the step in
    pub state: StateKind,
}

/// Handle a step uses to read and act on the world
pub struct StepContext<'a> {
    tx: &'a mut dyn StoreTransaction,
    dispatcher: &'a Dispatcher,
    channel: &'a ReceptionChannelInfo,
    owned_identity: IdentityKey,
    protocol_kind: ProtocolKind,
    instance_uid: ProtocolInstanceUid,
    depth: usize,
}

impl<'a> StepContext<'a> {
    pub(crate) fn new(
        tx: &'a mut dyn StoreTransaction,
        dispatcher: &'a Dispatcher,
        channel: &'a ReceptionChannelInfo,
        owned_identity: IdentityKey,
        protocol_kind: ProtocolKind,
        instance_uid: ProtocolInstanceUid,
        depth: usize,
    ) -> Self {
        Self {
            tx,
            dispatcher,
            channel,
            owned_identity,
            protocol_kind,
            instance_uid,
            depth,
        }
    }

    /// Owned identity the instance runs under
    pub fn owned_identity(&self) -> IdentityKey {
        self.owned_identity
    }

    /// Uid of the running instance
    pub fn instance_uid(&self) -> ProtocolInstanceUid {
        self.instance_uid
    }

    /// How the triggering message arrived
    pub fn reception_channel(&self) -> &'a ReceptionChannelInfo {
        self.channel
    }

    /// Remote identity of the secure channel the message arrived on
    pub fn remote_identity(&self) -> Result<IdentityKey> {
        self.channel.remote_identity().copied().ok_or_else(|| {
            TandemError::internal(format!(
                "{} step needs a secure channel, got {:?}",
                self.protocol_kind, self.channel
            ))
        })
    }

    /// Ambient transaction
    pub fn tx(&mut self) -> &mut dyn StoreTransaction {
        &mut *self.tx
    }

    /// Identity collaborator
    pub fn identity(&self) -> &'a dyn IdentityEffects {
        self.dispatcher.effects().identity.as_ref()
    }

    /// Channel collaborator
    pub fn channels(&self) -> &'a dyn ChannelEffects {
        self.dispatcher.effects().channels.as_ref()
    }

    /// Challenge collaborator
    pub fn challenges(&self) -> &'a dyn ChallengeEffects {
        self.dispatcher.effects().challenges.as_ref()
    }

    /// Engine configuration
    pub fn config(&self) -> &'a EngineConfig {
        self.dispatcher.config()
    }

    /// Queue a message for this same instance
    pub fn post_to_self<M: ProtocolMessage>(&mut self, message: &M) -> Result<MessageUid> {
        if M::PROTOCOL != self.protocol_kind {
            return Err(TandemError::internal(format!(
                "{} instance cannot post a {} message to itself",
                self.protocol_kind,
                M::PROTOCOL
            )));
        }
        self.post_local(self.instance_uid, message)
    }

    /// Queue a local message for an instance of this owned identity
    pub fn post_local<M: ProtocolMessage>(
        &mut self,
        instance_uid: ProtocolInstanceUid,
        message: &M,
    ) -> Result<MessageUid> {
        let envelope = envelope_for(self.owned_identity, instance_uid, message)?;
        let received = ReceivedMessage::new(envelope, ReceptionChannelInfo::Local);
        let uid = received.uid;
        inbox::insert(self.tx, &received)?;
        Ok(uid)
    }

    /// Emit a message towards `target`; a `Local` target lands in this
    /// device's inbox
    pub fn post<M: ProtocolMessage>(
        &mut self,
        target: SendChannelTarget,
        instance_uid: ProtocolInstanceUid,
        message: &M,
    ) -> Result<MessageHandle> {
        if target == SendChannelTarget::Local {
            let uid = self.post_local(instance_uid, message)?;
            return Ok(MessageHandle::from_uuid(uid.uuid()));
        }
        let envelope = envelope_for(self.owned_identity, instance_uid, message)?;
        let channels = self.channels();
        let handle = channels.post(self.tx, OutboundMessage { envelope, target })?;
        debug!(
            protocol = %M::PROTOCOL,
            instance = %instance_uid,
            message = %message.kind(),
            handle = %handle,
            "Message handed to transport"
        );
        Ok(handle)
    }

    /// Run the initial step of another protocol to completion inside this
    /// transaction. The sub-protocol gets a fresh instance; the state it
    /// lands in must be one of `expected`. Its writes are staged and only
    /// reach this transaction when it succeeds, so a failed sub-protocol
    /// leaves neither an instance nor queued messages behind.
    pub fn execute_sub_protocol<M: ProtocolMessage>(
        &mut self,
        message: &M,
        expected: &[StateKind],
    ) -> Result<SubProtocolOutcome> {
        let depth = self.depth + 1;
        if depth > self.config().max_sub_protocol_depth {
            return Err(TandemError::internal(format!(
                "sub-protocol nesting exceeds {} levels",
                self.config().max_sub_protocol_depth
            )));
        }
        let instance_uid = ProtocolInstanceUid::random();
        let envelope = envelope_for(self.owned_identity, instance_uid, message)?;
        let dispatcher = self.dispatcher;
        let mut savepoint = Savepoint::new(&mut *self.tx);
        let outcome = dispatcher
            .execute_synchronously(&mut savepoint, &envelope, depth)
            .and_then(|outcome| match outcome {
                DispatchOutcome::Executed { to, .. } if expected.contains(&to) => {
                    Ok(SubProtocolOutcome {
                        instance_uid,
                        state: to,
                    })
                }
                DispatchOutcome::Executed { to, .. } => Err(TandemError::internal(format!(
                    "{} sub-protocol ended in unexpected {to}",
                    M::PROTOCOL
                ))),
                DispatchOutcome::Dropped(reason) => Err(TandemError::internal(format!(
                    "{} sub-protocol did not run: {reason}",
                    M::PROTOCOL
                ))),
            });
        match outcome {
            Ok(outcome) => {
                savepoint.release()?;
                Ok(outcome)
            }
            Err(e) => {
                debug!(
                    protocol = %M::PROTOCOL,
                    instance = %instance_uid,
                    discarded = savepoint.staged(),
                    "Sub-protocol failed, writes discarded"
                );
                Err(e)
            }
        }
    }

    /// Ask to be sent `message_kind` once `child_uid` reaches `child_state`
    pub fn register_link(
        &mut self,
        child_uid: ProtocolInstanceUid,
        child_state: StateKind,
        message_kind: MessageKind,
    ) -> Result<bool> {
        links::register(
            self.tx,
            &LinkRecord {
                owned_identity: self.owned_identity,
                parent_kind: self.protocol_kind,
                parent_uid: self.instance_uid,
                child_uid,
                expected_child_state: child_state,
                message_kind,
            },
        )
    }

    /// Ask to be sent `message_kind` once `contact` is trusted at `level`
    pub fn wait_for_trust_level(
        &mut self,
        contact: IdentityKey,
        level: TrustLevel,
        message_kind: MessageKind,
    ) -> Result<()> {
        self.wait_for(contact, WaitingCondition::TrustLevelAtLeast(level), message_kind)
    }

    /// Ask to be sent `message_kind` once `contact` is a one-to-one contact
    /// trusted at least at `min_trust_level`
    pub fn wait_for_one_to_one(
        &mut self,
        contact: IdentityKey,
        min_trust_level: TrustLevel,
        message_kind: MessageKind,
    ) -> Result<()> {
        self.wait_for(
            contact,
            WaitingCondition::OneToOneUpgrade { min_trust_level },
            message_kind,
        )
    }

    fn wait_for(
        &mut self,
        contact: IdentityKey,
        condition: WaitingCondition,
        message_kind: MessageKind,
    ) -> Result<()> {
        waiting::register(
            self.tx,
            &WaitingRecord {
                owned_identity: self.owned_identity,
                contact,
                protocol_kind: self.protocol_kind,
                instance_uid: self.instance_uid,
                condition,
                message_kind,
            },
        )
    }

    /// Resolve waiting records about `contact` against its current trust
    pub fn resolve_waiters(&mut self, contact: &IdentityKey) -> Result<usize> {
        let identity = self.identity();
        let Some(current) = identity.contact(self.tx, &self.owned_identity, contact)? else {
            return Ok(0);
        };
        notifications::resolve_waiters(
            self.tx,
            &self.owned_identity,
            contact,
            current.trust_level,
            current.one_to_one,
        )
    }

    /// Whether `signature` was already accepted for this owned identity
    pub fn signature_already_seen(&mut self, signature: &Signature) -> Result<bool> {
        replay::contains(self.tx, &self.owned_identity, signature)
    }

    /// Remember an accepted signature
    pub fn record_signature(&mut self, signature: &Signature) -> Result<()> {
        replay::insert(self.tx, &self.owned_identity, signature)
    }

    /// Forget every accepted signature of this owned identity
    pub fn forget_signatures(&mut self) -> Result<usize> {
        replay::delete_all(self.tx, &self.owned_identity)
    }

    /// Delete every other instance of this owned identity
    pub fn delete_all_other_instances(&mut self) -> Result<usize> {
        instances::delete_all_except(self.tx, &self.owned_identity, &self.instance_uid)
    }
}
