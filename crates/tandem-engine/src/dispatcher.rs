//! Step dispatcher
//!
//! Turns one received message into at most one step execution:
//!
//! 1. decode the message into the protocol's message type
//! 2. resolve the target instance, creating it for initial messages
//! 3. select the step matching `(state, message)`
//! 4. refuse the step if the reception channel does not meet its requirement
//! 5. execute the step and persist the resulting state
//! 6. fire links waiting for that state, reap the instance if it is final
//!
//! Everything happens inside the caller's transaction. Drops are normal
//! outcomes under duplicated, reordered delivery and are not errors; an
//! error means the transaction must be abandoned.

use std::fmt;
use tracing::{debug, info, warn};

use tandem_core::{
    ProtocolEnvelope, ProtocolInstanceUid, ProtocolKind, ReceivedMessage, ReceptionChannelInfo,
    Result, StateKind, StoreTransaction,
};

use crate::config::EngineConfig;
use crate::context::{EngineEffects, StepContext};
use crate::notifications;
use crate::protocol::{
    decode_state, encode_state, Protocol, ProtocolMessage, ProtocolState, StepOutcome,
};
use crate::protocols::{
    ChannelCreation, ContactMutualScan, GroupManagement, GroupV2, OwnedIdentityDeletion,
};
use crate::records::instances::{self, InstanceHandle};

/// Why a message was consumed without running a step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// No instance with that uid, and the message cannot create one
    UnknownProtocolInstance,
    /// The instance's state has no step for the message
    NoMatchingStep,
    /// A step matched but the message arrived over the wrong channel class
    ChannelRejected,
    /// A remote message whose arguments do not decode
    MalformedMessage,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Self::UnknownProtocolInstance => "unknown protocol instance",
            Self::NoMatchingStep => "no matching step",
            Self::ChannelRejected => "channel rejected",
            Self::MalformedMessage => "malformed message",
        };
        f.write_str(reason)
    }
}

/// Result of dispatching one message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A step ran
    Executed {
        /// Protocol of the instance
        protocol_kind: ProtocolKind,
        /// Instance the step ran on
        instance_uid: ProtocolInstanceUid,
        /// State before the step
        from: StateKind,
        /// State after the step
        to: StateKind,
        /// Whether `to` is a final state
        finished: bool,
    },
    /// The message was consumed without effect
    Dropped(DropReason),
}

impl DispatchOutcome {
    /// Whether a step ran
    pub fn is_executed(&self) -> bool {
        matches!(self, Self::Executed { .. })
    }
}

/// Routes messages to protocol steps
pub struct Dispatcher {
    effects: EngineEffects,
    config: EngineConfig,
}

impl Dispatcher {
    /// Create a dispatcher over `effects`
    pub fn new(effects: EngineEffects, config: EngineConfig) -> Self {
        Self { effects, config }
    }

    /// Collaborators handed to steps
    pub fn effects(&self) -> &EngineEffects {
        &self.effects
    }

    /// Engine configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Dispatch a received message. Removing it from the inbox is the
    /// caller's business.
    pub fn dispatch(
        &self,
        tx: &mut dyn StoreTransaction,
        message: &ReceivedMessage,
    ) -> Result<DispatchOutcome> {
        self.route(tx, &message.envelope, &message.channel_info, 0)
    }

    /// Dispatch a locally built message at nesting `depth`, bypassing the
    /// inbox
    pub(crate) fn execute_synchronously(
        &self,
        tx: &mut dyn StoreTransaction,
        envelope: &ProtocolEnvelope,
        depth: usize,
    ) -> Result<DispatchOutcome> {
        self.route(tx, envelope, &ReceptionChannelInfo::Local, depth)
    }

    fn route(
        &self,
        tx: &mut dyn StoreTransaction,
        envelope: &ProtocolEnvelope,
        channel: &ReceptionChannelInfo,
        depth: usize,
    ) -> Result<DispatchOutcome> {
        match envelope.protocol_kind {
            ProtocolKind::ChannelCreation => self.run::<ChannelCreation>(tx, envelope, channel, depth),
            ProtocolKind::ContactMutualScan => {
                self.run::<ContactMutualScan>(tx, envelope, channel, depth)
            }
            ProtocolKind::GroupManagement => self.run::<GroupManagement>(tx, envelope, channel, depth),
            ProtocolKind::GroupV2 => self.run::<GroupV2>(tx, envelope, channel, depth),
            ProtocolKind::OwnedIdentityDeletion => {
                self.run::<OwnedIdentityDeletion>(tx, envelope, channel, depth)
            }
        }
    }

    fn run<P: Protocol>(
        &self,
        tx: &mut dyn StoreTransaction,
        envelope: &ProtocolEnvelope,
        channel: &ReceptionChannelInfo,
        depth: usize,
    ) -> Result<DispatchOutcome> {
        let owned = envelope.owned_identity;
        let uid = envelope.instance_uid;

        let message = match P::Message::decode(envelope.message_kind, &envelope.arguments) {
            Ok(message) => message,
            Err(e) if !channel.is_local() => {
                warn!(
                    protocol = %P::KIND,
                    instance = %uid,
                    message = %envelope.message_kind,
                    error = %e,
                    "Dropping malformed remote message"
                );
                return Ok(DispatchOutcome::Dropped(DropReason::MalformedMessage));
            }
            Err(e) => return Err(e),
        };

        let (state, existing) = match instances::get(tx, &owned, &uid)? {
            Some(record) if record.protocol_kind == P::KIND => {
                let state: P::State = decode_state(record.state_kind, &record.state)?;
                (state, Some(record.handle()))
            }
            Some(record) => {
                warn!(
                    instance = %uid,
                    expected = %P::KIND,
                    actual = %record.protocol_kind,
                    "Message targets an instance of another protocol"
                );
                return Ok(DispatchOutcome::Dropped(DropReason::UnknownProtocolInstance));
            }
            None if P::is_initial_message(message.kind()) => (P::initial_state(), None),
            None => {
                debug!(
                    protocol = %P::KIND,
                    instance = %uid,
                    message = %message.kind(),
                    "No instance for non-initial message"
                );
                return Ok(DispatchOutcome::Dropped(DropReason::UnknownProtocolInstance));
            }
        };

        let Some(step) = P::select_step(&state, &message) else {
            debug!(
                protocol = %P::KIND,
                instance = %uid,
                state = %state.kind(),
                message = %message.kind(),
                "No step matches"
            );
            return Ok(DispatchOutcome::Dropped(DropReason::NoMatchingStep));
        };

        let requirement = P::channel_requirement(step);
        if !requirement.accepts(channel, &owned) {
            warn!(
                protocol = %P::KIND,
                instance = %uid,
                step = ?step,
                required = %requirement,
                channel = ?channel,
                "Step refused: wrong reception channel"
            );
            return Ok(DispatchOutcome::Dropped(DropReason::ChannelRejected));
        }

        let from = state.kind();
        let handle = match existing {
            Some(handle) => handle,
            None => {
                let (kind, payload) = encode_state(&state)?;
                let handle = instances::create(tx, owned, P::KIND, uid, kind, payload)?;
                info!(protocol = %P::KIND, instance = %uid, owned = %owned, "Protocol instance created");
                notifications::fire_links(tx, &handle, kind)?;
                handle
            }
        };

        debug!(protocol = %P::KIND, instance = %uid, step = ?step, depth, "Executing step");
        let outcome = {
            let mut ctx = StepContext::new(tx, self, channel, owned, P::KIND, uid, depth);
            P::execute(step, state, message, &mut ctx)?
        };

        let to = match outcome {
            StepOutcome::Transition(next) => {
                let (kind, payload) = encode_state(&next)?;
                instances::update_state(tx, &handle, kind, payload)?;
                notifications::fire_links(tx, &handle, kind)?;
                kind
            }
            StepOutcome::Unchanged => from,
        };

        let finished = P::is_final(to);
        if finished {
            info!(protocol = %P::KIND, instance = %uid, state = %to, "Protocol instance finished");
            if self.config.reap_final_instances {
                reap(tx, &handle)?;
            }
        }

        Ok(DispatchOutcome::Executed {
            protocol_kind: P::KIND,
            instance_uid: uid,
            from,
            to,
            finished,
        })
    }
}

fn reap(tx: &mut dyn StoreTransaction, handle: &InstanceHandle) -> Result<()> {
    instances::delete(tx, &handle.owned_identity, &handle.uid)?;
    Ok(())
}
