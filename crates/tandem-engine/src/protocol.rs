//! Protocol model
//!
//! A concrete protocol is a catalog: a state sum type, a message sum type and
//! a step enum. `select_step` maps `(state, message)` to at most one step;
//! each step declares the channel class it accepts. The dispatcher does the
//! rest, so protocol code never touches instance records directly.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;

use tandem_core::{
    Arguments, ChannelRequirement, Encoded, IdentityKey, MessageKind, ProtocolEnvelope,
    ProtocolInstanceUid, ProtocolKind, Result, StateKind, TandemError,
};

use crate::context::StepContext;

/// A protocol state sum type
pub trait ProtocolState: Serialize + DeserializeOwned + Clone + fmt::Debug {
    /// Discriminator persisted next to the payload
    fn kind(&self) -> StateKind;
}

/// A protocol message sum type
pub trait ProtocolMessage: Sized + fmt::Debug {
    /// Protocol the message belongs to
    const PROTOCOL: ProtocolKind;

    /// Discriminator of this message
    fn kind(&self) -> MessageKind;

    /// Ordered encoded arguments
    fn encode_arguments(&self) -> Result<Vec<Encoded>>;

    /// Rebuild a message from its discriminator and arguments
    fn decode(kind: MessageKind, arguments: &[Encoded]) -> Result<Self>;
}

/// What a step did to its instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome<S> {
    /// Move to a new state (possibly a final one)
    Transition(S),
    /// Stay in the current state
    Unchanged,
}

/// A concrete protocol catalog
pub trait Protocol {
    /// Protocol discriminator
    const KIND: ProtocolKind;

    /// State sum type
    type State: ProtocolState;

    /// Message sum type
    type Message: ProtocolMessage;

    /// Step enum
    type Step: Copy + fmt::Debug;

    /// State of a freshly created instance
    fn initial_state() -> Self::State;

    /// Terminal states; instances in them are eligible for deletion
    fn final_state_kinds() -> &'static [StateKind];

    /// Messages allowed to create an instance
    fn is_initial_message(kind: MessageKind) -> bool;

    /// The step matching `state` and `message`, if any
    fn select_step(state: &Self::State, message: &Self::Message) -> Option<Self::Step>;

    /// Channel class the step accepts its message from
    fn channel_requirement(step: Self::Step) -> ChannelRequirement;

    /// Run a step
    fn execute(
        step: Self::Step,
        state: Self::State,
        message: Self::Message,
        ctx: &mut StepContext<'_>,
    ) -> Result<StepOutcome<Self::State>>;

    /// Whether `kind` is one of the final states
    fn is_final(kind: StateKind) -> bool {
        Self::final_state_kinds().contains(&kind)
    }
}

/// Encode a state for persistence
pub fn encode_state<S: ProtocolState>(state: &S) -> Result<(StateKind, Encoded)> {
    Ok((state.kind(), Encoded::of(state)?))
}

/// Decode a persisted state, checking its discriminator
pub fn decode_state<S: ProtocolState>(kind: StateKind, payload: &Encoded) -> Result<S> {
    let state: S = payload
        .decode()
        .map_err(|e| TandemError::malformed_state(e.to_string()))?;
    if state.kind() != kind {
        return Err(TandemError::malformed_state(format!(
            "payload decodes to {} but record says {kind}",
            state.kind()
        )));
    }
    Ok(state)
}

/// Build the envelope carrying `message` to an instance
pub fn envelope_for<M: ProtocolMessage>(
    owned_identity: IdentityKey,
    instance_uid: ProtocolInstanceUid,
    message: &M,
) -> Result<ProtocolEnvelope> {
    Ok(ProtocolEnvelope {
        owned_identity,
        protocol_kind: M::PROTOCOL,
        instance_uid,
        message_kind: message.kind(),
        arguments: message.encode_arguments()?,
    })
}

/// Arguments of the message a fired link sends to its parent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkNotification {
    /// Child instance that reached the state
    pub child_uid: ProtocolInstanceUid,
    /// State it reached
    pub child_state: StateKind,
}

impl LinkNotification {
    /// Encoded arguments
    pub fn encode(&self) -> Result<Vec<Encoded>> {
        Ok(vec![
            Encoded::of(&self.child_uid)?,
            Encoded::of(&self.child_state)?,
        ])
    }

    /// Decode from message arguments
    pub fn decode(arguments: &[Encoded]) -> Result<Self> {
        let args = Arguments::expect(arguments, 2)?;
        Ok(Self {
            child_uid: args.at(0)?,
            child_state: args.at(1)?,
        })
    }
}

/// Arguments of the message a satisfied waiting record sends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitingNotification {
    /// Contact whose trust changed
    pub contact: IdentityKey,
}

impl WaitingNotification {
    /// Encoded arguments
    pub fn encode(&self) -> Result<Vec<Encoded>> {
        Ok(vec![Encoded::of(&self.contact)?])
    }

    /// Decode from message arguments
    pub fn decode(arguments: &[Encoded]) -> Result<Self> {
        let args = Arguments::expect(arguments, 1)?;
        Ok(Self {
            contact: args.at(0)?,
        })
    }
}
