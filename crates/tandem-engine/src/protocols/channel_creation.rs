//! Secure channel establishment with one contact device
//!
//! The initiator signs a ping and broadcasts it to the contact's identity.
//! A contact device that accepts it records a confirmed channel and acks
//! over that channel; the ack confirms the channel on the initiator side.
//! Pings from identities that are not contacts are refused.
//! Both sides run under the same instance uid.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use tandem_core::effects::Challenge;
use tandem_core::{
    Arguments, ChannelRequirement, DeviceUid, Encoded, IdentityKey, MessageKind, ProtocolKind,
    Result, SendChannelTarget, Signature, StateKind, TandemError,
};

use crate::context::StepContext;
use crate::protocol::{Protocol, ProtocolMessage, ProtocolState, StepOutcome};

/// State discriminators
pub mod states {
    use tandem_core::StateKind;

    /// Nothing happened yet
    pub const INITIAL: StateKind = StateKind(0);
    /// Ping broadcast, waiting for an ack
    pub const PING_SENT: StateKind = StateKind(1);
    /// Channel confirmed (final)
    pub const CHANNEL_CONFIRMED: StateKind = StateKind(2);
    /// Gave up (final)
    pub const CANCELLED: StateKind = StateKind(3);
}

/// Message discriminators
pub mod messages {
    use tandem_core::MessageKind;

    /// Local request to open a channel with a contact
    pub const INITIATE: MessageKind = MessageKind(0);
    /// Signed ping from the initiator
    pub const PING: MessageKind = MessageKind(1);
    /// Ack from the responding device
    pub const ACK: MessageKind = MessageKind(2);
}

/// Channel creation states
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelCreationState {
    /// Nothing happened yet
    Initial,
    /// Ping broadcast to `contact`
    PingSent {
        /// Contact pinged
        contact: IdentityKey,
    },
    /// Confirmed channel with one device of `contact`
    ChannelConfirmed {
        /// Remote identity
        contact: IdentityKey,
        /// Remote device
        device: DeviceUid,
    },
    /// Ping rejected or replayed
    Cancelled,
}

impl ProtocolState for ChannelCreationState {
    fn kind(&self) -> StateKind {
        match self {
            Self::Initial => states::INITIAL,
            Self::PingSent { .. } => states::PING_SENT,
            Self::ChannelConfirmed { .. } => states::CHANNEL_CONFIRMED,
            Self::Cancelled => states::CANCELLED,
        }
    }
}

/// Channel creation messages
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelCreationMessage {
    /// Open a channel with `contact`
    Initiate {
        /// Contact to reach
        contact: IdentityKey,
    },
    /// Signed ping
    Ping {
        /// Pinging identity
        initiator: IdentityKey,
        /// Pinging device
        initiator_device: DeviceUid,
        /// Initiator's signature over the channel-creation challenge
        signature: Signature,
    },
    /// Responder device acknowledges the channel
    Ack,
}

impl ProtocolMessage for ChannelCreationMessage {
    const PROTOCOL: ProtocolKind = ProtocolKind::ChannelCreation;

    fn kind(&self) -> MessageKind {
        match self {
            Self::Initiate { .. } => messages::INITIATE,
            Self::Ping { .. } => messages::PING,
            Self::Ack => messages::ACK,
        }
    }

    fn encode_arguments(&self) -> Result<Vec<Encoded>> {
        Ok(match self {
            Self::Initiate { contact } => vec![Encoded::of(contact)?],
            Self::Ping {
                initiator,
                initiator_device,
                signature,
            } => vec![
                Encoded::of(initiator)?,
                Encoded::of(initiator_device)?,
                Encoded::of(signature)?,
            ],
            Self::Ack => Vec::new(),
        })
    }

    fn decode(kind: MessageKind, arguments: &[Encoded]) -> Result<Self> {
        match kind {
            messages::INITIATE => {
                let args = Arguments::expect(arguments, 1)?;
                Ok(Self::Initiate {
                    contact: args.at(0)?,
                })
            }
            messages::PING => {
                let args = Arguments::expect(arguments, 3)?;
                Ok(Self::Ping {
                    initiator: args.at(0)?,
                    initiator_device: args.at(1)?,
                    signature: args.at(2)?,
                })
            }
            messages::ACK => {
                Arguments::expect(arguments, 0)?;
                Ok(Self::Ack)
            }
            other => Err(TandemError::malformed_message(format!(
                "unknown channel creation message {other}"
            ))),
        }
    }
}

/// Channel creation steps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelCreationStep {
    /// Sign and broadcast the ping
    SendPing,
    /// Check the ping, confirm the channel, ack
    AnswerPing,
    /// Confirm the channel on the initiator side
    ConfirmChannel,
}

/// Secure channel establishment protocol
pub struct ChannelCreation;

impl Protocol for ChannelCreation {
    const KIND: ProtocolKind = ProtocolKind::ChannelCreation;
    type State = ChannelCreationState;
    type Message = ChannelCreationMessage;
    type Step = ChannelCreationStep;

    fn initial_state() -> Self::State {
        ChannelCreationState::Initial
    }

    fn final_state_kinds() -> &'static [StateKind] {
        &[states::CHANNEL_CONFIRMED, states::CANCELLED]
    }

    fn is_initial_message(kind: MessageKind) -> bool {
        matches!(kind, messages::INITIATE | messages::PING)
    }

    fn select_step(state: &Self::State, message: &Self::Message) -> Option<Self::Step> {
        use ChannelCreationMessage as M;
        use ChannelCreationState as S;
        match (state, message) {
            (S::Initial, M::Initiate { .. }) => Some(ChannelCreationStep::SendPing),
            (S::Initial, M::Ping { .. }) => Some(ChannelCreationStep::AnswerPing),
            (S::PingSent { .. }, M::Ack) => Some(ChannelCreationStep::ConfirmChannel),
            _ => None,
        }
    }

    fn channel_requirement(step: Self::Step) -> ChannelRequirement {
        match step {
            ChannelCreationStep::SendPing => ChannelRequirement::Local,
            ChannelCreationStep::AnswerPing => ChannelRequirement::AsymmetricBroadcast,
            ChannelCreationStep::ConfirmChannel => ChannelRequirement::ContactDevice,
        }
    }

    fn execute(
        step: Self::Step,
        state: Self::State,
        message: Self::Message,
        ctx: &mut StepContext<'_>,
    ) -> Result<StepOutcome<Self::State>> {
        match (step, message) {
            (ChannelCreationStep::SendPing, ChannelCreationMessage::Initiate { contact }) => {
                send_ping(ctx, contact)
            }
            (
                ChannelCreationStep::AnswerPing,
                ChannelCreationMessage::Ping {
                    initiator,
                    initiator_device,
                    signature,
                },
            ) => answer_ping(ctx, initiator, initiator_device, signature),
            (ChannelCreationStep::ConfirmChannel, ChannelCreationMessage::Ack) => {
                confirm_channel(ctx, state)
            }
            (step, message) => Err(TandemError::internal(format!(
                "step {step:?} selected for {message:?}"
            ))),
        }
    }
}

fn send_ping(
    ctx: &mut StepContext<'_>,
    contact: IdentityKey,
) -> Result<StepOutcome<ChannelCreationState>> {
    let owned = ctx.owned_identity();
    let device = ctx.identity().current_device(ctx.tx(), &owned)?;
    let challenge = Challenge::ChannelCreation {
        initiator: owned,
        initiator_device: device,
        responder: contact,
    };
    let signature = ctx.challenges().solve_challenge(&challenge, &owned)?;
    ctx.post(
        SendChannelTarget::AsymmetricBroadcast {
            to_identity: contact,
        },
        ctx.instance_uid(),
        &ChannelCreationMessage::Ping {
            initiator: owned,
            initiator_device: device,
            signature,
        },
    )?;
    Ok(StepOutcome::Transition(ChannelCreationState::PingSent {
        contact,
    }))
}

fn answer_ping(
    ctx: &mut StepContext<'_>,
    initiator: IdentityKey,
    initiator_device: DeviceUid,
    signature: Signature,
) -> Result<StepOutcome<ChannelCreationState>> {
    let owned = ctx.owned_identity();
    let identity = ctx.identity();
    if identity.contact(ctx.tx(), &owned, &initiator)?.is_none() {
        warn!(initiator = %initiator, "Channel ping from a non-contact rejected");
        return Ok(StepOutcome::Transition(ChannelCreationState::Cancelled));
    }
    if ctx.signature_already_seen(&signature)? {
        info!(initiator = %initiator, "Replayed channel ping ignored");
        return Ok(StepOutcome::Transition(ChannelCreationState::Cancelled));
    }
    let challenge = Challenge::ChannelCreation {
        initiator,
        initiator_device,
        responder: owned,
    };
    if !ctx
        .challenges()
        .check_response(&signature, &challenge, &initiator)
    {
        warn!(initiator = %initiator, "Channel ping signature rejected");
        return Ok(StepOutcome::Transition(ChannelCreationState::Cancelled));
    }
    ctx.record_signature(&signature)?;

    ctx.channels()
        .create_confirmed_channel(ctx.tx(), &owned, &initiator, &initiator_device)?;
    ctx.post(
        SendChannelTarget::ContactDevice {
            contact: initiator,
            device: initiator_device,
        },
        ctx.instance_uid(),
        &ChannelCreationMessage::Ack,
    )?;
    info!(contact = %initiator, device = %initiator_device, "Secure channel confirmed");
    Ok(StepOutcome::Transition(
        ChannelCreationState::ChannelConfirmed {
            contact: initiator,
            device: initiator_device,
        },
    ))
}

fn confirm_channel(
    ctx: &mut StepContext<'_>,
    state: ChannelCreationState,
) -> Result<StepOutcome<ChannelCreationState>> {
    let ChannelCreationState::PingSent { contact } = state else {
        return Err(TandemError::internal("ack handled outside PingSent"));
    };
    let remote = ctx.remote_identity()?;
    let Some(device) = ctx.reception_channel().remote_device() else {
        return Err(TandemError::internal("ack arrived without a remote device"));
    };
    if remote != contact {
        warn!(expected = %contact, actual = %remote, "Ack from the wrong identity ignored");
        return Ok(StepOutcome::Unchanged);
    }
    let owned = ctx.owned_identity();
    ctx.channels()
        .create_confirmed_channel(ctx.tx(), &owned, &contact, &device)?;
    info!(contact = %contact, device = %device, "Secure channel confirmed");
    Ok(StepOutcome::Transition(
        ChannelCreationState::ChannelConfirmed { contact, device },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ack_only_matches_after_ping() {
        let contact = IdentityKey::from_bytes([9; 32]);
        assert_eq!(
            ChannelCreation::select_step(&ChannelCreationState::Initial, &ChannelCreationMessage::Ack),
            None
        );
        assert_eq!(
            ChannelCreation::select_step(
                &ChannelCreationState::PingSent { contact },
                &ChannelCreationMessage::Ack
            ),
            Some(ChannelCreationStep::ConfirmChannel)
        );
    }

    #[test]
    fn ping_is_only_accepted_over_broadcast() {
        assert_eq!(
            ChannelCreation::channel_requirement(ChannelCreationStep::AnswerPing),
            ChannelRequirement::AsymmetricBroadcast
        );
    }

    #[test]
    fn ping_arguments_decode() {
        let message = ChannelCreationMessage::Ping {
            initiator: IdentityKey::from_bytes([1; 32]),
            initiator_device: DeviceUid::random(),
            signature: Signature::from_bytes(vec![7; 64]),
        };
        let args = message.encode_arguments().unwrap();
        assert_eq!(
            ChannelCreationMessage::decode(messages::PING, &args).unwrap(),
            message
        );
        assert!(ChannelCreationMessage::decode(messages::ACK, &args).is_err());
    }
}
