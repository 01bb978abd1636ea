//! Mutual contact verification by scanning each other's codes
//!
//! The scanned side displays a code: its own signature binding itself to
//! the identity allowed to scan it. The scanning side checks the code,
//! upgrades the scanned identity to a trusted one-to-one contact and hands
//! the signature back as proof, naming the instance uid of the channel to
//! open. The scanned side only accepts a proof it signed itself for that
//! scanner; it then upgrades the scanner and initiates channel creation
//! under that uid. The scanning side answers the ping as a channel creation
//! responder and resumes through a link once that instance confirms the
//! channel.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use tandem_core::effects::{Challenge, ChallengeEffects, Contact};
use tandem_core::{
    Arguments, ChannelRequirement, DeviceUid, Encoded, IdentityKey, MessageKind,
    ProtocolInstanceUid, ProtocolKind, Result, SendChannelTarget, Signature, StateKind,
    TandemError,
};

use super::channel_creation::{self, ChannelCreationMessage};
use crate::context::StepContext;
use crate::protocol::{LinkNotification, Protocol, ProtocolMessage, ProtocolState, StepOutcome};

/// State discriminators
pub mod states {
    use tandem_core::StateKind;

    /// Nothing happened yet
    pub const INITIAL: StateKind = StateKind(0);
    /// Scan sent, channel creation running
    pub const WAITING_FOR_CHANNEL: StateKind = StateKind(1);
    /// Contact verified (final)
    pub const FINISHED: StateKind = StateKind(2);
    /// Code or proof rejected, or proof replayed (final)
    pub const CANCELLED: StateKind = StateKind(3);
}

/// Message discriminators
pub mod messages {
    use tandem_core::MessageKind;

    /// Local: we scanned a contact's code
    pub const INITIATE: MessageKind = MessageKind(0);
    /// Signed scan proof from the scanner
    pub const SIGNATURE: MessageKind = MessageKind(1);
    /// Link notification: channel creation child confirmed its channel
    pub const CHANNEL_ESTABLISHED: MessageKind = MessageKind(2);
}

/// Mutual scan states
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MutualScanState {
    /// Nothing happened yet
    Initial,
    /// Waiting for the channel with `contact`
    WaitingForChannel {
        /// Scanned contact
        contact: IdentityKey,
        /// Channel creation child
        channel_instance: ProtocolInstanceUid,
    },
    /// Contact verified
    Finished {
        /// Verified contact
        contact: IdentityKey,
    },
    /// Proof rejected or replayed
    Cancelled,
}

impl ProtocolState for MutualScanState {
    fn kind(&self) -> StateKind {
        match self {
            Self::Initial => states::INITIAL,
            Self::WaitingForChannel { .. } => states::WAITING_FOR_CHANNEL,
            Self::Finished { .. } => states::FINISHED,
            Self::Cancelled => states::CANCELLED,
        }
    }
}

/// Mutual scan messages
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutualScanMessage {
    /// We scanned `contact`'s code, listing its devices
    Initiate {
        /// Scanned identity
        contact: IdentityKey,
        /// Devices read from the code
        devices: Vec<DeviceUid>,
        /// Signature read from the code
        code: Signature,
    },
    /// Proof that `scanner` scanned us
    Signature {
        /// Scanning identity
        scanner: IdentityKey,
        /// Scanner's devices
        devices: Vec<DeviceUid>,
        /// Our own signature, as read from the code we displayed
        signature: Signature,
        /// Channel creation instance to initiate towards the scanner
        channel_instance: ProtocolInstanceUid,
    },
    /// Channel creation child reached its confirmed state
    ChannelEstablished(LinkNotification),
}

impl ProtocolMessage for MutualScanMessage {
    const PROTOCOL: ProtocolKind = ProtocolKind::ContactMutualScan;

    fn kind(&self) -> MessageKind {
        match self {
            Self::Initiate { .. } => messages::INITIATE,
            Self::Signature { .. } => messages::SIGNATURE,
            Self::ChannelEstablished(_) => messages::CHANNEL_ESTABLISHED,
        }
    }

    fn encode_arguments(&self) -> Result<Vec<Encoded>> {
        match self {
            Self::Initiate {
                contact,
                devices,
                code,
            } => Ok(vec![
                Encoded::of(contact)?,
                Encoded::of(devices)?,
                Encoded::of(code)?,
            ]),
            Self::Signature {
                scanner,
                devices,
                signature,
                channel_instance,
            } => Ok(vec![
                Encoded::of(scanner)?,
                Encoded::of(devices)?,
                Encoded::of(signature)?,
                Encoded::of(channel_instance)?,
            ]),
            Self::ChannelEstablished(notification) => notification.encode(),
        }
    }

    fn decode(kind: MessageKind, arguments: &[Encoded]) -> Result<Self> {
        match kind {
            messages::INITIATE => {
                let args = Arguments::expect(arguments, 3)?;
                Ok(Self::Initiate {
                    contact: args.at(0)?,
                    devices: args.at(1)?,
                    code: args.at(2)?,
                })
            }
            messages::SIGNATURE => {
                let args = Arguments::expect(arguments, 4)?;
                Ok(Self::Signature {
                    scanner: args.at(0)?,
                    devices: args.at(1)?,
                    signature: args.at(2)?,
                    channel_instance: args.at(3)?,
                })
            }
            messages::CHANNEL_ESTABLISHED => {
                Ok(Self::ChannelEstablished(LinkNotification::decode(arguments)?))
            }
            other => Err(TandemError::malformed_message(format!(
                "unknown mutual scan message {other}"
            ))),
        }
    }
}

/// Mutual scan steps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutualScanStep {
    /// Upgrade the scanned contact, send proof, wait for the channel
    SendScan,
    /// Check a received proof, upgrade the scanner, open the channel
    VerifyScan,
    /// Channel is up
    FinishOnChannel,
}

/// Mutual contact verification protocol
pub struct ContactMutualScan;

impl Protocol for ContactMutualScan {
    const KIND: ProtocolKind = ProtocolKind::ContactMutualScan;
    type State = MutualScanState;
    type Message = MutualScanMessage;
    type Step = MutualScanStep;

    fn initial_state() -> Self::State {
        MutualScanState::Initial
    }

    fn final_state_kinds() -> &'static [StateKind] {
        &[states::FINISHED, states::CANCELLED]
    }

    fn is_initial_message(kind: MessageKind) -> bool {
        matches!(kind, messages::INITIATE | messages::SIGNATURE)
    }

    fn select_step(state: &Self::State, message: &Self::Message) -> Option<Self::Step> {
        use MutualScanMessage as M;
        use MutualScanState as S;
        match (state, message) {
            (S::Initial, M::Initiate { .. }) => Some(MutualScanStep::SendScan),
            (S::Initial, M::Signature { .. }) => Some(MutualScanStep::VerifyScan),
            (S::WaitingForChannel { .. }, M::ChannelEstablished(_)) => {
                Some(MutualScanStep::FinishOnChannel)
            }
            _ => None,
        }
    }

    fn channel_requirement(step: Self::Step) -> ChannelRequirement {
        match step {
            MutualScanStep::SendScan | MutualScanStep::FinishOnChannel => ChannelRequirement::Local,
            MutualScanStep::VerifyScan => ChannelRequirement::AsymmetricBroadcast,
        }
    }

    fn execute(
        step: Self::Step,
        state: Self::State,
        message: Self::Message,
        ctx: &mut StepContext<'_>,
    ) -> Result<StepOutcome<Self::State>> {
        match (step, message) {
            (
                MutualScanStep::SendScan,
                MutualScanMessage::Initiate {
                    contact,
                    devices,
                    code,
                },
            ) => send_scan(ctx, contact, devices, code),
            (
                MutualScanStep::VerifyScan,
                MutualScanMessage::Signature {
                    scanner,
                    devices,
                    signature,
                    channel_instance,
                },
            ) => verify_scan(ctx, scanner, devices, signature, channel_instance),
            (
                MutualScanStep::FinishOnChannel,
                MutualScanMessage::ChannelEstablished(notification),
            ) => finish_on_channel(state, notification),
            (step, message) => Err(TandemError::internal(format!(
                "step {step:?} selected for {message:?}"
            ))),
        }
    }
}

/// Signature `owned` displays in its code for `scanner` to scan
pub fn scan_code(
    challenges: &dyn ChallengeEffects,
    owned: &IdentityKey,
    scanner: &IdentityKey,
) -> Result<Signature> {
    challenges.solve_challenge(
        &Challenge::MutualScan {
            scanner: *scanner,
            scanned: *owned,
        },
        owned,
    )
}

/// Raise `contact` to the mutual-scan trust level and mark it one-to-one,
/// then resolve whatever was waiting on it
fn upgrade_contact(
    ctx: &mut StepContext<'_>,
    contact: IdentityKey,
    devices: Vec<DeviceUid>,
) -> Result<()> {
    let owned = ctx.owned_identity();
    let level = ctx.config().mutual_scan_trust_level;
    let identity = ctx.identity();
    let mut record = identity
        .contact(ctx.tx(), &owned, &contact)?
        .unwrap_or_else(|| Contact::new(contact, level));
    record.trust_level = record.trust_level.max(level);
    record.one_to_one = true;
    for device in devices {
        if !record.devices.contains(&device) {
            record.devices.push(device);
        }
    }
    identity.upsert_contact(ctx.tx(), &owned, record)?;
    let resolved = ctx.resolve_waiters(&contact)?;
    info!(contact = %contact, level = %level, resolved, "Contact verified by mutual scan");
    Ok(())
}

fn send_scan(
    ctx: &mut StepContext<'_>,
    contact: IdentityKey,
    devices: Vec<DeviceUid>,
    code: Signature,
) -> Result<StepOutcome<MutualScanState>> {
    let owned = ctx.owned_identity();
    let challenge = Challenge::MutualScan {
        scanner: owned,
        scanned: contact,
    };
    if !ctx.challenges().check_response(&code, &challenge, &contact) {
        warn!(contact = %contact, "Scanned code is not meant for us");
        return Ok(StepOutcome::Transition(MutualScanState::Cancelled));
    }
    upgrade_contact(ctx, contact, devices)?;

    let own_devices = {
        let identity = ctx.identity();
        let mut all = vec![identity.current_device(ctx.tx(), &owned)?];
        all.extend(identity.other_owned_devices(ctx.tx(), &owned)?);
        all
    };
    let channel_instance = ProtocolInstanceUid::random();
    ctx.post(
        SendChannelTarget::AsymmetricBroadcast {
            to_identity: contact,
        },
        ctx.instance_uid(),
        &MutualScanMessage::Signature {
            scanner: owned,
            devices: own_devices,
            signature: code,
            channel_instance,
        },
    )?;
    ctx.register_link(
        channel_instance,
        channel_creation::states::CHANNEL_CONFIRMED,
        messages::CHANNEL_ESTABLISHED,
    )?;

    Ok(StepOutcome::Transition(MutualScanState::WaitingForChannel {
        contact,
        channel_instance,
    }))
}

fn verify_scan(
    ctx: &mut StepContext<'_>,
    scanner: IdentityKey,
    devices: Vec<DeviceUid>,
    signature: Signature,
    channel_instance: ProtocolInstanceUid,
) -> Result<StepOutcome<MutualScanState>> {
    let owned = ctx.owned_identity();
    if ctx.signature_already_seen(&signature)? {
        info!(scanner = %scanner, "Replayed scan proof ignored");
        return Ok(StepOutcome::Transition(MutualScanState::Cancelled));
    }
    let challenge = Challenge::MutualScan {
        scanner,
        scanned: owned,
    };
    if !ctx
        .challenges()
        .check_response(&signature, &challenge, &owned)
    {
        warn!(scanner = %scanner, "Scan proof signature rejected");
        return Ok(StepOutcome::Transition(MutualScanState::Cancelled));
    }
    ctx.record_signature(&signature)?;

    upgrade_contact(ctx, scanner, devices)?;
    ctx.post_local(
        channel_instance,
        &ChannelCreationMessage::Initiate { contact: scanner },
    )?;
    Ok(StepOutcome::Transition(MutualScanState::Finished {
        contact: scanner,
    }))
}

fn finish_on_channel(
    state: MutualScanState,
    notification: LinkNotification,
) -> Result<StepOutcome<MutualScanState>> {
    match state {
        MutualScanState::WaitingForChannel {
            contact,
            channel_instance,
        } if channel_instance == notification.child_uid => {
            Ok(StepOutcome::Transition(MutualScanState::Finished { contact }))
        }
        MutualScanState::WaitingForChannel { .. } => {
            warn!(child = %notification.child_uid, "Notification from an unknown child ignored");
            Ok(StepOutcome::Unchanged)
        }
        other => Err(TandemError::internal(format!(
            "channel notification handled in {other:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_notification_is_local_only() {
        assert_eq!(
            ContactMutualScan::channel_requirement(MutualScanStep::FinishOnChannel),
            ChannelRequirement::Local
        );
    }

    #[test]
    fn stale_child_notification_leaves_state_alone() {
        let state = MutualScanState::WaitingForChannel {
            contact: IdentityKey::from_bytes([4; 32]),
            channel_instance: ProtocolInstanceUid::random(),
        };
        let outcome = finish_on_channel(
            state,
            LinkNotification {
                child_uid: ProtocolInstanceUid::random(),
                child_state: channel_creation::states::CHANNEL_CONFIRMED,
            },
        )
        .unwrap();
        assert_eq!(outcome, StepOutcome::Unchanged);
    }
}
