//! Legacy group management
//!
//! Legacy groups have one owner who alone decides membership. Members can
//! leave; the owner can disband. An invitation is only accepted once the
//! inviting owner is trusted enough, waiting on the trust-level registry
//! when it is not yet.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use tandem_core::effects::{remove_legacy_group_member, LegacyGroup};
use tandem_core::{
    Arguments, ChannelRequirement, Encoded, GroupId, IdentityKey, MessageKind, ProtocolInstanceUid,
    ProtocolKind, Result, SendChannelTarget, StateKind, TandemError, TrustLevel,
};

use crate::context::StepContext;
use crate::protocol::{
    Protocol, ProtocolMessage, ProtocolState, StepOutcome, WaitingNotification,
};

/// State discriminators
pub mod states {
    use tandem_core::StateKind;

    /// Nothing happened yet
    pub const INITIAL: StateKind = StateKind(0);
    /// Invitation received, inviter not trusted enough yet
    pub const INVITATION_AWAITING_TRUST: StateKind = StateKind(1);
    /// Done (final)
    pub const FINAL: StateKind = StateKind(2);
}

/// Message discriminators
pub mod messages {
    use tandem_core::MessageKind;

    /// Local: leave a group we do not own
    pub const LEAVE_GROUP: MessageKind = MessageKind(0);
    /// Local: disband a group we own
    pub const DISBAND_GROUP: MessageKind = MessageKind(1);
    /// From a member: it left our group
    pub const MEMBER_LEFT: MessageKind = MessageKind(2);
    /// From the owner: the group is gone
    pub const GROUP_DISBANDED: MessageKind = MessageKind(3);
    /// From the owner: join this group
    pub const INVITATION: MessageKind = MessageKind(4);
    /// Waiting notification: the inviter is now trusted enough
    pub const TRUST_LEVEL_INCREASED: MessageKind = MessageKind(5);
}

/// Legacy group management states
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroupManagementState {
    /// Nothing happened yet
    Initial,
    /// Invitation parked until `inviter` reaches the required trust
    InvitationAwaitingTrust {
        /// Group offered
        group: LegacyGroup,
        /// Owner who invited us
        inviter: IdentityKey,
    },
    /// Done
    Final,
}

impl ProtocolState for GroupManagementState {
    fn kind(&self) -> StateKind {
        match self {
            Self::Initial => states::INITIAL,
            Self::InvitationAwaitingTrust { .. } => states::INVITATION_AWAITING_TRUST,
            Self::Final => states::FINAL,
        }
    }
}

/// Legacy group management messages
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupManagementMessage {
    /// Leave a group
    LeaveGroup {
        /// Group to leave
        group_id: GroupId,
    },
    /// Disband an owned group
    DisbandGroup {
        /// Group to disband
        group_id: GroupId,
    },
    /// The sending member left
    MemberLeft {
        /// Group left
        group_id: GroupId,
    },
    /// The sending owner disbanded the group
    GroupDisbanded {
        /// Group disbanded
        group_id: GroupId,
    },
    /// The sending owner invites us
    Invitation {
        /// Group as the owner sees it
        group: LegacyGroup,
    },
    /// Waiting notification for the inviter
    TrustLevelIncreased(WaitingNotification),
}

impl ProtocolMessage for GroupManagementMessage {
    const PROTOCOL: ProtocolKind = ProtocolKind::GroupManagement;

    fn kind(&self) -> MessageKind {
        match self {
            Self::LeaveGroup { .. } => messages::LEAVE_GROUP,
            Self::DisbandGroup { .. } => messages::DISBAND_GROUP,
            Self::MemberLeft { .. } => messages::MEMBER_LEFT,
            Self::GroupDisbanded { .. } => messages::GROUP_DISBANDED,
            Self::Invitation { .. } => messages::INVITATION,
            Self::TrustLevelIncreased(_) => messages::TRUST_LEVEL_INCREASED,
        }
    }

    fn encode_arguments(&self) -> Result<Vec<Encoded>> {
        match self {
            Self::LeaveGroup { group_id }
            | Self::DisbandGroup { group_id }
            | Self::MemberLeft { group_id }
            | Self::GroupDisbanded { group_id } => Ok(vec![Encoded::of(group_id)?]),
            Self::Invitation { group } => Ok(vec![Encoded::of(group)?]),
            Self::TrustLevelIncreased(notification) => notification.encode(),
        }
    }

    fn decode(kind: MessageKind, arguments: &[Encoded]) -> Result<Self> {
        let group_id = || -> Result<GroupId> { Arguments::expect(arguments, 1)?.at(0) };
        match kind {
            messages::LEAVE_GROUP => Ok(Self::LeaveGroup {
                group_id: group_id()?,
            }),
            messages::DISBAND_GROUP => Ok(Self::DisbandGroup {
                group_id: group_id()?,
            }),
            messages::MEMBER_LEFT => Ok(Self::MemberLeft {
                group_id: group_id()?,
            }),
            messages::GROUP_DISBANDED => Ok(Self::GroupDisbanded {
                group_id: group_id()?,
            }),
            messages::INVITATION => Ok(Self::Invitation {
                group: Arguments::expect(arguments, 1)?.at(0)?,
            }),
            messages::TRUST_LEVEL_INCREASED => Ok(Self::TrustLevelIncreased(
                WaitingNotification::decode(arguments)?,
            )),
            other => Err(TandemError::malformed_message(format!(
                "unknown group management message {other}"
            ))),
        }
    }
}

/// Legacy group management steps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupManagementStep {
    /// Tell the owner we leave, drop the group
    Leave,
    /// Tell every member, drop the group
    Disband,
    /// Remove the sending member from our group
    ProcessMemberLeft,
    /// Drop the group the sending owner disbanded
    ProcessGroupDisbanded,
    /// Join now or wait for trust
    ProcessInvitation,
    /// The inviter became trusted enough: join
    AcceptParkedInvitation,
}

/// Legacy group management protocol
pub struct GroupManagement;

impl Protocol for GroupManagement {
    const KIND: ProtocolKind = ProtocolKind::GroupManagement;
    type State = GroupManagementState;
    type Message = GroupManagementMessage;
    type Step = GroupManagementStep;

    fn initial_state() -> Self::State {
        GroupManagementState::Initial
    }

    fn final_state_kinds() -> &'static [StateKind] {
        &[states::FINAL]
    }

    fn is_initial_message(kind: MessageKind) -> bool {
        kind != messages::TRUST_LEVEL_INCREASED
    }

    fn select_step(state: &Self::State, message: &Self::Message) -> Option<Self::Step> {
        use GroupManagementMessage as M;
        use GroupManagementState as S;
        use GroupManagementStep as Step;
        match (state, message) {
            (S::Initial, M::LeaveGroup { .. }) => Some(Step::Leave),
            (S::Initial, M::DisbandGroup { .. }) => Some(Step::Disband),
            (S::Initial, M::MemberLeft { .. }) => Some(Step::ProcessMemberLeft),
            (S::Initial, M::GroupDisbanded { .. }) => Some(Step::ProcessGroupDisbanded),
            (S::Initial, M::Invitation { .. }) => Some(Step::ProcessInvitation),
            (S::InvitationAwaitingTrust { .. }, M::TrustLevelIncreased(_)) => {
                Some(Step::AcceptParkedInvitation)
            }
            _ => None,
        }
    }

    fn channel_requirement(step: Self::Step) -> ChannelRequirement {
        match step {
            GroupManagementStep::Leave
            | GroupManagementStep::Disband
            | GroupManagementStep::AcceptParkedInvitation => ChannelRequirement::Local,
            GroupManagementStep::ProcessMemberLeft
            | GroupManagementStep::ProcessGroupDisbanded
            | GroupManagementStep::ProcessInvitation => ChannelRequirement::ContactDevice,
        }
    }

    fn execute(
        step: Self::Step,
        state: Self::State,
        message: Self::Message,
        ctx: &mut StepContext<'_>,
    ) -> Result<StepOutcome<Self::State>> {
        use GroupManagementMessage as M;
        use GroupManagementStep as Step;
        match (step, message) {
            (Step::Leave, M::LeaveGroup { group_id }) => leave(ctx, group_id),
            (Step::Disband, M::DisbandGroup { group_id }) => disband(ctx, group_id),
            (Step::ProcessMemberLeft, M::MemberLeft { group_id }) => member_left(ctx, group_id),
            (Step::ProcessGroupDisbanded, M::GroupDisbanded { group_id }) => {
                group_disbanded(ctx, group_id)
            }
            (Step::ProcessInvitation, M::Invitation { group }) => invitation(ctx, group),
            (Step::AcceptParkedInvitation, M::TrustLevelIncreased(notification)) => {
                accept_parked(ctx, state, notification)
            }
            (step, message) => Err(TandemError::internal(format!(
                "step {step:?} selected for {message:?}"
            ))),
        }
    }
}

fn finished() -> Result<StepOutcome<GroupManagementState>> {
    Ok(StepOutcome::Transition(GroupManagementState::Final))
}

/// Tell `to` about `message` over every channel with its devices, on a fresh
/// instance at the recipient
fn notify(
    ctx: &mut StepContext<'_>,
    to: IdentityKey,
    message: &GroupManagementMessage,
) -> Result<()> {
    ctx.post(
        SendChannelTarget::AllContactDevices { contact: to },
        ProtocolInstanceUid::random(),
        message,
    )?;
    Ok(())
}

fn leave(ctx: &mut StepContext<'_>, group_id: GroupId) -> Result<StepOutcome<GroupManagementState>> {
    let owned = ctx.owned_identity();
    let identity = ctx.identity();
    let Some(group) = identity.legacy_group(ctx.tx(), &owned, &group_id)? else {
        debug!(group = %group_id, "Leaving a group we are not in");
        return finished();
    };
    if group.owner == owned {
        return Err(TandemError::internal(format!(
            "cannot leave owned group {group_id}; disband it"
        )));
    }
    notify(ctx, group.owner, &GroupManagementMessage::MemberLeft { group_id })?;
    identity.delete_legacy_group(ctx.tx(), &owned, &group_id)?;
    info!(group = %group_id, "Left legacy group");
    finished()
}

fn disband(
    ctx: &mut StepContext<'_>,
    group_id: GroupId,
) -> Result<StepOutcome<GroupManagementState>> {
    let owned = ctx.owned_identity();
    let identity = ctx.identity();
    let Some(group) = identity.legacy_group(ctx.tx(), &owned, &group_id)? else {
        debug!(group = %group_id, "Disbanding an unknown group");
        return finished();
    };
    if group.owner != owned {
        return Err(TandemError::internal(format!(
            "cannot disband group {group_id} owned by {}",
            group.owner
        )));
    }
    for member in &group.members {
        notify(
            ctx,
            *member,
            &GroupManagementMessage::GroupDisbanded { group_id },
        )?;
    }
    identity.delete_legacy_group(ctx.tx(), &owned, &group_id)?;
    info!(group = %group_id, members = group.members.len(), "Disbanded legacy group");
    finished()
}

fn member_left(
    ctx: &mut StepContext<'_>,
    group_id: GroupId,
) -> Result<StepOutcome<GroupManagementState>> {
    let owned = ctx.owned_identity();
    let member = ctx.remote_identity()?;
    let identity = ctx.identity();
    match identity.legacy_group(ctx.tx(), &owned, &group_id)? {
        Some(group) if group.owner == owned => {
            if remove_legacy_group_member(identity, ctx.tx(), &owned, &group_id, &member)? {
                info!(group = %group_id, member = %member, "Member left legacy group");
            }
        }
        _ => warn!(group = %group_id, member = %member, "Leave notice for a group we do not own"),
    }
    finished()
}

fn group_disbanded(
    ctx: &mut StepContext<'_>,
    group_id: GroupId,
) -> Result<StepOutcome<GroupManagementState>> {
    let owned = ctx.owned_identity();
    let sender = ctx.remote_identity()?;
    let identity = ctx.identity();
    match identity.legacy_group(ctx.tx(), &owned, &group_id)? {
        Some(group) if group.owner == sender => {
            identity.delete_legacy_group(ctx.tx(), &owned, &group_id)?;
            info!(group = %group_id, "Legacy group disbanded by its owner");
        }
        Some(_) => warn!(group = %group_id, sender = %sender, "Disband notice from a non-owner"),
        None => debug!(group = %group_id, "Disband notice for an unknown group"),
    }
    finished()
}

fn contact_trust(ctx: &mut StepContext<'_>, contact: &IdentityKey) -> Result<TrustLevel> {
    let owned = ctx.owned_identity();
    Ok(ctx
        .identity()
        .contact(ctx.tx(), &owned, contact)?
        .map(|c| c.trust_level)
        .unwrap_or_default())
}

fn join(ctx: &mut StepContext<'_>, mut group: LegacyGroup) -> Result<StepOutcome<GroupManagementState>> {
    let owned = ctx.owned_identity();
    group.members.retain(|member| *member != owned && *member != group.owner);
    let group_id = group.group_id;
    ctx.identity().upsert_legacy_group(ctx.tx(), &owned, group)?;
    info!(group = %group_id, "Joined legacy group");
    finished()
}

fn invitation(
    ctx: &mut StepContext<'_>,
    group: LegacyGroup,
) -> Result<StepOutcome<GroupManagementState>> {
    let inviter = ctx.remote_identity()?;
    if group.owner != inviter {
        warn!(group = %group.group_id, inviter = %inviter, "Invitation from a non-owner rejected");
        return finished();
    }
    let required = ctx.config().group_invitation_min_trust;
    if contact_trust(ctx, &inviter)? >= required {
        return join(ctx, group);
    }
    ctx.wait_for_trust_level(inviter, required, messages::TRUST_LEVEL_INCREASED)?;
    info!(group = %group.group_id, inviter = %inviter, required = %required, "Invitation waiting for trust");
    Ok(StepOutcome::Transition(
        GroupManagementState::InvitationAwaitingTrust { group, inviter },
    ))
}

fn accept_parked(
    ctx: &mut StepContext<'_>,
    state: GroupManagementState,
    notification: WaitingNotification,
) -> Result<StepOutcome<GroupManagementState>> {
    let GroupManagementState::InvitationAwaitingTrust { group, inviter } = state else {
        return Err(TandemError::internal("trust notification outside a parked invitation"));
    };
    if notification.contact != inviter {
        warn!(contact = %notification.contact, inviter = %inviter, "Trust notification for another contact");
        return Ok(StepOutcome::Unchanged);
    }
    join(ctx, group)
}
