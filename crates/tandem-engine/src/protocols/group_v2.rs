//! Administrator-model groups
//!
//! Any administrator may disband the group or kick a member; every member
//! may leave. Disband and kick notices are only honoured when they come
//! from a member we know as an administrator. Invitations come from an
//! administrator and are accepted once the inviter is a one-to-one
//! contact, waiting on the upgrade registry when it is not yet.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use tandem_core::effects::{remove_group_v2_member, GroupV2 as Group};
use tandem_core::{
    Arguments, ChannelRequirement, Encoded, GroupId, IdentityKey, MessageKind,
    ProtocolInstanceUid, ProtocolKind, Result, SendChannelTarget, StateKind, TandemError,
    TrustLevel,
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
    /// Invitation received from a contact that is not one-to-one yet
    pub const INVITATION_AWAITING_UPGRADE: StateKind = StateKind(1);
    /// Done (final)
    pub const FINAL: StateKind = StateKind(2);
}

/// Message discriminators
pub mod messages {
    use tandem_core::MessageKind;

    /// Local: leave a group
    pub const LEAVE: MessageKind = MessageKind(0);
    /// Local: disband an administered group
    pub const DISBAND: MessageKind = MessageKind(1);
    /// From a member: it left
    pub const MEMBER_LEFT: MessageKind = MessageKind(2);
    /// From an administrator: the group is gone
    pub const DISBANDED: MessageKind = MessageKind(3);
    /// From an administrator: join this group
    pub const INVITATION: MessageKind = MessageKind(4);
    /// Waiting notification: the inviter became a one-to-one contact
    pub const INVITER_UPGRADED: MessageKind = MessageKind(5);
    /// Local: remove a member from an administered group
    pub const KICK_MEMBER: MessageKind = MessageKind(6);
    /// From an administrator: a member was removed
    pub const MEMBER_KICKED: MessageKind = MessageKind(7);
}

/// Group v2 states
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroupV2State {
    /// Nothing happened yet
    Initial,
    /// Invitation parked until `inviter` is a one-to-one contact
    InvitationAwaitingUpgrade {
        /// Group offered
        group_id: GroupId,
        /// Members as the inviter listed them
        members: Vec<IdentityKey>,
        /// Administrators as the inviter listed them
        admins: Vec<IdentityKey>,
        /// Who invited us
        inviter: IdentityKey,
    },
    /// Done
    Final,
}

impl ProtocolState for GroupV2State {
    fn kind(&self) -> StateKind {
        match self {
            Self::Initial => states::INITIAL,
            Self::InvitationAwaitingUpgrade { .. } => states::INVITATION_AWAITING_UPGRADE,
            Self::Final => states::FINAL,
        }
    }
}

/// Group v2 messages
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupV2Message {
    /// Leave a group
    Leave {
        /// Group to leave
        group_id: GroupId,
    },
    /// Disband an administered group
    Disband {
        /// Group to disband
        group_id: GroupId,
    },
    /// The sending member left
    MemberLeft {
        /// Group left
        group_id: GroupId,
    },
    /// The sending administrator disbanded the group
    Disbanded {
        /// Group disbanded
        group_id: GroupId,
    },
    /// The sender invites us
    Invitation {
        /// Group offered
        group_id: GroupId,
        /// Current members, including the inviter
        members: Vec<IdentityKey>,
        /// Current administrators, including the inviter
        admins: Vec<IdentityKey>,
    },
    /// Waiting notification for the inviter
    InviterUpgraded(WaitingNotification),
    /// Remove `member` from an administered group
    KickMember {
        /// Group to change
        group_id: GroupId,
        /// Member to remove
        member: IdentityKey,
    },
    /// The sending administrator removed `member`
    MemberKicked {
        /// Group changed
        group_id: GroupId,
        /// Member removed
        member: IdentityKey,
    },
}

impl ProtocolMessage for GroupV2Message {
    const PROTOCOL: ProtocolKind = ProtocolKind::GroupV2;

    fn kind(&self) -> MessageKind {
        match self {
            Self::Leave { .. } => messages::LEAVE,
            Self::Disband { .. } => messages::DISBAND,
            Self::MemberLeft { .. } => messages::MEMBER_LEFT,
            Self::Disbanded { .. } => messages::DISBANDED,
            Self::Invitation { .. } => messages::INVITATION,
            Self::InviterUpgraded(_) => messages::INVITER_UPGRADED,
            Self::KickMember { .. } => messages::KICK_MEMBER,
            Self::MemberKicked { .. } => messages::MEMBER_KICKED,
        }
    }

    fn encode_arguments(&self) -> Result<Vec<Encoded>> {
        match self {
            Self::Leave { group_id }
            | Self::Disband { group_id }
            | Self::MemberLeft { group_id }
            | Self::Disbanded { group_id } => Ok(vec![Encoded::of(group_id)?]),
            Self::Invitation {
                group_id,
                members,
                admins,
            } => Ok(vec![
                Encoded::of(group_id)?,
                Encoded::of(members)?,
                Encoded::of(admins)?,
            ]),
            Self::InviterUpgraded(notification) => notification.encode(),
            Self::KickMember { group_id, member } | Self::MemberKicked { group_id, member } => {
                Ok(vec![Encoded::of(group_id)?, Encoded::of(member)?])
            }
        }
    }

    fn decode(kind: MessageKind, arguments: &[Encoded]) -> Result<Self> {
        let group_id = || -> Result<GroupId> { Arguments::expect(arguments, 1)?.at(0) };
        let pair = || -> Result<(GroupId, IdentityKey)> {
            let args = Arguments::expect(arguments, 2)?;
            Ok((args.at(0)?, args.at(1)?))
        };
        match kind {
            messages::LEAVE => Ok(Self::Leave {
                group_id: group_id()?,
            }),
            messages::DISBAND => Ok(Self::Disband {
                group_id: group_id()?,
            }),
            messages::MEMBER_LEFT => Ok(Self::MemberLeft {
                group_id: group_id()?,
            }),
            messages::DISBANDED => Ok(Self::Disbanded {
                group_id: group_id()?,
            }),
            messages::INVITATION => {
                let args = Arguments::expect(arguments, 3)?;
                Ok(Self::Invitation {
                    group_id: args.at(0)?,
                    members: args.at(1)?,
                    admins: args.at(2)?,
                })
            }
            messages::INVITER_UPGRADED => Ok(Self::InviterUpgraded(WaitingNotification::decode(
                arguments,
            )?)),
            messages::KICK_MEMBER => {
                let (group_id, member) = pair()?;
                Ok(Self::KickMember { group_id, member })
            }
            messages::MEMBER_KICKED => {
                let (group_id, member) = pair()?;
                Ok(Self::MemberKicked { group_id, member })
            }
            other => Err(TandemError::malformed_message(format!(
                "unknown group v2 message {other}"
            ))),
        }
    }
}

/// Group v2 steps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupV2Step {
    /// Tell every member we leave, drop the group
    Leave,
    /// Tell every member, drop the group
    Disband,
    /// Remove the sending member
    ProcessMemberLeft,
    /// Drop the group
    ProcessDisbanded,
    /// Join now or wait for the upgrade
    ProcessInvitation,
    /// The inviter is one-to-one now: join
    AcceptParkedInvitation,
    /// Remove a member and tell everyone, the member included
    Kick,
    /// Apply a kick announced by an administrator
    ProcessMemberKicked,
}

/// Administrator-model group protocol
pub struct GroupV2;

impl Protocol for GroupV2 {
    const KIND: ProtocolKind = ProtocolKind::GroupV2;
    type State = GroupV2State;
    type Message = GroupV2Message;
    type Step = GroupV2Step;

    fn initial_state() -> Self::State {
        GroupV2State::Initial
    }

    fn final_state_kinds() -> &'static [StateKind] {
        &[states::FINAL]
    }

    fn is_initial_message(kind: MessageKind) -> bool {
        kind != messages::INVITER_UPGRADED
    }

    fn select_step(state: &Self::State, message: &Self::Message) -> Option<Self::Step> {
        use GroupV2Message as M;
        use GroupV2State as S;
        match (state, message) {
            (S::Initial, M::Leave { .. }) => Some(GroupV2Step::Leave),
            (S::Initial, M::Disband { .. }) => Some(GroupV2Step::Disband),
            (S::Initial, M::MemberLeft { .. }) => Some(GroupV2Step::ProcessMemberLeft),
            (S::Initial, M::Disbanded { .. }) => Some(GroupV2Step::ProcessDisbanded),
            (S::Initial, M::Invitation { .. }) => Some(GroupV2Step::ProcessInvitation),
            (S::Initial, M::KickMember { .. }) => Some(GroupV2Step::Kick),
            (S::Initial, M::MemberKicked { .. }) => Some(GroupV2Step::ProcessMemberKicked),
            (S::InvitationAwaitingUpgrade { .. }, M::InviterUpgraded(_)) => {
                Some(GroupV2Step::AcceptParkedInvitation)
            }
            _ => None,
        }
    }

    fn channel_requirement(step: Self::Step) -> ChannelRequirement {
        match step {
            GroupV2Step::Leave
            | GroupV2Step::Disband
            | GroupV2Step::Kick
            | GroupV2Step::AcceptParkedInvitation => ChannelRequirement::Local,
            GroupV2Step::ProcessMemberLeft
            | GroupV2Step::ProcessDisbanded
            | GroupV2Step::ProcessInvitation
            | GroupV2Step::ProcessMemberKicked => ChannelRequirement::ContactDevice,
        }
    }

    fn execute(
        step: Self::Step,
        state: Self::State,
        message: Self::Message,
        ctx: &mut StepContext<'_>,
    ) -> Result<StepOutcome<Self::State>> {
        use GroupV2Message as M;
        match (step, message) {
            (GroupV2Step::Leave, M::Leave { group_id }) => leave(ctx, group_id),
            (GroupV2Step::Disband, M::Disband { group_id }) => disband(ctx, group_id),
            (GroupV2Step::ProcessMemberLeft, M::MemberLeft { group_id }) => {
                member_left(ctx, group_id)
            }
            (GroupV2Step::ProcessDisbanded, M::Disbanded { group_id }) => disbanded(ctx, group_id),
            (
                GroupV2Step::ProcessInvitation,
                M::Invitation {
                    group_id,
                    members,
                    admins,
                },
            ) => invitation(ctx, group_id, members, admins),
            (GroupV2Step::AcceptParkedInvitation, M::InviterUpgraded(notification)) => {
                accept_parked(ctx, state, notification)
            }
            (GroupV2Step::Kick, M::KickMember { group_id, member }) => kick(ctx, group_id, member),
            (GroupV2Step::ProcessMemberKicked, M::MemberKicked { group_id, member }) => {
                member_kicked(ctx, group_id, member)
            }
            (step, message) => Err(TandemError::internal(format!(
                "step {step:?} selected for {message:?}"
            ))),
        }
    }
}

fn finished() -> Result<StepOutcome<GroupV2State>> {
    Ok(StepOutcome::Transition(GroupV2State::Final))
}

fn broadcast(ctx: &mut StepContext<'_>, members: &[IdentityKey], message: &GroupV2Message) -> Result<()> {
    for member in members {
        ctx.post(
            SendChannelTarget::AllContactDevices { contact: *member },
            ProtocolInstanceUid::random(),
            message,
        )?;
    }
    Ok(())
}

fn load(ctx: &mut StepContext<'_>, group_id: &GroupId) -> Result<Option<Group>> {
    let owned = ctx.owned_identity();
    ctx.identity().group_v2(ctx.tx(), &owned, group_id)
}

fn leave(ctx: &mut StepContext<'_>, group_id: GroupId) -> Result<StepOutcome<GroupV2State>> {
    let owned = ctx.owned_identity();
    let Some(group) = load(ctx, &group_id)? else {
        debug!(group = %group_id, "Leaving a group we are not in");
        return finished();
    };
    broadcast(ctx, &group.members, &GroupV2Message::MemberLeft { group_id })?;
    ctx.identity().delete_group_v2(ctx.tx(), &owned, &group_id)?;
    info!(group = %group_id, "Left group");
    finished()
}

fn disband(ctx: &mut StepContext<'_>, group_id: GroupId) -> Result<StepOutcome<GroupV2State>> {
    let owned = ctx.owned_identity();
    let Some(group) = load(ctx, &group_id)? else {
        debug!(group = %group_id, "Disbanding an unknown group");
        return finished();
    };
    if !group.is_admin {
        return Err(TandemError::internal(format!(
            "cannot disband group {group_id} without administrator rights"
        )));
    }
    broadcast(ctx, &group.members, &GroupV2Message::Disbanded { group_id })?;
    ctx.identity().delete_group_v2(ctx.tx(), &owned, &group_id)?;
    info!(group = %group_id, members = group.members.len(), "Disbanded group");
    finished()
}

fn kick(
    ctx: &mut StepContext<'_>,
    group_id: GroupId,
    member: IdentityKey,
) -> Result<StepOutcome<GroupV2State>> {
    let owned = ctx.owned_identity();
    let Some(group) = load(ctx, &group_id)? else {
        debug!(group = %group_id, "Kick from an unknown group");
        return finished();
    };
    if !group.is_admin {
        return Err(TandemError::internal(format!(
            "cannot kick from group {group_id} without administrator rights"
        )));
    }
    let identity = ctx.identity();
    if !remove_group_v2_member(identity, ctx.tx(), &owned, &group_id, &member)? {
        debug!(group = %group_id, member = %member, "Kicked identity was not a member");
        return finished();
    }
    broadcast(
        ctx,
        &group.members,
        &GroupV2Message::MemberKicked { group_id, member },
    )?;
    info!(group = %group_id, member = %member, "Member kicked");
    finished()
}

fn member_left(ctx: &mut StepContext<'_>, group_id: GroupId) -> Result<StepOutcome<GroupV2State>> {
    let owned = ctx.owned_identity();
    let member = ctx.remote_identity()?;
    let identity = ctx.identity();
    if remove_group_v2_member(identity, ctx.tx(), &owned, &group_id, &member)? {
        info!(group = %group_id, member = %member, "Member left group");
    } else {
        debug!(group = %group_id, member = %member, "Leave notice from a non-member");
    }
    finished()
}

fn disbanded(ctx: &mut StepContext<'_>, group_id: GroupId) -> Result<StepOutcome<GroupV2State>> {
    let owned = ctx.owned_identity();
    let sender = ctx.remote_identity()?;
    match load(ctx, &group_id)? {
        Some(group) if group.is_administered_by(&sender) => {
            ctx.identity().delete_group_v2(ctx.tx(), &owned, &group_id)?;
            info!(group = %group_id, by = %sender, "Group disbanded");
        }
        Some(_) => warn!(group = %group_id, sender = %sender, "Disband notice from a non-administrator"),
        None => debug!(group = %group_id, "Disband notice for an unknown group"),
    }
    finished()
}

fn member_kicked(
    ctx: &mut StepContext<'_>,
    group_id: GroupId,
    member: IdentityKey,
) -> Result<StepOutcome<GroupV2State>> {
    let owned = ctx.owned_identity();
    let sender = ctx.remote_identity()?;
    let Some(group) = load(ctx, &group_id)? else {
        debug!(group = %group_id, "Kick notice for an unknown group");
        return finished();
    };
    if !group.is_administered_by(&sender) {
        warn!(group = %group_id, sender = %sender, "Kick notice from a non-administrator");
        return finished();
    }
    let identity = ctx.identity();
    if member == owned {
        identity.delete_group_v2(ctx.tx(), &owned, &group_id)?;
        info!(group = %group_id, "We were removed from the group");
    } else if remove_group_v2_member(identity, ctx.tx(), &owned, &group_id, &member)? {
        info!(group = %group_id, member = %member, by = %sender, "Member removed from group");
    }
    finished()
}

fn join(
    ctx: &mut StepContext<'_>,
    group_id: GroupId,
    mut members: Vec<IdentityKey>,
    mut admins: Vec<IdentityKey>,
    inviter: IdentityKey,
) -> Result<StepOutcome<GroupV2State>> {
    let owned = ctx.owned_identity();
    let is_admin = admins.contains(&owned);
    members.retain(|m| *m != owned);
    if !members.contains(&inviter) {
        members.push(inviter);
    }
    admins.retain(|a| *a != owned && members.contains(a));
    if !admins.contains(&inviter) {
        admins.push(inviter);
    }
    ctx.identity().upsert_group_v2(
        ctx.tx(),
        &owned,
        Group {
            group_id,
            members,
            admins,
            is_admin,
        },
    )?;
    info!(group = %group_id, "Joined group");
    finished()
}

fn invitation(
    ctx: &mut StepContext<'_>,
    group_id: GroupId,
    members: Vec<IdentityKey>,
    admins: Vec<IdentityKey>,
) -> Result<StepOutcome<GroupV2State>> {
    let owned = ctx.owned_identity();
    let inviter = ctx.remote_identity()?;
    if !admins.contains(&inviter) {
        warn!(group = %group_id, inviter = %inviter, "Invitation from a non-administrator ignored");
        return finished();
    }
    let one_to_one = ctx
        .identity()
        .contact(ctx.tx(), &owned, &inviter)?
        .map(|c| c.one_to_one)
        .unwrap_or(false);
    if one_to_one {
        return join(ctx, group_id, members, admins, inviter);
    }
    ctx.wait_for_one_to_one(inviter, TrustLevel::default(), messages::INVITER_UPGRADED)?;
    info!(group = %group_id, inviter = %inviter, "Invitation waiting for a one-to-one inviter");
    Ok(StepOutcome::Transition(
        GroupV2State::InvitationAwaitingUpgrade {
            group_id,
            members,
            admins,
            inviter,
        },
    ))
}

fn accept_parked(
    ctx: &mut StepContext<'_>,
    state: GroupV2State,
    notification: WaitingNotification,
) -> Result<StepOutcome<GroupV2State>> {
    let GroupV2State::InvitationAwaitingUpgrade {
        group_id,
        members,
        admins,
        inviter,
    } = state
    else {
        return Err(TandemError::internal("upgrade notification outside a parked invitation"));
    };
    if notification.contact != inviter {
        warn!(contact = %notification.contact, inviter = %inviter, "Upgrade notification for another contact");
        return Ok(StepOutcome::Unchanged);
    }
    join(ctx, group_id, members, admins, inviter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kick_is_local_only() {
        assert_eq!(
            GroupV2::channel_requirement(GroupV2Step::Kick),
            ChannelRequirement::Local
        );
        assert_eq!(
            GroupV2::channel_requirement(GroupV2Step::ProcessMemberKicked),
            ChannelRequirement::ContactDevice
        );
    }

    #[test]
    fn kick_arguments_decode() {
        let message = GroupV2Message::KickMember {
            group_id: GroupId::random(),
            member: IdentityKey::from_bytes([3; 32]),
        };
        let args = message.encode_arguments().unwrap();
        assert_eq!(
            GroupV2Message::decode(messages::KICK_MEMBER, &args).unwrap(),
            message
        );
        assert!(GroupV2Message::decode(messages::LEAVE, &args).is_err());
    }

    #[test]
    fn parked_invitation_only_resumes_on_upgrade() {
        let state = GroupV2State::InvitationAwaitingUpgrade {
            group_id: GroupId::random(),
            members: Vec::new(),
            admins: Vec::new(),
            inviter: IdentityKey::from_bytes([5; 32]),
        };
        let leave = GroupV2Message::Leave {
            group_id: GroupId::random(),
        };
        assert_eq!(GroupV2::select_step(&state, &leave), None);
    }
}
