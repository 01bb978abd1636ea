//! Cascading deletion of an owned identity
//!
//! Two independent entry points share this protocol:
//!
//! - **Local deletion.** `Initiate` moves the instance to
//!   `DeletionInProgress` and a driver step then walks the cleanup phases in
//!   a fixed order (other protocol instances, legacy groups, v2 groups,
//!   contacts, channels), one phase per self-addressed message. Once every
//!   phase is flagged done the identity itself is deleted and the instance
//!   ends in `Final`.
//! - **A contact deleted its identity.** The signed assertion arrives either
//!   directly from the contact over asymmetric broadcast, or propagated by
//!   one of our other devices over an owned-device channel. It is
//!   deduplicated by the replay guard, verified, then applied locally.
//!
//! Group and contact cleanup is best effort: one item failing is logged and
//! the cascade moves on.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info, warn};

use tandem_core::effects::{remove_group_v2_member, remove_legacy_group_member, Challenge};
use tandem_core::{
    Arguments, ChannelRequirement, Encoded, GroupId, IdentityKey, MessageKind,
    ProtocolInstanceUid, ProtocolKind, Result, SendChannelTarget, Signature, StateKind,
    TandemError,
};

use super::group_management::{self, GroupManagementMessage};
use super::group_v2::{self, GroupV2Message};
use crate::context::StepContext;
use crate::protocol::{Protocol, ProtocolMessage, ProtocolState, StepOutcome};

/// State discriminators
pub mod states {
    use tandem_core::StateKind;

    /// Nothing happened yet
    pub const INITIAL: StateKind = StateKind(0);
    /// Cleanup phases running
    pub const DELETION_IN_PROGRESS: StateKind = StateKind(1);
    /// Done (final)
    pub const FINAL: StateKind = StateKind(2);
}

/// Message discriminators
pub mod messages {
    use tandem_core::MessageKind;

    /// Local: delete the owned identity
    pub const INITIATE: MessageKind = MessageKind(0);
    /// Local: run the driver once more
    pub const CONTINUE_DELETION: MessageKind = MessageKind(1);
    /// Local: phase 1
    pub const DELETE_OTHER_PROTOCOL_INSTANCES: MessageKind = MessageKind(2);
    /// Local: phase 2
    pub const PROCESS_LEGACY_GROUPS: MessageKind = MessageKind(3);
    /// Local: phase 3
    pub const PROCESS_GROUPS_V2: MessageKind = MessageKind(4);
    /// Local: phase 4
    pub const PROCESS_CONTACTS: MessageKind = MessageKind(5);
    /// Local: phase 5
    pub const DELETE_CHANNELS: MessageKind = MessageKind(6);
    /// Broadcast from a contact: it deleted its identity
    pub const CONTACT_OWNED_IDENTITY_WAS_DELETED: MessageKind = MessageKind(7);
    /// From another owned device: a contact deleted its identity
    pub const PROPAGATE_CONTACT_OWNED_IDENTITY_WAS_DELETED: MessageKind = MessageKind(8);
}

/// Cleanup phases, in the order the driver runs them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeletionPhase {
    /// Delete every other protocol instance of the identity
    OtherProtocolInstances,
    /// Leave or disband legacy groups
    LegacyGroups,
    /// Leave or disband v2 groups
    GroupsV2,
    /// Notify and delete contacts
    Contacts,
    /// Sever every remaining channel
    Channels,
}

impl DeletionPhase {
    /// Every phase, in driver order
    pub const ORDER: [DeletionPhase; 5] = [
        Self::OtherProtocolInstances,
        Self::LegacyGroups,
        Self::GroupsV2,
        Self::Contacts,
        Self::Channels,
    ];

    fn message(self) -> OwnedIdentityDeletionMessage {
        match self {
            Self::OtherProtocolInstances => OwnedIdentityDeletionMessage::DeleteOtherProtocolInstances,
            Self::LegacyGroups => OwnedIdentityDeletionMessage::ProcessLegacyGroups,
            Self::GroupsV2 => OwnedIdentityDeletionMessage::ProcessGroupsV2,
            Self::Contacts => OwnedIdentityDeletionMessage::ProcessContacts,
            Self::Channels => OwnedIdentityDeletionMessage::DeleteChannels,
        }
    }
}

/// Completion flag per cleanup phase
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletionPhases {
    /// Other protocol instances deleted
    pub other_protocol_instances: bool,
    /// Legacy groups processed
    pub legacy_groups: bool,
    /// V2 groups processed
    pub groups_v2: bool,
    /// Contacts processed
    pub contacts: bool,
    /// Channels deleted
    pub channels: bool,
}

impl DeletionPhases {
    /// Whether `phase` already ran
    pub fn is_done(&self, phase: DeletionPhase) -> bool {
        match phase {
            DeletionPhase::OtherProtocolInstances => self.other_protocol_instances,
            DeletionPhase::LegacyGroups => self.legacy_groups,
            DeletionPhase::GroupsV2 => self.groups_v2,
            DeletionPhase::Contacts => self.contacts,
            DeletionPhase::Channels => self.channels,
        }
    }

    /// Flag `phase` done
    pub fn with_done(mut self, phase: DeletionPhase) -> Self {
        match phase {
            DeletionPhase::OtherProtocolInstances => self.other_protocol_instances = true,
            DeletionPhase::LegacyGroups => self.legacy_groups = true,
            DeletionPhase::GroupsV2 => self.groups_v2 = true,
            DeletionPhase::Contacts => self.contacts = true,
            DeletionPhase::Channels => self.channels = true,
        }
        self
    }

    /// First phase not yet done
    pub fn next(&self) -> Option<DeletionPhase> {
        DeletionPhase::ORDER
            .into_iter()
            .find(|phase| !self.is_done(*phase))
    }
}

/// Owned identity deletion states
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OwnedIdentityDeletionState {
    /// Nothing happened yet
    Initial,
    /// Cleanup phases running
    DeletionInProgress {
        /// Whether contacts get a signed deletion notice
        notify_contacts: bool,
        /// Completed phases
        phases: DeletionPhases,
    },
    /// Done
    Final,
}

impl ProtocolState for OwnedIdentityDeletionState {
    fn kind(&self) -> StateKind {
        match self {
            Self::Initial => states::INITIAL,
            Self::DeletionInProgress { .. } => states::DELETION_IN_PROGRESS,
            Self::Final => states::FINAL,
        }
    }
}

/// Owned identity deletion messages
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OwnedIdentityDeletionMessage {
    /// Delete the owned identity
    Initiate {
        /// Whether contacts get a signed deletion notice
        notify_contacts: bool,
    },
    /// Run the driver
    ContinueDeletion,
    /// Phase: other protocol instances
    DeleteOtherProtocolInstances,
    /// Phase: legacy groups
    ProcessLegacyGroups,
    /// Phase: v2 groups
    ProcessGroupsV2,
    /// Phase: contacts
    ProcessContacts,
    /// Phase: channels
    DeleteChannels,
    /// Signed notice from a contact that deleted its identity
    ContactOwnedIdentityWasDeleted {
        /// Identity that was deleted (the signer)
        deleted_contact: IdentityKey,
        /// Signature over the deletion challenge
        signature: Signature,
    },
    /// The same notice, relayed by another of our devices
    PropagateContactOwnedIdentityWasDeleted {
        /// Identity that was deleted (the signer)
        deleted_contact: IdentityKey,
        /// Signature over the deletion challenge
        signature: Signature,
    },
}

impl ProtocolMessage for OwnedIdentityDeletionMessage {
    const PROTOCOL: ProtocolKind = ProtocolKind::OwnedIdentityDeletion;

    fn kind(&self) -> MessageKind {
        match self {
            Self::Initiate { .. } => messages::INITIATE,
            Self::ContinueDeletion => messages::CONTINUE_DELETION,
            Self::DeleteOtherProtocolInstances => messages::DELETE_OTHER_PROTOCOL_INSTANCES,
            Self::ProcessLegacyGroups => messages::PROCESS_LEGACY_GROUPS,
            Self::ProcessGroupsV2 => messages::PROCESS_GROUPS_V2,
            Self::ProcessContacts => messages::PROCESS_CONTACTS,
            Self::DeleteChannels => messages::DELETE_CHANNELS,
            Self::ContactOwnedIdentityWasDeleted { .. } => {
                messages::CONTACT_OWNED_IDENTITY_WAS_DELETED
            }
            Self::PropagateContactOwnedIdentityWasDeleted { .. } => {
                messages::PROPAGATE_CONTACT_OWNED_IDENTITY_WAS_DELETED
            }
        }
    }

    fn encode_arguments(&self) -> Result<Vec<Encoded>> {
        match self {
            Self::Initiate { notify_contacts } => Ok(vec![Encoded::of(notify_contacts)?]),
            Self::ContactOwnedIdentityWasDeleted {
                deleted_contact,
                signature,
            }
            | Self::PropagateContactOwnedIdentityWasDeleted {
                deleted_contact,
                signature,
            } => Ok(vec![Encoded::of(deleted_contact)?, Encoded::of(signature)?]),
            _ => Ok(Vec::new()),
        }
    }

    fn decode(kind: MessageKind, arguments: &[Encoded]) -> Result<Self> {
        let assertion = || -> Result<(IdentityKey, Signature)> {
            let args = Arguments::expect(arguments, 2)?;
            Ok((args.at(0)?, args.at(1)?))
        };
        let bare = |message: Self| -> Result<Self> {
            Arguments::expect(arguments, 0)?;
            Ok(message)
        };
        match kind {
            messages::INITIATE => Ok(Self::Initiate {
                notify_contacts: Arguments::expect(arguments, 1)?.at(0)?,
            }),
            messages::CONTINUE_DELETION => bare(Self::ContinueDeletion),
            messages::DELETE_OTHER_PROTOCOL_INSTANCES => bare(Self::DeleteOtherProtocolInstances),
            messages::PROCESS_LEGACY_GROUPS => bare(Self::ProcessLegacyGroups),
            messages::PROCESS_GROUPS_V2 => bare(Self::ProcessGroupsV2),
            messages::PROCESS_CONTACTS => bare(Self::ProcessContacts),
            messages::DELETE_CHANNELS => bare(Self::DeleteChannels),
            messages::CONTACT_OWNED_IDENTITY_WAS_DELETED => {
                let (deleted_contact, signature) = assertion()?;
                Ok(Self::ContactOwnedIdentityWasDeleted {
                    deleted_contact,
                    signature,
                })
            }
            messages::PROPAGATE_CONTACT_OWNED_IDENTITY_WAS_DELETED => {
                let (deleted_contact, signature) = assertion()?;
                Ok(Self::PropagateContactOwnedIdentityWasDeleted {
                    deleted_contact,
                    signature,
                })
            }
            other => Err(TandemError::malformed_message(format!(
                "unknown owned identity deletion message {other}"
            ))),
        }
    }
}

/// Owned identity deletion steps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnedIdentityDeletionStep {
    /// Enter `DeletionInProgress`
    Start,
    /// Post the next phase, or finish
    Drive,
    /// Run one cleanup phase
    RunPhase(DeletionPhase),
    /// A contact told us directly it deleted its identity
    ProcessContactDeletion,
    /// Another of our devices relayed a contact deletion
    ProcessPropagatedContactDeletion,
}

/// Cascading owned identity deletion protocol
pub struct OwnedIdentityDeletion;

impl Protocol for OwnedIdentityDeletion {
    const KIND: ProtocolKind = ProtocolKind::OwnedIdentityDeletion;
    type State = OwnedIdentityDeletionState;
    type Message = OwnedIdentityDeletionMessage;
    type Step = OwnedIdentityDeletionStep;

    fn initial_state() -> Self::State {
        OwnedIdentityDeletionState::Initial
    }

    fn final_state_kinds() -> &'static [StateKind] {
        &[states::FINAL]
    }

    fn is_initial_message(kind: MessageKind) -> bool {
        matches!(
            kind,
            messages::INITIATE
                | messages::CONTACT_OWNED_IDENTITY_WAS_DELETED
                | messages::PROPAGATE_CONTACT_OWNED_IDENTITY_WAS_DELETED
        )
    }

    fn select_step(state: &Self::State, message: &Self::Message) -> Option<Self::Step> {
        use OwnedIdentityDeletionMessage as M;
        use OwnedIdentityDeletionState as S;
        use OwnedIdentityDeletionStep as Step;
        let pending = |phase: DeletionPhase, phases: &DeletionPhases| {
            (!phases.is_done(phase)).then_some(Step::RunPhase(phase))
        };
        match (state, message) {
            (S::Initial, M::Initiate { .. }) => Some(Step::Start),
            (S::Initial, M::ContactOwnedIdentityWasDeleted { .. }) => {
                Some(Step::ProcessContactDeletion)
            }
            (S::Initial, M::PropagateContactOwnedIdentityWasDeleted { .. }) => {
                Some(Step::ProcessPropagatedContactDeletion)
            }
            (S::DeletionInProgress { .. }, M::ContinueDeletion) => Some(Step::Drive),
            (S::DeletionInProgress { phases, .. }, M::DeleteOtherProtocolInstances) => {
                pending(DeletionPhase::OtherProtocolInstances, phases)
            }
            (S::DeletionInProgress { phases, .. }, M::ProcessLegacyGroups) => {
                pending(DeletionPhase::LegacyGroups, phases)
            }
            (S::DeletionInProgress { phases, .. }, M::ProcessGroupsV2) => {
                pending(DeletionPhase::GroupsV2, phases)
            }
            (S::DeletionInProgress { phases, .. }, M::ProcessContacts) => {
                pending(DeletionPhase::Contacts, phases)
            }
            (S::DeletionInProgress { phases, .. }, M::DeleteChannels) => {
                pending(DeletionPhase::Channels, phases)
            }
            _ => None,
        }
    }

    fn channel_requirement(step: Self::Step) -> ChannelRequirement {
        match step {
            OwnedIdentityDeletionStep::Start
            | OwnedIdentityDeletionStep::Drive
            | OwnedIdentityDeletionStep::RunPhase(_) => ChannelRequirement::Local,
            OwnedIdentityDeletionStep::ProcessContactDeletion => {
                ChannelRequirement::AsymmetricBroadcast
            }
            OwnedIdentityDeletionStep::ProcessPropagatedContactDeletion => {
                ChannelRequirement::OwnedDevice
            }
        }
    }

    fn execute(
        step: Self::Step,
        state: Self::State,
        message: Self::Message,
        ctx: &mut StepContext<'_>,
    ) -> Result<StepOutcome<Self::State>> {
        use OwnedIdentityDeletionMessage as M;
        use OwnedIdentityDeletionStep as Step;
        match (step, message) {
            (Step::Start, M::Initiate { notify_contacts }) => start(ctx, notify_contacts),
            (Step::Drive, M::ContinueDeletion) => drive(ctx, state),
            (Step::RunPhase(phase), _) => run_phase(ctx, state, phase),
            (
                Step::ProcessContactDeletion,
                M::ContactOwnedIdentityWasDeleted {
                    deleted_contact,
                    signature,
                },
            ) => process_contact_deletion(ctx, deleted_contact, signature, Provenance::Direct),
            (
                Step::ProcessPropagatedContactDeletion,
                M::PropagateContactOwnedIdentityWasDeleted {
                    deleted_contact,
                    signature,
                },
            ) => process_contact_deletion(ctx, deleted_contact, signature, Provenance::Propagated),
            (step, message) => Err(TandemError::internal(format!(
                "step {step:?} selected for {message:?}"
            ))),
        }
    }
}

type Outcome = Result<StepOutcome<OwnedIdentityDeletionState>>;

fn start(ctx: &mut StepContext<'_>, notify_contacts: bool) -> Outcome {
    let owned = ctx.owned_identity();
    if !ctx.identity().is_owned(ctx.tx(), &owned)? {
        warn!(owned = %owned, "Deletion requested for an identity we do not own");
        return Ok(StepOutcome::Transition(OwnedIdentityDeletionState::Final));
    }
    ctx.post_to_self(&OwnedIdentityDeletionMessage::ContinueDeletion)?;
    info!(owned = %owned, notify_contacts, "Owned identity deletion started");
    Ok(StepOutcome::Transition(
        OwnedIdentityDeletionState::DeletionInProgress {
            notify_contacts,
            phases: DeletionPhases::default(),
        },
    ))
}

fn drive(ctx: &mut StepContext<'_>, state: OwnedIdentityDeletionState) -> Outcome {
    let OwnedIdentityDeletionState::DeletionInProgress { phases, .. } = state else {
        return Err(TandemError::internal("deletion driver ran outside DeletionInProgress"));
    };
    if let Some(phase) = phases.next() {
        debug!(phase = ?phase, "Next deletion phase");
        ctx.post_to_self(&phase.message())?;
        return Ok(StepOutcome::Unchanged);
    }

    let owned = ctx.owned_identity();
    ctx.identity().delete_owned_identity(ctx.tx(), &owned)?;
    let forgotten = ctx.forget_signatures()?;
    info!(owned = %owned, forgotten, "Owned identity deleted");
    Ok(StepOutcome::Transition(OwnedIdentityDeletionState::Final))
}

fn run_phase(
    ctx: &mut StepContext<'_>,
    state: OwnedIdentityDeletionState,
    phase: DeletionPhase,
) -> Outcome {
    let OwnedIdentityDeletionState::DeletionInProgress {
        notify_contacts,
        phases,
    } = state
    else {
        return Err(TandemError::internal("deletion phase ran outside DeletionInProgress"));
    };
    match phase {
        DeletionPhase::OtherProtocolInstances => {
            let deleted = ctx.delete_all_other_instances()?;
            info!(deleted, "Other protocol instances deleted");
        }
        DeletionPhase::LegacyGroups => process_legacy_groups(ctx)?,
        DeletionPhase::GroupsV2 => process_groups_v2(ctx)?,
        DeletionPhase::Contacts => process_contacts(ctx, notify_contacts)?,
        DeletionPhase::Channels => {
            let owned = ctx.owned_identity();
            let deleted = ctx.channels().delete_all_channels(ctx.tx(), &owned)?;
            info!(deleted, "Remaining channels deleted");
        }
    }
    ctx.post_to_self(&OwnedIdentityDeletionMessage::ContinueDeletion)?;
    Ok(StepOutcome::Transition(
        OwnedIdentityDeletionState::DeletionInProgress {
            notify_contacts,
            phases: phases.with_done(phase),
        },
    ))
}

/// Per-item results of a best-effort cascade phase
struct CascadeReport<K> {
    phase: DeletionPhase,
    results: Vec<(K, Result<()>)>,
}

impl<K: fmt::Display> CascadeReport<K> {
    fn new(phase: DeletionPhase) -> Self {
        Self {
            phase,
            results: Vec::new(),
        }
    }

    fn push(&mut self, item: K, result: Result<()>) {
        self.results.push((item, result));
    }

    fn log(&self) {
        let failed: Vec<_> = self
            .results
            .iter()
            .filter_map(|(item, result)| result.as_ref().err().map(|e| (item, e)))
            .collect();
        for (item, error) in &failed {
            warn!(phase = ?self.phase, item = %item, error = %error, "Cascade item failed");
        }
        info!(
            phase = ?self.phase,
            processed = self.results.len(),
            failed = failed.len(),
            "Deletion phase done"
        );
    }
}

fn process_legacy_groups(ctx: &mut StepContext<'_>) -> Result<()> {
    let owned = ctx.owned_identity();
    let identity = ctx.identity();
    let groups = identity.legacy_groups(ctx.tx(), &owned)?;
    let mut report = CascadeReport::new(DeletionPhase::LegacyGroups);
    for group in groups {
        let group_id = group.group_id;
        let message = if group.owner == owned {
            GroupManagementMessage::DisbandGroup { group_id }
        } else {
            GroupManagementMessage::LeaveGroup { group_id }
        };
        let result = ctx
            .execute_sub_protocol(&message, &[group_management::states::FINAL])
            .map(|_| ())
            .or_else(|e| {
                warn!(group = %group_id, error = %e, "Group protocol failed, deleting locally");
                identity
                    .delete_legacy_group(ctx.tx(), &owned, &group_id)
                    .map(|_| ())
            });
        report.push(group_id, result);
    }
    report.log();
    Ok(())
}

fn process_groups_v2(ctx: &mut StepContext<'_>) -> Result<()> {
    let owned = ctx.owned_identity();
    let identity = ctx.identity();
    let groups = identity.groups_v2(ctx.tx(), &owned)?;
    let mut report = CascadeReport::new(DeletionPhase::GroupsV2);
    for group in groups {
        let group_id = group.group_id;
        let message = if group.is_admin {
            GroupV2Message::Disband { group_id }
        } else {
            GroupV2Message::Leave { group_id }
        };
        let result = ctx
            .execute_sub_protocol(&message, &[group_v2::states::FINAL])
            .map(|_| ())
            .or_else(|e| {
                warn!(group = %group_id, error = %e, "Group protocol failed, deleting locally");
                identity
                    .delete_group_v2(ctx.tx(), &owned, &group_id)
                    .map(|_| ())
            });
        report.push(group_id, result);
    }
    report.log();
    Ok(())
}

fn process_contacts(ctx: &mut StepContext<'_>, notify_contacts: bool) -> Result<()> {
    let owned = ctx.owned_identity();
    let identity = ctx.identity();
    let contacts = identity.contacts(ctx.tx(), &owned)?;
    let mut report = CascadeReport::new(DeletionPhase::Contacts);
    for contact in contacts {
        let result = remove_contact(ctx, contact.identity, notify_contacts);
        report.push(contact.identity, result);
    }
    report.log();
    Ok(())
}

fn remove_contact(ctx: &mut StepContext<'_>, contact: IdentityKey, notify: bool) -> Result<()> {
    let owned = ctx.owned_identity();
    if notify {
        notify_contact(ctx, contact)?;
    }
    ctx.channels()
        .delete_channels_with_contact(ctx.tx(), &owned, &contact)?;
    ctx.identity().delete_contact(ctx.tx(), &owned, &contact)?;
    Ok(())
}

/// Broadcast a signed "I am being deleted" notice to `contact`
fn notify_contact(ctx: &mut StepContext<'_>, contact: IdentityKey) -> Result<()> {
    let owned = ctx.owned_identity();
    let challenge = Challenge::OwnedIdentityDeletion {
        deleted: owned,
        contact,
    };
    let signature = ctx.challenges().solve_challenge(&challenge, &owned)?;
    ctx.post(
        SendChannelTarget::AsymmetricBroadcast {
            to_identity: contact,
        },
        ProtocolInstanceUid::random(),
        &OwnedIdentityDeletionMessage::ContactOwnedIdentityWasDeleted {
            deleted_contact: owned,
            signature,
        },
    )?;
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Provenance {
    Direct,
    Propagated,
}

fn process_contact_deletion(
    ctx: &mut StepContext<'_>,
    deleted_contact: IdentityKey,
    signature: Signature,
    provenance: Provenance,
) -> Outcome {
    let owned = ctx.owned_identity();

    if ctx.signature_already_seen(&signature)? {
        info!(contact = %deleted_contact, provenance = ?provenance, "Replayed deletion notice ignored");
        return Ok(StepOutcome::Transition(OwnedIdentityDeletionState::Final));
    }
    let challenge = Challenge::OwnedIdentityDeletion {
        deleted: deleted_contact,
        contact: owned,
    };
    if !ctx
        .challenges()
        .check_response(&signature, &challenge, &deleted_contact)
    {
        warn!(contact = %deleted_contact, provenance = ?provenance, "Deletion notice signature rejected");
        return Ok(StepOutcome::Transition(OwnedIdentityDeletionState::Final));
    }
    ctx.record_signature(&signature)?;

    if provenance == Provenance::Direct {
        let siblings = ctx.identity().other_owned_devices(ctx.tx(), &owned)?;
        if !siblings.is_empty() {
            ctx.post(
                SendChannelTarget::AllOwnedDevices,
                ctx.instance_uid(),
                &OwnedIdentityDeletionMessage::PropagateContactOwnedIdentityWasDeleted {
                    deleted_contact,
                    signature: signature.clone(),
                },
            )?;
            debug!(contact = %deleted_contact, devices = siblings.len(), "Deletion notice propagated");
        }
    }

    remove_deleted_contact(ctx, deleted_contact, provenance)?;
    Ok(StepOutcome::Transition(OwnedIdentityDeletionState::Final))
}

/// Local cleanup after a contact deleted its identity.
///
/// Both provenances drop the contact from every group and erase it. Only the
/// device that got the notice directly kicks the contact from v2 groups it
/// administers, which notifies the other members; a relayed notice means a
/// sibling device already did that.
fn remove_deleted_contact(
    ctx: &mut StepContext<'_>,
    deleted: IdentityKey,
    provenance: Provenance,
) -> Result<()> {
    let owned = ctx.owned_identity();
    let identity = ctx.identity();

    for group in identity.legacy_groups(ctx.tx(), &owned)? {
        if group.owner == deleted {
            identity.delete_legacy_group(ctx.tx(), &owned, &group.group_id)?;
        } else if group.owner == owned {
            remove_legacy_group_member(identity, ctx.tx(), &owned, &group.group_id, &deleted)?;
        }
    }

    let mut report = CascadeReport::<GroupId>::new(DeletionPhase::GroupsV2);
    for group in identity.groups_v2(ctx.tx(), &owned)? {
        if !group.members.contains(&deleted) {
            continue;
        }
        let group_id = group.group_id;
        let result = if group.is_admin && provenance == Provenance::Direct {
            ctx.execute_sub_protocol(
                &GroupV2Message::KickMember {
                    group_id,
                    member: deleted,
                },
                &[group_v2::states::FINAL],
            )
            .map(|_| ())
        } else {
            remove_group_v2_member(identity, ctx.tx(), &owned, &group_id, &deleted).map(|_| ())
        };
        report.push(group_id, result);
    }
    if !report.results.is_empty() {
        report.log();
    }

    let severed = ctx
        .channels()
        .delete_channels_with_contact(ctx.tx(), &owned, &deleted)?;
    identity.delete_contact(ctx.tx(), &owned, &deleted)?;
    info!(contact = %deleted, channels = severed, provenance = ?provenance, "Deleted contact removed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phases_run_in_fixed_order() {
        let mut phases = DeletionPhases::default();
        let mut seen = Vec::new();
        while let Some(phase) = phases.next() {
            seen.push(phase);
            phases = phases.with_done(phase);
        }
        assert_eq!(seen, DeletionPhase::ORDER.to_vec());
    }

    #[test]
    fn completed_phase_message_is_dropped() {
        let state = OwnedIdentityDeletionState::DeletionInProgress {
            notify_contacts: false,
            phases: DeletionPhases::default().with_done(DeletionPhase::LegacyGroups),
        };
        assert_eq!(
            OwnedIdentityDeletion::select_step(
                &state,
                &OwnedIdentityDeletionMessage::ProcessLegacyGroups
            ),
            None
        );
        assert_eq!(
            OwnedIdentityDeletion::select_step(&state, &OwnedIdentityDeletionMessage::ProcessGroupsV2),
            Some(OwnedIdentityDeletionStep::RunPhase(DeletionPhase::GroupsV2))
        );
    }

    #[test]
    fn entry_points_are_split_by_channel() {
        assert_eq!(
            OwnedIdentityDeletion::channel_requirement(
                OwnedIdentityDeletionStep::ProcessContactDeletion
            ),
            ChannelRequirement::AsymmetricBroadcast
        );
        assert_eq!(
            OwnedIdentityDeletion::channel_requirement(
                OwnedIdentityDeletionStep::ProcessPropagatedContactDeletion
            ),
            ChannelRequirement::OwnedDevice
        );
    }
}
