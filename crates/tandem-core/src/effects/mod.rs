//! Collaborator interfaces consumed by the engine
//!
//! Pure trait definitions, no implementations. Production handlers live with
//! the embedding application; in-memory handlers live in `tandem-testkit`.

pub mod challenge;
pub mod channel;
pub mod identity;

pub use challenge::{Challenge, ChallengeEffects};
pub use channel::ChannelEffects;
pub use identity::{
    remove_group_v2_member, remove_legacy_group_member, Contact, GroupV2, IdentityEffects,
    LegacyGroup,
};
