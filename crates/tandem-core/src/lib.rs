//! Tandem Core - protocol engine foundation
//!
//! Identifier types, the unified error, opaque argument encoding, channel
//! provenance, and the collaborator interfaces the protocol engine consumes:
//!
//! - `StoreTransaction` / `TransactionalStore`: the ambient transaction every
//!   step runs in
//! - `IdentityEffects`: owned identities, contacts, groups
//! - `ChannelEffects`: secure channels and message hand-off
//! - `ChallengeEffects`: signing and checking challenges
//!
//! Nothing in this crate executes protocols.

#![forbid(unsafe_code)]

pub mod channel;
pub mod effects;
pub mod encoding;
pub mod errors;
pub mod identifiers;
pub mod messages;
pub mod protocol;
pub mod store;

pub use channel::{ChannelRequirement, ReceptionChannelInfo, SendChannelTarget};
pub use encoding::{Arguments, Encoded};
pub use errors::{Result, TandemError};
pub use identifiers::{
    DeviceUid, GroupId, IdentityKey, MessageHandle, MessageUid, ProtocolInstanceUid, Signature,
    TrustLevel,
};
pub use messages::{now_ms, OutboundMessage, ProtocolEnvelope, ReceivedMessage};
pub use protocol::{MessageKind, ProtocolKind, StateKind};
pub use store::{Savepoint, StoreTransaction, TransactionalStore};
