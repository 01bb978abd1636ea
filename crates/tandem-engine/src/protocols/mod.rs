//! Concrete protocol catalogs
//!
//! One module per `ProtocolKind`. Each declares its state sum type, message
//! sum type and step enum, and implements [`Protocol`] for a unit marker.

pub mod channel_creation;
pub mod group_management;
pub mod group_v2;
pub mod mutual_scan;
pub mod owned_identity_deletion;

pub use channel_creation::ChannelCreation;
pub use group_management::GroupManagement;
pub use group_v2::GroupV2;
pub use mutual_scan::ContactMutualScan;
pub use owned_identity_deletion::OwnedIdentityDeletion;

use tandem_core::{ProtocolKind, StateKind};

use crate::protocol::Protocol;

/// Final states declared by the protocol of `kind`
pub fn final_state_kinds(kind: ProtocolKind) -> &'static [StateKind] {
    match kind {
        ProtocolKind::ChannelCreation => ChannelCreation::final_state_kinds(),
        ProtocolKind::ContactMutualScan => ContactMutualScan::final_state_kinds(),
        ProtocolKind::GroupManagement => GroupManagement::final_state_kinds(),
        ProtocolKind::GroupV2 => GroupV2::final_state_kinds(),
        ProtocolKind::OwnedIdentityDeletion => OwnedIdentityDeletion::final_state_kinds(),
    }
}

/// Whether `state` is final for the protocol of `kind`
pub fn is_final_state(kind: ProtocolKind, state: StateKind) -> bool {
    final_state_kinds(kind).contains(&state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_protocol_declares_a_final_state() {
        for kind in ProtocolKind::ALL {
            assert!(!final_state_kinds(kind).is_empty(), "{kind}");
        }
    }
}
