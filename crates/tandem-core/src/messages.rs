//! Protocol message envelopes
//!
//! An envelope names the protocol instance a message is for and carries its
//! encoded arguments. Received messages add provenance; outbound messages
//! add a delivery target.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::channel::{ReceptionChannelInfo, SendChannelTarget};
use crate::encoding::Encoded;
use crate::identifiers::{IdentityKey, MessageUid, ProtocolInstanceUid};
use crate::protocol::{MessageKind, ProtocolKind};

/// Addressing and payload shared by inbound and outbound protocol messages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolEnvelope {
    /// Owned identity the message is processed under. For outbound messages
    /// this is the sender.
    pub owned_identity: IdentityKey,
    /// Target protocol
    pub protocol_kind: ProtocolKind,
    /// Target protocol instance
    pub instance_uid: ProtocolInstanceUid,
    /// Message discriminator within the protocol
    pub message_kind: MessageKind,
    /// Ordered opaque arguments
    pub arguments: Vec<Encoded>,
}

/// One inbound protocol message awaiting processing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceivedMessage {
    /// Message identifier, unique per owned identity
    pub uid: MessageUid,
    /// Target and payload
    pub envelope: ProtocolEnvelope,
    /// How the message arrived
    pub channel_info: ReceptionChannelInfo,
    /// Response to a user dialog, for user-interaction-carrying messages
    pub user_dialog_response: Option<Encoded>,
    /// Dialog the response belongs to
    pub user_dialog_uid: Option<MessageUid>,
    /// Reception time in milliseconds since the Unix epoch
    pub timestamp_ms: u64,
}

impl ReceivedMessage {
    /// Build a received message, generating its uid and timestamp
    pub fn new(envelope: ProtocolEnvelope, channel_info: ReceptionChannelInfo) -> Self {
        Self {
            uid: MessageUid::random(),
            envelope,
            channel_info,
            user_dialog_response: None,
            user_dialog_uid: None,
            timestamp_ms: now_ms(),
        }
    }

    /// Keep the uid supplied by the transport
    pub fn with_uid(mut self, uid: MessageUid) -> Self {
        self.uid = uid;
        self
    }

    /// Attach a user dialog response
    pub fn with_user_dialog(mut self, dialog_uid: MessageUid, response: Encoded) -> Self {
        self.user_dialog_uid = Some(dialog_uid);
        self.user_dialog_response = Some(response);
        self
    }

    /// Owned identity the message is processed under
    pub fn owned_identity(&self) -> &IdentityKey {
        &self.envelope.owned_identity
    }
}

/// A protocol message handed to the transport for delivery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    /// Target and payload; `owned_identity` is the sender
    pub envelope: ProtocolEnvelope,
    /// Delivery target
    pub target: SendChannelTarget,
}

/// Milliseconds since the Unix epoch
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
