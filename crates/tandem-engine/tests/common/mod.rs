//! Shared harness for engine integration tests
//!
//! Each `Device` is one installation: its own store, collaborators and
//! engine. Devices share one challenge handler so signatures made on one
//! verify on another. Nothing is delivered automatically; tests move
//! outbox messages between devices with `deliver`.

#![allow(dead_code)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

use std::sync::Arc;

use tandem_core::effects::IdentityEffects;
use tandem_core::{
    DeviceUid, IdentityKey, OutboundMessage, ProtocolInstanceUid, ReceivedMessage,
    ReceptionChannelInfo, SendChannelTarget,
};
use tandem_engine::protocol::envelope_for;
use tandem_engine::{
    EngineConfig, EngineEffects, ProcessingReport, ProtocolEngine, ProtocolMessage,
};
use tandem_testkit::{init_test_tracing, Ed25519Challenges, MemoryStore, TestInstallation};

/// One simulated installation
pub struct Device {
    pub installation: TestInstallation,
    pub engine: ProtocolEngine<MemoryStore>,
    pub identity: IdentityKey,
    pub device: DeviceUid,
}

impl Device {
    /// Installation owning identity `label` with a fresh device
    pub fn new(challenges: &Arc<Ed25519Challenges>, label: &str, config: EngineConfig) -> Self {
        Self::with_devices(challenges, label, DeviceUid::random(), vec![], config)
    }

    /// Installation owning identity `label` as `device`, aware of sibling
    /// devices `others`
    pub fn with_devices(
        challenges: &Arc<Ed25519Challenges>,
        label: &str,
        device: DeviceUid,
        others: Vec<DeviceUid>,
        config: EngineConfig,
    ) -> Self {
        Self::assemble(challenges, label, device, others, config, |identity| identity)
    }

    /// Like `new`, with the identity handler the engine sees wrapped by
    /// `layer`. Direct reads through `installation` bypass the wrapper.
    pub fn with_identity_layer(
        challenges: &Arc<Ed25519Challenges>,
        label: &str,
        config: EngineConfig,
        layer: impl FnOnce(Arc<dyn IdentityEffects>) -> Arc<dyn IdentityEffects>,
    ) -> Self {
        Self::assemble(challenges, label, DeviceUid::random(), vec![], config, layer)
    }

    fn assemble(
        challenges: &Arc<Ed25519Challenges>,
        label: &str,
        device: DeviceUid,
        others: Vec<DeviceUid>,
        config: EngineConfig,
        layer: impl FnOnce(Arc<dyn IdentityEffects>) -> Arc<dyn IdentityEffects>,
    ) -> Self {
        init_test_tracing();
        let installation = TestInstallation::new(Arc::clone(challenges));
        let identity = challenges.identity_for(label);
        installation
            .with_tx(|tx| {
                installation
                    .identity
                    .add_owned_identity(tx, &identity, device, others)
            })
            .unwrap();
        let handler: Arc<dyn IdentityEffects> = installation.identity.clone();
        let effects = EngineEffects::new(
            layer(handler),
            installation.channels.clone(),
            installation.challenges.clone(),
        );
        let engine = ProtocolEngine::new(installation.store.clone(), effects, config).unwrap();
        Self {
            installation,
            engine,
            identity,
            device,
        }
    }

    /// Drain the inbox and require that nothing failed
    pub fn drain(&self) -> ProcessingReport {
        let report = self.engine.process_pending().unwrap();
        assert!(report.is_clean(), "processing failed: {:?}", report.failed);
        report
    }

    /// Take everything this device posted to the transport
    pub fn outbox(&self) -> Vec<OutboundMessage> {
        self.installation.take_outbox().unwrap()
    }

    /// Whether this device still owns its identity
    pub fn owns_identity(&self) -> bool {
        self.installation
            .read(|tx| self.installation.identity.is_owned(tx, &self.identity))
            .unwrap()
    }

    /// Queue a message received from `from` over a confirmed channel
    pub fn receive_from_contact<M: ProtocolMessage>(
        &self,
        from: &Device,
        instance_uid: ProtocolInstanceUid,
        message: &M,
    ) -> ReceivedMessage {
        let envelope = envelope_for(self.identity, instance_uid, message).unwrap();
        let received = ReceivedMessage::new(
            envelope,
            ReceptionChannelInfo::ObliviousChannel {
                remote_identity: from.identity,
                remote_device: from.device,
                confirmed: true,
            },
        );
        self.engine.submit(received.clone()).unwrap();
        received
    }
}

/// Identity an outbound message is delivered to
pub fn recipient(message: &OutboundMessage) -> IdentityKey {
    match &message.target {
        SendChannelTarget::AsymmetricBroadcast { to_identity } => *to_identity,
        SendChannelTarget::AllContactDevices { contact }
        | SendChannelTarget::ContactDevice { contact, .. } => *contact,
        SendChannelTarget::Local | SendChannelTarget::AllOwnedDevices => {
            message.envelope.owned_identity
        }
    }
}

/// What the recipient's transport would hand its engine for `message`,
/// sent from `sender_device`
pub fn as_received(message: &OutboundMessage, sender_device: DeviceUid) -> ReceivedMessage {
    let sender = message.envelope.owned_identity;
    let channel = match &message.target {
        SendChannelTarget::Local => ReceptionChannelInfo::Local,
        SendChannelTarget::AsymmetricBroadcast { .. } => ReceptionChannelInfo::AsymmetricBroadcast,
        SendChannelTarget::AllContactDevices { .. }
        | SendChannelTarget::ContactDevice { .. }
        | SendChannelTarget::AllOwnedDevices => ReceptionChannelInfo::ObliviousChannel {
            remote_identity: sender,
            remote_device: sender_device,
            confirmed: true,
        },
    };
    let mut envelope = message.envelope.clone();
    envelope.owned_identity = recipient(message);
    ReceivedMessage::new(envelope, channel)
}

/// Deliver every message of `outbox` addressed to `to`'s identity; returns
/// how many were delivered
pub fn deliver(outbox: &[OutboundMessage], from: &Device, to: &Device) -> usize {
    let mut delivered = 0;
    for message in outbox {
        if recipient(message) != to.identity {
            continue;
        }
        if message.target == SendChannelTarget::AllOwnedDevices && from.device == to.device {
            continue;
        }
        to.engine.submit(as_received(message, from.device)).unwrap();
        delivered += 1;
    }
    delivered
}

/// Configuration keeping final instances around for inspection
pub fn inspectable_config() -> EngineConfig {
    EngineConfig {
        reap_final_instances: false,
        ..EngineConfig::default()
    }
}
