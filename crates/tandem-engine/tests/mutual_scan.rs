//! Mutual scan across two devices, including the channel creation it hands
//! over to, and channel creation on its own

#![allow(clippy::unwrap_used)]

mod common;

use std::sync::Arc;

use common::{deliver, inspectable_config, Device};
use tandem_core::effects::{Challenge, ChallengeEffects};
use tandem_core::{
    DeviceUid, ProtocolInstanceUid, ProtocolKind, ReceivedMessage, ReceptionChannelInfo,
    SendChannelTarget, Signature, TransactionalStore, TrustLevel,
};
use tandem_engine::protocol::envelope_for;
use tandem_engine::protocols::channel_creation::{ChannelCreationMessage, ChannelCreationState};
use tandem_engine::protocols::mutual_scan::{self, MutualScanMessage, MutualScanState};
use tandem_engine::protocols::{ChannelCreation, ContactMutualScan};
use tandem_engine::records::links;
use tandem_engine::EngineConfig;
use tandem_testkit::Ed25519Challenges;

struct Pair {
    alice: Device,
    bob: Device,
}

fn pair(config: EngineConfig) -> Pair {
    let challenges = Arc::new(Ed25519Challenges::new());
    Pair {
        alice: Device::new(&challenges, "alice", config.clone()),
        bob: Device::new(&challenges, "bob", config),
    }
}

/// `scanner` scans the code `scanned` displays for it
fn scan(scanner: &Device, scanned: &Device) -> ProtocolInstanceUid {
    let code = mutual_scan::scan_code(
        &*scanned.installation.challenges,
        &scanned.identity,
        &scanner.identity,
    )
    .unwrap();
    scanner
        .engine
        .start_protocol(
            scanner.identity,
            &MutualScanMessage::Initiate {
                contact: scanned.identity,
                devices: vec![scanned.device],
                code,
            },
        )
        .unwrap()
}

/// Hand `message` to `to` as if it arrived over asymmetric broadcast
fn broadcast_to(to: &Device, instance_uid: ProtocolInstanceUid, message: &MutualScanMessage) {
    let envelope = envelope_for(to.identity, instance_uid, message).unwrap();
    to.engine
        .submit(ReceivedMessage::new(
            envelope,
            ReceptionChannelInfo::AsymmetricBroadcast,
        ))
        .unwrap();
}

fn channels(device: &Device) -> Vec<(tandem_core::IdentityKey, DeviceUid)> {
    device
        .installation
        .read(|tx| device.installation.channels.channels(tx, &device.identity))
        .unwrap()
}

#[test]
fn scan_upgrades_both_sides_and_confirms_a_channel() {
    let Pair { alice, bob } = pair(inspectable_config());

    let scan_uid = scan(&alice, &bob);
    assert_eq!(alice.drain().executed, 1);

    let contact = alice.installation.contact(&alice.identity, &bob.identity).unwrap().unwrap();
    assert!(contact.one_to_one);
    assert_eq!(contact.trust_level, EngineConfig::default().mutual_scan_trust_level);

    let MutualScanState::WaitingForChannel {
        channel_instance, ..
    } = alice
        .engine
        .instance_state::<ContactMutualScan>(&alice.identity, &scan_uid)
        .unwrap()
        .unwrap()
    else {
        panic!("scan should wait for its channel");
    };
    let pending_links = |device: &Device| {
        let mut tx = device.engine.store().begin();
        links::for_child(&mut tx, &device.identity, &channel_instance).unwrap()
    };
    let registered = pending_links(&alice);
    assert_eq!(registered.len(), 1);
    assert_eq!(registered[0].parent_uid, scan_uid);

    let from_alice = alice.outbox();
    assert_eq!(from_alice.len(), 1);
    assert_eq!(
        from_alice[0].target,
        SendChannelTarget::AsymmetricBroadcast {
            to_identity: bob.identity
        }
    );
    assert_eq!(deliver(&from_alice, &alice, &bob), 1);
    // proof, then the channel creation it starts
    assert_eq!(bob.drain().executed, 2);

    let alice_at_bob = bob.installation.contact(&bob.identity, &alice.identity).unwrap().unwrap();
    assert!(alice_at_bob.one_to_one);
    assert_eq!(alice_at_bob.devices, vec![alice.device]);
    assert_eq!(
        bob.engine
            .instance_state::<ContactMutualScan>(&bob.identity, &scan_uid)
            .unwrap(),
        Some(MutualScanState::Finished {
            contact: alice.identity
        })
    );

    let pings = bob.outbox();
    assert_eq!(pings.len(), 1);
    assert_eq!(pings[0].envelope.protocol_kind, ProtocolKind::ChannelCreation);
    assert_eq!(pings[0].envelope.instance_uid, channel_instance);
    assert_eq!(deliver(&pings, &bob, &alice), 1);
    // ping, then the link notification it fires
    assert_eq!(alice.drain().executed, 2);

    assert_eq!(
        alice
            .engine
            .instance_state::<ChannelCreation>(&alice.identity, &channel_instance)
            .unwrap(),
        Some(ChannelCreationState::ChannelConfirmed {
            contact: bob.identity,
            device: bob.device
        })
    );
    assert_eq!(
        alice
            .engine
            .instance_state::<ContactMutualScan>(&alice.identity, &scan_uid)
            .unwrap(),
        Some(MutualScanState::Finished {
            contact: bob.identity
        })
    );
    assert_eq!(channels(&alice), vec![(bob.identity, bob.device)]);
    assert!(pending_links(&alice).is_empty());

    let acks = alice.outbox();
    assert_eq!(acks.len(), 1);
    assert_eq!(
        acks[0].target,
        SendChannelTarget::ContactDevice {
            contact: bob.identity,
            device: bob.device
        }
    );
    deliver(&acks, &alice, &bob);
    assert_eq!(bob.drain().executed, 1);
    assert_eq!(channels(&bob), vec![(alice.identity, alice.device)]);

    // a duplicated ack does not re-run the step
    deliver(&acks, &alice, &bob);
    let report = bob.drain();
    assert_eq!((report.executed, report.dropped), (0, 1));
    assert_eq!(bob.engine.pending_message_count().unwrap(), 0);
}

#[test]
fn replayed_scan_proof_is_cancelled() {
    let Pair { alice, bob } = pair(EngineConfig::default());
    scan(&alice, &bob);
    alice.drain();
    let proofs = alice.outbox();

    deliver(&proofs, &alice, &bob);
    bob.drain();
    bob.outbox();
    let trusted = bob.installation.contact(&bob.identity, &alice.identity).unwrap();
    assert!(trusted.is_some());

    // the scan instance was reaped, so the replay recreates it from scratch
    deliver(&proofs, &alice, &bob);
    let report = bob.drain();
    assert_eq!(report.executed, 1);
    assert!(bob.outbox().is_empty());
    let left = bob.engine.instances(&bob.identity).unwrap();
    assert!(left
        .iter()
        .all(|record| record.protocol_kind == ProtocolKind::ChannelCreation));
    assert_eq!(
        bob.installation.contact(&bob.identity, &alice.identity).unwrap(),
        trusted
    );
}

#[test]
fn forged_scan_proof_is_rejected() {
    let Pair { alice, bob } = pair(inspectable_config());
    let scan_uid = ProtocolInstanceUid::random();
    broadcast_to(
        &bob,
        scan_uid,
        &MutualScanMessage::Signature {
            scanner: alice.identity,
            devices: vec![alice.device],
            signature: Signature::from_bytes(vec![0; 64]),
            channel_instance: ProtocolInstanceUid::random(),
        },
    );
    bob.drain();

    assert_eq!(
        bob.engine
            .instance_state::<ContactMutualScan>(&bob.identity, &scan_uid)
            .unwrap(),
        Some(MutualScanState::Cancelled)
    );
    assert!(bob
        .installation
        .contact(&bob.identity, &alice.identity)
        .unwrap()
        .is_none());
    assert!(bob.outbox().is_empty());
}

#[test]
fn unsolicited_scan_proof_grants_no_trust() {
    let challenges = Arc::new(Ed25519Challenges::new());
    let bob = Device::new(&challenges, "bob", inspectable_config());
    let mallory = Device::new(&challenges, "mallory", inspectable_config());

    // mallory signs a proof with its own key instead of bob's
    let self_signed = challenges
        .solve_challenge(
            &Challenge::MutualScan {
                scanner: mallory.identity,
                scanned: bob.identity,
            },
            &mallory.identity,
        )
        .unwrap();
    let scan_uid = ProtocolInstanceUid::random();
    broadcast_to(
        &bob,
        scan_uid,
        &MutualScanMessage::Signature {
            scanner: mallory.identity,
            devices: vec![mallory.device],
            signature: self_signed,
            channel_instance: ProtocolInstanceUid::random(),
        },
    );
    assert_eq!(bob.drain().executed, 1);

    assert_eq!(
        bob.engine
            .instance_state::<ContactMutualScan>(&bob.identity, &scan_uid)
            .unwrap(),
        Some(MutualScanState::Cancelled)
    );
    assert!(bob
        .installation
        .contact(&bob.identity, &mallory.identity)
        .unwrap()
        .is_none());
    assert!(bob.outbox().is_empty());
    assert!(channels(&bob).is_empty());
}

#[test]
fn code_shown_to_one_scanner_is_useless_to_another() {
    let challenges = Arc::new(Ed25519Challenges::new());
    let alice = Device::new(&challenges, "alice", inspectable_config());
    let bob = Device::new(&challenges, "bob", inspectable_config());
    let mallory = Device::new(&challenges, "mallory", inspectable_config());
    let code_for_alice =
        mutual_scan::scan_code(&*challenges, &bob.identity, &alice.identity).unwrap();

    // mallory's own scan refuses the code and sends nothing
    let mallory_scan = mallory
        .engine
        .start_protocol(
            mallory.identity,
            &MutualScanMessage::Initiate {
                contact: bob.identity,
                devices: vec![bob.device],
                code: code_for_alice.clone(),
            },
        )
        .unwrap();
    mallory.drain();
    assert_eq!(
        mallory
            .engine
            .instance_state::<ContactMutualScan>(&mallory.identity, &mallory_scan)
            .unwrap(),
        Some(MutualScanState::Cancelled)
    );
    assert!(mallory.outbox().is_empty());
    assert!(mallory
        .installation
        .contact(&mallory.identity, &bob.identity)
        .unwrap()
        .is_none());

    // bob refuses it when mallory hands it over anyway
    broadcast_to(
        &bob,
        ProtocolInstanceUid::random(),
        &MutualScanMessage::Signature {
            scanner: mallory.identity,
            devices: vec![mallory.device],
            signature: code_for_alice,
            channel_instance: ProtocolInstanceUid::random(),
        },
    );
    bob.drain();
    assert!(bob
        .installation
        .contact(&bob.identity, &mallory.identity)
        .unwrap()
        .is_none());
    assert!(bob.outbox().is_empty());
}

#[test]
fn channel_ping_from_a_contact_is_answered() {
    let Pair { alice, bob } = pair(inspectable_config());
    bob.installation
        .add_contact(&bob.identity, &alice.identity, TrustLevel::new(3), false, vec![])
        .unwrap();

    let channel = alice
        .engine
        .start_protocol(
            alice.identity,
            &ChannelCreationMessage::Initiate {
                contact: bob.identity,
            },
        )
        .unwrap();
    alice.drain();
    deliver(&alice.outbox(), &alice, &bob);
    bob.drain();

    assert_eq!(
        bob.engine
            .instance_state::<ChannelCreation>(&bob.identity, &channel)
            .unwrap(),
        Some(ChannelCreationState::ChannelConfirmed {
            contact: alice.identity,
            device: alice.device
        })
    );
    assert_eq!(channels(&bob), vec![(alice.identity, alice.device)]);
    assert_eq!(bob.outbox().len(), 1);
}

#[test]
fn channel_ping_from_a_stranger_is_refused() {
    let challenges = Arc::new(Ed25519Challenges::new());
    let bob = Device::new(&challenges, "bob", inspectable_config());
    let mallory = Device::new(&challenges, "mallory", inspectable_config());

    let channel = mallory
        .engine
        .start_protocol(
            mallory.identity,
            &ChannelCreationMessage::Initiate {
                contact: bob.identity,
            },
        )
        .unwrap();
    mallory.drain();
    assert_eq!(deliver(&mallory.outbox(), &mallory, &bob), 1);
    assert_eq!(bob.drain().executed, 1);

    assert_eq!(
        bob.engine
            .instance_state::<ChannelCreation>(&bob.identity, &channel)
            .unwrap(),
        Some(ChannelCreationState::Cancelled)
    );
    assert!(channels(&bob).is_empty());
    assert!(bob.outbox().is_empty());
}

#[test]
fn ack_from_another_identity_leaves_ping_pending() {
    let challenges = Arc::new(Ed25519Challenges::new());
    let alice = Device::new(&challenges, "alice", inspectable_config());
    let bob = Device::new(&challenges, "bob", inspectable_config());
    let mallory = Device::new(&challenges, "mallory", inspectable_config());

    let channel = alice
        .engine
        .start_protocol(
            alice.identity,
            &ChannelCreationMessage::Initiate {
                contact: bob.identity,
            },
        )
        .unwrap();
    alice.drain();
    alice.outbox();

    alice.receive_from_contact(&mallory, channel, &ChannelCreationMessage::Ack);
    alice.drain();
    assert_eq!(
        alice
            .engine
            .instance_state::<ChannelCreation>(&alice.identity, &channel)
            .unwrap(),
        Some(ChannelCreationState::PingSent {
            contact: bob.identity
        })
    );
    assert!(channels(&alice).is_empty());
}
