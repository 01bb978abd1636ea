//! Tandem Testing Infrastructure
//!
//! In-memory implementations of every collaborator the protocol engine
//! consumes, plus fixtures and proptest strategies:
//!
//! - `MemoryStore`: optimistic transactional key-value store
//! - `MemoryIdentityStore`: owned identities, contacts and groups kept in
//!   the ambient transaction
//! - `RecordingChannels`: transactional outbox instead of a network
//! - `Ed25519Challenges`: real signatures over deterministic test keys

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tandem_testkit::*;
//!
//! let challenges = Arc::new(Ed25519Challenges::new());
//! let device = TestInstallation::new(challenges);
//! let (alice, _) = device.add_owned_identity("alice", vec![]).unwrap();
//! ```

pub mod challenges;
pub mod channels;
pub mod fixtures;
pub mod identity;
pub mod store;
pub mod strategies;

pub use challenges::Ed25519Challenges;
pub use channels::RecordingChannels;
pub use fixtures::TestInstallation;
pub use identity::MemoryIdentityStore;
pub use store::{MemoryStore, MemoryTransaction};

/// Install a test tracing subscriber honoring `RUST_LOG`; safe to call twice
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}
