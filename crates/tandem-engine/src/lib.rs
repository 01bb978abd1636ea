//! Tandem Engine - exactly-once step execution for long-lived protocols
//!
//! A protocol instance is a persisted state machine scoped to an owned
//! identity. Messages are queued in a durable inbox; processing one message
//! runs at most one step, inside one transaction that also consumes the
//! message, persists the new state and records every side effect. Either all
//! of it commits or none of it does.
//!
//! ```text
//! submit ──► inbox ──► dispatcher ──► step ──► state + emissions
//!                         │                        │
//!                         └── links / waiters ◄────┘
//! ```
//!
//! The concrete protocols live in [`protocols`]; [`ProtocolEngine`] is the
//! entry point for embedders, [`EngineWorker`] an optional async driver.

#![forbid(unsafe_code)]

pub mod config;
pub mod context;
pub mod dispatcher;
pub mod engine;
mod notifications;
pub mod protocol;
pub mod protocols;
pub mod records;
pub mod worker;

pub use config::EngineConfig;
pub use context::{EngineEffects, StepContext, SubProtocolOutcome};
pub use dispatcher::{DispatchOutcome, Dispatcher, DropReason};
pub use engine::{ProcessOutcome, ProcessingReport, ProtocolEngine};
pub use protocol::{
    LinkNotification, Protocol, ProtocolMessage, ProtocolState, StepOutcome, WaitingNotification,
};
pub use records::instances::{InstanceHandle, ProtocolInstanceRecord};
pub use worker::{EngineWorker, WorkerHandle};
