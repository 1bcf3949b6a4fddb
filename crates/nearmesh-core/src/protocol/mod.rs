//! Mesh relay protocol
//!
//! - `envelope`: JSON wire envelope and message identifiers
//! - `registry`: peer registry
//! - `connection`: connection lifecycle state machine and controller
//! - `dedup`: duplicate detector
//! - `router`: flood router
//! - `message_log`: delivered-message log

pub mod connection;
pub mod dedup;
pub mod envelope;
pub mod message_log;
pub mod registry;
pub mod router;

pub use connection::{ConnectionController, ConnectionEvent, StateTransitionError};
pub use dedup::{DedupStats, DuplicateDetector};
pub use envelope::{Message, MessageId, MessageKind, DEFAULT_INFO_LEVEL, KIND_MESSAGE};
pub use message_log::{Author, LogEntry, MessageLog};
pub use registry::{FanOut, PeerEndpoint, PeerRegistry, PeerSnapshot, PeerState};
pub use router::{DropReason, FloodRouter, Origination, RelayOutcome};
