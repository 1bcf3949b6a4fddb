//! NearMesh Core
//!
//! Host-driven relay engine for an infrastructure-less mesh of nearby devices.
//! Devices link over a short-range radio (abstracted as a [`Transport`]) and
//! flood short text messages so every reachable device receives each message
//! exactly once.
//!
//! This crate performs no I/O. [`MeshEngine`] consumes [`Command`]s and
//! [`TransportEvent`]s and returns the [`Effect`]s and [`AppEvent`]s they cause;
//! the `nearmesh-runtime` crate drives it from a serialized async loop.

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod channel;
pub mod config;
pub mod engine;
pub mod errors;
pub mod protocol;
pub mod transport;
pub mod types;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use channel::{
    AppEvent, ChannelError, Command, ConnectionOutcome, Effect, EventSink, MeshStatus,
    NoticeLevel, Outcome, SetupOperation, TransportEvent,
};
pub use config::{ChannelConfig, DedupConfig, MeshConfig, RetentionPolicy, DEFAULT_SERVICE_ID};
pub use engine::{EngineStats, MeshEngine};
pub use errors::{EnvelopeError, MeshError, MeshResult, Result, TransportError};
pub use protocol::{
    Author, ConnectionController, ConnectionEvent, DedupStats, DropReason, DuplicateDetector,
    FanOut, FloodRouter, LogEntry, Message, MessageId, MessageKind, MessageLog, Origination,
    PeerEndpoint, PeerRegistry, PeerSnapshot, PeerState, RelayOutcome, StateTransitionError,
    DEFAULT_INFO_LEVEL,
};
pub use transport::Transport;
pub use types::{DeviceId, EndpointId, ManualTimeSource, SystemTimeSource, TimeSource, Timestamp};

// ----------------------------------------------------------------------------
// Internal API (for runtime and harness crates)
// ----------------------------------------------------------------------------

pub mod internal {
    pub use crate::channel::{
        create_app_event_channel, create_command_channel, create_effect_channel,
        create_transport_event_channel, AppEventReceiver, AppEventSender, CommandReceiver,
        CommandSender, EffectReceiver, EffectSender, NonBlockingSend, TransportEventReceiver,
        TransportEventSender,
    };
}
