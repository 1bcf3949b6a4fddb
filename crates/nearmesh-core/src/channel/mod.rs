//! Channel Module
//!
//! CSP channel infrastructure between the facade, the mesh logic loop, the
//! transport adapter and presentation:
//! - `communication`: commands, transport events, effects and app events
//! - `utils`: channel aliases, constructors and the transport `EventSink`

pub mod communication;
pub mod utils;

pub use communication::{
    AppEvent, Command, ConnectionOutcome, Effect, MeshStatus, NoticeLevel, Outcome,
    SetupOperation, TransportEvent,
};

pub use crate::config::ChannelConfig;

pub use utils::{
    create_app_event_channel, create_command_channel, create_effect_channel,
    create_transport_event_channel, AppEventReceiver, AppEventSender, ChannelError,
    CommandReceiver, CommandSender, EffectReceiver, EffectSender, EventSink, NonBlockingSend,
    TransportEventReceiver, TransportEventSender,
};
