//! CSP Channel Communication Protocol Types
//!
//! All traffic between the facade, the serialized logic loop, the transport
//! adapter and the presentation layer flows through these message types.

use core::fmt;
use serde::{Deserialize, Serialize};

use crate::protocol::message_log::LogEntry;
use crate::protocol::registry::PeerState;
use crate::types::EndpointId;

// ----------------------------------------------------------------------------
// Command: Facade → Mesh Logic
// ----------------------------------------------------------------------------

/// Commands sent from the facade to the mesh logic task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    /// Reset the transport, then start advertising and discovery
    Start,
    /// Author a message and flood it to all connected peers
    SendLocalMessage {
        body: String,
        /// `None` uses the configured default level
        info_level: Option<String>,
    },
    /// Run periodic housekeeping (duplicate-detector eviction)
    Maintain,
    /// Stop the logic task
    Shutdown,
}

// ----------------------------------------------------------------------------
// TransportEvent: Transport → Mesh Logic
// ----------------------------------------------------------------------------

/// Notifications raised by the transport adapter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportEvent {
    EndpointFound {
        endpoint: EndpointId,
        name: String,
    },
    EndpointLost {
        endpoint: EndpointId,
    },
    /// A link negotiation started, either side may have requested it
    ConnectionInitiated {
        endpoint: EndpointId,
        name: String,
    },
    ConnectionResult {
        endpoint: EndpointId,
        outcome: ConnectionOutcome,
    },
    /// Our own `request_connection` call was refused before any negotiation
    ConnectionRequestFailed {
        endpoint: EndpointId,
        reason: String,
    },
    Disconnected {
        endpoint: EndpointId,
    },
    PayloadReceived {
        endpoint: EndpointId,
        payload: Vec<u8>,
    },
    SetupCompleted {
        operation: SetupOperation,
    },
    SetupFailed {
        operation: SetupOperation,
        reason: String,
    },
}

impl TransportEvent {
    /// Endpoint the event concerns, if any
    pub fn endpoint(&self) -> Option<&EndpointId> {
        match self {
            TransportEvent::EndpointFound { endpoint, .. }
            | TransportEvent::EndpointLost { endpoint }
            | TransportEvent::ConnectionInitiated { endpoint, .. }
            | TransportEvent::ConnectionResult { endpoint, .. }
            | TransportEvent::ConnectionRequestFailed { endpoint, .. }
            | TransportEvent::Disconnected { endpoint }
            | TransportEvent::PayloadReceived { endpoint, .. } => Some(endpoint),
            TransportEvent::SetupCompleted { .. } | TransportEvent::SetupFailed { .. } => None,
        }
    }
}

// ----------------------------------------------------------------------------
// Effect: Mesh Logic → Transport (External Side Effects Only)
// ----------------------------------------------------------------------------

/// Transport operations requested by the mesh logic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Effect {
    /// Stop all endpoints, advertising and discovery
    ResetTransport,
    StartAdvertising {
        local_name: String,
        service_id: String,
    },
    StartDiscovery {
        service_id: String,
    },
    RequestConnection {
        local_name: String,
        endpoint: EndpointId,
    },
    AcceptConnection {
        endpoint: EndpointId,
    },
    SendPayload {
        endpoint: EndpointId,
        payload: Vec<u8>,
    },
}

// ----------------------------------------------------------------------------
// AppEvent: Mesh Logic → Presentation (State Changes Only)
// ----------------------------------------------------------------------------

/// State changes the presentation layer may want to render
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppEvent {
    PeerStateChanged {
        endpoint: EndpointId,
        display_name: String,
        /// `None` when the endpoint was just registered
        from: Option<PeerState>,
        to: PeerState,
    },
    PeerRemoved {
        endpoint: EndpointId,
    },
    MessageDelivered {
        entry: LogEntry,
    },
    MeshStatusChanged {
        status: MeshStatus,
    },
    /// User-visible notice (the mesh stays usable)
    Notice {
        level: NoticeLevel,
        text: String,
    },
}

// ----------------------------------------------------------------------------
// Outcome
// ----------------------------------------------------------------------------

/// Everything produced by handling one command or transport event
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Outcome {
    pub effects: Vec<Effect>,
    pub app_events: Vec<AppEvent>,
}

impl Outcome {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn effect(&mut self, effect: Effect) {
        self.effects.push(effect);
    }

    pub fn event(&mut self, event: AppEvent) {
        self.app_events.push(event);
    }

    pub fn is_empty(&self) -> bool {
        self.effects.is_empty() && self.app_events.is_empty()
    }
}

// ----------------------------------------------------------------------------
// Supporting Types
// ----------------------------------------------------------------------------

/// Result of a connection negotiation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionOutcome {
    Success,
    Failure { reason: String },
}

/// Transport setup step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SetupOperation {
    Advertising,
    Discovery,
}

impl fmt::Display for SetupOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SetupOperation::Advertising => write!(f, "advertising"),
            SetupOperation::Discovery => write!(f, "discovery"),
        }
    }
}

/// Whether the local radio is currently visible and looking for peers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeshStatus {
    pub advertising: bool,
    pub discovering: bool,
}

impl MeshStatus {
    /// Both setup steps succeeded
    pub fn is_active(&self) -> bool {
        self.advertising && self.discovering
    }

    pub fn set(&mut self, operation: SetupOperation, running: bool) {
        match operation {
            SetupOperation::Advertising => self.advertising = running,
            SetupOperation::Discovery => self.discovering = running,
        }
    }
}

impl fmt::Display for MeshStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "advertising={} discovering={}",
            self.advertising, self.discovering
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NoticeLevel {
    Info,
    Warning,
}

impl fmt::Display for NoticeLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NoticeLevel::Info => write!(f, "Info"),
            NoticeLevel::Warning => write!(f, "Warning"),
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_operation_display() {
        assert_eq!(SetupOperation::Advertising.to_string(), "advertising");
        assert_eq!(SetupOperation::Discovery.to_string(), "discovery");
    }

    #[test]
    fn test_mesh_status_requires_both_steps() {
        let mut status = MeshStatus::default();
        assert!(!status.is_active());
        status.set(SetupOperation::Advertising, true);
        assert!(!status.is_active());
        status.set(SetupOperation::Discovery, true);
        assert!(status.is_active());
        status.set(SetupOperation::Advertising, false);
        assert!(!status.is_active());
    }

    #[test]
    fn test_transport_event_endpoint() {
        let lost = TransportEvent::EndpointLost {
            endpoint: EndpointId::from("ep-1"),
        };
        assert_eq!(lost.endpoint(), Some(&EndpointId::from("ep-1")));

        let setup = TransportEvent::SetupCompleted {
            operation: SetupOperation::Discovery,
        };
        assert_eq!(setup.endpoint(), None);
    }

    #[test]
    fn test_command_json_serialization() {
        let cmd = Command::SendLocalMessage {
            body: "hello".to_string(),
            info_level: None,
        };
        let json = serde_json::to_string(&cmd).unwrap();
        let back: Command = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cmd);
    }
}
