//! Flood router
//!
//! Decides local delivery and forwarding for every message. A novel message is
//! delivered once and forwarded to every connected peer except the link it came
//! in on; duplicates, self-echoes and malformed payloads are dropped silently.
//! Forwarded payloads are the exact bytes that were received.

use core::fmt;
use tracing::{debug, trace};

use crate::errors::EnvelopeError;
use crate::protocol::dedup::DuplicateDetector;
use crate::protocol::envelope::Message;
use crate::protocol::registry::{FanOut, PeerRegistry};
use crate::types::{DeviceId, EndpointId, Timestamp};

// ----------------------------------------------------------------------------
// Outcomes
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DropReason {
    /// Payload is not a valid envelope
    Malformed,
    /// Message was authored by this device
    SelfEcho,
    /// Message id was already processed
    Duplicate,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DropReason::Malformed => write!(f, "malformed"),
            DropReason::SelfEcho => write!(f, "self-echo"),
            DropReason::Duplicate => write!(f, "duplicate"),
        }
    }
}

/// What to do with a payload received from a peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    /// Deliver locally and forward the original bytes to `forward_to`
    Delivered { message: Message, forward_to: FanOut },
    Dropped(DropReason),
}

/// A locally authored message ready for fan-out
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origination {
    pub message: Message,
    pub payload: Vec<u8>,
    pub fan_out: FanOut,
}

// ----------------------------------------------------------------------------
// Flood Router
// ----------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct FloodRouter {
    local_device: DeviceId,
}

impl FloodRouter {
    pub fn new(local_device: DeviceId) -> Self {
        Self { local_device }
    }

    pub fn local_device(&self) -> &DeviceId {
        &self.local_device
    }

    /// Author a message stamped `timestamp` and fan it out to every connected peer
    ///
    /// The id is marked as seen before anything is sent so echoes arriving over
    /// another path are dropped.
    pub fn originate(
        &self,
        dedup: &mut DuplicateDetector,
        registry: &PeerRegistry,
        timestamp: Timestamp,
        info_level: &str,
        body: &str,
    ) -> Result<Origination, EnvelopeError> {
        let message = Message::new(self.local_device.clone(), timestamp, info_level, body);
        let payload = message.encode()?;
        dedup.mark_originated(&message.id(), timestamp);

        let fan_out = registry.list_connected();
        debug!(message_id = %message.id(), peers = fan_out.len(), "Originating message");

        Ok(Origination {
            message,
            payload,
            fan_out,
        })
    }

    /// Handle a payload that arrived from `from`
    pub fn on_message_received(
        &self,
        dedup: &mut DuplicateDetector,
        registry: &PeerRegistry,
        from: &EndpointId,
        raw: &[u8],
        now: Timestamp,
    ) -> RelayOutcome {
        let message = match Message::decode(raw) {
            Ok(message) => message,
            Err(e) => {
                trace!(endpoint = %from, error = %e, "Dropping malformed payload");
                return RelayOutcome::Dropped(DropReason::Malformed);
            }
        };

        let id = message.id();
        if dedup.is_self(&message.origin_device) {
            trace!(endpoint = %from, message_id = %id, "Dropping self-echo");
            return RelayOutcome::Dropped(DropReason::SelfEcho);
        }
        if !dedup.observe(&id, now) {
            return RelayOutcome::Dropped(DropReason::Duplicate);
        }

        let forward_to: FanOut = registry
            .list_connected()
            .into_iter()
            .filter(|peer| peer != from)
            .collect();

        RelayOutcome::Delivered {
            message,
            forward_to,
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
