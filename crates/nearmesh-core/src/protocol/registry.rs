//! Peer registry
//!
//! Authoritative view of every endpoint the transport has reported. Entries are
//! keyed by endpoint id and kept in a `BTreeMap` so snapshots and fan-out sets come
//! out in a stable order. The registry is only ever mutated from the serialized
//! logic loop, so every read sees a whole, consistent point in time.

use std::collections::BTreeMap;
use core::fmt;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use tracing::debug;

use crate::types::EndpointId;

/// Fan-out set; meshes are small, so this rarely spills to the heap
pub type FanOut = SmallVec<[EndpointId; 8]>;

// ----------------------------------------------------------------------------
// Peer State
// ----------------------------------------------------------------------------

/// Connection state of a registered endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PeerState {
    Discovered,
    Connecting,
    Connected,
    Disconnected,
}

impl PeerState {
    pub const ALL: [PeerState; 4] = [
        PeerState::Discovered,
        PeerState::Connecting,
        PeerState::Connected,
        PeerState::Disconnected,
    ];

    pub fn is_connected(&self) -> bool {
        matches!(self, PeerState::Connected)
    }
}

impl fmt::Display for PeerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerState::Discovered => write!(f, "Discovered"),
            PeerState::Connecting => write!(f, "Connecting"),
            PeerState::Connected => write!(f, "Connected"),
            PeerState::Disconnected => write!(f, "Disconnected"),
        }
    }
}

// ----------------------------------------------------------------------------
// Peer Endpoint
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerEndpoint {
    pub id: EndpointId,
    /// Label reported at discovery time, not guaranteed unique
    pub display_name: String,
    pub state: PeerState,
    /// The remote side opened a negotiation we accepted; cleared on leaving `Connecting`
    #[serde(default)]
    pub inbound_negotiation: bool,
}

impl PeerEndpoint {
    pub fn new(id: EndpointId, display_name: impl Into<String>, state: PeerState) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            state,
            inbound_negotiation: false,
        }
    }

    /// A freshly discovered endpoint
    pub fn discovered(id: EndpointId, display_name: impl Into<String>) -> Self {
        Self::new(id, display_name, PeerState::Discovered)
    }
}

/// Presentation view of one peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerSnapshot {
    pub id: EndpointId,
    pub display_name: String,
    pub state: PeerState,
    pub connected: bool,
}

impl From<&PeerEndpoint> for PeerSnapshot {
    fn from(peer: &PeerEndpoint) -> Self {
        Self {
            id: peer.id.clone(),
            display_name: peer.display_name.clone(),
            state: peer.state,
            connected: peer.state.is_connected(),
        }
    }
}

// ----------------------------------------------------------------------------
// Peer Registry
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct PeerRegistry {
    peers: BTreeMap<EndpointId, PeerEndpoint>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an endpoint by id, returning the previous entry
    pub fn upsert(&mut self, endpoint: PeerEndpoint) -> Option<PeerEndpoint> {
        self.peers.insert(endpoint.id.clone(), endpoint)
    }

    /// Delete an endpoint; absent ids are a no-op
    pub fn remove(&mut self, id: &EndpointId) -> Option<PeerEndpoint> {
        self.peers.remove(id)
    }

    /// Update the state of a known endpoint
    ///
    /// Returns `false` without touching anything when the id is unknown, which
    /// happens when a transport event races with removal.
    pub fn set_state(&mut self, id: &EndpointId, state: PeerState) -> bool {
        match self.peers.get_mut(id) {
            Some(peer) => {
                peer.state = state;
                if state != PeerState::Connecting {
                    peer.inbound_negotiation = false;
                }
                true
            }
            None => {
                debug!(endpoint = %id, %state, "Ignoring state update for unknown endpoint");
                false
            }
        }
    }

    /// Record that an inbound negotiation is in flight for a `Connecting` endpoint
    pub fn mark_inbound_negotiation(&mut self, id: &EndpointId) -> bool {
        match self.peers.get_mut(id) {
            Some(peer) if peer.state == PeerState::Connecting => {
                peer.inbound_negotiation = true;
                true
            }
            _ => false,
        }
    }

    pub fn set_display_name(&mut self, id: &EndpointId, display_name: &str) -> bool {
        match self.peers.get_mut(id) {
            Some(peer) => {
                if peer.display_name != display_name {
                    peer.display_name = display_name.to_string();
                }
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: &EndpointId) -> Option<&PeerEndpoint> {
        self.peers.get(id)
    }

    pub fn state_of(&self, id: &EndpointId) -> Option<PeerState> {
        self.peers.get(id).map(|peer| peer.state)
    }

    pub fn contains(&self, id: &EndpointId) -> bool {
        self.peers.contains_key(id)
    }

    /// Ids of every endpoint currently `Connected`
    pub fn list_connected(&self) -> FanOut {
        self.peers
            .values()
            .filter(|peer| peer.state.is_connected())
            .map(|peer| peer.id.clone())
            .collect()
    }

    pub fn connected_count(&self) -> usize {
        self.peers
            .values()
            .filter(|peer| peer.state.is_connected())
            .count()
    }

    /// Presentation snapshot ordered by endpoint id
    pub fn snapshot(&self) -> Vec<PeerSnapshot> {
        self.peers.values().map(PeerSnapshot::from).collect()
    }

    /// Drop every entry, returning the ids that were registered
    pub fn clear(&mut self) -> Vec<EndpointId> {
        let ids = self.peers.keys().cloned().collect();
        self.peers.clear();
        ids
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
