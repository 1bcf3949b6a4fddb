//! Connection lifecycle state machine
//!
//! Drives each endpoint through `Discovered → Connecting → Connected → Disconnected`
//! from transport events and decides when to request or accept a link:
//!
//! ```text
//! Discovered   --LocalInitiated-->  Connecting   (outbound request)
//! Discovered   --RemoteInitiated--> Connecting   (auto-accept)
//! Connecting   --RemoteInitiated--> Connecting   (accept our own negotiation)
//! Disconnected --RemoteInitiated--> Connecting   (auto-accept)
//! Connecting   --Succeeded-->       Connected
//! Connecting   --Failed-->          Discovered   (a refused request counts only
//!                                                  without an inbound negotiation)
//! Connected    --Disconnected-->    Disconnected
//! Disconnected --Found-->           Discovered   (then LocalInitiated again)
//! any state    --endpoint lost-->   removed from the registry
//! ```
//!
//! Events that do not fit the table, or that name an endpoint the registry no
//! longer holds, are ignored. There are no timeouts: an endpoint stuck in
//! `Connecting` stays there until the transport reports an outcome or loses it.

use core::fmt;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::channel::{AppEvent, ConnectionOutcome, Effect, Outcome};
use crate::protocol::registry::{PeerEndpoint, PeerRegistry, PeerState};
use crate::types::EndpointId;

// ----------------------------------------------------------------------------
// State Transition Events
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionEvent {
    /// The transport reported the endpoint again after a disconnect
    Found,
    /// We asked the transport to connect
    LocalInitiated,
    /// The transport started negotiating a link with this endpoint
    RemoteInitiated,
    Succeeded,
    Failed,
    Disconnected,
}

impl fmt::Display for ConnectionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionEvent::Found => "Found",
            ConnectionEvent::LocalInitiated => "LocalInitiated",
            ConnectionEvent::RemoteInitiated => "RemoteInitiated",
            ConnectionEvent::Succeeded => "Succeeded",
            ConnectionEvent::Failed => "Failed",
            ConnectionEvent::Disconnected => "Disconnected",
        };
        f.write_str(name)
    }
}

/// Errors that can occur during state transitions
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateTransitionError {
    #[error("Invalid transition from {from} on event {event}")]
    InvalidTransition {
        from: PeerState,
        event: ConnectionEvent,
    },
}

// ----------------------------------------------------------------------------
// State Machine Implementation
// ----------------------------------------------------------------------------

impl PeerState {
    /// Next state for `event`, or an error when the event is not valid here
    pub fn transition(self, event: ConnectionEvent) -> Result<PeerState, StateTransitionError> {
        use ConnectionEvent as E;
        use PeerState as S;

        let next = match (self, event) {
            (S::Discovered, E::LocalInitiated) => S::Connecting,
            (S::Discovered | S::Connecting | S::Disconnected, E::RemoteInitiated) => S::Connecting,
            (S::Connecting, E::Succeeded) => S::Connected,
            (S::Connecting, E::Failed) => S::Discovered,
            (S::Connected, E::Disconnected) => S::Disconnected,
            (S::Disconnected, E::Found) => S::Discovered,
            (from, event) => return Err(StateTransitionError::InvalidTransition { from, event }),
        };
        Ok(next)
    }
}

// ----------------------------------------------------------------------------
// Connection Controller
// ----------------------------------------------------------------------------

/// Applies transport lifecycle events to the registry
///
/// Every state change is written to the registry and reported as an
/// `AppEvent::PeerStateChanged`; link requests and accepts come out as effects.
#[derive(Debug, Clone)]
pub struct ConnectionController {
    local_name: String,
}

impl ConnectionController {
    pub fn new(local_name: impl Into<String>) -> Self {
        Self {
            local_name: local_name.into(),
        }
    }

    /// New endpoints are registered and immediately asked to connect
    pub fn on_endpoint_found(
        &self,
        registry: &mut PeerRegistry,
        endpoint: EndpointId,
        name: &str,
    ) -> Outcome {
        let mut outcome = Outcome::new();

        match registry.state_of(&endpoint) {
            None => {
                registry.upsert(PeerEndpoint::discovered(endpoint.clone(), name));
                outcome.event(AppEvent::PeerStateChanged {
                    endpoint: endpoint.clone(),
                    display_name: name.to_string(),
                    from: None,
                    to: PeerState::Discovered,
                });
                self.request_connection(registry, &endpoint, &mut outcome);
            }
            Some(PeerState::Disconnected) => {
                registry.set_display_name(&endpoint, name);
                if self.apply(registry, &endpoint, ConnectionEvent::Found, &mut outcome) {
                    self.request_connection(registry, &endpoint, &mut outcome);
                }
            }
            Some(state) => {
                debug!(endpoint = %endpoint, %state, "Endpoint found again, refreshing name");
                registry.set_display_name(&endpoint, name);
            }
        }

        outcome
    }

    /// Lost endpoints are removed whatever their state
    pub fn on_endpoint_lost(&self, registry: &mut PeerRegistry, endpoint: &EndpointId) -> Outcome {
        let mut outcome = Outcome::new();
        match registry.remove(endpoint) {
            Some(peer) => {
                debug!(endpoint = %endpoint, last_state = %peer.state, "Endpoint lost");
                outcome.event(AppEvent::PeerRemoved {
                    endpoint: endpoint.clone(),
                });
            }
            None => debug!(endpoint = %endpoint, "Lost event for unknown endpoint"),
        }
        outcome
    }

    /// Incoming negotiations are always accepted
    ///
    /// An initiator the registry does not hold, whether never discovered or
    /// already lost and removed, is registered again as `Connecting` so the link
    /// joins the fan-out set once it succeeds.
    pub fn on_connection_initiated(
        &self,
        registry: &mut PeerRegistry,
        endpoint: EndpointId,
        name: &str,
    ) -> Outcome {
        let mut outcome = Outcome::new();

        let accept = match registry.state_of(&endpoint) {
            None => {
                registry.upsert(PeerEndpoint::new(
                    endpoint.clone(),
                    name,
                    PeerState::Connecting,
                ));
                outcome.event(AppEvent::PeerStateChanged {
                    endpoint: endpoint.clone(),
                    display_name: name.to_string(),
                    from: None,
                    to: PeerState::Connecting,
                });
                true
            }
            Some(_) => self.apply(
                registry,
                &endpoint,
                ConnectionEvent::RemoteInitiated,
                &mut outcome,
            ),
        };

        if accept {
            registry.mark_inbound_negotiation(&endpoint);
            outcome.effect(Effect::AcceptConnection { endpoint });
        }
        outcome
    }

    pub fn on_connection_result(
        &self,
        registry: &mut PeerRegistry,
        endpoint: &EndpointId,
        result: &ConnectionOutcome,
    ) -> Outcome {
        let mut outcome = Outcome::new();
        let event = match result {
            ConnectionOutcome::Success => ConnectionEvent::Succeeded,
            ConnectionOutcome::Failure { reason } => {
                debug!(endpoint = %endpoint, %reason, "Connection attempt failed");
                ConnectionEvent::Failed
            }
        };
        self.apply(registry, endpoint, event, &mut outcome);
        outcome
    }

    /// Our outbound request was refused by the transport
    ///
    /// While an inbound negotiation for the same endpoint is pending the refusal
    /// is the transport collapsing the duplicate link, so the state is kept and
    /// the inbound result decides.
    pub fn on_request_failed(
        &self,
        registry: &mut PeerRegistry,
        endpoint: &EndpointId,
        reason: &str,
    ) -> Outcome {
        let mut outcome = Outcome::new();
        if registry
            .get(endpoint)
            .is_some_and(|peer| peer.inbound_negotiation)
        {
            debug!(
                endpoint = %endpoint,
                %reason,
                "Outbound request refused, inbound negotiation pending"
            );
            return outcome;
        }
        debug!(endpoint = %endpoint, %reason, "Outbound request refused");
        self.apply(registry, endpoint, ConnectionEvent::Failed, &mut outcome);
        outcome
    }

    pub fn on_disconnected(&self, registry: &mut PeerRegistry, endpoint: &EndpointId) -> Outcome {
        let mut outcome = Outcome::new();
        self.apply(registry, endpoint, ConnectionEvent::Disconnected, &mut outcome);
        outcome
    }

    fn request_connection(
        &self,
        registry: &mut PeerRegistry,
        endpoint: &EndpointId,
        outcome: &mut Outcome,
    ) {
        if self.apply(registry, endpoint, ConnectionEvent::LocalInitiated, outcome) {
            outcome.effect(Effect::RequestConnection {
                local_name: self.local_name.clone(),
                endpoint: endpoint.clone(),
            });
        }
    }

    /// Run one transition; returns whether it was valid
    fn apply(
        &self,
        registry: &mut PeerRegistry,
        endpoint: &EndpointId,
        event: ConnectionEvent,
        outcome: &mut Outcome,
    ) -> bool {
        let Some(peer) = registry.get(endpoint) else {
            debug!(endpoint = %endpoint, %event, "Ignoring event for unknown endpoint");
            return false;
        };
        let from = peer.state;
        let display_name = peer.display_name.clone();

        match from.transition(event) {
            Ok(to) => {
                if to != from {
                    registry.set_state(endpoint, to);
                    debug!(endpoint = %endpoint, %from, %to, %event, "Peer state changed");
                    outcome.event(AppEvent::PeerStateChanged {
                        endpoint: endpoint.clone(),
                        display_name,
                        from: Some(from),
                        to,
                    });
                }
                true
            }
            Err(e) => {
                debug!(endpoint = %endpoint, error = %e, "Ignoring lifecycle event");
                false
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn ep(id: &str) -> EndpointId {
        EndpointId::from(id)
    }

    fn controller() -> ConnectionController {
        ConnectionController::new("local")
    }

    #[test]
    fn test_transition_table() {
        use ConnectionEvent as E;
        use PeerState as S;

        assert_eq!(S::Discovered.transition(E::LocalInitiated), Ok(S::Connecting));
        assert_eq!(S::Discovered.transition(E::RemoteInitiated), Ok(S::Connecting));
        assert_eq!(S::Connecting.transition(E::Succeeded), Ok(S::Connected));
        assert_eq!(S::Connecting.transition(E::Failed), Ok(S::Discovered));
        assert_eq!(S::Connected.transition(E::Disconnected), Ok(S::Disconnected));
        assert_eq!(S::Disconnected.transition(E::Found), Ok(S::Discovered));

        assert_eq!(
            S::Connected.transition(E::Succeeded),
            Err(StateTransitionError::InvalidTransition {
                from: S::Connected,
                event: E::Succeeded,
            })
        );
        assert!(S::Discovered.transition(E::Disconnected).is_err());
        assert!(S::Connected.transition(E::RemoteInitiated).is_err());
    }

    #[test]
    fn test_found_registers_and_requests_connection() {
        let mut registry = PeerRegistry::new();
        let outcome = controller().on_endpoint_found(&mut registry, ep("b"), "Pixel B");

        assert_eq!(registry.state_of(&ep("b")), Some(PeerState::Connecting));
        assert_eq!(
            outcome.effects,
            vec![Effect::RequestConnection {
                local_name: "local".to_string(),
                endpoint: ep("b"),
            }]
        );
        assert_eq!(outcome.app_events.len(), 2);
        assert!(matches!(
            &outcome.app_events[0],
            AppEvent::PeerStateChanged { from: None, to: PeerState::Discovered, .. }
        ));
        assert!(matches!(
            &outcome.app_events[1],
            AppEvent::PeerStateChanged {
                from: Some(PeerState::Discovered),
                to: PeerState::Connecting,
                ..
            }
        ));
    }

    #[test]
    fn test_found_again_only_refreshes_name() {
        let mut registry = PeerRegistry::new();
        let ctl = controller();
        ctl.on_endpoint_found(&mut registry, ep("b"), "old");

        let outcome = ctl.on_endpoint_found(&mut registry, ep("b"), "new");
        assert!(outcome.is_empty());
        assert_eq!(registry.get(&ep("b")).unwrap().display_name, "new");
        assert_eq!(registry.state_of(&ep("b")), Some(PeerState::Connecting));
    }

    #[test]
    fn test_full_lifecycle_and_rediscovery() {
        let mut registry = PeerRegistry::new();
        let ctl = controller();

        ctl.on_endpoint_found(&mut registry, ep("b"), "B");
        let accepted = ctl.on_connection_initiated(&mut registry, ep("b"), "B");
        assert_eq!(
            accepted.effects,
            vec![Effect::AcceptConnection { endpoint: ep("b") }]
        );
        assert!(accepted.app_events.is_empty());

        ctl.on_connection_result(&mut registry, &ep("b"), &ConnectionOutcome::Success);
        assert_eq!(registry.list_connected().as_slice(), &[ep("b")]);

        ctl.on_disconnected(&mut registry, &ep("b"));
        assert_eq!(registry.state_of(&ep("b")), Some(PeerState::Disconnected));
        assert!(registry.list_connected().is_empty());

        let outcome = ctl.on_endpoint_found(&mut registry, ep("b"), "B");
        assert_eq!(registry.state_of(&ep("b")), Some(PeerState::Connecting));
        assert!(matches!(
            outcome.effects.as_slice(),
            [Effect::RequestConnection { .. }]
        ));
    }

    #[test]
    fn test_failed_connection_returns_to_discovered() {
        let mut registry = PeerRegistry::new();
        let ctl = controller();
        ctl.on_endpoint_found(&mut registry, ep("b"), "B");

        let outcome = ctl.on_connection_result(
            &mut registry,
            &ep("b"),
            &ConnectionOutcome::Failure {
                reason: "rejected".into(),
            },
        );
        assert_eq!(registry.state_of(&ep("b")), Some(PeerState::Discovered));
        assert!(outcome.effects.is_empty());
    }

    #[test]
    fn test_unknown_initiator_is_registered_and_accepted() {
        let mut registry = PeerRegistry::new();
        let outcome = controller().on_connection_initiated(&mut registry, ep("z"), "Stranger");

        assert_eq!(registry.state_of(&ep("z")), Some(PeerState::Connecting));
        assert_eq!(registry.get(&ep("z")).unwrap().display_name, "Stranger");
        assert_eq!(
            outcome.effects,
            vec![Effect::AcceptConnection { endpoint: ep("z") }]
        );
    }

    #[test]
    fn test_events_for_unknown_or_removed_endpoints_are_noops() {
        let mut registry = PeerRegistry::new();
        let ctl = controller();

        assert!(ctl
            .on_connection_result(&mut registry, &ep("x"), &ConnectionOutcome::Success)
            .is_empty());
        assert!(ctl.on_disconnected(&mut registry, &ep("x")).is_empty());
        assert!(ctl.on_endpoint_lost(&mut registry, &ep("x")).is_empty());

        ctl.on_endpoint_found(&mut registry, ep("b"), "B");
        let lost = ctl.on_endpoint_lost(&mut registry, &ep("b"));
        assert_eq!(
            lost.app_events,
            vec![AppEvent::PeerRemoved { endpoint: ep("b") }]
        );
        assert!(ctl
            .on_connection_result(&mut registry, &ep("b"), &ConnectionOutcome::Success)
            .is_empty());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_connected_ignores_duplicate_initiation() {
        let mut registry = PeerRegistry::new();
        let ctl = controller();
        ctl.on_connection_initiated(&mut registry, ep("b"), "B");
        ctl.on_connection_result(&mut registry, &ep("b"), &ConnectionOutcome::Success);

        let outcome = ctl.on_connection_initiated(&mut registry, ep("b"), "B");
        assert!(outcome.is_empty());
        assert_eq!(registry.state_of(&ep("b")), Some(PeerState::Connected));
    }

    #[test]
    fn test_refused_request_during_inbound_negotiation_keeps_link() {
        let mut registry = PeerRegistry::new();
        let ctl = controller();
        ctl.on_endpoint_found(&mut registry, ep("b"), "B");
        ctl.on_connection_initiated(&mut registry, ep("b"), "B");

        let refused = ctl.on_request_failed(&mut registry, &ep("b"), "already connecting");
        assert!(refused.is_empty());
        assert_eq!(registry.state_of(&ep("b")), Some(PeerState::Connecting));

        ctl.on_connection_result(&mut registry, &ep("b"), &ConnectionOutcome::Success);
        assert_eq!(registry.state_of(&ep("b")), Some(PeerState::Connected));
        assert_eq!(registry.list_connected().as_slice(), &[ep("b")]);
    }

    #[test]
    fn test_refused_request_without_negotiation_returns_to_discovered() {
        let mut registry = PeerRegistry::new();
        let ctl = controller();
        ctl.on_endpoint_found(&mut registry, ep("b"), "B");

        ctl.on_request_failed(&mut registry, &ep("b"), "endpoint not reachable");
        assert_eq!(registry.state_of(&ep("b")), Some(PeerState::Discovered));
        assert!(!registry.get(&ep("b")).unwrap().inbound_negotiation);
    }
}
