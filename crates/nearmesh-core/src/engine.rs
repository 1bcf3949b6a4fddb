//! Mesh engine
//!
//! Synchronous owner of all relay state: peer registry, connection controller,
//! duplicate detector, flood router and message log. Each handler consumes one
//! command or transport event and returns the resulting effects and app events;
//! nothing here performs I/O. Running every input through one `&mut self` is what
//! makes registry updates, dedup observations and log appends atomic with
//! respect to each other.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::channel::{
    AppEvent, Command, Effect, MeshStatus, NoticeLevel, Outcome, SetupOperation, TransportEvent,
};
use crate::config::MeshConfig;
use crate::errors::MeshResult;
use crate::protocol::{
    Author, ConnectionController, DedupStats, DuplicateDetector, FloodRouter, LogEntry,
    MessageLog, PeerRegistry, PeerSnapshot, RelayOutcome,
};
use crate::types::{DeviceId, EndpointId, SystemTimeSource, TimeSource, Timestamp};

// ----------------------------------------------------------------------------
// Statistics
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStats {
    pub messages_originated: u64,
    /// Remote messages appended to the log
    pub messages_delivered: u64,
    /// Individual payload sends issued while relaying
    pub messages_forwarded: u64,
    /// Received payloads dropped as malformed, duplicate or self-echo
    pub payloads_dropped: u64,
}

// ----------------------------------------------------------------------------
// Mesh Engine
// ----------------------------------------------------------------------------

pub struct MeshEngine {
    device: DeviceId,
    service_id: String,
    default_info_level: String,
    registry: PeerRegistry,
    controller: ConnectionController,
    dedup: DuplicateDetector,
    router: FloodRouter,
    log: MessageLog,
    status: MeshStatus,
    stats: EngineStats,
    time_source: Arc<dyn TimeSource>,
    last_origination: Option<Timestamp>,
}

impl MeshEngine {
    pub fn new(config: &MeshConfig, time_source: Arc<dyn TimeSource>) -> MeshResult<Self> {
        config.validate()?;
        let device = DeviceId::new(config.device_name.clone());

        Ok(Self {
            device: device.clone(),
            service_id: config.service_id.clone(),
            default_info_level: config.default_info_level.clone(),
            registry: PeerRegistry::new(),
            controller: ConnectionController::new(config.device_name.clone()),
            dedup: DuplicateDetector::new(device.clone(), config.dedup.retention),
            router: FloodRouter::new(device),
            log: MessageLog::new(),
            status: MeshStatus::default(),
            stats: EngineStats::default(),
            time_source,
            last_origination: None,
        })
    }

    pub fn with_system_time(config: &MeshConfig) -> MeshResult<Self> {
        Self::new(config, Arc::new(SystemTimeSource))
    }

    // ---- Dispatch ----

    pub fn handle_command(&mut self, command: Command) -> Outcome {
        match command {
            Command::Start => self.start(),
            Command::SendLocalMessage { body, info_level } => {
                self.send_local_message(&body, info_level.as_deref())
            }
            Command::Maintain => self.maintain(),
            Command::Shutdown => Outcome::new(),
        }
    }

    pub fn handle_transport_event(&mut self, event: TransportEvent) -> Outcome {
        match event {
            TransportEvent::EndpointFound { endpoint, name } => {
                self.controller
                    .on_endpoint_found(&mut self.registry, endpoint, &name)
            }
            TransportEvent::EndpointLost { endpoint } => {
                self.controller.on_endpoint_lost(&mut self.registry, &endpoint)
            }
            TransportEvent::ConnectionInitiated { endpoint, name } => {
                self.controller
                    .on_connection_initiated(&mut self.registry, endpoint, &name)
            }
            TransportEvent::ConnectionResult { endpoint, outcome } => {
                self.controller
                    .on_connection_result(&mut self.registry, &endpoint, &outcome)
            }
            TransportEvent::ConnectionRequestFailed { endpoint, reason } => {
                self.controller
                    .on_request_failed(&mut self.registry, &endpoint, &reason)
            }
            TransportEvent::Disconnected { endpoint } => {
                self.controller.on_disconnected(&mut self.registry, &endpoint)
            }
            TransportEvent::PayloadReceived { endpoint, payload } => {
                self.on_payload(endpoint, payload)
            }
            TransportEvent::SetupCompleted { operation } => self.on_setup(operation, None),
            TransportEvent::SetupFailed { operation, reason } => {
                self.on_setup(operation, Some(reason))
            }
        }
    }

    // ---- Commands ----

    /// Reset the transport and (re)start advertising and discovery
    ///
    /// Resetting drops every link, so previously registered peers are cleared.
    pub fn start(&mut self) -> Outcome {
        let mut outcome = Outcome::new();

        for endpoint in self.registry.clear() {
            outcome.event(AppEvent::PeerRemoved { endpoint });
        }
        if self.status != MeshStatus::default() {
            self.status = MeshStatus::default();
            outcome.event(AppEvent::MeshStatusChanged {
                status: self.status,
            });
        }

        info!(device = %self.device, service_id = %self.service_id, "Starting mesh");
        outcome.effect(Effect::ResetTransport);
        outcome.effect(Effect::StartAdvertising {
            local_name: self.device.to_string(),
            service_id: self.service_id.clone(),
        });
        outcome.effect(Effect::StartDiscovery {
            service_id: self.service_id.clone(),
        });
        outcome
    }

    /// Author a message, log it as our own and send it to every connected peer
    pub fn send_local_message(&mut self, body: &str, info_level: Option<&str>) -> Outcome {
        let mut outcome = Outcome::new();
        let info_level = match info_level {
            Some(level) => level.to_string(),
            None => self.default_info_level.clone(),
        };
        let timestamp = self.next_origination_timestamp();

        let origination = match self.router.originate(
            &mut self.dedup,
            &self.registry,
            timestamp,
            &info_level,
            body,
        ) {
            Ok(origination) => origination,
            Err(e) => {
                warn!(error = %e, "Failed to encode local message");
                outcome.event(AppEvent::Notice {
                    level: NoticeLevel::Warning,
                    text: format!("Message could not be sent: {e}"),
                });
                return outcome;
            }
        };

        self.stats.messages_originated += 1;
        let entry = self
            .log
            .append(Author::Local, origination.message, None)
            .clone();
        info!(message_id = %entry.id(), peers = origination.fan_out.len(), "Sent local message");
        outcome.event(AppEvent::MessageDelivered { entry });

        for endpoint in origination.fan_out {
            outcome.effect(Effect::SendPayload {
                endpoint,
                payload: origination.payload.clone(),
            });
        }
        outcome
    }

    /// Evict expired duplicate-detector entries
    pub fn maintain(&mut self) -> Outcome {
        let evicted = self.dedup.maintain(self.time_source.now());
        if evicted > 0 {
            debug!(evicted, tracked = self.dedup.len(), "Evicted expired message ids");
        }
        Outcome::new()
    }

    // ---- Transport Events ----

    fn on_payload(&mut self, from: EndpointId, payload: Vec<u8>) -> Outcome {
        let mut outcome = Outcome::new();
        let now = self.time_source.now();

        match self.router.on_message_received(
            &mut self.dedup,
            &self.registry,
            &from,
            &payload,
            now,
        ) {
            RelayOutcome::Delivered {
                message,
                forward_to,
            } => {
                let author = Author::Remote(message.origin_device.clone());
                let entry = self
                    .log
                    .append(author, message, Some(from.clone()))
                    .clone();
                self.stats.messages_delivered += 1;
                self.stats.messages_forwarded += forward_to.len() as u64;
                info!(
                    message_id = %entry.id(),
                    endpoint = %from,
                    forwarded = forward_to.len(),
                    "Delivered message"
                );
                outcome.event(AppEvent::MessageDelivered { entry });

                for endpoint in forward_to {
                    outcome.effect(Effect::SendPayload {
                        endpoint,
                        payload: payload.clone(),
                    });
                }
            }
            RelayOutcome::Dropped(reason) => {
                self.stats.payloads_dropped += 1;
                debug!(endpoint = %from, %reason, "Dropped payload");
            }
        }
        outcome
    }

    fn on_setup(&mut self, operation: SetupOperation, failure: Option<String>) -> Outcome {
        let mut outcome = Outcome::new();
        let previous = self.status;
        self.status.set(operation, failure.is_none());
        if self.status != previous {
            outcome.event(AppEvent::MeshStatusChanged {
                status: self.status,
            });
            if self.status.is_active() {
                outcome.event(AppEvent::Notice {
                    level: NoticeLevel::Info,
                    text: "Advertising and discovering nearby devices".into(),
                });
            }
        }

        match failure {
            None => info!(%operation, "Transport setup step running"),
            Some(reason) => {
                warn!(%operation, %reason, "Transport setup failed");
                outcome.event(AppEvent::Notice {
                    level: NoticeLevel::Warning,
                    text: format!("{operation} failed: {reason}"),
                });
            }
        }
        outcome
    }

    /// Current time, bumped past the previous local message so ids never collide
    fn next_origination_timestamp(&mut self) -> Timestamp {
        let now = self.time_source.now();
        let timestamp = match self.last_origination {
            Some(last) if now <= last => last + 1,
            _ => now,
        };
        self.last_origination = Some(timestamp);
        timestamp
    }

    // ---- Accessors ----

    pub fn local_device(&self) -> &DeviceId {
        &self.device
    }

    pub fn registry(&self) -> &PeerRegistry {
        &self.registry
    }

    pub fn peer_snapshot(&self) -> Vec<PeerSnapshot> {
        self.registry.snapshot()
    }

    pub fn log(&self) -> &MessageLog {
        &self.log
    }

    pub fn log_entries(&self) -> &[LogEntry] {
        self.log.entries()
    }

    pub fn status(&self) -> MeshStatus {
        self.status
    }

    pub fn stats(&self) -> EngineStats {
        self.stats
    }

    pub fn dedup_stats(&self) -> DedupStats {
        self.dedup.stats()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ConnectionOutcome;
    use crate::config::RetentionPolicy;
    use crate::protocol::{Message, MessageId, PeerState};
    use crate::types::ManualTimeSource;

    fn ep(id: &str) -> EndpointId {
        EndpointId::from(id)
    }

    fn engine(name: &str, clock: &ManualTimeSource) -> MeshEngine {
        MeshEngine::new(&MeshConfig::for_device(name), Arc::new(clock.clone())).unwrap()
    }

    fn connect(engine: &mut MeshEngine, id: &str) {
        engine.handle_transport_event(TransportEvent::EndpointFound {
            endpoint: ep(id),
            name: id.to_uppercase(),
        });
        engine.handle_transport_event(TransportEvent::ConnectionInitiated {
            endpoint: ep(id),
            name: id.to_uppercase(),
        });
        engine.handle_transport_event(TransportEvent::ConnectionResult {
            endpoint: ep(id),
            outcome: ConnectionOutcome::Success,
        });
    }

    fn sends(outcome: &Outcome) -> Vec<EndpointId> {
        outcome
            .effects
            .iter()
            .filter_map(|effect| match effect {
                Effect::SendPayload { endpoint, .. } => Some(endpoint.clone()),
                _ => None,
            })
            .collect()
    }

    fn payload(origin: &str, timestamp: u64, body: &str) -> Vec<u8> {
        Message::new(DeviceId::from(origin), Timestamp::new(timestamp), "normal", body)
            .encode()
            .unwrap()
    }

    #[test]
    fn test_start_resets_then_advertises_and_discovers() {
        let clock = ManualTimeSource::starting_at(0);
        let mut engine = engine("A", &clock);

        let outcome = engine.handle_command(Command::Start);
        assert_eq!(
            outcome.effects,
            vec![
                Effect::ResetTransport,
                Effect::StartAdvertising {
                    local_name: "A".into(),
                    service_id: "nearmesh.relay.v1".into(),
                },
                Effect::StartDiscovery {
                    service_id: "nearmesh.relay.v1".into(),
                },
            ]
        );
    }

    #[test]
    fn test_restart_clears_registry_and_status() {
        let clock = ManualTimeSource::starting_at(0);
        let mut engine = engine("A", &clock);
        connect(&mut engine, "b");
        engine.handle_transport_event(TransportEvent::SetupCompleted {
            operation: SetupOperation::Advertising,
        });

        let outcome = engine.start();
        assert!(engine.registry().is_empty());
        assert_eq!(engine.status(), MeshStatus::default());
        assert!(outcome
            .app_events
            .contains(&AppEvent::PeerRemoved { endpoint: ep("b") }));
    }

    #[test]
    fn test_local_message_logged_as_self_and_sent_to_connected() {
        let clock = ManualTimeSource::starting_at(1000);
        let mut engine = engine("A", &clock);
        connect(&mut engine, "b");
        connect(&mut engine, "c");
        engine.handle_transport_event(TransportEvent::EndpointFound {
            endpoint: ep("d"),
            name: "D".into(),
        });

        let outcome = engine.handle_command(Command::SendLocalMessage {
            body: "hi".into(),
            info_level: None,
        });

        assert_eq!(sends(&outcome), vec![ep("b"), ep("c")]);
        let entry = &engine.log_entries()[0];
        assert_eq!(entry.author, Author::Local);
        assert_eq!(entry.message.info_level, "normal");
        assert_eq!(entry.id(), MessageId::new("A", 1000));
        assert_eq!(engine.stats().messages_originated, 1);
    }

    #[test]
    fn test_local_messages_in_same_millisecond_get_distinct_ids() {
        let clock = ManualTimeSource::starting_at(500);
        let mut engine = engine("A", &clock);

        engine.send_local_message("one", None);
        engine.send_local_message("two", Some("urgent"));

        let ids: Vec<_> = engine.log_entries().iter().map(LogEntry::id).collect();
        assert_eq!(ids, vec![MessageId::new("A", 500), MessageId::new("A", 501)]);
        assert_eq!(engine.log_entries()[1].message.info_level, "urgent");
    }

    #[test]
    fn test_relay_excludes_sender_and_forwards_identical_bytes() {
        let clock = ManualTimeSource::starting_at(0);
        let mut engine = engine("B", &clock);
        connect(&mut engine, "a");
        connect(&mut engine, "c");

        let raw = payload("A", 1000, "hi");
        let outcome = engine.handle_transport_event(TransportEvent::PayloadReceived {
            endpoint: ep("a"),
            payload: raw.clone(),
        });

        assert_eq!(
            outcome.effects,
            vec![Effect::SendPayload {
                endpoint: ep("c"),
                payload: raw.clone(),
            }]
        );
        let entry = &engine.log_entries()[0];
        assert_eq!(entry.author, Author::Remote(DeviceId::from("A")));
        assert_eq!(entry.received_from, Some(ep("a")));

        // same message from the other side
        let again = engine.handle_transport_event(TransportEvent::PayloadReceived {
            endpoint: ep("c"),
            payload: raw,
        });
        assert!(again.is_empty());
        assert_eq!(engine.log().len(), 1);
        assert_eq!(engine.stats().payloads_dropped, 1);
        assert_eq!(engine.stats().messages_forwarded, 1);
    }

    #[test]
    fn test_echo_of_own_message_is_dropped() {
        let clock = ManualTimeSource::starting_at(1000);
        let mut engine = engine("A", &clock);
        connect(&mut engine, "b");

        engine.send_local_message("hi", None);
        let outcome = engine.handle_transport_event(TransportEvent::PayloadReceived {
            endpoint: ep("b"),
            payload: payload("A", 1000, "hi"),
        });

        assert!(outcome.is_empty());
        assert_eq!(engine.log().len(), 1);
    }

    #[test]
    fn test_malformed_payload_leaves_no_trace() {
        let clock = ManualTimeSource::starting_at(0);
        let mut engine = engine("A", &clock);
        connect(&mut engine, "b");

        let outcome = engine.handle_transport_event(TransportEvent::PayloadReceived {
            endpoint: ep("b"),
            payload: b"{not json".to_vec(),
        });
        assert!(outcome.is_empty());
        assert!(engine.log().is_empty());
        assert_eq!(engine.stats().payloads_dropped, 1);
    }

    #[test]
    fn test_setup_failure_raises_notice() {
        let clock = ManualTimeSource::starting_at(0);
        let mut engine = engine("A", &clock);
        engine.handle_transport_event(TransportEvent::SetupCompleted {
            operation: SetupOperation::Advertising,
        });

        let outcome = engine.handle_transport_event(TransportEvent::SetupFailed {
            operation: SetupOperation::Discovery,
            reason: "radio off".into(),
        });

        assert!(engine.status().advertising);
        assert!(!engine.status().discovering);
        assert!(outcome.app_events.contains(&AppEvent::Notice {
            level: NoticeLevel::Warning,
            text: "discovery failed: radio off".into(),
        }));
    }

    #[test]
    fn test_setup_status_reported_only_on_change() {
        let clock = ManualTimeSource::starting_at(0);
        let mut engine = engine("A", &clock);
        let advertising = TransportEvent::SetupCompleted {
            operation: SetupOperation::Advertising,
        };

        let first = engine.handle_transport_event(advertising.clone());
        assert_eq!(first.app_events.len(), 1);
        assert!(engine.handle_transport_event(advertising).is_empty());

        let active = engine.handle_transport_event(TransportEvent::SetupCompleted {
            operation: SetupOperation::Discovery,
        });
        assert!(engine.status().is_active());
        assert!(matches!(
            active.app_events.as_slice(),
            [
                AppEvent::MeshStatusChanged { .. },
                AppEvent::Notice {
                    level: NoticeLevel::Info,
                    ..
                }
            ]
        ));
    }

    #[test]
    fn test_blank_info_level_kept_verbatim() {
        let clock = ManualTimeSource::starting_at(0);
        let mut engine = engine("A", &clock);

        engine.send_local_message("one", Some("  "));
        engine.send_local_message("two", Some(""));
        engine.send_local_message("three", None);

        let levels: Vec<_> = engine
            .log_entries()
            .iter()
            .map(|entry| entry.message.info_level.as_str())
            .collect();
        assert_eq!(levels, vec!["  ", "", "normal"]);
    }

    #[test]
    fn test_refused_request_while_peer_initiates_still_joins_fan_out() {
        let clock = ManualTimeSource::starting_at(0);
        let mut engine = engine("A", &clock);
        engine.handle_transport_event(TransportEvent::EndpointFound {
            endpoint: ep("b"),
            name: "B".into(),
        });
        engine.handle_transport_event(TransportEvent::ConnectionInitiated {
            endpoint: ep("b"),
            name: "B".into(),
        });
        engine.handle_transport_event(TransportEvent::ConnectionRequestFailed {
            endpoint: ep("b"),
            reason: "duplicate request".into(),
        });
        engine.handle_transport_event(TransportEvent::ConnectionResult {
            endpoint: ep("b"),
            outcome: ConnectionOutcome::Success,
        });

        assert_eq!(engine.registry().state_of(&ep("b")), Some(PeerState::Connected));
        let outcome = engine.send_local_message("hi", None);
        assert_eq!(sends(&outcome), vec![ep("b")]);
    }

    #[test]
    fn test_lost_peer_leaves_fan_out() {
        let clock = ManualTimeSource::starting_at(0);
        let mut engine = engine("A", &clock);
        connect(&mut engine, "b");
        connect(&mut engine, "c");

        engine.handle_transport_event(TransportEvent::EndpointLost { endpoint: ep("b") });
        let outcome = engine.send_local_message("hi", None);

        assert_eq!(sends(&outcome), vec![ep("c")]);
        assert_eq!(engine.registry().state_of(&ep("b")), None);
        assert_eq!(
            engine.peer_snapshot().iter().map(|p| p.state).collect::<Vec<_>>(),
            vec![PeerState::Connected]
        );
    }

    #[test]
    fn test_maintain_applies_retention_window() {
        let clock = ManualTimeSource::starting_at(0);
        let config = MeshConfig::for_device("B")
            .with_retention(RetentionPolicy::Window { horizon_ms: 1_000 });
        let mut engine = MeshEngine::new(&config, Arc::new(clock.clone())).unwrap();
        let raw = payload("A", 1, "hi");

        engine.handle_transport_event(TransportEvent::PayloadReceived {
            endpoint: ep("a"),
            payload: raw.clone(),
        });
        clock.advance(1_000);
        engine.handle_command(Command::Maintain);
        assert_eq!(engine.dedup_stats().evicted, 1);

        engine.handle_transport_event(TransportEvent::PayloadReceived {
            endpoint: ep("a"),
            payload: raw,
        });
        assert_eq!(engine.log().len(), 2);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let clock = ManualTimeSource::starting_at(0);
        assert!(MeshEngine::new(&MeshConfig::for_device(""), Arc::new(clock)).is_err());
    }
}
