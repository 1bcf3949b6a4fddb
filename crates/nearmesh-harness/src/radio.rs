//! Virtual radio medium
//!
//! Simulates a nearby-connections style radio for any number of devices in one
//! process. Devices see each other only while linked (in range), advertising
//! and discovering the same service id. Link negotiation follows the usual
//! two-sided flow: a request raises `ConnectionInitiated` on both devices and
//! the link comes up once both have accepted. Two devices requesting each other
//! at the same time are collapsed into one negotiation.
//!
//! Every device gets endpoint id `ep-<device>` on its peers.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use nearmesh_core::{
    ConnectionOutcome, EndpointId, EventSink, SetupOperation, Transport, TransportError,
    TransportEvent,
};
use tracing::{debug, trace};

use crate::topology::Topology;

const ENDPOINT_PREFIX: &str = "ep-";

/// Endpoint id under which `device` appears to its peers
pub fn endpoint_of(device: &str) -> EndpointId {
    EndpointId::new(format!("{ENDPOINT_PREFIX}{device}"))
}

fn device_of(endpoint: &EndpointId) -> Option<&str> {
    endpoint.as_str().strip_prefix(ENDPOINT_PREFIX)
}

type Pair = (String, String);

fn pair(a: &str, b: &str) -> Pair {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

// ----------------------------------------------------------------------------
// Medium State
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
struct Faults {
    advertising: Option<String>,
    discovery: Option<String>,
    sends: Option<String>,
    reject_connections: bool,
}

#[derive(Debug, Default)]
struct Station {
    sink: Option<EventSink>,
    /// Advertised name and service id
    advertising: Option<(String, String)>,
    discovering: Option<String>,
    faults: Faults,
}

/// Counters for everything the medium carried
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RadioStats {
    pub payloads_delivered: u64,
    pub payloads_failed: u64,
    pub connections_established: u64,
}

#[derive(Debug, Default)]
struct Medium {
    stations: HashMap<String, Station>,
    in_range: HashSet<Pair>,
    /// Pending negotiation → devices that accepted so far
    negotiations: HashMap<Pair, HashSet<String>>,
    connections: HashSet<Pair>,
    /// (observer, target) pairs already reported as found
    visible: HashSet<(String, String)>,
    stats: RadioStats,
}

impl Medium {
    fn emit(&self, device: &str, event: TransportEvent) {
        match self.stations.get(device).and_then(|s| s.sink.as_ref()) {
            Some(sink) => {
                if sink.emit(event).is_err() {
                    trace!(device, "Dropping event for stopped device");
                }
            }
            None => trace!(device, "Dropping event for unbound device"),
        }
    }

    fn station_mut(&mut self, device: &str) -> &mut Station {
        self.stations.entry(device.to_string()).or_default()
    }

    fn faults(&self, device: &str) -> Faults {
        self.stations
            .get(device)
            .map(|s| s.faults.clone())
            .unwrap_or_default()
    }

    fn others(&self, device: &str) -> Vec<String> {
        self.stations
            .keys()
            .filter(|name| name.as_str() != device)
            .cloned()
            .collect()
    }

    fn advertised_name(&self, device: &str) -> String {
        self.stations
            .get(device)
            .and_then(|s| s.advertising.as_ref())
            .map(|(name, _)| name.clone())
            .unwrap_or_else(|| device.to_string())
    }

    fn is_advertising(&self, device: &str) -> bool {
        self.stations
            .get(device)
            .is_some_and(|s| s.advertising.is_some())
    }

    /// Report `target` to `observer` if it just became discoverable
    fn refresh_visibility(&mut self, observer: &str, target: &str) {
        if observer == target || !self.in_range.contains(&pair(observer, target)) {
            return;
        }
        let Some(service) = self
            .stations
            .get(observer)
            .and_then(|s| s.discovering.clone())
        else {
            return;
        };
        let name = match self.stations.get(target).and_then(|s| s.advertising.as_ref()) {
            Some((name, advertised)) if *advertised == service => name.clone(),
            _ => return,
        };

        if self
            .visible
            .insert((observer.to_string(), target.to_string()))
        {
            self.emit(
                observer,
                TransportEvent::EndpointFound {
                    endpoint: endpoint_of(target),
                    name,
                },
            );
        }
    }

    fn hide(&mut self, observer: &str, target: &str) {
        if self
            .visible
            .remove(&(observer.to_string(), target.to_string()))
        {
            self.emit(
                observer,
                TransportEvent::EndpointLost {
                    endpoint: endpoint_of(target),
                },
            );
        }
    }

    /// Tear down a link or pending negotiation between `a` and `b`
    fn drop_link(&mut self, a: &str, b: &str, notify_a: bool, notify_b: bool) {
        let key = pair(a, b);
        let notify = [(a, b, notify_a), (b, a, notify_b)];

        if self.connections.remove(&key) {
            for (device, peer, enabled) in notify {
                if enabled {
                    self.emit(
                        device,
                        TransportEvent::Disconnected {
                            endpoint: endpoint_of(peer),
                        },
                    );
                }
            }
        }
        if self.negotiations.remove(&key).is_some() {
            for (device, peer, enabled) in notify {
                if enabled {
                    self.emit(
                        device,
                        TransportEvent::ConnectionResult {
                            endpoint: endpoint_of(peer),
                            outcome: ConnectionOutcome::Failure {
                                reason: "link dropped".to_string(),
                            },
                        },
                    );
                }
            }
        }
    }
}

fn lock(medium: &Mutex<Medium>) -> MutexGuard<'_, Medium> {
    medium.lock().unwrap_or_else(PoisonError::into_inner)
}

// ----------------------------------------------------------------------------
// Virtual Radio
// ----------------------------------------------------------------------------

/// Shared medium; cloning yields another handle to the same medium
#[derive(Debug, Clone, Default)]
pub struct VirtualRadio {
    medium: Arc<Mutex<Medium>>,
}

impl VirtualRadio {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a device and return its transport
    pub fn add_device(&self, device: impl Into<String>) -> Arc<VirtualTransport> {
        let device = device.into();
        lock(&self.medium).station_mut(&device);
        Arc::new(VirtualTransport {
            device,
            medium: Arc::clone(&self.medium),
        })
    }

    /// Put two devices in range of each other
    pub fn link(&self, a: &str, b: &str) {
        let mut medium = lock(&self.medium);
        medium.in_range.insert(pair(a, b));
        medium.refresh_visibility(a, b);
        medium.refresh_visibility(b, a);
    }

    /// Move two devices out of range: the link drops and each loses the other
    pub fn unlink(&self, a: &str, b: &str) {
        let mut medium = lock(&self.medium);
        medium.in_range.remove(&pair(a, b));
        medium.drop_link(a, b, true, true);
        medium.hide(a, b);
        medium.hide(b, a);
    }

    /// Link devices along `topology`
    pub fn apply_topology(&self, devices: &[String], topology: Topology) {
        for (a, b) in topology.edges(devices.len()) {
            self.link(&devices[a], &devices[b]);
        }
    }

    /// Drop an established link while both devices stay in range
    pub fn disconnect(&self, a: &str, b: &str) {
        lock(&self.medium).drop_link(a, b, true, true);
    }

    /// Report `target` to `observer` again, as a radio does after a link drops
    pub fn rediscover(&self, observer: &str, target: &str) {
        let mut medium = lock(&self.medium);
        medium
            .visible
            .remove(&(observer.to_string(), target.to_string()));
        medium.refresh_visibility(observer, target);
    }

    /// Make `start_advertising` fail on `device` (`None` clears the fault)
    pub fn fail_advertising(&self, device: &str, reason: Option<&str>) {
        lock(&self.medium).station_mut(device).faults.advertising = reason.map(str::to_string);
    }

    /// Make `start_discovery` fail on `device` (`None` clears the fault)
    pub fn fail_discovery(&self, device: &str, reason: Option<&str>) {
        lock(&self.medium).station_mut(device).faults.discovery = reason.map(str::to_string);
    }

    /// Make every `send` from `device` fail (`None` clears the fault)
    pub fn fail_sends(&self, device: &str, reason: Option<&str>) {
        lock(&self.medium).station_mut(device).faults.sends = reason.map(str::to_string);
    }

    pub fn reject_connections(&self, device: &str, reject: bool) {
        lock(&self.medium).station_mut(device).faults.reject_connections = reject;
    }

    /// Deliver raw bytes to `to` as if `from` had sent them
    pub fn inject_payload(&self, to: &str, from: &str, payload: Vec<u8>) {
        lock(&self.medium).emit(
            to,
            TransportEvent::PayloadReceived {
                endpoint: endpoint_of(from),
                payload,
            },
        );
    }

    pub fn is_connected(&self, a: &str, b: &str) -> bool {
        lock(&self.medium).connections.contains(&pair(a, b))
    }

    pub fn connection_count(&self) -> usize {
        lock(&self.medium).connections.len()
    }

    pub fn stats(&self) -> RadioStats {
        lock(&self.medium).stats
    }
}

// ----------------------------------------------------------------------------
// Virtual Transport
// ----------------------------------------------------------------------------

/// One device's view of the virtual radio
#[derive(Debug)]
pub struct VirtualTransport {
    device: String,
    medium: Arc<Mutex<Medium>>,
}

impl VirtualTransport {
    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn endpoint(&self) -> EndpointId {
        endpoint_of(&self.device)
    }

    fn target<'a>(medium: &Medium, endpoint: &'a EndpointId) -> Result<&'a str, TransportError> {
        device_of(endpoint)
            .filter(|device| medium.stations.contains_key(*device))
            .ok_or_else(|| TransportError::EndpointNotFound {
                endpoint: endpoint.to_string(),
            })
    }
}

#[async_trait]
impl Transport for VirtualTransport {
    fn bind_event_sink(&self, sink: EventSink) {
        lock(&self.medium).station_mut(&self.device).sink = Some(sink);
    }

    async fn start_advertising(
        &self,
        local_name: &str,
        service_id: &str,
    ) -> Result<(), TransportError> {
        let mut medium = lock(&self.medium);
        if let Some(reason) = medium.faults(&self.device).advertising {
            return Err(TransportError::SetupFailed {
                operation: SetupOperation::Advertising,
                reason,
            });
        }

        medium.station_mut(&self.device).advertising =
            Some((local_name.to_string(), service_id.to_string()));
        for other in medium.others(&self.device) {
            medium.refresh_visibility(&other, &self.device);
        }
        Ok(())
    }

    async fn start_discovery(&self, service_id: &str) -> Result<(), TransportError> {
        let mut medium = lock(&self.medium);
        if let Some(reason) = medium.faults(&self.device).discovery {
            return Err(TransportError::SetupFailed {
                operation: SetupOperation::Discovery,
                reason,
            });
        }

        medium.station_mut(&self.device).discovering = Some(service_id.to_string());
        for other in medium.others(&self.device) {
            medium.refresh_visibility(&self.device, &other);
        }
        Ok(())
    }

    async fn request_connection(
        &self,
        local_name: &str,
        endpoint: &EndpointId,
    ) -> Result<(), TransportError> {
        let mut medium = lock(&self.medium);
        let target = Self::target(&medium, endpoint)?.to_string();
        let key = pair(&self.device, &target);

        if !medium.in_range.contains(&key) || !medium.is_advertising(&target) {
            return Err(TransportError::ConnectionFailed {
                endpoint: endpoint.to_string(),
                reason: "endpoint not reachable".to_string(),
            });
        }
        if medium.connections.contains(&key) || medium.negotiations.contains_key(&key) {
            debug!(device = %self.device, %endpoint, "Collapsing duplicate connection request");
            return Ok(());
        }
        if medium.faults(&target).reject_connections {
            medium.emit(
                &self.device,
                TransportEvent::ConnectionResult {
                    endpoint: endpoint.clone(),
                    outcome: ConnectionOutcome::Failure {
                        reason: "rejected".to_string(),
                    },
                },
            );
            return Ok(());
        }

        medium.negotiations.insert(key, HashSet::new());
        let target_name = medium.advertised_name(&target);
        medium.emit(
            &self.device,
            TransportEvent::ConnectionInitiated {
                endpoint: endpoint.clone(),
                name: target_name,
            },
        );
        medium.emit(
            &target,
            TransportEvent::ConnectionInitiated {
                endpoint: self.endpoint(),
                name: local_name.to_string(),
            },
        );
        Ok(())
    }

    async fn accept_connection(&self, endpoint: &EndpointId) -> Result<(), TransportError> {
        let mut medium = lock(&self.medium);
        let target = Self::target(&medium, endpoint)?.to_string();
        let key = pair(&self.device, &target);

        let Some(accepted) = medium.negotiations.get_mut(&key) else {
            return Err(TransportError::ConnectionFailed {
                endpoint: endpoint.to_string(),
                reason: "no pending connection".to_string(),
            });
        };
        accepted.insert(self.device.clone());
        if accepted.len() < 2 {
            return Ok(());
        }

        medium.negotiations.remove(&key);
        medium.connections.insert(key);
        medium.stats.connections_established += 1;
        medium.emit(
            &self.device,
            TransportEvent::ConnectionResult {
                endpoint: endpoint.clone(),
                outcome: ConnectionOutcome::Success,
            },
        );
        medium.emit(
            &target,
            TransportEvent::ConnectionResult {
                endpoint: self.endpoint(),
                outcome: ConnectionOutcome::Success,
            },
        );
        Ok(())
    }

    async fn send(&self, endpoint: &EndpointId, payload: &[u8]) -> Result<(), TransportError> {
        let mut medium = lock(&self.medium);
        if let Some(reason) = medium.faults(&self.device).sends {
            medium.stats.payloads_failed += 1;
            return Err(TransportError::SendFailed {
                endpoint: endpoint.to_string(),
                reason,
            });
        }

        let target = match Self::target(&medium, endpoint) {
            Ok(target) => target.to_string(),
            Err(e) => {
                medium.stats.payloads_failed += 1;
                return Err(e);
            }
        };
        if !medium.connections.contains(&pair(&self.device, &target)) {
            medium.stats.payloads_failed += 1;
            return Err(TransportError::SendFailed {
                endpoint: endpoint.to_string(),
                reason: "not connected".to_string(),
            });
        }

        medium.stats.payloads_delivered += 1;
        medium.emit(
            &target,
            TransportEvent::PayloadReceived {
                endpoint: self.endpoint(),
                payload: payload.to_vec(),
            },
        );
        Ok(())
    }

    async fn stop_all(&self) -> Result<(), TransportError> {
        let mut medium = lock(&self.medium);
        for other in medium.others(&self.device) {
            medium.drop_link(&self.device, &other, false, true);
            medium.hide(&other, &self.device);
            medium
                .visible
                .remove(&(self.device.clone(), other.clone()));
        }

        let station = medium.station_mut(&self.device);
        station.advertising = None;
        station.discovering = None;
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
