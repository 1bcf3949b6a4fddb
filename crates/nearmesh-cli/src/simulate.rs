//! Mesh simulation over the in-memory radio
//!
//! Builds one runtime per device, links them along a topology, floods the
//! requested messages from one device and reports what every device saw.

use std::fmt;
use std::time::Duration;

use nearmesh_core::{LogEntry, MeshConfig, PeerSnapshot};
use nearmesh_harness::{Topology, VirtualRadio};
use nearmesh_runtime::{MeshHandle, RuntimeBuilder, RuntimeStats};
use tokio::time::{timeout, Instant};
use tracing::{info, warn};

use crate::error::{CliError, Result};

#[derive(Debug, Clone)]
pub struct SimulationOptions {
    pub devices: usize,
    pub topology: Topology,
    pub messages: Vec<String>,
    pub from: usize,
    pub info_level: Option<String>,
    pub settle: Duration,
}

impl SimulationOptions {
    fn validate(&self) -> Result<()> {
        if self.devices == 0 {
            return Err(CliError::InvalidArgument(
                "at least one device is required".into(),
            ));
        }
        if self.from >= self.devices {
            return Err(CliError::InvalidArgument(format!(
                "--from {} is out of range for {} devices",
                self.from, self.devices
            )));
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Report
// ----------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct DeviceReport {
    pub name: String,
    pub peers: Vec<PeerSnapshot>,
    pub log: Vec<LogEntry>,
    pub stats: RuntimeStats,
}

#[derive(Debug, Clone)]
pub struct SimulationReport {
    pub topology: Topology,
    pub devices: Vec<DeviceReport>,
}

impl SimulationReport {
    /// Devices whose log holds every sent message
    pub fn fully_delivered(&self, expected: usize) -> usize {
        self.devices
            .iter()
            .filter(|device| device.log.len() == expected)
            .count()
    }
}

impl fmt::Display for SimulationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} devices, {} topology",
            self.devices.len(),
            self.topology
        )?;
        for device in &self.devices {
            writeln!(f)?;
            writeln!(f, "== {} ==", device.name)?;
            writeln!(f, "peers:")?;
            if device.peers.is_empty() {
                writeln!(f, "  (none)")?;
            }
            for peer in &device.peers {
                writeln!(f, "  {} ({}) {}", peer.display_name, peer.id, peer.state)?;
            }
            writeln!(f, "messages:")?;
            if device.log.is_empty() {
                writeln!(f, "  (none)")?;
            }
            for entry in &device.log {
                writeln!(f, "  {entry}")?;
            }
            let engine = device.stats.engine;
            writeln!(
                f,
                "stats: delivered={} forwarded={} dropped={} duplicates={}",
                engine.messages_delivered,
                engine.messages_forwarded,
                engine.payloads_dropped,
                device.stats.dedup.duplicates
            )?;
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Simulation
// ----------------------------------------------------------------------------

pub async fn run_simulation(
    base: &MeshConfig,
    options: &SimulationOptions,
) -> Result<SimulationReport> {
    options.validate()?;
    let radio = VirtualRadio::new();
    let names: Vec<String> = (0..options.devices)
        .map(|i| format!("{}-{i}", base.device_name))
        .collect();

    let mut meshes = Vec::with_capacity(names.len());
    for name in &names {
        let config = MeshConfig {
            device_name: name.clone(),
            ..base.clone()
        };
        let mesh = RuntimeBuilder::new(config)
            .with_transport(radio.add_device(name.as_str()))
            .build_and_start()
            .await?;
        meshes.push(mesh);
    }

    radio.apply_topology(&names, options.topology);
    for mesh in &meshes {
        mesh.start().await?;
    }

    let deadline = Instant::now() + options.settle;
    let mut degree = vec![0usize; names.len()];
    for (a, b) in options.topology.edges(names.len()) {
        degree[a] += 1;
        degree[b] += 1;
    }
    for (mesh, expected) in meshes.iter().zip(&degree) {
        let mut peers = mesh.peer_updates();
        let linked = peers.wait_for(|peers| {
            peers.iter().filter(|peer| peer.connected).count() >= *expected
        });
        if timeout_at(deadline, linked).await.is_none() {
            warn!(device = %mesh.local_device(), expected, "Not every link came up in time");
        }
    }
    info!(links = radio.connection_count(), "Mesh linked");

    let sender = &meshes[options.from];
    for body in &options.messages {
        sender
            .send_local_message(body.as_str(), options.info_level.as_deref())
            .await?;
    }

    let expected = options.messages.len();
    for mesh in &meshes {
        let mut log = mesh.message_updates();
        let delivered = log.wait_for(|log| log.len() >= expected);
        if timeout_at(deadline, delivered).await.is_none() {
            warn!(device = %mesh.local_device(), "Not every message arrived in time");
        }
    }

    let devices = names
        .into_iter()
        .zip(&meshes)
        .map(|(name, mesh)| DeviceReport {
            name,
            peers: mesh.peers(),
            log: mesh.messages(),
            stats: mesh.stats(),
        })
        .collect();

    for mesh in &mut meshes {
        mesh.shutdown().await?;
    }

    Ok(SimulationReport {
        topology: options.topology,
        devices,
    })
}

/// `Some` when `future` finished before `deadline` without its sender closing
async fn timeout_at<T, E>(
    deadline: Instant,
    future: impl std::future::Future<Output = std::result::Result<T, E>>,
) -> Option<()> {
    let remaining = deadline.saturating_duration_since(Instant::now());
    match timeout(remaining, future).await {
        Ok(Ok(_)) => Some(()),
        _ => None,
    }
}
