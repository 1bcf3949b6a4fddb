//! Core types for the NearMesh protocol
//!
//! Identifiers are opaque strings handed to us by the radio layer or chosen by the
//! authoring device, wrapped in newtypes so endpoint ids and device ids never mix.

use core::fmt;
use core::ops::{Add, Sub};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

// ----------------------------------------------------------------------------
// Endpoint Identifier
// ----------------------------------------------------------------------------

/// Transport-assigned identifier of a directly reachable peer link
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EndpointId(String);

impl EndpointId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EndpointId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for EndpointId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// ----------------------------------------------------------------------------
// Device Identifier
// ----------------------------------------------------------------------------

/// Identifier of the device that authored a message (first half of the dedup key)
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for DeviceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// ----------------------------------------------------------------------------
// Timestamp
// ----------------------------------------------------------------------------

/// Millisecond timestamp since Unix epoch
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(u64);

impl Add<u64> for Timestamp {
    type Output = Timestamp;

    fn add(self, other: u64) -> Timestamp {
        Timestamp(self.0.saturating_add(other))
    }
}

impl Sub for Timestamp {
    type Output = u64;

    fn sub(self, other: Timestamp) -> u64 {
        self.0.saturating_sub(other.0)
    }
}

impl Timestamp {
    pub fn new(millis: u64) -> Self {
        Self(millis)
    }

    /// Current wall-clock time
    pub fn now() -> Self {
        use std::time::{SystemTime, UNIX_EPOCH};
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self(duration.as_millis() as u64)
    }

    pub fn as_millis(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ----------------------------------------------------------------------------
// Time Source Trait
// ----------------------------------------------------------------------------

/// Source of wall-clock timestamps for message authoring and dedup retention
pub trait TimeSource: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Wall clock backed by `SystemTime`
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}

/// Manually advanced clock for simulations and deterministic tests
#[derive(Debug, Clone, Default)]
pub struct ManualTimeSource {
    current: Arc<AtomicU64>,
}

impl ManualTimeSource {
    pub fn starting_at(millis: u64) -> Self {
        Self {
            current: Arc::new(AtomicU64::new(millis)),
        }
    }

    pub fn advance(&self, millis: u64) {
        self.current.fetch_add(millis, Ordering::SeqCst);
    }

    pub fn set(&self, millis: u64) {
        self.current.store(millis, Ordering::SeqCst);
    }
}

impl TimeSource for ManualTimeSource {
    fn now(&self) -> Timestamp {
        Timestamp(self.current.load(Ordering::SeqCst))
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifiers_display_raw_string() {
        assert_eq!(EndpointId::from("ep-1").to_string(), "ep-1");
        assert_eq!(DeviceId::from("Pixel 7").to_string(), "Pixel 7");
        assert!(DeviceId::default().is_empty());
    }

    #[test]
    fn test_timestamp_arithmetic_saturates() {
        let t = Timestamp::new(1000);
        assert_eq!((t + 500).as_millis(), 1500);
        assert_eq!(t - Timestamp::new(400), 600);
        assert_eq!(Timestamp::new(400) - t, 0);
        assert_eq!((Timestamp::new(u64::MAX) + 1).as_millis(), u64::MAX);
    }

    #[test]
    fn test_manual_time_source() {
        let clock = ManualTimeSource::starting_at(10);
        let shared = clock.clone();
        shared.advance(5);
        assert_eq!(clock.now().as_millis(), 15);
        clock.set(100);
        assert_eq!(shared.now().as_millis(), 100);
    }
}
