//! Message deduplication
//!
//! Remembers every message id this device has processed so a flooded message
//! is delivered and forwarded at most once. The store is exact (no false
//! positives) and unbounded by default; `RetentionPolicy::Window` trades that
//! for bounded memory by forgetting ids some time after they were first seen.
//! Messages authored by the local device are suppressed forever either way.

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::trace;

use crate::config::RetentionPolicy;
use crate::protocol::envelope::MessageId;
use crate::types::{DeviceId, Timestamp};

// ----------------------------------------------------------------------------
// Statistics
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DedupStats {
    /// Ids accepted as new
    pub observed: u64,
    /// Observations rejected as already seen
    pub duplicates: u64,
    /// Ids forgotten by the retention window
    pub evicted: u64,
    /// Ids currently remembered
    pub tracked: usize,
}

// ----------------------------------------------------------------------------
// Duplicate Detector
// ----------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct DuplicateDetector {
    local_device: DeviceId,
    retention: RetentionPolicy,
    /// Id → local instant it was first seen
    seen: HashMap<MessageId, Timestamp>,
    /// Insertion order, only populated under a retention window
    expiry: VecDeque<(Timestamp, MessageId)>,
    stats: DedupStats,
}

impl DuplicateDetector {
    pub fn new(local_device: DeviceId, retention: RetentionPolicy) -> Self {
        Self {
            local_device,
            retention,
            seen: HashMap::new(),
            expiry: VecDeque::new(),
            stats: DedupStats::default(),
        }
    }

    /// Record `id`; returns `true` only the first time it is seen
    pub fn observe(&mut self, id: &MessageId, now: Timestamp) -> bool {
        if self.seen.contains_key(id) {
            self.stats.duplicates += 1;
            trace!(message_id = %id, "Duplicate message id");
            return false;
        }
        self.record(id.clone(), now);
        self.stats.observed += 1;
        true
    }

    /// Record a locally authored id so its echoes are dropped
    pub fn mark_originated(&mut self, id: &MessageId, now: Timestamp) {
        if !self.seen.contains_key(id) {
            self.record(id.clone(), now);
        }
    }

    /// Whether `origin` is this device
    pub fn is_self(&self, origin: &DeviceId) -> bool {
        *origin == self.local_device
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.seen.contains_key(id)
    }

    /// Forget ids whose retention window has passed; returns how many
    pub fn maintain(&mut self, now: Timestamp) -> usize {
        let RetentionPolicy::Window { horizon_ms } = self.retention else {
            return 0;
        };

        let mut evicted = 0;
        while let Some((first_seen, _)) = self.expiry.front() {
            if *first_seen + horizon_ms > now {
                break;
            }
            if let Some((_, id)) = self.expiry.pop_front() {
                self.seen.remove(&id);
                evicted += 1;
            }
        }

        self.stats.evicted += evicted as u64;
        evicted
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    pub fn stats(&self) -> DedupStats {
        DedupStats {
            tracked: self.seen.len(),
            ..self.stats
        }
    }

    fn record(&mut self, id: MessageId, now: Timestamp) {
        if matches!(self.retention, RetentionPolicy::Window { .. }) {
            self.expiry.push_back((now, id.clone()));
        }
        self.seen.insert(id, now);
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
