//! Bookkeeping of route discoveries in flight and of recently flooded requests.
use crate::common::MacAddress;
use std::collections::{HashMap, VecDeque};

/// A discovery currently in progress for one destination.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PendingRequest {
    /// TTL to use for the next attempt.
    pub ttl: u8,
    /// Attempts already made with the TTL at the net diameter.
    pub times: u32,
    /// Identifies the reply timer armed by the latest attempt.
    pub attempt: u32,
}

/// Destinations for which a route request is outstanding.
#[derive(Debug, Default)]
pub struct SentTable {
    pending: HashMap<MacAddress, PendingRequest>,
    last_attempt: u32,
}

impl SentTable {
    pub fn new() -> Self {
        Default::default()
    }

    /// Records a new discovery. An existing record is kept as is.
    pub fn insert(&mut self, dest: MacAddress, ttl: u8) -> &mut PendingRequest {
        self.pending
            .entry(dest)
            .or_insert(PendingRequest { ttl, times: 0, attempt: 0 })
    }

    /// Starts a new attempt for `dest` and returns its id. Timers armed by
    /// earlier attempts no longer match.
    pub fn next_attempt(&mut self, dest: MacAddress) -> Option<u32> {
        let pending = self.pending.get_mut(&dest)?;
        self.last_attempt = self.last_attempt.wrapping_add(1).max(1);
        pending.attempt = self.last_attempt;
        Some(pending.attempt)
    }

    /// Was `attempt` the latest one made for `dest`?
    pub fn is_current(&self, dest: MacAddress, attempt: u32) -> bool {
        self.pending.get(&dest).map_or(false, |p| p.attempt == attempt)
    }

    pub fn get(&self, dest: MacAddress) -> Option<&PendingRequest> {
        self.pending.get(&dest)
    }

    pub fn get_mut(&mut self, dest: MacAddress) -> Option<&mut PendingRequest> {
        self.pending.get_mut(&dest)
    }

    pub fn contains(&self, dest: MacAddress) -> bool {
        self.pending.contains_key(&dest)
    }

    pub fn remove(&mut self, dest: MacAddress) -> Option<PendingRequest> {
        self.pending.remove(&dest)
    }

    /// Number of attempts made at full TTL, 0 for unknown destinations.
    pub fn sent_count_with_max_ttl(&self, dest: MacAddress) -> u32 {
        self.pending.get(&dest).map(|p| p.times).unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl PendingRequest {
    /// Grows the TTL for the next attempt. Past the threshold the whole mesh is flooded.
    pub fn increase_ttl(&mut self, increment: u8, threshold: u8, net_diameter: u8) {
        self.ttl = self.ttl.saturating_add(increment);
        if self.ttl > threshold {
            self.ttl = net_diameter;
        }
    }
}

/// Requests flooded recently, oldest first.
/// Every insertion is paired with exactly one expiry timer, so each expiry
/// pops the oldest record.
#[derive(Debug, Default)]
pub struct SeenTable {
    records: VecDeque<(MacAddress, u32)>,
    last_found: Option<(MacAddress, u32)>,
}

impl SeenTable {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn insert(&mut self, source: MacAddress, rreq_id: u32) {
        self.records.push_back((source, rreq_id));
    }

    pub fn contains(&mut self, source: MacAddress, rreq_id: u32) -> bool {
        let key = (source, rreq_id);
        if self.last_found == Some(key) {
            return true;
        }
        if self.records.iter().rev().any(|r| *r == key) {
            self.last_found = Some(key);
            return true;
        }
        false
    }

    /// Drops the oldest record. Returns it, or None if the table was already empty.
    pub fn expire_oldest(&mut self) -> Option<(MacAddress, u32)> {
        let oldest = self.records.pop_front()?;
        if self.last_found == Some(oldest) && !self.records.contains(&oldest) {
            self.last_found = None;
        }
        Some(oldest)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
