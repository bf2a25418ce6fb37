//! Holding area for data frames waiting for a route.
use crate::common::MacAddress;
use crate::config::BufferLimit;
use crate::host::DataFrame;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, VecDeque};

#[derive(Debug, Clone, PartialEq)]
pub struct BufferedPacket {
    pub frame: DataFrame,
    pub arrived: DateTime<Utc>,
}

/// Bounded FIFO of frames, grouped by destination.
/// Frames over the budget are rejected, older frames are never evicted.
#[derive(Debug)]
pub struct PacketBuffer {
    limit: BufferLimit,
    queues: BTreeMap<MacAddress, VecDeque<BufferedPacket>>,
    packets: usize,
    bytes: usize,
    dropped: u64,
}

impl PacketBuffer {
    pub fn new(limit: BufferLimit) -> Self {
        PacketBuffer {
            limit,
            queues: BTreeMap::new(),
            packets: 0,
            bytes: 0,
            dropped: 0,
        }
    }

    /// Queues a frame for its final destination.
    /// Returns false, and counts the drop, if the frame does not fit.
    pub fn insert(&mut self, frame: DataFrame, now: DateTime<Utc>) -> bool {
        let fits = match self.limit {
            BufferLimit::Packets(max) => self.packets < max,
            BufferLimit::Bytes(max) => self.bytes + frame.size() <= max,
        };
        if !fits {
            self.dropped += 1;
            return false;
        }

        self.packets += 1;
        self.bytes += frame.size();
        self.queues
            .entry(frame.destination)
            .or_insert_with(VecDeque::new)
            .push_back(BufferedPacket { frame, arrived: now });
        true
    }

    /// Removes and returns the oldest frame queued for `dest`.
    pub fn get_packet(&mut self, dest: MacAddress) -> Option<BufferedPacket> {
        let queue = self.queues.get_mut(&dest)?;
        let packet = queue.pop_front()?;
        if queue.is_empty() {
            self.queues.remove(&dest);
        }
        self.packets -= 1;
        self.bytes -= packet.frame.size();
        Some(packet)
    }

    pub fn has_packets_for(&self, dest: MacAddress) -> bool {
        self.queues.contains_key(&dest)
    }

    pub fn len(&self) -> usize {
        self.packets
    }

    pub fn is_empty(&self) -> bool {
        self.packets == 0
    }

    pub fn size_in_bytes(&self) -> usize {
        self.bytes
    }

    /// Frames rejected because the buffer was full.
    pub fn dropped_for_overlimit(&self) -> u64 {
        self.dropped
    }
}
