//! Boundary between the HWMP engine and the mesh layer that hosts it.
//! The host owns the radio, the clock, the timer wheel and the station
//! association state; HWMP only asks questions and requests actions through
//! the `MeshHost` trait.
use crate::common::MacAddress;
use crate::hwmp::messages::Messages;
use crate::HwmpError;
use chrono::{DateTime, Duration, Utc};
use slog::{Record, Serializer, KV};

/// Timers HWMP asks its host to fire. Every timer is one-shot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerEvent {
    /// A route request to `dest` on behalf of `source` went unanswered.
    /// `attempt` names the request that armed the timer.
    RreqReplyTimeout {
        dest: MacAddress,
        source: MacAddress,
        attempt: u32,
    },
    /// Earliest active-route expiry, as known when the timer was armed.
    ActiveRouteExpiry { deadline: DateTime<Utc> },
    /// Earliest inactive-route deletion, as known when the timer was armed.
    RouteDeleteExpiry { deadline: DateTime<Utc> },
    /// Oldest duplicate-suppression record is due.
    SeenEntryExpiry,
    /// Root announcement origination or relay.
    RannTimer,
    /// Periodic parent validation. `epoch` identifies the tree state that armed it.
    MaintenanceTimer { epoch: u32 },
    /// A parent candidate failed to answer a maintenance request.
    ParentRrepTimeout { parent: MacAddress },
}

/// A data frame as seen by the path-selection layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataFrame {
    /// Final destination (DA)
    pub destination: MacAddress,
    /// Originator (SA)
    pub source: MacAddress,
    /// Transmitter of the last hop (TA)
    pub transmitter: MacAddress,
    /// Receiver of the next hop (RA)
    pub receiver: MacAddress,
    /// Set once the frame has been forwarded along the proactive tree.
    pub uses_tbr: bool,
    /// Originator-assigned sequence number, used to identify the frame in logs.
    pub seq_no: u32,
    pub payload: Vec<u8>,
}

impl DataFrame {
    pub fn new(source: MacAddress, destination: MacAddress, seq_no: u32, payload: Vec<u8>) -> Self {
        DataFrame {
            destination,
            source,
            transmitter: source,
            receiver: destination,
            uses_tbr: false,
            seq_no,
            payload,
        }
    }

    /// Size of the frame for buffer accounting.
    pub fn size(&self) -> usize {
        self.payload.len()
    }

    /// Stable identifier of the frame across hops.
    pub fn msg_id(&self) -> String {
        let mut data = Vec::with_capacity(16 + self.payload.len());
        data.extend_from_slice(&self.source.0);
        data.extend_from_slice(&self.destination.0);
        data.extend_from_slice(&self.seq_no.to_be_bytes());
        data.extend_from_slice(&self.payload);
        format!("{:x}", md5::compute(&data))
    }
}

impl KV for DataFrame {
    fn serialize(&self, _rec: &Record, serializer: &mut dyn Serializer) -> slog::Result {
        serializer.emit_str("msg_type", "DATA")?;
        serializer.emit_str("msg_source", &self.source.to_string())?;
        serializer.emit_str("msg_destination", &self.destination.to_string())?;
        serializer.emit_str("msg_id", &self.msg_id())
    }
}

/// Services the hosting mesh layer provides to HWMP.
pub trait MeshHost {
    /// Current time.
    fn now(&self) -> DateTime<Utc>;

    /// Raw cost of the link to a neighbor. Summable and comparable, otherwise opaque.
    fn link_metric(&self, neighbor: MacAddress) -> u32;

    /// Is the address this mesh point or one of its associated stations?
    fn is_self_or_station(&self, addr: MacAddress) -> bool;

    /// Is the address one of this mesh point's associated stations?
    fn is_bss_station(&self, addr: MacAddress) -> bool;

    /// Number of mesh neighbors currently reachable.
    fn neighbor_count(&self) -> usize;

    /// Stations currently associated to this mesh point.
    fn associated_stations(&self) -> Vec<MacAddress>;

    /// Send a control message to `receiver` (possibly broadcast).
    fn transmit_control(&mut self, receiver: MacAddress, msg: Messages) -> Result<(), HwmpError>;

    /// Send a data frame to `frame.receiver`.
    fn transmit_data(&mut self, frame: DataFrame) -> Result<(), HwmpError>;

    /// Fire `event` once after `delay`.
    fn schedule(&mut self, delay: Duration, event: TimerEvent);

    /// Drop whatever the host still has queued for `next_hop`,
    /// or only the frames bound for `dest` when one is given.
    fn delete_packets_to(&mut self, _next_hop: MacAddress, _dest: Option<MacAddress>) {}

    /// A station is no longer reachable through this mesh point.
    fn station_disassociated(&mut self, _station: MacAddress) {}
}
