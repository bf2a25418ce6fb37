//! Control messages exchanged by HWMP mesh points.
//! Field layout on the wire belongs to the host; these are the logical contents.
use crate::common::MacAddress;
use crate::{HwmpError, HwmpErrorKind};
use slog::{Record, Serializer, KV};

/// An address with the freshness counter that goes with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddrSeq {
    pub addr: MacAddress,
    pub seq_no: u32,
}

impl AddrSeq {
    pub fn new(addr: MacAddress, seq_no: u32) -> Self {
        AddrSeq { addr, seq_no }
    }
}

bitflags! {
    #[derive(Serialize, Deserialize, Default)]
    pub struct RREQFlags: u8 {
        const BROADCAST = 0b00000001;
        const DESTINATION_ONLY = 0b00000010;
        const REPLY_AND_FORWARD = 0b00000100;
        /// Sent on behalf of a station that moved to a new mesh point.
        const STATION_REASSOCIATION = 0b00001000;
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RouteRequestMessage {
    pub flags: RREQFlags,
    pub hop_count: u8,
    pub ttl: u8,
    pub rreq_id: u32,
    pub source: AddrSeq,
    /// In milliseconds
    pub lifetime: u32,
    pub metric: u32,
    pub destination: AddrSeq,
}

bitflags! {
    #[derive(Serialize, Deserialize, Default)]
    pub struct RREPFlags: u8 {
        /// Registration reply sent toward the root.
        const GRATUITOUS = 0b00000001;
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RouteResponseMessage {
    pub flags: RREPFlags,
    pub hop_count: u8,
    pub ttl: u8,
    /// Node the route leads to. For registrations, the root.
    pub destination: AddrSeq,
    /// In milliseconds
    pub lifetime: u32,
    pub metric: u32,
    /// Node(s) the reply travels to. A registration lists the registering
    /// mesh point first, followed by the stations it proxies.
    pub sources: Vec<AddrSeq>,
}

impl RouteResponseMessage {
    pub fn is_gratuitous(&self) -> bool {
        self.flags.contains(RREPFlags::GRATUITOUS)
    }

    pub fn source(&self) -> Option<AddrSeq> {
        self.sources.first().copied()
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RouteErrorMessage {
    pub destinations: Vec<AddrSeq>,
}

bitflags! {
    #[derive(Serialize, Deserialize, Default)]
    pub struct RANNFlags: u8 {
        /// Mesh points must validate their parent with the root before registering.
        const REGISTRATION = 0b00000001;
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RootAnnouncementMessage {
    pub flags: RANNFlags,
    pub hop_count: u8,
    pub ttl: u8,
    pub root: MacAddress,
    pub root_seq_no: u32,
    /// In milliseconds
    pub lifetime: u32,
    pub metric: u32,
}

impl RootAnnouncementMessage {
    pub fn requires_registration(&self) -> bool {
        self.flags.contains(RANNFlags::REGISTRATION)
    }
}

///Messages used by the HWMP protocol
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum Messages {
    RREQ(RouteRequestMessage),
    RREP(RouteResponseMessage),
    RERR(RouteErrorMessage),
    RANN(RootAnnouncementMessage),
}

impl KV for Messages {
    fn serialize(&self, _rec: &Record, serializer: &mut dyn Serializer) -> slog::Result {
        match *self {
            Messages::RREQ(ref m) => {
                serializer.emit_str("msg_type", "RREQ")?;
                serializer.emit_str("msg_source", &m.source.addr.to_string())?;
                serializer.emit_str("msg_destination", &m.destination.addr.to_string())?;
                serializer.emit_u8("ttl", m.ttl)?;
                serializer.emit_u32("rreq_id", m.rreq_id)
            }
            Messages::RREP(ref m) => {
                let kind = if m.is_gratuitous() { "RREP-G" } else { "RREP" };
                serializer.emit_str("msg_type", kind)?;
                if let Some(src) = m.source() {
                    serializer.emit_str("msg_source", &src.addr.to_string())?;
                }
                serializer.emit_str("msg_destination", &m.destination.addr.to_string())?;
                serializer.emit_u32("dest_seq_no", m.destination.seq_no)
            }
            Messages::RERR(ref m) => {
                serializer.emit_str("msg_type", "RERR")?;
                serializer.emit_usize("msg.num_affected_destinations", m.destinations.len())
            }
            Messages::RANN(ref m) => {
                serializer.emit_str("msg_type", "RANN")?;
                serializer.emit_str("root", &m.root.to_string())?;
                serializer.emit_u32("root_seq_no", m.root_seq_no)
            }
        }
    }
}

pub fn deserialize_message(data: &[u8]) -> Result<Messages, HwmpError> {
    serde_cbor::de::from_slice(data).map_err(|e| HwmpError {
        kind: HwmpErrorKind::Serialization(String::from("Error deserializing data into message")),
        cause: Some(Box::new(e)),
    })
}

pub fn serialize_message(msg: &Messages) -> Result<Vec<u8>, HwmpError> {
    serde_cbor::ser::to_vec(msg).map_err(|e| HwmpError {
        kind: HwmpErrorKind::Serialization(String::from("Error serializing message")),
        cause: Some(Box::new(e)),
    })
}
