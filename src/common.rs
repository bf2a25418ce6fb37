//! Address type shared by every layer of the crate.
use crate::{HwmpError, HwmpErrorKind};
use slog::{Key, Record, Serializer, Value};
use std::fmt;
use std::str::FromStr;

/// 48-bit IEEE 802 MAC address of a mesh point or station.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct MacAddress(pub [u8; 6]);

impl MacAddress {
    /// All-ones group address.
    pub const BROADCAST: MacAddress = MacAddress([0xff; 6]);

    /// Builds a locally administered address from a small node number.
    /// Handy for simulations and tests.
    pub fn from_id(id: u32) -> MacAddress {
        let b = id.to_be_bytes();
        MacAddress([0x02, 0x00, b[0], b[1], b[2], b[3]])
    }

    pub fn is_broadcast(&self) -> bool {
        *self == MacAddress::BROADCAST
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let o = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            o[0], o[1], o[2], o[3], o[4], o[5]
        )
    }
}

impl FromStr for MacAddress {
    type Err = HwmpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut octets = [0u8; 6];
        let mut parts = s.split(':');
        for octet in octets.iter_mut() {
            let part = parts.next().ok_or_else(|| {
                HwmpError::from(HwmpErrorKind::Configuration(format!(
                    "MAC address {} has fewer than 6 octets",
                    s
                )))
            })?;
            *octet = u8::from_str_radix(part, 16).map_err(|e| HwmpError {
                kind: HwmpErrorKind::Configuration(format!("Invalid octet in MAC address {}", s)),
                cause: Some(Box::new(e)),
            })?;
        }
        if parts.next().is_some() {
            let msg = format!("MAC address {} has more than 6 octets", s);
            return Err(HwmpErrorKind::Configuration(msg).into());
        }
        Ok(MacAddress(octets))
    }
}

impl Value for MacAddress {
    fn serialize(&self, _rec: &Record, key: Key, serializer: &mut dyn Serializer) -> slog::Result {
        serializer.emit_str(key, &self.to_string())
    }
}
