//*****************
//External crates
//*****************
#[macro_use]
extern crate serde_derive;
#[macro_use]
extern crate slog;
#[macro_use]
extern crate bitflags;

//*****************
//Modules declaration
//*****************
pub mod common;
pub mod config;
pub mod host;
pub mod hwmp;
pub mod logging;
pub mod simulation;
pub mod tests;

pub use common::MacAddress;
pub use hwmp::Hwmp;

//*****************
//Errors
//*****************
use std::error::Error;
use std::fmt;

/// Error struct for this crate
#[derive(Debug)]
pub struct HwmpError {
    pub cause: Option<Box<dyn Error>>,
    pub kind: HwmpErrorKind,
}

/// Types of errors produced in this crate
#[derive(Debug)]
pub enum HwmpErrorKind {
    /// Failures in configuration of the system
    Configuration(String),
    /// Failures related to [de]serializing data
    Serialization(String),
    /// The host layer could not transmit a frame
    Transmission(String),
    /// A protocol invariant was violated. Always fatal.
    Protocol(String),
    /// Filesystem errors
    Io(String),
}

impl HwmpError {
    /// Returns true for errors that signal a programming or configuration mistake.
    pub fn is_fatal(&self) -> bool {
        match self.kind {
            HwmpErrorKind::Protocol(_) | HwmpErrorKind::Configuration(_) => true,
            _ => false,
        }
    }
}

impl Error for HwmpError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self.cause {
            Some(ref cause) => Some(&**cause),
            None => None,
        }
    }
}

impl fmt::Display for HwmpError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.kind)
    }
}

impl fmt::Display for HwmpErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            HwmpErrorKind::Configuration(msg) => write!(f, "{}", msg),
            HwmpErrorKind::Serialization(msg) => write!(f, "{}", msg),
            HwmpErrorKind::Transmission(msg) => write!(f, "{}", msg),
            HwmpErrorKind::Protocol(msg) => write!(f, "{}", msg),
            HwmpErrorKind::Io(msg) => write!(f, "{}", msg),
        }
    }
}

impl From<HwmpErrorKind> for HwmpError {
    fn from(kind: HwmpErrorKind) -> HwmpError {
        HwmpError { cause: None, kind }
    }
}
