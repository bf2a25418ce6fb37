//! Bookkeeping of who must be told when a route breaks, and of neighbors
//! whose requests are not trusted.
use crate::common::MacAddress;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Neighbors that were handed a route through this node, in the order they were added.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Precursors(Vec<MacAddress>);

impl Precursors {
    pub fn new() -> Self {
        Default::default()
    }

    /// Adds a precursor. Returns false if it was already present.
    pub fn insert(&mut self, addr: MacAddress) -> bool {
        if self.0.contains(&addr) {
            return false;
        }
        self.0.push(addr);
        true
    }

    pub fn remove(&mut self, addr: MacAddress) -> bool {
        let len = self.0.len();
        self.0.retain(|p| *p != addr);
        len != self.0.len()
    }

    pub fn contains(&self, addr: MacAddress) -> bool {
        self.0.contains(&addr)
    }

    pub fn first(&self) -> Option<MacAddress> {
        self.0.first().copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &MacAddress> {
        self.0.iter()
    }
}

/// Upstream neighbors to notify about a set of broken routes.
/// Folding every affected route's precursors decides whether a route error
/// can be unicast or has to be broadcast.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Upstream {
    None,
    Unique(MacAddress),
    Many,
}

impl Default for Upstream {
    fn default() -> Self {
        Upstream::None
    }
}

impl Upstream {
    pub fn observe(&mut self, precursors: &Precursors) {
        let head = match precursors.first() {
            Some(head) => head,
            None => return,
        };
        *self = match *self {
            _ if precursors.len() > 1 => Upstream::Many,
            Upstream::None => Upstream::Unique(head),
            Upstream::Unique(current) if current == head => Upstream::Unique(head),
            _ => Upstream::Many,
        };
    }
}

/// Neighbors whose route requests are ignored until the entry times out.
#[derive(Debug, Default)]
pub struct Blacklist {
    entries: HashMap<MacAddress, DateTime<Utc>>,
}

impl Blacklist {
    pub fn insert(&mut self, addr: MacAddress, expires: DateTime<Utc>) {
        self.entries.insert(addr, expires);
    }

    /// Returns true while `addr` is blacklisted. Expired entries are dropped on lookup.
    pub fn contains(&mut self, addr: MacAddress, now: DateTime<Utc>) -> bool {
        match self.entries.get(&addr) {
            Some(expires) if *expires > now => true,
            Some(_) => {
                self.entries.remove(&addr);
                false
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
