//! Per-destination route store.
//!
//! Entries live in a single map keyed by destination. Two ordered indexes keyed
//! by deadline sit next to it: one over active entries (soonest to expire first)
//! and one over inactive entries (soonest to be deleted first), so timer handling
//! only ever inspects the head of an index. Each index is serviced by a single
//! coalesced host timer; `take_timer_requests` reports when that timer has to be
//! (re)armed because the head moved ahead of the armed deadline.
use crate::common::MacAddress;
use crate::config::{HOPCOUNT_MAX, METRIC_MAX};
use crate::host::TimerEvent;
use crate::hwmp::precursors::Precursors;
use crate::{HwmpError, HwmpErrorKind};
use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Clone, PartialEq)]
pub struct RouteEntry {
    pub destination: MacAddress,
    /// 0 means unknown
    pub seq_no: u32,
    pub next_hop: MacAddress,
    pub interface: usize,
    pub hop_count: u8,
    pub metric: u32,
    /// Absolute expiry while active, absolute deletion time while inactive.
    pub lifetime: DateTime<Utc>,
    pub is_active: bool,
    /// Hop count and metric the route had when it was last disabled.
    pub last_hop_count: u8,
    pub last_metric: u32,
    pub precursors: Precursors,
}

/// Values offered to the table for one destination.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RouteUpdate {
    pub destination: MacAddress,
    /// 0 leaves the stored sequence number untouched
    pub seq_no: u32,
    pub hop_count: u8,
    pub metric: u32,
    pub next_hop: MacAddress,
    pub lifetime: DateTime<Utc>,
    pub is_active: bool,
    pub interface: usize,
}

#[derive(Debug, Default)]
pub struct RouteTable {
    routes: HashMap<MacAddress, RouteEntry>,
    expire_order: BTreeSet<(DateTime<Utc>, MacAddress)>,
    delete_order: BTreeSet<(DateTime<Utc>, MacAddress)>,
    expire_armed: Option<DateTime<Utc>>,
    delete_armed: Option<DateTime<Utc>>,
}

impl RouteTable {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Returns the entry for `dest`, if any, and whether it is active.
    pub fn lookup(&self, dest: MacAddress) -> (Option<&RouteEntry>, bool) {
        match self.routes.get(&dest) {
            Some(entry) => (Some(entry), entry.is_active),
            None => (None, false),
        }
    }

    pub fn get(&self, dest: MacAddress) -> Option<&RouteEntry> {
        self.routes.get(&dest)
    }

    /// Returns the active entry for `dest`.
    pub fn get_valid(&self, dest: MacAddress) -> Option<&RouteEntry> {
        self.routes.get(&dest).filter(|e| e.is_active)
    }

    pub fn is_valid(&self, dest: MacAddress) -> bool {
        self.get_valid(dest).is_some()
    }

    /// Next hop and interface of an active route.
    pub fn next_hop(&self, dest: MacAddress) -> Option<(MacAddress, usize)> {
        self.get_valid(dest).map(|e| (e.next_hop, e.interface))
    }

    /// Hop count the last route to `dest` had, used to seed an expanding-ring search.
    pub fn last_hop_count(&self, dest: MacAddress) -> Option<u8> {
        self.routes.get(&dest).map(|e| e.last_hop_count)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RouteEntry> {
        self.routes.values()
    }

    /// Inserts or refreshes a route.
    /// A new destination is inserted as given. An active entry only gets a longer
    /// lifetime and a fresher sequence number; its path is kept. An inactive entry
    /// is overwritten and moved back to the expiry index.
    pub fn upsert(&mut self, update: RouteUpdate) -> &RouteEntry {
        self.apply(update, false)
    }

    /// Like `upsert`, but the caller has decided the offered path wins, so an active
    /// entry also takes the new next hop, hop count and metric.
    pub fn replace(&mut self, update: RouteUpdate) -> &RouteEntry {
        self.apply(update, true)
    }

    fn apply(&mut self, update: RouteUpdate, overwrite_path: bool) -> &RouteEntry {
        let dest = update.destination;
        match self.routes.get(&dest).map(|e| (e.is_active, e.lifetime)) {
            None => {
                let entry = RouteEntry {
                    destination: dest,
                    seq_no: update.seq_no,
                    next_hop: update.next_hop,
                    interface: update.interface,
                    hop_count: update.hop_count,
                    metric: update.metric,
                    lifetime: update.lifetime,
                    is_active: update.is_active,
                    last_hop_count: update.hop_count,
                    last_metric: update.metric,
                    precursors: Precursors::new(),
                };
                if update.is_active {
                    self.expire_order.insert((update.lifetime, dest));
                } else {
                    self.delete_order.insert((update.lifetime, dest));
                }
                self.routes.insert(dest, entry);
            }
            Some((true, lifetime)) => {
                if update.lifetime > lifetime {
                    self.move_expiry(dest, lifetime, update.lifetime);
                }
                if let Some(entry) = self.routes.get_mut(&dest) {
                    if update.lifetime > entry.lifetime {
                        entry.lifetime = update.lifetime;
                    }
                    entry.seq_no = entry.seq_no.max(update.seq_no);
                    if overwrite_path {
                        entry.next_hop = update.next_hop;
                        entry.interface = update.interface;
                        entry.hop_count = update.hop_count;
                        entry.metric = update.metric;
                    }
                }
            }
            Some((false, lifetime)) => {
                self.delete_order.remove(&(lifetime, dest));
                self.expire_order.insert((update.lifetime, dest));
                if let Some(entry) = self.routes.get_mut(&dest) {
                    entry.is_active = true;
                    entry.lifetime = update.lifetime;
                    entry.seq_no = entry.seq_no.max(update.seq_no);
                    entry.next_hop = update.next_hop;
                    entry.interface = update.interface;
                    entry.hop_count = update.hop_count;
                    entry.metric = update.metric;
                }
            }
        }
        &self.routes[&dest]
    }

    /// Extends the lifetime of a route to `now + active_timeout` if that is longer.
    /// An inactive route is reactivated; its hop count and metric are taken from the
    /// arguments, or from the values it had before it was disabled when `None`.
    /// Returns false if there is no entry for `dest`.
    pub fn refresh_lifetime(
        &mut self,
        dest: MacAddress,
        hop_count: Option<u8>,
        metric: Option<u32>,
        now: DateTime<Utc>,
        active_timeout: Duration,
    ) -> bool {
        let new_lifetime = now + active_timeout;
        let (is_active, lifetime) = match self.routes.get(&dest) {
            Some(e) => (e.is_active, e.lifetime),
            None => return false,
        };

        if is_active {
            if lifetime < new_lifetime {
                self.move_expiry(dest, lifetime, new_lifetime);
                if let Some(entry) = self.routes.get_mut(&dest) {
                    entry.lifetime = new_lifetime;
                }
            }
        } else {
            self.delete_order.remove(&(lifetime, dest));
            self.expire_order.insert((new_lifetime, dest));
            if let Some(entry) = self.routes.get_mut(&dest) {
                entry.is_active = true;
                entry.lifetime = new_lifetime;
                entry.hop_count = hop_count.unwrap_or(entry.last_hop_count);
                entry.metric = metric.unwrap_or(entry.last_metric);
            }
        }
        true
    }

    /// Deactivates a route: precursors are dropped, hop count and metric are saved and
    /// replaced with the unreachable markers, and the entry is scheduled for deletion
    /// at `now + deletion_period`. Returns the (possibly bumped) sequence number.
    pub fn disable(
        &mut self,
        dest: MacAddress,
        bump_seq: bool,
        now: DateTime<Utc>,
        deletion_period: Duration,
    ) -> Result<u32, HwmpError> {
        let entry = self.routes.get_mut(&dest).ok_or_else(|| {
            HwmpError::from(HwmpErrorKind::Protocol(format!(
                "Attempted to disable unknown route to {}",
                dest
            )))
        })?;
        if !entry.is_active {
            let msg = format!("Attempted to disable inactive route to {}", dest);
            return Err(HwmpErrorKind::Protocol(msg).into());
        }

        let old_lifetime = entry.lifetime;
        entry.precursors.clear();
        entry.last_hop_count = entry.hop_count;
        entry.last_metric = entry.metric;
        entry.hop_count = HOPCOUNT_MAX;
        entry.metric = METRIC_MAX;
        entry.is_active = false;
        entry.lifetime = now + deletion_period;
        if bump_seq {
            entry.seq_no = entry.seq_no.wrapping_add(1);
        }
        let seq_no = entry.seq_no;
        let deadline = entry.lifetime;

        self.expire_order.remove(&(old_lifetime, dest));
        self.delete_order.insert((deadline, dest));

        Ok(seq_no)
    }

    /// Physically removes a route.
    pub fn delete(&mut self, dest: MacAddress) -> Option<RouteEntry> {
        let entry = self.routes.remove(&dest)?;
        if entry.is_active {
            self.expire_order.remove(&(entry.lifetime, dest));
        } else {
            self.delete_order.remove(&(entry.lifetime, dest));
        }
        Some(entry)
    }

    /// Takes `seq_no` if it is fresher than the stored one.
    pub fn raise_seq_no(&mut self, dest: MacAddress, seq_no: u32) {
        if let Some(entry) = self.routes.get_mut(&dest) {
            entry.seq_no = entry.seq_no.max(seq_no);
        }
    }

    pub fn add_precursor(&mut self, dest: MacAddress, precursor: MacAddress) -> bool {
        match self.routes.get_mut(&dest) {
            Some(entry) => entry.precursors.insert(precursor),
            None => false,
        }
    }

    /// Removes `neighbor` from every precursor list.
    pub fn remove_precursor_everywhere(&mut self, neighbor: MacAddress) {
        for entry in self.routes.values_mut() {
            entry.precursors.remove(neighbor);
        }
    }

    /// Active routes whose next hop is `neighbor`.
    pub fn active_routes_via(&self, neighbor: MacAddress) -> Vec<MacAddress> {
        let mut routes: Vec<MacAddress> = self
            .routes
            .values()
            .filter(|e| e.is_active && e.next_hop == neighbor)
            .map(|e| e.destination)
            .collect();
        routes.sort();
        routes
    }

    /// Disables every active route whose lifetime has passed.
    /// A stale wakeup (one that no longer matches the armed deadline) is ignored.
    pub fn handle_expiry_timer(
        &mut self,
        deadline: DateTime<Utc>,
        now: DateTime<Utc>,
        deletion_period: Duration,
    ) -> Result<Vec<MacAddress>, HwmpError> {
        if self.expire_armed != Some(deadline) {
            return Ok(Vec::new());
        }
        self.expire_armed = None;

        let due: Vec<MacAddress> = self
            .expire_order
            .iter()
            .take_while(|(lifetime, _)| *lifetime <= now)
            .map(|(_, dest)| *dest)
            .collect();
        for dest in due.iter() {
            self.disable(*dest, true, now, deletion_period)?;
        }
        Ok(due)
    }

    /// Deletes every inactive route whose deletion time has passed.
    /// A stale wakeup (one that no longer matches the armed deadline) is ignored.
    pub fn handle_delete_timer(&mut self, deadline: DateTime<Utc>, now: DateTime<Utc>) -> Vec<MacAddress> {
        if self.delete_armed != Some(deadline) {
            return Vec::new();
        }
        self.delete_armed = None;

        let due: Vec<MacAddress> = self
            .delete_order
            .iter()
            .take_while(|(lifetime, _)| *lifetime <= now)
            .map(|(_, dest)| *dest)
            .collect();
        for dest in due.iter() {
            self.delete(*dest);
        }
        due
    }

    /// Timers that must be scheduled so that each index's head is serviced on time.
    /// A new wakeup is requested only when nothing is armed or the head is now due
    /// before the armed deadline.
    pub fn take_timer_requests(&mut self, now: DateTime<Utc>) -> Vec<(Duration, TimerEvent)> {
        let mut requests = Vec::new();

        if let Some((head, _)) = self.expire_order.iter().next() {
            let head = *head;
            if self.expire_armed.map_or(true, |armed| head < armed) {
                self.expire_armed = Some(head);
                requests.push((
                    delay_until(now, head),
                    TimerEvent::ActiveRouteExpiry { deadline: head },
                ));
            }
        }

        if let Some((head, _)) = self.delete_order.iter().next() {
            let head = *head;
            if self.delete_armed.map_or(true, |armed| head < armed) {
                self.delete_armed = Some(head);
                requests.push((
                    delay_until(now, head),
                    TimerEvent::RouteDeleteExpiry { deadline: head },
                ));
            }
        }

        requests
    }

    fn move_expiry(&mut self, dest: MacAddress, from: DateTime<Utc>, to: DateTime<Utc>) {
        self.expire_order.remove(&(from, dest));
        self.expire_order.insert((to, dest));
    }
}

fn delay_until(now: DateTime<Utc>, deadline: DateTime<Utc>) -> Duration {
    let delay = deadline - now;
    if delay < Duration::zero() {
        Duration::zero()
    } else {
        delay
    }
}
