//! Tree-based routing: the proactive half of HWMP.
//!
//! The root periodically floods root announcements (RANN). Every other mesh point
//! collects the neighbors it heard announcements from as parent candidates, picks
//! the one with the lowest path metric, optionally validates it with a unicast
//! request to the root, and registers itself (and its stations) with a gratuitous
//! reply sent up through that parent. Frames for destinations without a reactive
//! route can then travel up the tree and back down along the registrations.
//!
//! The behaviour is an explicit two-state machine. Every event is handed to the
//! handler of the current state; transitions re-enter the new state with
//! `TbrEvent::EnterState`.
use super::discovery::{duration_to_ms, Freshness};
use super::messages::*;
use super::route_table::RouteUpdate;
use super::{Hwmp, DEFAULT_INTERFACE};
use crate::common::MacAddress;
use crate::host::{DataFrame, MeshHost, TimerEvent};
use crate::logging::{self, MessageStatus};
use crate::{HwmpError, HwmpErrorKind};

use chrono::{DateTime, Duration, Utc};

/// Upper bound of the random part of the RANN relay delay.
const RANN_PROPAGATION_JITTER: i64 = 10; //milliseconds

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TbrState {
    /// Learning the tree: no parent, tree forwarding disabled.
    Init,
    /// Attached to the tree (or announcing it, for the root).
    Forwarding,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TbrEvent {
    EnterState,
    RannTimer,
    MaintenanceTimer { epoch: u32 },
    /// The reply to a maintenance request sent to `parent` is overdue.
    RrepTimer { parent: MacAddress },
    /// A fresher or better announcement arrived from `prev_hop`. Hop count and metric
    /// already include the last link.
    RannReceived {
        rann: RootAnnouncementMessage,
        prev_hop: MacAddress,
    },
    /// A reply from the root reached this node through `prev_hop`.
    RrepReceived {
        dest: MacAddress,
        prev_hop: MacAddress,
    },
}

/// The root as last announced.
#[derive(Debug, Clone, PartialEq)]
pub struct RootItem {
    pub rann: RootAnnouncementMessage,
    pub last_rann_time: DateTime<Utc>,
    pub prev_hop: MacAddress,
}

/// A neighbor this node could attach to the tree through.
#[derive(Debug, Clone, PartialEq)]
pub struct ParentCandidate {
    pub addr: MacAddress,
    /// Announcement last heard from this neighbor.
    pub rann: RootAnnouncementMessage,
    pub last_rann_time: DateTime<Utc>,
    pub last_validation_time: Option<DateTime<Utc>>,
}

/// Where the tree sends a frame that has no reactive route.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TreeRoute {
    /// Down the tree, towards a registered mesh point or station.
    Downstream(MacAddress),
    /// Up the tree, to the current parent.
    Upstream(MacAddress),
    /// The root holds the frame and looks the destination up reactively.
    BufferAtRoot,
    Unreachable,
}

#[derive(Debug)]
pub struct TreeState {
    pub(crate) state: TbrState,
    pub(crate) forwarding_ready: bool,
    pub(crate) root: Option<RootItem>,
    /// Candidates in the order they were first heard.
    pub(crate) parents: Vec<ParentCandidate>,
    pub(crate) current_parent: Option<MacAddress>,
    pub(crate) potential_new_parent: bool,
    pub(crate) station_update_due: bool,
    pub(crate) maintenance_epoch: u32,
}

impl TreeState {
    pub fn new() -> Self {
        TreeState {
            state: TbrState::Init,
            forwarding_ready: false,
            root: None,
            parents: Vec::new(),
            current_parent: None,
            potential_new_parent: false,
            station_update_due: false,
            maintenance_epoch: 0,
        }
    }

    pub fn is_forwarding(&self) -> bool {
        self.forwarding_ready
    }

    pub fn root_address(&self) -> Option<MacAddress> {
        self.root.as_ref().map(|r| r.rann.root)
    }

    pub fn root_addr_seq(&self) -> Option<AddrSeq> {
        self.root
            .as_ref()
            .map(|r| AddrSeq::new(r.rann.root, r.rann.root_seq_no))
    }

    pub fn parent(&self, addr: MacAddress) -> Option<&ParentCandidate> {
        self.parents.iter().find(|p| p.addr == addr)
    }

    fn parent_mut(&mut self, addr: MacAddress) -> Option<&mut ParentCandidate> {
        self.parents.iter_mut().find(|p| p.addr == addr)
    }

    /// Candidate with the lowest metric. The earliest heard wins a tie.
    pub fn best_candidate(&self) -> Option<&ParentCandidate> {
        self.parents.iter().fold(None, |best: Option<&ParentCandidate>, p| match best {
            Some(b) if b.rann.metric <= p.rann.metric => Some(b),
            _ => Some(p),
        })
    }

    /// Does `candidate` beat the current parent by the improvement factor?
    pub fn beats_current_parent(&self, candidate: &ParentCandidate, factor: f64) -> bool {
        match self.current_parent.and_then(|c| self.parent(c)) {
            Some(current) if current.addr == candidate.addr => false,
            Some(current) => f64::from(candidate.rann.metric) * factor < f64::from(current.rann.metric),
            None => true,
        }
    }

    /// Parent to use after a maintenance round: the current one unless a candidate
    /// beats it by the improvement factor.
    pub fn preferred_parent(&self, factor: f64) -> Option<MacAddress> {
        let best = self.best_candidate()?;
        if self.beats_current_parent(best, factor) {
            Some(best.addr)
        } else {
            self.current_parent
        }
    }

    fn upsert_candidate(&mut self, addr: MacAddress, rann: RootAnnouncementMessage, now: DateTime<Utc>) {
        match self.parent_mut(addr) {
            Some(p) => {
                p.rann = rann;
                p.last_rann_time = now;
            }
            None => self.parents.push(ParentCandidate {
                addr,
                rann,
                last_rann_time: now,
                last_validation_time: None,
            }),
        }
    }
}

impl Default for TreeState {
    fn default() -> Self {
        TreeState::new()
    }
}

impl Hwmp {
    pub(crate) fn set_tree_state(
        &mut self,
        host: &mut dyn MeshHost,
        state: TbrState,
    ) -> Result<(), HwmpError> {
        info!(self.logger, "Tree state change"; "from"=>format!("{:?}", self.tree.state), "to"=>format!("{:?}", state));
        self.tree.state = state;
        self.handle_tree_event(host, TbrEvent::EnterState)
    }

    pub(crate) fn handle_tree_event(
        &mut self,
        host: &mut dyn MeshHost,
        event: TbrEvent,
    ) -> Result<(), HwmpError> {
        match self.tree.state {
            TbrState::Init => self.tree_init_state(host, event),
            TbrState::Forwarding => self.tree_forwarding_state(host, event),
        }
    }

    fn tree_init_state(&mut self, host: &mut dyn MeshHost, event: TbrEvent) -> Result<(), HwmpError> {
        match event {
            TbrEvent::EnterState => {
                self.tree.forwarding_ready = false;
                self.tree.current_parent = None;
                self.tree.potential_new_parent = false;
                if self.params.is_root {
                    let mut flags = RANNFlags::empty();
                    flags.set(RANNFlags::REGISTRATION, self.params.root_registration);
                    self.tree.root = Some(RootItem {
                        rann: RootAnnouncementMessage {
                            flags,
                            hop_count: 0,
                            ttl: self.params.net_diameter,
                            root: self.address,
                            root_seq_no: self.seq_no,
                            lifetime: duration_to_ms(self.params.active_root_timeout),
                            metric: 0,
                        },
                        last_rann_time: host.now(),
                        prev_hop: self.address,
                    });
                    let delay = self.random_delay(self.params.jitter);
                    host.schedule(delay, TimerEvent::RannTimer);
                } else {
                    self.tree.root = None;
                    self.tree.parents.clear();
                }
                Ok(())
            }
            TbrEvent::RannTimer => {
                if self.params.is_root {
                    self.send_rann(host)?;
                    return self.set_tree_state(host, TbrState::Forwarding);
                }
                let (best, requires_registration) = match self.tree.best_candidate() {
                    Some(p) => (p.addr, p.rann.requires_registration()),
                    None => {
                        debug!(self.logger, "No parent candidate yet");
                        return Ok(());
                    }
                };
                if requires_registration {
                    return self.send_maintenance_rreq(host, best);
                }
                self.tree.current_parent = Some(best);
                self.register_with_root(host, best)?;
                self.set_tree_state(host, TbrState::Forwarding)
            }
            TbrEvent::MaintenanceTimer { .. } => {
                debug!(self.logger, "Maintenance timer ignored while learning the tree");
                Ok(())
            }
            TbrEvent::RrepTimer { parent } => {
                //No validation came back
                self.tree.parents.retain(|p| p.addr != parent);
                debug!(self.logger, "Parent candidate removed"; "parent"=>parent);
                Ok(())
            }
            TbrEvent::RannReceived { rann, prev_hop } => {
                if !self.params.is_root {
                    self.record_rann(host, rann, prev_hop);
                }
                Ok(())
            }
            TbrEvent::RrepReceived { dest, prev_hop } => {
                if self.tree.root_address() != Some(dest) {
                    return Ok(());
                }
                let now = host.now();
                match self.tree.parent_mut(prev_hop) {
                    Some(p) => p.last_validation_time = Some(now),
                    None => {
                        debug!(self.logger, "Reply from the root through an unknown parent"; "prev_hop"=>prev_hop);
                        return Ok(());
                    }
                }
                self.tree.current_parent = Some(prev_hop);
                self.register_with_root(host, prev_hop)?;
                self.set_tree_state(host, TbrState::Forwarding)
            }
        }
    }

    fn tree_forwarding_state(
        &mut self,
        host: &mut dyn MeshHost,
        event: TbrEvent,
    ) -> Result<(), HwmpError> {
        match event {
            TbrEvent::EnterState => {
                self.tree.forwarding_ready = true;
                if self.params.is_root {
                    let delay = self.params.rann_period + self.random_delay(self.params.jitter);
                    host.schedule(delay, TimerEvent::RannTimer);
                } else {
                    self.tree.maintenance_epoch = self.tree.maintenance_epoch.wrapping_add(1);
                    self.schedule_maintenance(host);
                }
                Ok(())
            }
            TbrEvent::RannTimer => {
                if self.params.is_root {
                    self.send_rann(host)?;
                    let delay = self.params.rann_period + self.random_delay(self.params.jitter);
                    host.schedule(delay, TimerEvent::RannTimer);
                    return Ok(());
                }
                if self.tree.current_parent.is_none() {
                    return Ok(());
                }
                if host.neighbor_count() > 1 {
                    self.relay_rann(host)
                } else {
                    debug!(self.logger, "Single neighbor, announcement not relayed");
                    Ok(())
                }
            }
            TbrEvent::MaintenanceTimer { epoch } => {
                if self.params.is_root || epoch != self.tree.maintenance_epoch {
                    return Ok(());
                }
                self.maintain_parent(host)
            }
            TbrEvent::RrepTimer { parent } => {
                if self.tree.parent(parent).is_none() {
                    return Ok(());
                }
                if self.tree.current_parent == Some(parent) && !self.route_table.is_valid(parent) {
                    info!(self.logger, "Lost the route to the current parent"; "parent"=>parent);
                    return self.set_tree_state(host, TbrState::Init);
                }
                self.tree.potential_new_parent = false;
                Ok(())
            }
            TbrEvent::RannReceived { rann, prev_hop } => {
                if self.params.is_root {
                    return Ok(());
                }
                if self.tree.current_parent.is_none() {
                    let msg = format!("Root announcement from {} while forwarding without a parent", prev_hop);
                    return Err(HwmpErrorKind::Protocol(msg).into());
                }
                self.record_rann(host, rann, prev_hop);
                let factor = self.params.better_parent_factor;
                let better = match self.tree.parent(prev_hop) {
                    Some(candidate) => self.tree.beats_current_parent(candidate, factor),
                    None => false,
                };
                if better {
                    debug!(self.logger, "Potential new parent"; "candidate"=>prev_hop);
                    self.tree.potential_new_parent = true;
                }
                Ok(())
            }
            TbrEvent::RrepReceived { dest, prev_hop } => {
                if self.params.is_root || self.tree.root_address() != Some(dest) {
                    return Ok(());
                }
                let now = host.now();
                match self.tree.parent_mut(prev_hop) {
                    Some(p) => p.last_validation_time = Some(now),
                    None => return Ok(()),
                }
                self.tree.potential_new_parent = false;
                if self.tree.current_parent != Some(prev_hop) || self.tree.station_update_due {
                    self.register_with_root(host, prev_hop)?;
                    self.tree.station_update_due = false;
                }
                self.tree.current_parent = Some(prev_hop);
                Ok(())
            }
        }
    }

    /// Periodic parent upkeep of a non-root node in FORWARDING.
    fn maintain_parent(&mut self, host: &mut dyn MeshHost) -> Result<(), HwmpError> {
        let rt = &self.route_table;
        let unreachable: Vec<MacAddress> = self
            .tree
            .parents
            .iter()
            .filter(|p| !rt.is_valid(p.addr))
            .map(|p| p.addr)
            .collect();
        if let Some(current) = self.tree.current_parent {
            if unreachable.contains(&current) {
                info!(self.logger, "Current parent unreachable"; "parent"=>current);
                self.tree.parents.retain(|p| p.addr != current);
                return self.set_tree_state(host, TbrState::Init);
            }
        }
        self.tree.parents.retain(|p| !unreachable.contains(&p.addr));
        if self.tree.parents.is_empty() {
            info!(self.logger, "No parent candidates left");
            return self.set_tree_state(host, TbrState::Init);
        }

        let best = if self.tree.potential_new_parent {
            self.tree.preferred_parent(self.params.better_parent_factor)
        } else {
            self.tree.current_parent
        };
        let best = match best {
            Some(best) => best,
            None => return self.set_tree_state(host, TbrState::Init),
        };
        let requires_registration = self
            .tree
            .parent(best)
            .map_or(false, |p| p.rann.requires_registration());

        if requires_registration {
            self.send_maintenance_rreq(host, best)?;
        } else {
            if self.tree.current_parent != Some(best) || self.tree.station_update_due {
                self.register_with_root(host, best)?;
                self.tree.station_update_due = false;
            }
            self.tree.potential_new_parent = false;
            self.tree.current_parent = Some(best);
        }

        self.schedule_maintenance(host);
        Ok(())
    }

    fn schedule_maintenance(&mut self, host: &mut dyn MeshHost) {
        let delay = self.params.root_maintenance_period + self.random_delay(self.params.jitter);
        host.schedule(
            delay,
            TimerEvent::MaintenanceTimer {
                epoch: self.tree.maintenance_epoch,
            },
        );
    }

    /// Remembers an announcement and the neighbor it came from. A fresher root
    /// sequence number schedules a relay.
    fn record_rann(&mut self, host: &mut dyn MeshHost, rann: RootAnnouncementMessage, prev_hop: MacAddress) {
        let now = host.now();
        let fresher = match self.tree.root {
            Some(ref root) => rann.root_seq_no > root.rann.root_seq_no,
            None => true,
        };
        if fresher {
            let delay = self.params.rann_propagation_delay
                + self.random_delay(Duration::milliseconds(RANN_PROPAGATION_JITTER));
            host.schedule(delay, TimerEvent::RannTimer);
        }
        let stale_root = self
            .tree
            .root
            .as_ref()
            .map_or(false, |root| rann.root_seq_no < root.rann.root_seq_no);
        if !stale_root {
            self.tree.root = Some(RootItem {
                rann: rann.clone(),
                last_rann_time: now,
                prev_hop,
            });
        }
        self.tree.upsert_candidate(prev_hop, rann, now);
    }

    /// Sends the registration of this node to the root through `next_hop`.
    fn register_with_root(&mut self, host: &mut dyn MeshHost, next_hop: MacAddress) -> Result<(), HwmpError> {
        match self.tree.root_addr_seq() {
            Some(root) => self.send_tbr_gratuitous_rrep(host, root, next_hop),
            None => Ok(()),
        }
    }

    // **************************************************
    // *************** Root announcements ***************
    // **************************************************

    fn send_rann(&mut self, host: &mut dyn MeshHost) -> Result<(), HwmpError> {
        let seq_no = self.next_seq_no();
        let now = host.now();
        let rann = match self.tree.root.as_mut() {
            Some(root) => {
                root.rann.root_seq_no = seq_no;
                root.last_rann_time = now;
                root.rann.clone()
            }
            None => {
                let msg = String::from("Root announcement requested without a root descriptor");
                return Err(HwmpErrorKind::Protocol(msg).into());
            }
        };
        self.send_control(host, MacAddress::BROADCAST, Messages::RANN(rann))?;
        self.stats.rann_initiated += 1;
        Ok(())
    }

    /// Re-floods the root announcement as seen through the current parent.
    fn relay_rann(&mut self, host: &mut dyn MeshHost) -> Result<(), HwmpError> {
        let now = host.now();
        let mut rann = match self.tree.root {
            Some(ref root) => root.rann.clone(),
            None => return Ok(()),
        };
        let parent = match self.tree.current_parent.and_then(|c| self.tree.parent(c)) {
            Some(parent) => parent.clone(),
            None => return Ok(()),
        };

        if rann.ttl <= 1 {
            self.stats.rann_ttl_expired += 1;
            self.log_drop(parent.addr, "TTL_EXPIRED", &Messages::RANN(rann));
            return Ok(());
        }
        rann.ttl -= 1;
        rann.hop_count = parent.rann.hop_count;
        rann.metric = parent.rann.metric;
        let elapsed = duration_to_ms(now - parent.last_rann_time);
        rann.lifetime = rann.lifetime.saturating_sub(elapsed);

        self.send_control(host, MacAddress::BROADCAST, Messages::RANN(rann))?;
        self.stats.rann_relayed += 1;
        Ok(())
    }

    pub(crate) fn receive_rann(
        &mut self,
        host: &mut dyn MeshHost,
        transmitter: MacAddress,
        mut rann: RootAnnouncementMessage,
    ) -> Result<(), HwmpError> {
        let prev_hop = transmitter;
        let now = host.now();

        if rann.root == self.address {
            self.stats.rann_duplicate += 1;
            self.log_drop(prev_hop, "DUPLICATE", &Messages::RANN(rann));
            return Ok(());
        }
        if rann.hop_count > self.params.net_diameter {
            warn!(self.logger, "Root announcement beyond the net diameter"; "root"=>rann.root);
            self.log_drop(prev_hop, "HOP_LIMIT", &Messages::RANN(rann));
            return Ok(());
        }

        let lifetime = Duration::milliseconds(i64::from(rann.lifetime));
        if rann.root != prev_hop {
            self.update_neighbor_route(host, prev_hop, lifetime);
        }
        let metric = rann.metric.saturating_add(self.link_cost(host, prev_hop));
        let freshness = self.freshness(rann.root, rann.root_seq_no, metric);
        if freshness == Freshness::Stale {
            self.log_drop(prev_hop, "STALE_SEQ_NO", &Messages::RANN(rann));
            return Ok(());
        }
        if self.params.is_root {
            let msg = format!("Root {} heard an announcement from root {}", self.address, rann.root);
            return Err(HwmpErrorKind::Protocol(msg).into());
        }

        rann.hop_count = rann.hop_count.saturating_add(1);
        rann.metric = metric;
        if freshness == Freshness::Update {
            self.route_table.replace(RouteUpdate {
                destination: rann.root,
                seq_no: rann.root_seq_no,
                hop_count: rann.hop_count,
                metric,
                next_hop: prev_hop,
                lifetime: now + lifetime,
                is_active: true,
                interface: DEFAULT_INTERFACE,
            });
        }
        self.stats.rann_received += 1;
        logging::log_handle_message(
            &self.logger,
            prev_hop,
            MessageStatus::ACCEPTED,
            None,
            None,
            &Messages::RANN(rann.clone()),
        );

        self.handle_tree_event(host, TbrEvent::RannReceived { rann, prev_hop })
    }

    /// Validates `parent` by asking the root for a reply through it.
    fn send_maintenance_rreq(&mut self, host: &mut dyn MeshHost, parent: MacAddress) -> Result<(), HwmpError> {
        let (root, lifetime) = match self.tree.root {
            Some(ref root) => (AddrSeq::new(root.rann.root, root.rann.root_seq_no), root.rann.lifetime),
            None => return Ok(()),
        };
        let seq_no = self.next_seq_no();
        let rreq = RouteRequestMessage {
            flags: RREQFlags::DESTINATION_ONLY,
            hop_count: 0,
            ttl: self.params.net_diameter,
            rreq_id: self.next_rreq_id(),
            source: AddrSeq::new(self.address, seq_no),
            lifetime,
            metric: 0,
            destination: root,
        };
        debug!(self.logger, "Validating parent"; "parent"=>parent);
        self.send_rreq_frame(host, rreq, parent, None, false)?;
        self.stats.rreq_uc_initiated += 1;
        host.schedule(
            self.params.net_traversal_time(),
            TimerEvent::ParentRrepTimeout { parent },
        );
        Ok(())
    }

    // **************************************************
    // ***************** Tree forwarding ****************
    // **************************************************

    /// Decides where the tree takes a frame.
    pub(crate) fn tree_route(&self, frame: &DataFrame) -> TreeRoute {
        if let Some(item) = self.proxies.lookup(frame.destination) {
            if item.in_mesh {
                if let Some(next_hop) = self.forwarding.next_hop(item.proxy) {
                    return TreeRoute::Downstream(next_hop);
                }
            }
        }
        match self.tree.current_parent {
            Some(parent) if parent == frame.transmitter => TreeRoute::Unreachable,
            Some(parent) => TreeRoute::Upstream(parent),
            None if self.params.is_root => TreeRoute::BufferAtRoot,
            None => TreeRoute::Unreachable,
        }
    }

    /// Sends a frame along the tree. Returns false if the tree cannot take it.
    pub(crate) fn tree_relay_data_frame(
        &mut self,
        host: &mut dyn MeshHost,
        mut frame: DataFrame,
    ) -> Result<bool, HwmpError> {
        if !self.tree.is_forwarding() {
            return Ok(false);
        }
        match self.tree_route(&frame) {
            TreeRoute::Downstream(next_hop) | TreeRoute::Upstream(next_hop) => {
                frame.uses_tbr = true;
                frame.receiver = next_hop;
                frame.transmitter = self.address;
                logging::log_tx(&self.logger, next_hop, &frame);
                host.transmit_data(frame)?;
                Ok(true)
            }
            TreeRoute::BufferAtRoot => {
                let dest = frame.destination;
                if self.buffer_frame(host, frame) && !self.sent_table.contains(dest) {
                    let root = self.address;
                    self.send_triggered_rreq(host, dest, root)?;
                }
                Ok(true)
            }
            TreeRoute::Unreachable => Ok(false),
        }
    }
}
