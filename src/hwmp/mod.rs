//! Implementation of the Hybrid Wireless Mesh Protocol (HWMP) path selection.
//! One `Hwmp` instance serves one mesh interface. It combines on-demand route discovery
//! (RREQ/RREP/RERR, see `discovery`) with a proactive tree rooted at a designated mesh
//! point (RANN and registrations, see `tbr`). The host drives it through the entry
//! points below and through the `MeshRouter` trait for data frames.
use crate::common::MacAddress;
use crate::config::{HwmpConfig, Params, RouteDiscoveryType};
use crate::host::{MeshHost, TimerEvent};
use crate::logging::{self, MessageStatus};
use crate::HwmpError;

use chrono::Duration;
use rand::{rngs::StdRng, SeedableRng};
use rand_distr::{Distribution, Uniform};
use slog::Logger;

pub mod discovery;
pub mod messages;
pub mod packet_buffer;
pub mod precursors;
pub mod proxy;
pub mod route_table;
pub mod router;
pub mod stats;
pub mod strategies;
pub mod tbr;
pub mod tracker;

use self::messages::*;
use self::packet_buffer::PacketBuffer;
use self::precursors::Blacklist;
use self::proxy::{ForwardingTable, ProxyTable};
use self::route_table::{RouteTable, RouteUpdate};
use self::stats::HwmpStats;
use self::strategies::{build_link_metric, LinkMetric};
use self::tbr::{TbrEvent, TbrState, TreeState};
use self::tracker::{SeenTable, SentTable};

pub use self::router::{MeshRouter, RouteOutcome};

/// Interface index used for every route. A protocol instance serves a single interface.
const DEFAULT_INTERFACE: usize = 0;

/// A route pushed by the host, e.g. from a management command.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PathUpdate {
    pub destination: MacAddress,
    pub seq_no: u32,
    pub hop_count: u8,
    pub metric: u32,
    pub next_hop: MacAddress,
    /// Relative to the time of the update.
    pub lifetime: Duration,
    pub is_active: bool,
}

/// HWMP protocol instance.
#[derive(Debug)]
pub struct Hwmp {
    params: Params,
    address: MacAddress,
    seq_no: u32,
    rreq_id: u32,
    route_table: RouteTable,
    sent_table: SentTable,
    seen_table: SeenTable,
    buffer: PacketBuffer,
    blacklist: Blacklist,
    proxies: ProxyTable,
    forwarding: ForwardingTable,
    tree: TreeState,
    link_metric: Box<dyn LinkMetric>,
    stats: HwmpStats,
    rng: StdRng,
    logger: Logger,
}

impl Hwmp {
    /// Creates a new instance for the mesh point `address`. The configuration is
    /// resolved and validated here; `seed` drives every random delay of the instance.
    pub fn new(
        address: MacAddress,
        config: &HwmpConfig,
        seed: u64,
        logger: Logger,
    ) -> Result<Self, HwmpError> {
        let params = config.resolve(&logger)?;
        info!(logger, "HWMP instance created"; "address"=>address, "is_root"=>params.is_root);

        Ok(Hwmp {
            address,
            seq_no: 0,
            rreq_id: 0,
            route_table: RouteTable::new(),
            sent_table: SentTable::new(),
            seen_table: SeenTable::new(),
            buffer: PacketBuffer::new(params.buffer_limit),
            blacklist: Blacklist::default(),
            proxies: ProxyTable::new(),
            forwarding: ForwardingTable::new(),
            tree: TreeState::new(),
            link_metric: build_link_metric(params.metric),
            stats: HwmpStats::default(),
            rng: StdRng::seed_from_u64(seed),
            params,
            logger,
        })
    }

    /// Starts the protocol. Must be called once, before any other entry point.
    pub fn init(&mut self, host: &mut dyn MeshHost) -> Result<(), HwmpError> {
        self.seq_no = 1;
        self.rreq_id = 1;
        let res = self.set_tree_state(host, TbrState::Init);
        self.arm_route_timers(host);
        res
    }

    /// Handles a control frame transmitted by the neighbor `transmitter`.
    /// `receiver` is the frame's RA, the broadcast address for flooded frames.
    pub fn receive_control_frame(
        &mut self,
        host: &mut dyn MeshHost,
        transmitter: MacAddress,
        receiver: MacAddress,
        msg: Messages,
    ) -> Result<(), HwmpError> {
        let res = match msg {
            Messages::RREQ(msg) => self.receive_rreq(host, transmitter, receiver, msg),
            Messages::RREP(msg) => {
                if msg.is_gratuitous() {
                    self.receive_gratuitous_rrep(host, transmitter, msg)
                } else {
                    self.receive_rrep(host, transmitter, msg)
                }
            }
            Messages::RERR(msg) => self.receive_rerr(host, transmitter, msg),
            Messages::RANN(msg) => self.receive_rann(host, transmitter, msg),
        };
        self.arm_route_timers(host);
        res
    }

    /// Handles a timer previously requested through `MeshHost::schedule`.
    pub fn handle_timeout(
        &mut self,
        host: &mut dyn MeshHost,
        event: TimerEvent,
    ) -> Result<(), HwmpError> {
        let res = match event {
            TimerEvent::RreqReplyTimeout { dest, source, attempt } => {
                self.handle_reply_timeout(host, dest, source, attempt)
            }
            TimerEvent::ActiveRouteExpiry { deadline } => {
                let now = host.now();
                let expired = self.route_table.handle_expiry_timer(
                    deadline,
                    now,
                    self.params.deletion_period(),
                )?;
                for dest in expired {
                    debug!(self.logger, "Route expired"; "destination"=>dest);
                }
                Ok(())
            }
            TimerEvent::RouteDeleteExpiry { deadline } => {
                let deleted = self.route_table.handle_delete_timer(deadline, host.now());
                for dest in deleted {
                    debug!(self.logger, "Route deleted"; "destination"=>dest);
                }
                Ok(())
            }
            TimerEvent::SeenEntryExpiry => {
                self.seen_table.expire_oldest();
                Ok(())
            }
            TimerEvent::RannTimer => self.handle_tree_event(host, TbrEvent::RannTimer),
            TimerEvent::MaintenanceTimer { epoch } => {
                self.handle_tree_event(host, TbrEvent::MaintenanceTimer { epoch })
            }
            TimerEvent::ParentRrepTimeout { parent } => {
                self.handle_tree_event(host, TbrEvent::RrepTimer { parent })
            }
        };
        self.arm_route_timers(host);
        res
    }

    /// The link to `next_hop` broke, while sending to `dest` if known.
    pub fn link_failure(
        &mut self,
        host: &mut dyn MeshHost,
        next_hop: MacAddress,
        dest: Option<MacAddress>,
    ) -> Result<(), HwmpError> {
        if next_hop.is_broadcast() {
            return Ok(());
        }
        info!(self.logger, "Link failure"; "next_hop"=>next_hop);
        host.delete_packets_to(next_hop, dest);
        let res = self.send_rerr_for_link_failure(host, next_hop);
        self.arm_route_timers(host);
        res
    }

    /// The peer link to `neighbor` was closed.
    pub fn link_close(
        &mut self,
        host: &mut dyn MeshHost,
        neighbor: MacAddress,
    ) -> Result<(), HwmpError> {
        self.link_failure(host, neighbor, None)
    }

    /// The host confirmed the link to `neighbor`. Route lifetimes are only extended by
    /// traffic, so there is nothing to do.
    pub fn link_update(&mut self, _host: &mut dyn MeshHost, neighbor: MacAddress) {
        trace!(self.logger, "Link update ignored"; "neighbor"=>neighbor);
    }

    /// Installs a route supplied by the host.
    pub fn path_update(&mut self, host: &mut dyn MeshHost, update: PathUpdate) {
        let now = host.now();
        self.route_table.upsert(RouteUpdate {
            destination: update.destination,
            seq_no: update.seq_no,
            hop_count: update.hop_count,
            metric: update.metric,
            next_hop: update.next_hop,
            lifetime: now + update.lifetime,
            is_active: update.is_active,
            interface: DEFAULT_INTERFACE,
        });
        self.arm_route_timers(host);
    }

    /// A station associated to this mesh point, possibly moving away from `prev_ap`.
    pub fn station_associated(
        &mut self,
        host: &mut dyn MeshHost,
        station: MacAddress,
        prev_ap: Option<MacAddress>,
    ) -> Result<(), HwmpError> {
        info!(self.logger, "Station associated"; "station"=>station);
        if self.tree.is_forwarding() {
            self.tree.station_update_due = true;
        }
        let res = match prev_ap {
            Some(ap) if ap != self.address => self.send_station_reassociation_rreq(host, station),
            _ => Ok(()),
        };
        self.arm_route_timers(host);
        res
    }

    /// A station left this mesh point.
    pub fn station_disassociated(
        &mut self,
        host: &mut dyn MeshHost,
        station: MacAddress,
    ) -> Result<(), HwmpError> {
        info!(self.logger, "Station disassociated"; "station"=>station);
        if self.tree.is_forwarding() {
            self.tree.station_update_due = true;
        }
        let rerr = RouteErrorMessage {
            destinations: vec![AddrSeq::new(station, self.seq_no)],
        };
        self.stats.rerr_initiated += 1;
        self.send_control(host, MacAddress::BROADCAST, Messages::RERR(rerr))
    }

    /// Ignores route requests relayed by `neighbor` for a while, e.g. after the host
    /// found the link to be unidirectional.
    pub fn blacklist_neighbor(&mut self, host: &dyn MeshHost, neighbor: MacAddress) {
        let timeout = self.params.net_traversal_time() * self.params.rreq_attempts as i32;
        self.blacklist.insert(neighbor, host.now() + timeout);
        info!(self.logger, "Neighbor blacklisted"; "neighbor"=>neighbor);
    }

    pub fn address(&self) -> MacAddress {
        self.address
    }

    pub fn seq_no(&self) -> u32 {
        self.seq_no
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn stats(&self) -> &HwmpStats {
        &self.stats
    }

    pub fn route_table(&self) -> &RouteTable {
        &self.route_table
    }

    pub fn sent_table(&self) -> &SentTable {
        &self.sent_table
    }

    pub fn packet_buffer(&self) -> &PacketBuffer {
        &self.buffer
    }

    pub fn proxies(&self) -> &ProxyTable {
        &self.proxies
    }

    pub fn tree_state(&self) -> TbrState {
        self.tree.state
    }

    pub fn current_parent(&self) -> Option<MacAddress> {
        self.tree.current_parent
    }

    pub fn parent_candidates(&self) -> Vec<MacAddress> {
        self.tree.parents.iter().map(|p| p.addr).collect()
    }

    // **************************************************
    // ***************** Shared helpers *****************
    // **************************************************

    /// Schedules whatever route timers the table needs after a change.
    fn arm_route_timers(&mut self, host: &mut dyn MeshHost) {
        for (delay, event) in self.route_table.take_timer_requests(host.now()) {
            host.schedule(delay, event);
        }
    }

    fn send_control(
        &mut self,
        host: &mut dyn MeshHost,
        receiver: MacAddress,
        msg: Messages,
    ) -> Result<(), HwmpError> {
        logging::log_tx(&self.logger, receiver, &msg);
        host.transmit_control(receiver, msg)
    }

    fn link_cost(&self, host: &dyn MeshHost, neighbor: MacAddress) -> u32 {
        self.link_metric.link_cost(host, neighbor)
    }

    /// Extends the lifetime of the route to `dest` by an active route timeout.
    fn refresh_route(
        &mut self,
        host: &dyn MeshHost,
        dest: MacAddress,
        hop_count: Option<u8>,
        metric: Option<u32>,
    ) {
        self.route_table.refresh_lifetime(
            dest,
            hop_count,
            metric,
            host.now(),
            self.params.active_route_timeout,
        );
    }

    /// Refreshes the route to a direct neighbor.
    fn refresh_neighbor_route(&mut self, host: &dyn MeshHost, neighbor: MacAddress) {
        let cost = self.link_cost(host, neighbor);
        self.refresh_route(host, neighbor, Some(1), Some(cost));
    }

    /// Installs a one-hop route to the neighbor a frame was just heard from.
    fn update_neighbor_route(&mut self, host: &dyn MeshHost, neighbor: MacAddress, lifetime: Duration) {
        let metric = self.link_cost(host, neighbor);
        self.route_table.replace(RouteUpdate {
            destination: neighbor,
            seq_no: 0,
            hop_count: 1,
            metric,
            next_hop: neighbor,
            lifetime: host.now() + lifetime,
            is_active: true,
            interface: DEFAULT_INTERFACE,
        });
    }

    fn next_rreq_id(&mut self) -> u32 {
        self.rreq_id = self.rreq_id.wrapping_add(1);
        self.rreq_id
    }

    fn next_seq_no(&mut self) -> u32 {
        self.seq_no = self.seq_no.wrapping_add(1);
        self.seq_no
    }

    /// TTL of the first request of a discovery.
    fn initial_ttl(&self, dest: MacAddress) -> u8 {
        let ttl = match self.params.route_discovery_type {
            RouteDiscoveryType::ExpandingRing => self
                .route_table
                .last_hop_count(dest)
                .unwrap_or(self.params.rreq_ttl_initial),
            RouteDiscoveryType::FullTtl => self.params.rreq_ttl_initial,
        };
        ttl.max(1).min(self.params.net_diameter)
    }

    /// Random delay in `[0, max)`. Zero when `max` is not positive.
    fn random_delay(&mut self, max: Duration) -> Duration {
        let max_ms = max.num_milliseconds();
        if max_ms <= 0 {
            return Duration::zero();
        }
        let dist = Uniform::new(0, max_ms);
        Duration::milliseconds(dist.sample(&mut self.rng))
    }

    fn log_drop<T: slog::KV>(&self, sender: MacAddress, reason: &str, msg: &T) {
        logging::log_handle_message(
            &self.logger,
            sender,
            MessageStatus::DROPPED,
            Some(reason),
            None,
            msg,
        );
    }
}
