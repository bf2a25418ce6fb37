//! Discrete-event simulation of a small mesh where every node runs HWMP.
//!
//! A `SimConfig` describes the nodes, the links between them (with their raw
//! metric) and a list of timed actions. The simulation plays the part of every
//! node's host: it delivers control frames (serialized for the air), data frames
//! and timers in timestamp order, one hop delay per transmission.
use crate::common::MacAddress;
use crate::config::HwmpConfig;
use crate::host::{DataFrame, MeshHost, TimerEvent};
use crate::hwmp::messages::{self, Messages};
use crate::hwmp::stats::HwmpStats;
use crate::hwmp::{Hwmp, MeshRouter, RouteOutcome};
use crate::{HwmpError, HwmpErrorKind};

use chrono::{DateTime, Duration, TimeZone, Utc};
use slog::Logger;
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

const DEFAULT_HOP_DELAY: i64 = 1; //milliseconds
const DEFAULT_LINK_METRIC: u32 = 1;
const DEFAULT_PAYLOAD_SIZE: usize = 64;
const DEFAULT_SEED: u64 = 12345;

/// A mesh point of the simulated topology.
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone, Default)]
pub struct NodeSpec {
    pub id: u32,
    #[serde(default)]
    pub root: bool,
    /// Ids of the stations associated at start.
    #[serde(default)]
    pub stations: Vec<u32>,
}

/// A bidirectional peer link.
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone, Default)]
pub struct LinkSpec {
    pub a: u32,
    pub b: u32,
    /// Raw airtime cost. Defaults to 1.
    pub metric: Option<u32>,
}

///Structure that holds the description of a simulation run.
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone, Default)]
pub struct SimConfig {
    ///Name of the simulation. For informational purposes only.
    pub name: String,
    /// Duration of the simulation in milliseconds.
    pub duration: u64,
    pub seed: Option<u64>,
    /// Propagation plus transmission time of one hop, in milliseconds.
    pub hop_delay: Option<i64>,
    /// Timed actions. See `SimActions` for the syntax.
    #[serde(default)]
    pub actions: Vec<String>,
    /// HWMP configuration shared by every node. The root role comes from the node spec.
    #[serde(default)]
    pub hwmp: HwmpConfig,
    #[serde(default)]
    pub nodes: Vec<NodeSpec>,
    #[serde(default)]
    pub links: Vec<LinkSpec>,
}

impl SimConfig {
    /// Loads a simulation description from a TOML file.
    pub fn from_file<P: AsRef<Path>>(file_path: P) -> Result<SimConfig, HwmpError> {
        let mut file_content = String::new();
        let mut file = File::open(file_path).map_err(|e| HwmpError {
            kind: HwmpErrorKind::Io(String::from("Failed to open simulation file")),
            cause: Some(Box::new(e)),
        })?;
        file.read_to_string(&mut file_content).map_err(|e| HwmpError {
            kind: HwmpErrorKind::Io(String::from("Failed to read simulation file")),
            cause: Some(Box::new(e)),
        })?;
        SimConfig::from_str(&file_content)
    }
}

impl FromStr for SimConfig {
    type Err = HwmpError;

    fn from_str(s: &str) -> Result<SimConfig, HwmpError> {
        toml::from_str(s).map_err(|e| HwmpError {
            kind: HwmpErrorKind::Serialization(String::from("Error parsing simulation file")),
            cause: Some(Box::new(e)),
        })
    }
}

/// Actions the simulation performs at a time offset (milliseconds from the start).
#[derive(Debug, Clone, PartialEq)]
pub enum SimActions {
    /// `SEND <src> <dst> <time> [size]`: a data frame originated by node or station `src`.
    Send(u32, u32, u64, usize),
    /// `LINK_DOWN <a> <b> <time>`: the peer link between two nodes is closed.
    LinkDown(u32, u32, u64),
    /// `ASSOCIATE <station> <node> <time>`: a station (re)associates to a node.
    Associate(u32, u32, u64),
}

impl SimActions {
    fn time(&self) -> u64 {
        match *self {
            SimActions::Send(_, _, t, _) => t,
            SimActions::LinkDown(_, _, t) => t,
            SimActions::Associate(_, _, t) => t,
        }
    }
}

impl FromStr for SimActions {
    type Err = HwmpError;

    fn from_str(s: &str) -> Result<SimActions, HwmpError> {
        let parts: Vec<&str> = s.split_whitespace().collect();
        let name = match parts.first() {
            Some(name) => name.to_uppercase(),
            None => return Err(action_error("Empty action")),
        };
        let num = |idx: usize| -> Result<u64, HwmpError> {
            let part = parts
                .get(idx)
                .ok_or_else(|| action_error(&format!("{} is missing parameters", name)))?;
            part.parse::<u64>().map_err(|e| HwmpError {
                kind: HwmpErrorKind::Configuration(format!("Invalid number {} in action {}", part, s)),
                cause: Some(Box::new(e)),
            })
        };
        let id = |idx: usize| -> Result<u32, HwmpError> {
            let n = num(idx)?;
            if n > u64::from(u32::max_value()) {
                return Err(action_error(&format!("Node id {} out of range", n)));
            }
            Ok(n as u32)
        };

        match name.as_str() {
            "SEND" => {
                let size = if parts.len() > 4 {
                    num(4)? as usize
                } else {
                    DEFAULT_PAYLOAD_SIZE
                };
                Ok(SimActions::Send(id(1)?, id(2)?, num(3)?, size))
            }
            "LINK_DOWN" => Ok(SimActions::LinkDown(id(1)?, id(2)?, num(3)?)),
            "ASSOCIATE" => Ok(SimActions::Associate(id(1)?, id(2)?, num(3)?)),
            _ => Err(action_error(&format!("Unknown action {}", name))),
        }
    }
}

fn action_error(msg: &str) -> HwmpError {
    HwmpErrorKind::Configuration(msg.to_string()).into()
}

/// Summary of a simulation run.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SimReport {
    pub name: String,
    pub frames_originated: u32,
    pub frames_delivered: u32,
    pub control_transmissions: u32,
    pub data_transmissions: u32,
    pub stats: BTreeMap<String, HwmpStats>,
}

#[derive(Debug)]
enum SimEvent {
    Control {
        node: MacAddress,
        transmitter: MacAddress,
        receiver: MacAddress,
        data: Vec<u8>,
    },
    Data {
        node: MacAddress,
        frame: DataFrame,
    },
    Timer {
        node: MacAddress,
        event: TimerEvent,
    },
    LinkFailure {
        node: MacAddress,
        next_hop: MacAddress,
        dest: Option<MacAddress>,
    },
    Action(SimActions),
}

#[derive(Debug)]
enum HostAction {
    Control(MacAddress, Messages),
    Data(DataFrame),
    Timer(Duration, TimerEvent),
    Disassociated(MacAddress),
}

/// Host view of one node while it handles a single event.
struct NodeHost<'a> {
    address: MacAddress,
    now: DateTime<Utc>,
    stations: &'a [MacAddress],
    neighbors: Vec<(MacAddress, u32)>,
    actions: Vec<HostAction>,
}

impl<'a> MeshHost for NodeHost<'a> {
    fn now(&self) -> DateTime<Utc> {
        self.now
    }

    fn link_metric(&self, neighbor: MacAddress) -> u32 {
        self.neighbors
            .iter()
            .find(|(n, _)| *n == neighbor)
            .map_or(0, |(_, metric)| *metric)
    }

    fn is_self_or_station(&self, addr: MacAddress) -> bool {
        addr == self.address || self.stations.contains(&addr)
    }

    fn is_bss_station(&self, addr: MacAddress) -> bool {
        self.stations.contains(&addr)
    }

    fn neighbor_count(&self) -> usize {
        self.neighbors.len()
    }

    fn associated_stations(&self) -> Vec<MacAddress> {
        self.stations.to_vec()
    }

    fn transmit_control(&mut self, receiver: MacAddress, msg: Messages) -> Result<(), HwmpError> {
        self.actions.push(HostAction::Control(receiver, msg));
        Ok(())
    }

    fn transmit_data(&mut self, frame: DataFrame) -> Result<(), HwmpError> {
        self.actions.push(HostAction::Data(frame));
        Ok(())
    }

    fn schedule(&mut self, delay: Duration, event: TimerEvent) {
        self.actions.push(HostAction::Timer(delay, event));
    }

    fn station_disassociated(&mut self, station: MacAddress) {
        self.actions.push(HostAction::Disassociated(station));
    }
}

#[derive(Debug)]
struct SimNode {
    hwmp: Hwmp,
    stations: Vec<MacAddress>,
    delivered: Vec<DataFrame>,
}

/// A running simulation.
#[derive(Debug)]
pub struct Simulation {
    name: String,
    start: DateTime<Utc>,
    now: DateTime<Utc>,
    duration: Duration,
    hop_delay: Duration,
    nodes: BTreeMap<MacAddress, SimNode>,
    links: HashMap<(MacAddress, MacAddress), u32>,
    queue: BTreeMap<(DateTime<Utc>, u64), SimEvent>,
    next_event_id: u64,
    next_frame_seq: u32,
    frames_originated: u32,
    control_transmissions: u32,
    data_transmissions: u32,
    logger: Logger,
}

fn link_key(a: MacAddress, b: MacAddress) -> (MacAddress, MacAddress) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

impl Simulation {
    /// Builds the topology and starts HWMP on every node.
    pub fn new(config: &SimConfig, logger: Logger) -> Result<Simulation, HwmpError> {
        let start = Utc.timestamp(0, 0);
        let seed = config.seed.unwrap_or(DEFAULT_SEED);
        let mut sim = Simulation {
            name: config.name.clone(),
            start,
            now: start,
            duration: Duration::milliseconds(config.duration as i64),
            hop_delay: Duration::milliseconds(config.hop_delay.unwrap_or(DEFAULT_HOP_DELAY)),
            nodes: BTreeMap::new(),
            links: HashMap::new(),
            queue: BTreeMap::new(),
            next_event_id: 0,
            next_frame_seq: 0,
            frames_originated: 0,
            control_transmissions: 0,
            data_transmissions: 0,
            logger,
        };

        for spec in config.nodes.iter() {
            let address = MacAddress::from_id(spec.id);
            if sim.nodes.contains_key(&address) {
                return Err(action_error(&format!("Node {} defined twice", spec.id)));
            }
            let mut hwmp_config = config.hwmp.clone();
            hwmp_config.is_root = Some(spec.root);
            let node_logger = sim.logger.new(o!("node"=>address.to_string()));
            let hwmp = Hwmp::new(address, &hwmp_config, seed.wrapping_add(u64::from(spec.id)), node_logger)?;
            let stations = spec.stations.iter().map(|s| MacAddress::from_id(*s)).collect();
            sim.nodes.insert(
                address,
                SimNode {
                    hwmp,
                    stations,
                    delivered: Vec::new(),
                },
            );
        }

        for link in config.links.iter() {
            let a = MacAddress::from_id(link.a);
            let b = MacAddress::from_id(link.b);
            if !sim.nodes.contains_key(&a) || !sim.nodes.contains_key(&b) || a == b {
                return Err(action_error(&format!("Invalid link {} - {}", link.a, link.b)));
            }
            sim.links
                .insert(link_key(a, b), link.metric.unwrap_or(DEFAULT_LINK_METRIC));
        }

        for action in config.actions.iter() {
            let action: SimActions = action.parse()?;
            let at = start + Duration::milliseconds(action.time() as i64);
            sim.push_event(at, SimEvent::Action(action));
        }

        let addresses: Vec<MacAddress> = sim.nodes.keys().copied().collect();
        for address in addresses {
            sim.dispatch(address, |hwmp, host| hwmp.init(host))?;
        }
        info!(sim.logger, "Simulation ready"; "name"=>&sim.name, "nodes"=>sim.nodes.len(), "links"=>sim.links.len());

        Ok(sim)
    }

    /// Runs the whole configured duration and summarizes the results.
    pub fn run(&mut self) -> Result<SimReport, HwmpError> {
        self.run_until(self.duration)?;
        Ok(self.report())
    }

    /// Processes every event up to `offset` from the start of the simulation.
    pub fn run_until(&mut self, offset: Duration) -> Result<(), HwmpError> {
        let end = self.start + offset;
        loop {
            let key = match self.queue.keys().next() {
                Some(key) if key.0 <= end => *key,
                _ => break,
            };
            let event = match self.queue.remove(&key) {
                Some(event) => event,
                None => break,
            };
            self.now = key.0;
            if let Err(e) = self.handle_event(event) {
                if e.is_fatal() {
                    error!(self.logger, "Simulation aborted"; "reason"=>e.to_string());
                    return Err(e);
                }
                warn!(self.logger, "Event failed"; "reason"=>e.to_string());
            }
        }
        self.now = end;
        Ok(())
    }

    pub fn report(&self) -> SimReport {
        let stats = self
            .nodes
            .iter()
            .map(|(addr, node)| (addr.to_string(), node.hwmp.stats().clone()))
            .collect();
        SimReport {
            name: self.name.clone(),
            frames_originated: self.frames_originated,
            frames_delivered: self.nodes.values().map(|n| n.delivered.len() as u32).sum(),
            control_transmissions: self.control_transmissions,
            data_transmissions: self.data_transmissions,
            stats,
        }
    }

    /// Protocol instance of node `id`.
    pub fn node(&self, id: u32) -> Option<&Hwmp> {
        self.nodes.get(&MacAddress::from_id(id)).map(|n| &n.hwmp)
    }

    /// Frames delivered to node `id` or its stations so far.
    pub fn delivered(&self, id: u32) -> &[DataFrame] {
        match self.nodes.get(&MacAddress::from_id(id)) {
            Some(node) => &node.delivered,
            None => &[],
        }
    }

    /// Stations currently associated to node `id`.
    pub fn stations(&self, id: u32) -> Vec<MacAddress> {
        self.nodes
            .get(&MacAddress::from_id(id))
            .map(|n| n.stations.clone())
            .unwrap_or_default()
    }

    pub fn elapsed(&self) -> Duration {
        self.now - self.start
    }

    fn push_event(&mut self, at: DateTime<Utc>, event: SimEvent) {
        self.next_event_id += 1;
        self.queue.insert((at, self.next_event_id), event);
    }

    fn neighbors_of(&self, addr: MacAddress) -> Vec<(MacAddress, u32)> {
        let mut neighbors: Vec<(MacAddress, u32)> = self
            .links
            .iter()
            .filter_map(|(&(a, b), &metric)| {
                if a == addr {
                    Some((b, metric))
                } else if b == addr {
                    Some((a, metric))
                } else {
                    None
                }
            })
            .collect();
        neighbors.sort();
        neighbors
    }

    fn owner_of(&self, addr: MacAddress) -> Option<MacAddress> {
        if self.nodes.contains_key(&addr) {
            return Some(addr);
        }
        self.nodes
            .iter()
            .find(|(_, node)| node.stations.contains(&addr))
            .map(|(owner, _)| *owner)
    }

    /// Runs `f` against the protocol instance of `addr` and carries out whatever
    /// the instance asked its host to do.
    fn dispatch<T, F>(&mut self, addr: MacAddress, f: F) -> Result<T, HwmpError>
    where
        F: FnOnce(&mut Hwmp, &mut dyn MeshHost) -> Result<T, HwmpError>,
    {
        let neighbors = self.neighbors_of(addr);
        let now = self.now;
        let node = self
            .nodes
            .get_mut(&addr)
            .ok_or_else(|| action_error(&format!("Unknown node {}", addr)))?;
        let mut host = NodeHost {
            address: addr,
            now,
            stations: &node.stations,
            neighbors,
            actions: Vec::new(),
        };
        let res = f(&mut node.hwmp, &mut host);
        let actions = host.actions;
        self.apply(addr, actions)?;
        res
    }

    fn apply(&mut self, addr: MacAddress, actions: Vec<HostAction>) -> Result<(), HwmpError> {
        let arrival = self.now + self.hop_delay;
        for action in actions {
            match action {
                HostAction::Control(receiver, msg) => {
                    let data = messages::serialize_message(&msg)?;
                    self.control_transmissions += 1;
                    if receiver.is_broadcast() {
                        for (neighbor, _) in self.neighbors_of(addr) {
                            self.push_event(
                                arrival,
                                SimEvent::Control {
                                    node: neighbor,
                                    transmitter: addr,
                                    receiver,
                                    data: data.clone(),
                                },
                            );
                        }
                    } else if self.links.contains_key(&link_key(addr, receiver)) {
                        self.push_event(
                            arrival,
                            SimEvent::Control {
                                node: receiver,
                                transmitter: addr,
                                receiver,
                                data,
                            },
                        );
                    } else {
                        debug!(self.logger, "Control frame lost, no link"; "from"=>addr, "to"=>receiver);
                    }
                }
                HostAction::Data(frame) => {
                    self.data_transmissions += 1;
                    let next_hop = frame.receiver;
                    if self.links.contains_key(&link_key(addr, next_hop)) {
                        self.push_event(arrival, SimEvent::Data { node: next_hop, frame });
                    } else {
                        //The sender finds out from the missing acknowledgement
                        let now = self.now;
                        self.push_event(
                            now,
                            SimEvent::LinkFailure {
                                node: addr,
                                next_hop,
                                dest: Some(frame.destination),
                            },
                        );
                    }
                }
                HostAction::Timer(delay, event) => {
                    let at = self.now + delay;
                    self.push_event(at, SimEvent::Timer { node: addr, event });
                }
                HostAction::Disassociated(station) => {
                    if let Some(node) = self.nodes.get_mut(&addr) {
                        node.stations.retain(|s| *s != station);
                    }
                }
            }
        }
        Ok(())
    }

    fn handle_event(&mut self, event: SimEvent) -> Result<(), HwmpError> {
        match event {
            SimEvent::Control {
                node,
                transmitter,
                receiver,
                data,
            } => {
                let msg = messages::deserialize_message(&data)?;
                self.dispatch(node, |hwmp, host| {
                    hwmp.receive_control_frame(host, transmitter, receiver, msg)
                })
            }
            SimEvent::Data { node, frame } => self.route_frame(node, frame),
            SimEvent::Timer { node, event } => {
                self.dispatch(node, |hwmp, host| hwmp.handle_timeout(host, event))
            }
            SimEvent::LinkFailure {
                node,
                next_hop,
                dest,
            } => self.dispatch(node, |hwmp, host| hwmp.link_failure(host, next_hop, dest)),
            SimEvent::Action(action) => self.handle_action(action),
        }
    }

    fn route_frame(&mut self, node: MacAddress, frame: DataFrame) -> Result<(), HwmpError> {
        let copy = frame.clone();
        let outcome = self.dispatch(node, |hwmp, host| hwmp.route_and_maybe_forward(host, frame))?;
        if outcome == RouteOutcome::NotHandled {
            info!(self.logger, "Frame delivered"; "node"=>node, "source"=>copy.source, "destination"=>copy.destination);
            if let Some(n) = self.nodes.get_mut(&node) {
                n.delivered.push(copy);
            }
        }
        Ok(())
    }

    fn handle_action(&mut self, action: SimActions) -> Result<(), HwmpError> {
        match action {
            SimActions::Send(src, dst, _, size) => {
                let source = MacAddress::from_id(src);
                let owner = match self.owner_of(source) {
                    Some(owner) => owner,
                    None => {
                        warn!(self.logger, "No node serves the source"; "source"=>source);
                        return Ok(());
                    }
                };
                self.next_frame_seq += 1;
                self.frames_originated += 1;
                let frame = DataFrame::new(source, MacAddress::from_id(dst), self.next_frame_seq, vec![0; size]);
                self.route_frame(owner, frame)
            }
            SimActions::LinkDown(a, b, _) => {
                let a = MacAddress::from_id(a);
                let b = MacAddress::from_id(b);
                if self.links.remove(&link_key(a, b)).is_none() {
                    warn!(self.logger, "No such link"; "a"=>a, "b"=>b);
                    return Ok(());
                }
                info!(self.logger, "Link down"; "a"=>a, "b"=>b);
                self.dispatch(a, |hwmp, host| hwmp.link_close(host, b))?;
                self.dispatch(b, |hwmp, host| hwmp.link_close(host, a))
            }
            SimActions::Associate(sta, node, _) => {
                let station = MacAddress::from_id(sta);
                let node = MacAddress::from_id(node);
                if !self.nodes.contains_key(&node) {
                    return Err(action_error(&format!("Unknown node {}", node)));
                }
                let prev_ap = self
                    .nodes
                    .iter()
                    .find(|(_, n)| n.stations.contains(&station))
                    .map(|(addr, _)| *addr);
                if prev_ap == Some(node) {
                    return Ok(());
                }
                if let Some(prev) = prev_ap {
                    if let Some(n) = self.nodes.get_mut(&prev) {
                        n.stations.retain(|s| *s != station);
                    }
                    self.dispatch(prev, |hwmp, host| hwmp.station_disassociated(host, station))?;
                }
                if let Some(n) = self.nodes.get_mut(&node) {
                    n.stations.push(station);
                }
                self.dispatch(node, |hwmp, host| hwmp.station_associated(host, station, prev_ap))
            }
        }
    }
}
