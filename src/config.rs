//! Configuration of an HWMP instance. An `HwmpConfig` is what gets read from (or written to)
//! a TOML file; every field is optional and falls back to the protocol default.
//! `Params` is the resolved, validated, immutable form the protocol runs with.
use crate::{HwmpError, HwmpErrorKind};
use chrono::Duration;
use slog::Logger;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

// **************************************************
// ************ Configuration parameters ************
// **************************************************
const ACTIVE_ROUTE_TIMEOUT: i64 = 5000; //milliseconds
const ROUTE_DELETION_CONSTANT: i32 = 5;
const NET_DIAMETER: u8 = 7;
const NODE_TRAVERSAL_TIME: i64 = 100; //milliseconds
const RREQ_INITIAL_TTL: u8 = 2;
const RREQ_TTL_INCREMENT: u8 = 2;
const RREQ_TTL_THRESHOLD: u8 = 5;
const RREQ_ATTEMPTS_EXPANDING_RING: u32 = 2;
const RREQ_ATTEMPTS_FULL_TTL: u32 = 3;
const RREQ_DO_FLAG: bool = true;
const RREQ_RF_FLAG: bool = true;
const BUFFER_SIZE_IN_PACKETS: usize = 100;
const RANN_PERIOD: i64 = 4000; //milliseconds
const ROOT_MAINTENANCE_PERIOD: i64 = 4000; //milliseconds
const RANN_PROPAGATION_DELAY: i64 = 20; //milliseconds
const JITTER_TIME: i64 = 50; //milliseconds
const BETTER_PARENT_FACTOR: f64 = 1.1;
const ROOT_REGISTRATION: bool = true;

/// Maximum value of a hop count. Used as the "unreachable" marker of disabled routes.
pub const HOPCOUNT_MAX: u8 = 0xFF;
/// Maximum value of a path metric. Used as the "unreachable" marker of disabled routes.
pub const METRIC_MAX: u32 = 0xFFFF_FFFF;

/// Policy used to pick the TTL of route requests.
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone, Copy)]
pub enum RouteDiscoveryType {
    /// Start small and grow the TTL on every failed attempt.
    ExpandingRing,
    /// Every attempt uses the net diameter.
    FullTtl,
}

impl Default for RouteDiscoveryType {
    fn default() -> Self {
        RouteDiscoveryType::ExpandingRing
    }
}

/// Link cost function used to accumulate path metrics.
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone, Copy)]
pub enum MetricType {
    /// Every link costs 1.
    HopCount,
    /// The host-reported airtime cost is used as is.
    Airtime,
}

impl Default for MetricType {
    fn default() -> Self {
        MetricType::Airtime
    }
}

/// User-facing configuration of an HWMP instance. All durations are in milliseconds.
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone, Default)]
pub struct HwmpConfig {
    /// Lifetime granted to a route every time it is used.
    pub active_route_timeout: Option<i64>,
    /// Lifetime advertised in replies sent by the destination itself.
    pub my_route_timeout: Option<i64>,
    /// Lifetime carried in route requests.
    pub reverse_route_timeout: Option<i64>,
    /// Multiplier of the active route timeout that yields the deletion period.
    pub route_deletion_constant: Option<i32>,
    /// Upper bound on hop count across the mesh.
    pub net_diameter: Option<u8>,
    /// Conservative estimate of the per-hop traversal time.
    pub node_traversal_time: Option<i64>,
    pub route_discovery_type: Option<RouteDiscoveryType>,
    pub rreq_ttl_initial: Option<u8>,
    pub rreq_ttl_increment: Option<u8>,
    pub rreq_ttl_threshold: Option<u8>,
    /// Number of requests sent with TTL equal to the net diameter before giving up.
    pub rreq_attempts: Option<u32>,
    pub rreq_destination_only: Option<bool>,
    pub rreq_reply_and_forward: Option<bool>,
    /// Packet-count budget of the route-pending buffer.
    pub buffer_size_packets: Option<usize>,
    /// Byte budget of the route-pending buffer. Mutually exclusive with `buffer_size_packets`.
    pub buffer_size_bytes: Option<usize>,
    /// This mesh point announces itself as the tree root.
    pub is_root: Option<bool>,
    /// Mesh points must validate their parent with the root before registering.
    pub root_registration: Option<bool>,
    pub rann_period: Option<i64>,
    pub root_maintenance_period: Option<i64>,
    pub active_root_timeout: Option<i64>,
    pub rann_propagation_delay: Option<i64>,
    pub jitter: Option<i64>,
    /// How much better a candidate parent's metric must be before switching to it.
    pub better_parent_factor: Option<f64>,
    pub metric: Option<MetricType>,
}

/// Resolved protocol parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Params {
    pub active_route_timeout: Duration,
    pub my_route_timeout: Duration,
    pub reverse_route_timeout: Duration,
    pub route_deletion_constant: i32,
    pub net_diameter: u8,
    pub node_traversal_time: Duration,
    pub route_discovery_type: RouteDiscoveryType,
    pub rreq_ttl_initial: u8,
    pub rreq_ttl_increment: u8,
    pub rreq_ttl_threshold: u8,
    pub rreq_attempts: u32,
    pub rreq_do_flag: bool,
    pub rreq_rf_flag: bool,
    pub buffer_limit: BufferLimit,
    pub is_root: bool,
    pub root_registration: bool,
    pub rann_period: Duration,
    pub root_maintenance_period: Duration,
    pub active_root_timeout: Duration,
    pub rann_propagation_delay: Duration,
    pub jitter: Duration,
    pub better_parent_factor: f64,
    pub metric: MetricType,
}

/// Budget of the route-pending packet buffer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BufferLimit {
    Packets(usize),
    Bytes(usize),
}

impl HwmpConfig {
    /// Creates a configuration where every value takes its default.
    pub fn new() -> HwmpConfig {
        Default::default()
    }

    /// Default configuration for the root mesh point.
    pub fn root() -> HwmpConfig {
        HwmpConfig {
            is_root: Some(true),
            ..Default::default()
        }
    }

    /// Loads a configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(file_path: P) -> Result<HwmpConfig, HwmpError> {
        let mut file_content = String::new();
        let mut file = File::open(file_path).map_err(|e| HwmpError {
            kind: HwmpErrorKind::Io(String::from("Failed to open configuration file")),
            cause: Some(Box::new(e)),
        })?;
        file.read_to_string(&mut file_content).map_err(|e| HwmpError {
            kind: HwmpErrorKind::Io(String::from("Failed to read configuration file")),
            cause: Some(Box::new(e)),
        })?;
        toml::from_str(&file_content).map_err(|e| HwmpError {
            kind: HwmpErrorKind::Serialization(String::from(
                "Failed to deserialize configuration file",
            )),
            cause: Some(Box::new(e)),
        })
    }

    ///Writes the current configuration object to a TOML file.
    pub fn write_to_file<P: AsRef<Path>>(&self, file_path: P) -> Result<(), HwmpError> {
        let data = toml::to_string(self).map_err(|e| HwmpError {
            kind: HwmpErrorKind::Serialization(String::from("Error serializing configuration")),
            cause: Some(Box::new(e)),
        })?;
        let mut file = File::create(&file_path).map_err(|e| HwmpError {
            kind: HwmpErrorKind::Io(String::from("Failed to create configuration file")),
            cause: Some(Box::new(e)),
        })?;
        write!(file, "{}", data).map_err(|e| HwmpError {
            kind: HwmpErrorKind::Io(String::from("Failed to write configuration file")),
            cause: Some(Box::new(e)),
        })?;

        Ok(())
    }

    /// Resolves defaults and validates the configuration.
    /// Values that are legal but unwise only produce a warning.
    pub fn resolve(&self, logger: &Logger) -> Result<Params, HwmpError> {
        let net_diameter = self.net_diameter.unwrap_or(NET_DIAMETER);
        if net_diameter == 0 {
            return Err(config_error("Net diameter must be at least 1"));
        }
        let node_traversal_time =
            Duration::milliseconds(self.node_traversal_time.unwrap_or(NODE_TRAVERSAL_TIME));
        let net_traversal_time = node_traversal_time * 2 * i32::from(net_diameter);

        let active_route_timeout =
            Duration::milliseconds(self.active_route_timeout.unwrap_or(ACTIVE_ROUTE_TIMEOUT));
        if active_route_timeout < net_traversal_time {
            warn!(
                logger,
                "Active route timeout is low";
                "value_ms"=>active_route_timeout.num_milliseconds(),
                "reason"=>"Should be >= 2 * net diameter * node traversal time",
            );
        }
        let my_route_timeout = self
            .my_route_timeout
            .map(Duration::milliseconds)
            .unwrap_or(active_route_timeout * 2);
        if my_route_timeout < active_route_timeout {
            warn!(logger, "My route timeout is lower than the active route timeout");
        }
        let reverse_route_timeout = self
            .reverse_route_timeout
            .map(Duration::milliseconds)
            .unwrap_or(active_route_timeout);
        if reverse_route_timeout < net_traversal_time {
            warn!(logger, "Reverse route timeout is low");
        }
        let route_deletion_constant = self
            .route_deletion_constant
            .unwrap_or(ROUTE_DELETION_CONSTANT);
        if route_deletion_constant < 1 {
            return Err(config_error("Route deletion constant must be at least 1"));
        }

        let route_discovery_type = self.route_discovery_type.unwrap_or_default();
        let (rreq_ttl_initial, rreq_ttl_increment, rreq_ttl_threshold, rreq_attempts) =
            match route_discovery_type {
                RouteDiscoveryType::ExpandingRing => {
                    let initial = self.rreq_ttl_initial.unwrap_or(RREQ_INITIAL_TTL);
                    if initial == 0 || initial > net_diameter {
                        return Err(config_error(
                            "Initial RREQ TTL must be within 1 and the net diameter",
                        ));
                    }
                    let threshold = self
                        .rreq_ttl_threshold
                        .unwrap_or_else(|| RREQ_TTL_THRESHOLD.min(net_diameter));
                    if threshold < initial || threshold > net_diameter {
                        return Err(config_error(
                            "RREQ TTL threshold must be within the initial TTL and the net diameter",
                        ));
                    }
                    (
                        initial,
                        self.rreq_ttl_increment.unwrap_or(RREQ_TTL_INCREMENT),
                        threshold,
                        self.rreq_attempts.unwrap_or(RREQ_ATTEMPTS_EXPANDING_RING),
                    )
                }
                RouteDiscoveryType::FullTtl => (
                    net_diameter,
                    1,
                    net_diameter,
                    self.rreq_attempts.unwrap_or(RREQ_ATTEMPTS_FULL_TTL),
                ),
            };
        if rreq_attempts == 0 {
            return Err(config_error("RREQ attempts must be at least 1"));
        }

        let buffer_limit = match (self.buffer_size_packets, self.buffer_size_bytes) {
            (Some(_), Some(_)) => {
                return Err(config_error(
                    "Buffer limits in packets and in bytes are mutually exclusive",
                ))
            }
            (None, Some(bytes)) => BufferLimit::Bytes(bytes),
            (packets, None) => BufferLimit::Packets(packets.unwrap_or(BUFFER_SIZE_IN_PACKETS)),
        };

        let rann_period = Duration::milliseconds(self.rann_period.unwrap_or(RANN_PERIOD));
        let active_root_timeout = self
            .active_root_timeout
            .map(Duration::milliseconds)
            .unwrap_or(my_route_timeout);
        if active_root_timeout <= rann_period {
            warn!(logger, "Root timeout should be more than the root announcement period");
        }
        let better_parent_factor = self.better_parent_factor.unwrap_or(BETTER_PARENT_FACTOR);
        if better_parent_factor < 1.0 {
            return Err(config_error("Better parent factor must be >= 1.0"));
        }

        Ok(Params {
            active_route_timeout,
            my_route_timeout,
            reverse_route_timeout,
            route_deletion_constant,
            net_diameter,
            node_traversal_time,
            route_discovery_type,
            rreq_ttl_initial,
            rreq_ttl_increment,
            rreq_ttl_threshold,
            rreq_attempts,
            rreq_do_flag: self.rreq_destination_only.unwrap_or(RREQ_DO_FLAG),
            rreq_rf_flag: self.rreq_reply_and_forward.unwrap_or(RREQ_RF_FLAG),
            buffer_limit,
            is_root: self.is_root.unwrap_or(false),
            root_registration: self.root_registration.unwrap_or(ROOT_REGISTRATION),
            rann_period,
            root_maintenance_period: Duration::milliseconds(
                self.root_maintenance_period
                    .unwrap_or(ROOT_MAINTENANCE_PERIOD),
            ),
            active_root_timeout,
            rann_propagation_delay: Duration::milliseconds(
                self.rann_propagation_delay.unwrap_or(RANN_PROPAGATION_DELAY),
            ),
            jitter: Duration::milliseconds(self.jitter.unwrap_or(JITTER_TIME)),
            better_parent_factor,
            metric: self.metric.unwrap_or_default(),
        })
    }
}

impl Params {
    /// Time for a frame to cross the whole mesh and come back.
    pub fn net_traversal_time(&self) -> Duration {
        self.node_traversal_time * 2 * i32::from(self.net_diameter)
    }

    /// How long a disabled route is kept before it is physically deleted.
    pub fn deletion_period(&self) -> Duration {
        self.active_route_timeout * self.route_deletion_constant
    }

    /// How long a flooded request is remembered for duplicate suppression.
    pub fn flood_record_time(&self) -> Duration {
        self.net_traversal_time() * 2
    }
}

fn config_error(msg: &str) -> HwmpError {
    HwmpErrorKind::Configuration(msg.to_string()).into()
}
