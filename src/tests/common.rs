use crate::common::MacAddress;
use crate::config::HwmpConfig;
use crate::host::{DataFrame, MeshHost, TimerEvent};
use crate::hwmp::messages::*;
use crate::hwmp::Hwmp;
use crate::logging;
use crate::HwmpError;

use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/***********************************************/
/***************  Test Data Types  *************/
/***********************************************/
pub type TestResult<T = ()> = std::result::Result<T, Box<dyn std::error::Error>>;

/// Host double that records every action requested by HWMP.
/// Time only moves through `advance`.
#[derive(Debug)]
pub struct MockHost {
    pub address: MacAddress,
    pub now: DateTime<Utc>,
    pub neighbors: usize,
    pub stations: Vec<MacAddress>,
    pub link_metrics: HashMap<MacAddress, u32>,
    pub control: Vec<(MacAddress, Messages)>,
    pub data: Vec<DataFrame>,
    pub timers: Vec<(Duration, TimerEvent)>,
    pub purged: Vec<(MacAddress, Option<MacAddress>)>,
    pub disassociated: Vec<MacAddress>,
}

impl MockHost {
    pub fn new(address: MacAddress) -> MockHost {
        MockHost {
            address,
            now: Utc.timestamp(1_600_000_000, 0),
            neighbors: 1,
            stations: Vec::new(),
            link_metrics: HashMap::new(),
            control: Vec::new(),
            data: Vec::new(),
            timers: Vec::new(),
            purged: Vec::new(),
            disassociated: Vec::new(),
        }
    }

    /// Raw metric reported for `neighbor`. Unknown links report 0.
    pub fn set_link_metric(&mut self, neighbor: MacAddress, metric: u32) {
        self.link_metrics.insert(neighbor, metric);
    }

    pub fn advance(&mut self, d: Duration) {
        self.now = self.now + d;
    }

    /// Removes and returns the first recorded timer matching `pred`.
    pub fn take_timer<F>(&mut self, pred: F) -> Option<TimerEvent>
    where
        F: Fn(&TimerEvent) -> bool,
    {
        let idx = self.timers.iter().position(|(_, e)| pred(e))?;
        Some(self.timers.remove(idx).1)
    }

    /// Forgets every recorded action.
    pub fn clear(&mut self) {
        self.control.clear();
        self.data.clear();
        self.timers.clear();
        self.purged.clear();
        self.disassociated.clear();
    }

    pub fn last_rreq(&self) -> Option<(MacAddress, RouteRequestMessage)> {
        self.control.iter().rev().find_map(|(ra, msg)| match msg {
            Messages::RREQ(m) => Some((*ra, m.clone())),
            _ => None,
        })
    }

    pub fn last_rrep(&self) -> Option<(MacAddress, RouteResponseMessage)> {
        self.control.iter().rev().find_map(|(ra, msg)| match msg {
            Messages::RREP(m) => Some((*ra, m.clone())),
            _ => None,
        })
    }
}

impl MeshHost for MockHost {
    fn now(&self) -> DateTime<Utc> {
        self.now
    }

    fn link_metric(&self, neighbor: MacAddress) -> u32 {
        self.link_metrics.get(&neighbor).copied().unwrap_or(0)
    }

    fn is_self_or_station(&self, addr: MacAddress) -> bool {
        addr == self.address || self.stations.contains(&addr)
    }

    fn is_bss_station(&self, addr: MacAddress) -> bool {
        self.stations.contains(&addr)
    }

    fn neighbor_count(&self) -> usize {
        self.neighbors
    }

    fn associated_stations(&self) -> Vec<MacAddress> {
        self.stations.clone()
    }

    fn transmit_control(&mut self, receiver: MacAddress, msg: Messages) -> Result<(), HwmpError> {
        self.control.push((receiver, msg));
        Ok(())
    }

    fn transmit_data(&mut self, frame: DataFrame) -> Result<(), HwmpError> {
        self.data.push(frame);
        Ok(())
    }

    fn schedule(&mut self, delay: Duration, event: TimerEvent) {
        self.timers.push((delay, event));
    }

    fn delete_packets_to(&mut self, next_hop: MacAddress, dest: Option<MacAddress>) {
        self.purged.push((next_hop, dest));
    }

    fn station_disassociated(&mut self, station: MacAddress) {
        self.stations.retain(|s| *s != station);
        self.disassociated.push(station);
    }
}

/*******************************************
*********** Utility functions *************
********************************************/
pub fn get_tests_root() -> String {
    env::var("HWMP_TEST_DIR").unwrap_or_else(|_| format!("{}", env::temp_dir().display()))
}

pub fn create_test_dir<'a>(test_name: &'a str) -> String {
    let test_dir_path = format!("{}{}{}", &get_tests_root(), std::path::MAIN_SEPARATOR, test_name);
    let test_dir = Path::new(&test_dir_path);

    if !test_dir.exists() {
        fs::create_dir_all(&test_dir_path).expect(&format!(
            "Unable to create test results directory {}",
            test_dir_path
        ));
    }

    test_dir_path
}

pub fn get_test_specification_dir() -> PathBuf {
    env::current_dir()
        .expect("Couldn't get current dir")
        .join("tests")
        .join("integration")
        .join("specs")
}

pub fn get_sim_path() -> String {
    let file_pb = env::current_dir()
        .expect("Couldn't get current dir")
        .join("target")
        .join("debug")
        .join("hwmp_sim");
    format!("{}", file_pb.display())
}

pub fn get_test_path<'a>(test: &'a str) -> String {
    let file_pb = get_test_specification_dir().join(test);
    format!("{}", file_pb.display())
}

pub fn addr(id: u32) -> MacAddress {
    MacAddress::from_id(id)
}

/// Instance with a fixed seed and a silent logger. Panics on a bad configuration.
pub fn new_instance(address: MacAddress, config: HwmpConfig) -> Hwmp {
    let logger = logging::create_discard_logger();
    match Hwmp::new(address, &config, 0, logger) {
        Ok(hwmp) => hwmp,
        Err(e) => panic!("Invalid test configuration: {}", e),
    }
}

/// A 64-byte frame from node `src` to node `dst`, as sent by its originator.
pub fn data_frame(src: u32, dst: u32, seq_no: u32) -> DataFrame {
    DataFrame::new(addr(src), addr(dst), seq_no, vec![0xAB; 64])
}

/// First broadcast copy of a discovery started by `source`.
pub fn rreq_from(source: MacAddress, seq_no: u32, dest: MacAddress, rreq_id: u32) -> RouteRequestMessage {
    RouteRequestMessage {
        flags: RREQFlags::BROADCAST,
        hop_count: 0,
        ttl: 5,
        rreq_id,
        source: AddrSeq::new(source, seq_no),
        lifetime: 5000,
        metric: 0,
        destination: AddrSeq::new(dest, 0),
    }
}
