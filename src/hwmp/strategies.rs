use crate::common::MacAddress;
use crate::config::MetricType;
use crate::host::MeshHost;

/// Cost of crossing the link to a neighbor, as accumulated into path metrics.
pub trait LinkMetric: std::fmt::Debug {
    fn link_cost(&self, host: &dyn MeshHost, neighbor: MacAddress) -> u32;
}

/// Every link costs the same, so the path metric is the hop count.
#[derive(Debug)]
pub struct HopCountMetric {}

/// Uses the airtime cost reported by the mesh layer.
#[derive(Debug)]
pub struct AirtimeMetric {
    /// Cost used when the host cannot measure the link yet.
    pub fallback: u32,
}

impl LinkMetric for HopCountMetric {
    fn link_cost(&self, _host: &dyn MeshHost, _neighbor: MacAddress) -> u32 {
        1
    }
}

impl LinkMetric for AirtimeMetric {
    fn link_cost(&self, host: &dyn MeshHost, neighbor: MacAddress) -> u32 {
        match host.link_metric(neighbor) {
            0 => self.fallback,
            cost => cost,
        }
    }
}

pub fn build_link_metric(metric: MetricType) -> Box<dyn LinkMetric> {
    match metric {
        MetricType::HopCount => Box::new(HopCountMetric {}),
        MetricType::Airtime => Box::new(AirtimeMetric { fallback: 1 }),
    }
}
