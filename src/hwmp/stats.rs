/// Counters kept by an HWMP instance. Reading and emitting them is up to the host.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HwmpStats {
    pub rreq_bc_initiated: u32,
    pub rreq_uc_initiated: u32,
    pub rreq_resent: u32,
    pub rreq_relayed: u32,
    pub rreq_received: u32,
    pub rreq_received_as_dest: u32,
    pub rreq_duplicate: u32,
    pub rreq_ttl_expired: u32,
    pub rreq_blacklisted: u32,

    pub rrep_initiated_as_dest: u32,
    pub rrep_initiated_as_intermediate: u32,
    pub rrep_forwarded: u32,
    pub rrep_received: u32,
    pub rrep_received_as_source: u32,

    pub rrep_grat_initiated: u32,
    pub rrep_grat_forwarded: u32,
    pub rrep_grat_received: u32,

    pub rerr_initiated: u32,
    pub rerr_forwarded: u32,
    pub rerr_received: u32,

    pub rann_initiated: u32,
    pub rann_relayed: u32,
    pub rann_received: u32,
    pub rann_duplicate: u32,
    pub rann_ttl_expired: u32,

    pub data_initiated: u32,
    pub data_forwarded: u32,
    pub data_received: u32,
    pub data_dropped_for_no_route: u32,
    pub data_dropped_for_overlimit: u32,
}

impl HwmpStats {
    /// Control frames originated by this node.
    pub fn control_initiated(&self) -> u32 {
        self.rreq_bc_initiated
            + self.rreq_uc_initiated
            + self.rrep_initiated_as_dest
            + self.rrep_initiated_as_intermediate
            + self.rrep_grat_initiated
            + self.rerr_initiated
            + self.rann_initiated
    }
}
