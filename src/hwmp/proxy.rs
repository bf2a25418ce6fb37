//! Registrations learned from gratuitous replies travelling up the tree.
//! The proxy table maps an endpoint (mesh point or station) to the mesh point
//! that answers for it; the forwarding table maps a mesh point to the next hop
//! towards it, down the tree.
use crate::common::MacAddress;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProxyItem {
    /// Reachable inside the mesh, i.e. down the tree from here.
    pub in_mesh: bool,
    /// A station answered for by `proxy` rather than a mesh point itself.
    pub is_proxied: bool,
    pub proxy: MacAddress,
}

#[derive(Debug, Default)]
pub struct ProxyTable {
    items: HashMap<MacAddress, ProxyItem>,
}

impl ProxyTable {
    pub fn new() -> Self {
        Default::default()
    }

    /// Inserts or overwrites the registration of `addr`.
    /// Returns the previous registration if it changed.
    pub fn insert(&mut self, addr: MacAddress, item: ProxyItem) -> Option<ProxyItem> {
        match self.items.insert(addr, item) {
            Some(prev) if prev != item => Some(prev),
            _ => None,
        }
    }

    pub fn lookup(&self, addr: MacAddress) -> Option<&ProxyItem> {
        self.items.get(&addr)
    }

    /// Forgets every station proxied by `proxy`. Returns how many were removed.
    pub fn delete_proxied_by(&mut self, proxy: MacAddress) -> usize {
        let before = self.items.len();
        self.items
            .retain(|_, item| !(item.is_proxied && item.proxy == proxy));
        before - self.items.len()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct ForwardingTable {
    next_hops: HashMap<MacAddress, MacAddress>,
}

impl ForwardingTable {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn insert(&mut self, mesh_point: MacAddress, next_hop: MacAddress) {
        self.next_hops.insert(mesh_point, next_hop);
    }

    pub fn next_hop(&self, mesh_point: MacAddress) -> Option<MacAddress> {
        self.next_hops.get(&mesh_point).copied()
    }

    pub fn len(&self) -> usize {
        self.next_hops.len()
    }
}
