//! On-demand route discovery: route requests, replies (regular and registrations)
//! and route errors, plus the data relay helpers they share with the router.
use super::messages::*;
use super::precursors::Upstream;
use super::proxy::ProxyItem;
use super::route_table::RouteUpdate;
use super::tbr::TbrEvent;
use super::{Hwmp, DEFAULT_INTERFACE};
use crate::common::MacAddress;
use crate::host::{DataFrame, MeshHost, TimerEvent};
use crate::logging::{self, MessageStatus};
use crate::{HwmpError, HwmpErrorKind};

use chrono::Duration;

/// Outcome of comparing an advertised path against the stored route to the same node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Freshness {
    /// The advertised path replaces (or creates) the stored route.
    Update,
    /// Same sequence number, not better. Accepted unless it is a flood duplicate.
    Same,
    /// The stored route is fresher.
    Stale,
}

impl Hwmp {
    // **************************************************
    // ****************** Route request *****************
    // **************************************************

    /// Starts a discovery for `dest` on behalf of `source` (this node or one of its stations).
    pub(crate) fn send_triggered_rreq(
        &mut self,
        host: &mut dyn MeshHost,
        dest: MacAddress,
        source: MacAddress,
    ) -> Result<(), HwmpError> {
        let ttl = self.initial_ttl(dest);
        let seq_no = self.next_seq_no();
        let rreq = RouteRequestMessage {
            flags: self.request_flags(true, self.params.rreq_rf_flag),
            hop_count: 0,
            ttl,
            rreq_id: self.next_rreq_id(),
            source: AddrSeq::new(source, seq_no),
            lifetime: duration_to_ms(self.params.reverse_route_timeout),
            metric: 0,
            destination: AddrSeq::new(dest, self.known_seq_no(dest)),
        };
        let reply_timeout = self.params.node_traversal_time * 2 * i32::from(ttl);

        let increment = self.params.rreq_ttl_increment;
        let threshold = self.params.rreq_ttl_threshold;
        let diameter = self.params.net_diameter;
        let pending = self.sent_table.insert(dest, ttl);
        pending.increase_ttl(increment, threshold, diameter);
        if ttl >= diameter {
            pending.times += 1;
        }
        let attempt = self.sent_table.next_attempt(dest).unwrap_or_default();

        info!(self.logger, "Route discovery started"; "destination"=>dest, "ttl"=>ttl);
        self.send_rreq_frame(host, rreq, MacAddress::BROADCAST, Some((reply_timeout, attempt)), false)?;
        self.stats.rreq_bc_initiated += 1;

        Ok(())
    }

    /// Sends the next attempt of an outstanding discovery.
    fn retry_rreq(
        &mut self,
        host: &mut dyn MeshHost,
        dest: MacAddress,
        source: MacAddress,
    ) -> Result<(), HwmpError> {
        let (ttl, times) = match self.sent_table.get(dest) {
            Some(pending) => (pending.ttl, pending.times),
            None => return Ok(()),
        };
        let diameter = self.params.net_diameter;
        let rreq = RouteRequestMessage {
            flags: self.request_flags(true, true),
            hop_count: 0,
            ttl,
            rreq_id: self.next_rreq_id(),
            source: AddrSeq::new(source, self.seq_no),
            lifetime: duration_to_ms(self.params.reverse_route_timeout),
            metric: 0,
            destination: AddrSeq::new(dest, self.known_seq_no(dest)),
        };
        let mut reply_timeout = self.params.node_traversal_time * 2 * i32::from(ttl);
        if ttl >= diameter {
            //Linear backoff once the whole mesh is flooded
            reply_timeout = reply_timeout * (times as i32 + 1);
        }

        let increment = self.params.rreq_ttl_increment;
        let threshold = self.params.rreq_ttl_threshold;
        if let Some(pending) = self.sent_table.get_mut(dest) {
            pending.increase_ttl(increment, threshold, diameter);
            if ttl >= diameter {
                pending.times += 1;
            }
        }
        let attempt = self.sent_table.next_attempt(dest).unwrap_or_default();

        info!(self.logger, "Route discovery retried"; "destination"=>dest, "ttl"=>ttl, "attempt"=>times);
        self.send_rreq_frame(host, rreq, MacAddress::BROADCAST, Some((reply_timeout, attempt)), false)?;
        self.stats.rreq_bc_initiated += 1;
        self.stats.rreq_resent += 1;

        Ok(())
    }

    /// A discovery went unanswered. Retries while attempts remain; otherwise every
    /// frame waiting for `dest` is dropped.
    pub(crate) fn handle_reply_timeout(
        &mut self,
        host: &mut dyn MeshHost,
        dest: MacAddress,
        source: MacAddress,
        attempt: u32,
    ) -> Result<(), HwmpError> {
        if !self.sent_table.is_current(dest, attempt) {
            //Armed by an answered or superseded request
            debug!(self.logger, "Stale reply timeout"; "destination"=>dest, "attempt"=>attempt);
            return Ok(());
        }
        if let Some((next_hop, _)) = self.route_table.next_hop(dest) {
            //Route learned without a reply, e.g. from the destination's own request
            info!(self.logger, "Route discovery settled"; "destination"=>dest, "next_hop"=>next_hop);
            self.sent_table.remove(dest);
            return self.drain_buffer(host, dest, next_hop);
        }
        if self.sent_table.sent_count_with_max_ttl(dest) < self.params.rreq_attempts {
            return self.retry_rreq(host, dest, source);
        }

        warn!(self.logger, "Route discovery failed"; "destination"=>dest);
        while let Some(packet) = self.buffer.get_packet(dest) {
            self.stats.data_dropped_for_no_route += 1;
            self.log_drop(packet.frame.transmitter, "NO_ROUTE", &packet.frame);
        }
        self.sent_table.remove(dest);

        Ok(())
    }

    /// Tells a station's previous mesh point that the station moved here.
    pub(crate) fn send_station_reassociation_rreq(
        &mut self,
        host: &mut dyn MeshHost,
        station: MacAddress,
    ) -> Result<(), HwmpError> {
        let seq_no = self.next_seq_no();
        let rreq = RouteRequestMessage {
            flags: RREQFlags::BROADCAST
                | RREQFlags::DESTINATION_ONLY
                | RREQFlags::STATION_REASSOCIATION,
            hop_count: 0,
            ttl: self.params.net_diameter,
            rreq_id: self.next_rreq_id(),
            source: AddrSeq::new(self.address, seq_no),
            lifetime: duration_to_ms(self.params.reverse_route_timeout),
            metric: 0,
            destination: AddrSeq::new(station, 0),
        };
        self.send_rreq_frame(host, rreq, MacAddress::BROADCAST, None, false)?;
        self.stats.rreq_bc_initiated += 1;
        Ok(())
    }

    /// Transmits a request. Requests originated here are recorded as seen, and a reply
    /// timeout for the given attempt is armed when one is given.
    pub(crate) fn send_rreq_frame(
        &mut self,
        host: &mut dyn MeshHost,
        rreq: RouteRequestMessage,
        receiver: MacAddress,
        reply_timer: Option<(Duration, u32)>,
        is_relay: bool,
    ) -> Result<(), HwmpError> {
        if !is_relay {
            self.record_seen(host, rreq.source.addr, rreq.rreq_id);
        }
        if let Some((timeout, attempt)) = reply_timer {
            host.schedule(
                timeout,
                TimerEvent::RreqReplyTimeout {
                    dest: rreq.destination.addr,
                    source: rreq.source.addr,
                    attempt,
                },
            );
        }
        self.send_control(host, receiver, Messages::RREQ(rreq))
    }

    fn record_seen(&mut self, host: &mut dyn MeshHost, source: MacAddress, rreq_id: u32) {
        self.seen_table.insert(source, rreq_id);
        host.schedule(self.params.flood_record_time(), TimerEvent::SeenEntryExpiry);
    }

    pub(crate) fn receive_rreq(
        &mut self,
        host: &mut dyn MeshHost,
        transmitter: MacAddress,
        receiver: MacAddress,
        rreq: RouteRequestMessage,
    ) -> Result<(), HwmpError> {
        let prev_hop = transmitter;
        let now = host.now();
        self.stats.rreq_received += 1;

        if rreq.hop_count > self.params.net_diameter {
            self.log_drop(prev_hop, "HOP_LIMIT", &Messages::RREQ(rreq));
            return Ok(());
        }
        if self.blacklist.contains(prev_hop, now) {
            self.stats.rreq_blacklisted += 1;
            self.log_drop(prev_hop, "BLACKLISTED", &Messages::RREQ(rreq));
            return Ok(());
        }
        if host.is_self_or_station(rreq.source.addr) {
            //Our own request coming back
            self.stats.rreq_duplicate += 1;
            self.log_drop(prev_hop, "DUPLICATE", &Messages::RREQ(rreq));
            return Ok(());
        }

        let is_dest = host.is_self_or_station(rreq.destination.addr);
        let lifetime = Duration::milliseconds(i64::from(rreq.lifetime));
        let reverse_lifetime = if is_dest {
            lifetime
        } else {
            let elapsed = self.params.node_traversal_time * i32::from(rreq.hop_count);
            (lifetime - elapsed).max(Duration::zero())
        };
        let link_cost = self.link_cost(host, prev_hop);

        if rreq.source.addr != prev_hop {
            self.update_neighbor_route(host, prev_hop, reverse_lifetime);
        }

        let path_metric = rreq.metric.saturating_add(link_cost);
        let freshness = self.freshness(rreq.source.addr, rreq.source.seq_no, path_metric);
        let seen = self.seen_table.contains(rreq.source.addr, rreq.rreq_id);
        if freshness == Freshness::Stale {
            self.log_drop(prev_hop, "STALE_SEQ_NO", &Messages::RREQ(rreq));
            return Ok(());
        }
        if freshness == Freshness::Same && seen {
            self.stats.rreq_duplicate += 1;
            self.log_drop(prev_hop, "DUPLICATE", &Messages::RREQ(rreq));
            return Ok(());
        }
        self.route_table.replace(RouteUpdate {
            destination: rreq.source.addr,
            seq_no: rreq.source.seq_no,
            hop_count: rreq.hop_count.saturating_add(1),
            metric: path_metric,
            next_hop: prev_hop,
            lifetime: now + reverse_lifetime,
            is_active: true,
            interface: DEFAULT_INTERFACE,
        });

        //A better copy of a flood still improves the reverse route, but only the
        //first copy is answered or relayed.
        if seen {
            self.stats.rreq_duplicate += 1;
            self.log_drop(prev_hop, "DUPLICATE", &Messages::RREQ(rreq));
            return Ok(());
        }
        if receiver.is_broadcast() {
            self.record_seen(host, rreq.source.addr, rreq.rreq_id);
        }

        if is_dest {
            self.stats.rreq_received_as_dest += 1;
            logging::log_handle_message(
                &self.logger,
                prev_hop,
                MessageStatus::ACCEPTED,
                None,
                None,
                &Messages::RREQ(rreq.clone()),
            );
            if rreq.flags.contains(RREQFlags::STATION_REASSOCIATION) {
                info!(self.logger, "Station moved to another mesh point"; "station"=>rreq.destination.addr);
                host.station_disassociated(rreq.destination.addr);
                return Ok(());
            }
            self.seq_no = self.seq_no.max(rreq.destination.seq_no);
            return self.send_rrep_as_destination(host, &rreq, prev_hop);
        }

        let dest_route = self
            .route_table
            .get(rreq.destination.addr)
            .map(|e| (e.is_active, e.seq_no, e.hop_count, e.next_hop));
        let can_reply = match dest_route {
            Some((true, seq_no, _, _)) => {
                !rreq.flags.contains(RREQFlags::DESTINATION_ONLY)
                    && seq_no >= rreq.destination.seq_no
            }
            _ => false,
        };
        let dest_seq_no = dest_route
            .map(|(_, seq_no, _, _)| seq_no.max(rreq.destination.seq_no))
            .unwrap_or(rreq.destination.seq_no);

        if can_reply {
            if let Some((_, _, hop_count, next_hop)) = dest_route {
                if u32::from(rreq.hop_count) + u32::from(hop_count)
                    > u32::from(self.params.net_diameter)
                {
                    self.log_drop(prev_hop, "HOP_LIMIT", &Messages::RREQ(rreq));
                    return Ok(());
                }
                self.route_table.add_precursor(rreq.source.addr, next_hop);
            }
            self.route_table.add_precursor(rreq.destination.addr, prev_hop);
            self.send_rrep_as_intermediate(host, &rreq, prev_hop)?;

            if rreq.flags.contains(RREQFlags::REPLY_AND_FORWARD) {
                //Keep going, but only the destination may answer from now on
                let mut fwd = rreq;
                fwd.flags.insert(RREQFlags::DESTINATION_ONLY);
                fwd.flags.remove(RREQFlags::REPLY_AND_FORWARD);
                fwd.lifetime = duration_to_ms(reverse_lifetime);
                fwd.destination.seq_no = dest_seq_no;
                self.relay_rreq(host, transmitter, fwd)?;
            }
            return Ok(());
        }

        if rreq.ttl > 1 {
            let mut fwd = rreq;
            fwd.ttl -= 1;
            fwd.destination.seq_no = dest_seq_no;
            if host.neighbor_count() > 1 {
                self.relay_rreq(host, transmitter, fwd)?;
            } else {
                debug!(self.logger, "Single neighbor, request not relayed"; "source"=>fwd.source.addr);
            }
        } else {
            self.stats.rreq_ttl_expired += 1;
            self.log_drop(prev_hop, "TTL_EXPIRED", &Messages::RREQ(rreq));
        }

        Ok(())
    }

    fn relay_rreq(
        &mut self,
        host: &mut dyn MeshHost,
        transmitter: MacAddress,
        mut rreq: RouteRequestMessage,
    ) -> Result<(), HwmpError> {
        rreq.hop_count = rreq.hop_count.saturating_add(1);
        rreq.metric = rreq.metric.saturating_add(self.link_cost(host, transmitter));

        let receiver = if rreq.flags.contains(RREQFlags::BROADCAST) {
            MacAddress::BROADCAST
        } else {
            match self.route_table.next_hop(rreq.destination.addr) {
                Some((next_hop, _)) => next_hop,
                None => {
                    self.stats.rerr_initiated += 1;
                    self.log_drop(transmitter, "NO_ROUTE", &Messages::RREQ(rreq.clone()));
                    return self.send_rerr_for_unreachable_dest(
                        host,
                        rreq.destination.addr,
                        transmitter,
                    );
                }
            }
        };

        logging::log_handle_message(
            &self.logger,
            transmitter,
            MessageStatus::FORWARDING,
            None,
            None,
            &Messages::RREQ(rreq.clone()),
        );
        self.send_rreq_frame(host, rreq, receiver, None, true)?;
        self.stats.rreq_relayed += 1;
        Ok(())
    }

    // **************************************************
    // ****************** Route reply *******************
    // **************************************************

    fn send_rrep_as_destination(
        &mut self,
        host: &mut dyn MeshHost,
        rreq: &RouteRequestMessage,
        next_hop: MacAddress,
    ) -> Result<(), HwmpError> {
        let rrep = RouteResponseMessage {
            flags: RREPFlags::empty(),
            hop_count: 0,
            ttl: self.params.net_diameter,
            destination: AddrSeq::new(rreq.destination.addr, self.seq_no),
            lifetime: duration_to_ms(self.params.my_route_timeout),
            metric: 0,
            sources: vec![rreq.source],
        };
        self.send_control(host, next_hop, Messages::RREP(rrep))?;
        self.stats.rrep_initiated_as_dest += 1;
        Ok(())
    }

    fn send_rrep_as_intermediate(
        &mut self,
        host: &mut dyn MeshHost,
        rreq: &RouteRequestMessage,
        last_hop: MacAddress,
    ) -> Result<(), HwmpError> {
        let now = host.now();
        let (seq_no, hop_count, metric, lifetime) = match self.route_table.get(rreq.destination.addr) {
            Some(e) if e.lifetime > now => (e.seq_no, e.hop_count, e.metric, e.lifetime),
            _ => return Ok(()),
        };
        let rrep = RouteResponseMessage {
            flags: RREPFlags::empty(),
            hop_count: rreq.hop_count.saturating_add(hop_count),
            ttl: self.params.net_diameter,
            destination: AddrSeq::new(rreq.destination.addr, seq_no),
            lifetime: duration_to_ms(lifetime - now),
            metric,
            sources: vec![rreq.source],
        };
        self.send_control(host, last_hop, Messages::RREP(rrep))?;
        self.stats.rrep_initiated_as_intermediate += 1;
        self.refresh_route(host, last_hop, None, None);
        Ok(())
    }

    pub(crate) fn receive_rrep(
        &mut self,
        host: &mut dyn MeshHost,
        transmitter: MacAddress,
        rrep: RouteResponseMessage,
    ) -> Result<(), HwmpError> {
        let prev_hop = transmitter;
        let now = host.now();
        self.stats.rrep_received += 1;

        let hop_count = rrep.hop_count.saturating_add(1);
        let metric = rrep.metric.saturating_add(self.link_cost(host, prev_hop));
        let lifetime = Duration::milliseconds(i64::from(rrep.lifetime));
        if hop_count > self.params.net_diameter {
            self.log_drop(prev_hop, "HOP_LIMIT", &Messages::RREP(rrep));
            return Ok(());
        }
        if rrep.lifetime == 0 {
            self.log_drop(prev_hop, "EXPIRED", &Messages::RREP(rrep));
            return Ok(());
        }
        let source = match rrep.source() {
            Some(source) => source,
            None => {
                self.log_drop(prev_hop, "MALFORMED", &Messages::RREP(rrep));
                return Ok(());
            }
        };
        let dest = rrep.destination.addr;

        if dest != prev_hop {
            self.update_neighbor_route(host, prev_hop, lifetime);
        }

        let route_changed = match self.route_table.lookup(dest) {
            (None, _) => true,
            (Some(e), is_active) => {
                e.seq_no < rrep.destination.seq_no
                    || (e.seq_no == rrep.destination.seq_no
                        && (e.next_hop != prev_hop || !is_active || e.metric > metric))
            }
        };
        if route_changed {
            self.route_table.replace(RouteUpdate {
                destination: dest,
                seq_no: rrep.destination.seq_no,
                hop_count,
                metric,
                next_hop: prev_hop,
                lifetime: now + lifetime,
                is_active: true,
                interface: DEFAULT_INTERFACE,
            });
        }

        if !host.is_self_or_station(source.addr) {
            return self.relay_rrep(host, prev_hop, rrep);
        }

        self.stats.rrep_received_as_source += 1;
        if self.tree.root_address() == Some(dest) {
            self.handle_tree_event(
                host,
                TbrEvent::RrepReceived {
                    dest,
                    prev_hop,
                },
            )?;
        }
        if !route_changed {
            self.log_drop(prev_hop, "NO_ROUTE_UPDATE", &Messages::RREP(rrep));
            return Ok(());
        }

        logging::log_handle_message(
            &self.logger,
            prev_hop,
            MessageStatus::ACCEPTED,
            None,
            None,
            &Messages::RREP(rrep),
        );
        self.sent_table.remove(dest);
        self.drain_buffer(host, dest, prev_hop)
    }

    fn relay_rrep(
        &mut self,
        host: &mut dyn MeshHost,
        transmitter: MacAddress,
        mut rrep: RouteResponseMessage,
    ) -> Result<(), HwmpError> {
        let source = match rrep.source() {
            Some(source) => source.addr,
            None => return Ok(()),
        };
        let dest = rrep.destination.addr;
        let src_next_hop = match self.route_table.next_hop(source) {
            Some((next_hop, _)) => next_hop,
            None => {
                self.log_drop(transmitter, "NO_REVERSE_ROUTE", &Messages::RREP(rrep));
                return Ok(());
            }
        };
        let dest_next_hop = match self.route_table.get(dest) {
            Some(e) => e.next_hop,
            None => transmitter,
        };

        rrep.hop_count = rrep.hop_count.saturating_add(1);
        rrep.ttl = rrep.ttl.saturating_sub(1);
        rrep.metric = rrep.metric.saturating_add(self.link_cost(host, dest_next_hop));
        logging::log_handle_message(
            &self.logger,
            transmitter,
            MessageStatus::FORWARDING,
            None,
            None,
            &Messages::RREP(rrep.clone()),
        );
        self.send_control(host, src_next_hop, Messages::RREP(rrep))?;

        self.route_table.add_precursor(dest, src_next_hop);
        self.route_table.add_precursor(source, dest_next_hop);
        if self.route_table.is_valid(dest_next_hop) {
            self.route_table.add_precursor(dest_next_hop, src_next_hop);
        }
        self.stats.rrep_forwarded += 1;
        self.refresh_neighbor_route(host, src_next_hop);

        Ok(())
    }

    /// A registration travelling up the tree: the source (and the stations it lists)
    /// can be reached back down through the transmitter.
    pub(crate) fn receive_gratuitous_rrep(
        &mut self,
        host: &mut dyn MeshHost,
        transmitter: MacAddress,
        rrep: RouteResponseMessage,
    ) -> Result<(), HwmpError> {
        let prev_hop = transmitter;
        let now = host.now();

        let hop_count = rrep.hop_count.saturating_add(1);
        let metric = rrep.metric.saturating_add(self.link_cost(host, prev_hop));
        let lifetime = Duration::milliseconds(i64::from(rrep.lifetime));
        if hop_count > self.params.net_diameter {
            self.log_drop(prev_hop, "HOP_LIMIT", &Messages::RREP(rrep));
            return Ok(());
        }
        if rrep.lifetime == 0 {
            self.log_drop(prev_hop, "EXPIRED", &Messages::RREP(rrep));
            return Ok(());
        }
        let source = match rrep.source() {
            Some(source) => source,
            None => {
                self.log_drop(prev_hop, "MALFORMED", &Messages::RREP(rrep));
                return Ok(());
            }
        };
        self.stats.rrep_grat_received += 1;

        if source.addr != prev_hop {
            self.update_neighbor_route(host, prev_hop, lifetime);
        }

        let update = match self.route_table.lookup(source.addr) {
            (None, _) => true,
            (Some(e), is_active) => {
                e.seq_no < source.seq_no
                    || (e.seq_no == source.seq_no && (!is_active || e.metric > metric))
            }
        };
        if update {
            self.route_table.replace(RouteUpdate {
                destination: source.addr,
                seq_no: source.seq_no,
                hop_count,
                metric,
                next_hop: prev_hop,
                lifetime: now + lifetime,
                is_active: true,
                interface: DEFAULT_INTERFACE,
            });
        }

        //The registration lists every station the source proxies right now
        self.proxies.delete_proxied_by(source.addr);
        self.proxies.insert(
            source.addr,
            ProxyItem {
                in_mesh: true,
                is_proxied: false,
                proxy: source.addr,
            },
        );
        self.forwarding.insert(source.addr, prev_hop);
        for station in rrep.sources.iter().skip(1) {
            if let Some(prev) = self.proxies.insert(
                station.addr,
                ProxyItem {
                    in_mesh: true,
                    is_proxied: true,
                    proxy: source.addr,
                },
            ) {
                debug!(self.logger, "Station changed proxy"; "station"=>station.addr, "old_proxy"=>prev.proxy);
            }
        }

        if let Some((next_hop, _)) = self.route_table.next_hop(source.addr) {
            let reachable: Vec<MacAddress> = rrep.sources.iter().map(|s| s.addr).collect();
            for addr in reachable {
                if self.buffer.has_packets_for(addr) {
                    self.sent_table.remove(addr);
                    self.drain_buffer(host, addr, next_hop)?;
                }
            }
        }

        if host.is_self_or_station(rrep.destination.addr) {
            if !self.params.is_root {
                let msg = format!(
                    "Registration from {} addressed to {}, which is not a root",
                    source.addr, self.address
                );
                return Err(HwmpErrorKind::Protocol(msg).into());
            }
            logging::log_handle_message(
                &self.logger,
                prev_hop,
                MessageStatus::ACCEPTED,
                None,
                None,
                &Messages::RREP(rrep),
            );
            return Ok(());
        }

        self.relay_gratuitous_rrep(host, transmitter, rrep)
    }

    fn relay_gratuitous_rrep(
        &mut self,
        host: &mut dyn MeshHost,
        transmitter: MacAddress,
        mut rrep: RouteResponseMessage,
    ) -> Result<(), HwmpError> {
        let parent = match self.tree.current_parent {
            Some(parent) => parent,
            None => {
                self.log_drop(transmitter, "NO_PARENT", &Messages::RREP(rrep));
                return Ok(());
            }
        };
        rrep.hop_count = rrep.hop_count.saturating_add(1);
        rrep.ttl = rrep.ttl.saturating_sub(1);
        rrep.metric = rrep.metric.saturating_add(self.link_cost(host, transmitter));
        logging::log_handle_message(
            &self.logger,
            transmitter,
            MessageStatus::FORWARDING,
            None,
            None,
            &Messages::RREP(rrep.clone()),
        );
        self.send_control(host, parent, Messages::RREP(rrep))?;

        if self.route_table.get(transmitter).is_some() {
            self.route_table.add_precursor(transmitter, parent);
        }
        self.refresh_neighbor_route(host, parent);
        self.stats.rrep_grat_forwarded += 1;
        Ok(())
    }

    /// Registers this node and its stations with the root, through `next_hop`.
    pub(crate) fn send_tbr_gratuitous_rrep(
        &mut self,
        host: &mut dyn MeshHost,
        root: AddrSeq,
        next_hop: MacAddress,
    ) -> Result<(), HwmpError> {
        let stations = host.associated_stations();
        if stations.is_empty() {
            return Ok(());
        }
        let seq_no = self.next_seq_no();
        let mut sources = vec![AddrSeq::new(self.address, seq_no)];
        sources.extend(stations.into_iter().map(|sta| AddrSeq::new(sta, seq_no)));
        let rrep = RouteResponseMessage {
            flags: RREPFlags::GRATUITOUS,
            hop_count: 0,
            ttl: self.params.net_diameter,
            destination: root,
            lifetime: duration_to_ms(self.params.my_route_timeout),
            metric: 0,
            sources,
        };
        self.send_control(host, next_hop, Messages::RREP(rrep))?;
        self.stats.rrep_grat_initiated += 1;
        Ok(())
    }

    // **************************************************
    // ****************** Route error *******************
    // **************************************************

    pub(crate) fn receive_rerr(
        &mut self,
        host: &mut dyn MeshHost,
        transmitter: MacAddress,
        rerr: RouteErrorMessage,
    ) -> Result<(), HwmpError> {
        let now = host.now();
        let active_route_timeout = self.params.active_route_timeout;
        self.update_neighbor_route(host, transmitter, active_route_timeout);
        self.stats.rerr_received += 1;

        let mut unreachable = Vec::new();
        let mut upstream = Upstream::None;
        for dest in rerr.destinations.iter() {
            let has_precursors = match self.route_table.get_valid(dest.addr) {
                Some(e) if e.next_hop == transmitter => {
                    upstream.observe(&e.precursors);
                    !e.precursors.is_empty()
                }
                _ => continue,
            };
            self.route_table.raise_seq_no(dest.addr, dest.seq_no);
            let seq_no = self
                .route_table
                .disable(dest.addr, false, now, self.params.deletion_period())?;
            if has_precursors {
                unreachable.push(AddrSeq::new(dest.addr, seq_no));
            }
        }

        if unreachable.is_empty() {
            logging::log_handle_message(
                &self.logger,
                transmitter,
                MessageStatus::ACCEPTED,
                None,
                None,
                &Messages::RERR(rerr),
            );
            return Ok(());
        }

        self.stats.rerr_forwarded += 1;
        for dest in unreachable.iter() {
            host.delete_packets_to(transmitter, Some(dest.addr));
        }
        self.send_rerr_frame(
            host,
            RouteErrorMessage {
                destinations: unreachable,
            },
            upstream,
        )
    }

    /// Invalidates every route through a failed neighbor and warns the precursors.
    pub(crate) fn send_rerr_for_link_failure(
        &mut self,
        host: &mut dyn MeshHost,
        next_hop: MacAddress,
    ) -> Result<(), HwmpError> {
        let now = host.now();
        self.route_table.remove_precursor_everywhere(next_hop);
        let affected = self.route_table.active_routes_via(next_hop);

        let mut unreachable = Vec::new();
        let mut upstream = Upstream::None;
        for dest in affected.iter() {
            if let Some(e) = self.route_table.get(*dest) {
                if !e.precursors.is_empty() {
                    upstream.observe(&e.precursors);
                    unreachable.push(AddrSeq::new(*dest, e.seq_no.wrapping_add(1)));
                }
            }
        }

        if !unreachable.is_empty() {
            self.stats.rerr_initiated += 1;
            self.send_rerr_frame(
                host,
                RouteErrorMessage {
                    destinations: unreachable,
                },
                upstream,
            )?;
        }

        for dest in affected {
            self.route_table
                .disable(dest, true, now, self.params.deletion_period())?;
            debug!(self.logger, "Route disabled"; "destination"=>dest, "next_hop"=>next_hop);
        }
        Ok(())
    }

    /// Reports `dest` as unreachable to `upstream` only.
    pub(crate) fn send_rerr_for_unreachable_dest(
        &mut self,
        host: &mut dyn MeshHost,
        dest: MacAddress,
        upstream: MacAddress,
    ) -> Result<(), HwmpError> {
        let seq_no = self.known_seq_no(dest);
        let seq_no = if seq_no == 0 { self.seq_no } else { seq_no };
        let rerr = RouteErrorMessage {
            destinations: vec![AddrSeq::new(dest, seq_no)],
        };
        self.send_rerr_frame(host, rerr, Upstream::Unique(upstream))
    }

    /// Unicasts the error when a single upstream neighbor needs it and can be reached,
    /// otherwise broadcasts it.
    fn send_rerr_frame(
        &mut self,
        host: &mut dyn MeshHost,
        rerr: RouteErrorMessage,
        upstream: Upstream,
    ) -> Result<(), HwmpError> {
        let receiver = match upstream {
            Upstream::Unique(addr) => self
                .route_table
                .next_hop(addr)
                .map(|(next_hop, _)| next_hop)
                .unwrap_or(MacAddress::BROADCAST),
            _ => MacAddress::BROADCAST,
        };
        self.send_control(host, receiver, Messages::RERR(rerr))
    }

    // **************************************************
    // ******************* Data relay *******************
    // **************************************************

    /// Sends a frame one hop closer to its destination, refreshing every route it uses.
    pub(crate) fn relay_data_frame(
        &mut self,
        host: &mut dyn MeshHost,
        next_hop: MacAddress,
        mut frame: DataFrame,
    ) -> Result<(), HwmpError> {
        self.refresh_route(host, frame.destination, None, None);
        if !host.is_self_or_station(frame.source) {
            self.refresh_neighbor_route(host, frame.transmitter);
            if frame.transmitter != frame.source {
                self.refresh_route(host, frame.source, None, None);
            }
        }
        self.refresh_neighbor_route(host, next_hop);

        frame.receiver = next_hop;
        frame.transmitter = self.address;
        logging::log_tx(&self.logger, next_hop, &frame);
        host.transmit_data(frame)
    }

    /// Sends every frame waiting for `dest` through `next_hop`.
    fn drain_buffer(
        &mut self,
        host: &mut dyn MeshHost,
        dest: MacAddress,
        next_hop: MacAddress,
    ) -> Result<(), HwmpError> {
        while let Some(packet) = self.buffer.get_packet(dest) {
            self.stats.data_initiated += 1;
            self.relay_data_frame(host, next_hop, packet.frame)?;
        }
        Ok(())
    }

    /// Queues a frame until a route shows up. Returns false if the buffer was full.
    pub(crate) fn buffer_frame(&mut self, host: &dyn MeshHost, frame: DataFrame) -> bool {
        logging::log_handle_message(
            &self.logger,
            frame.transmitter,
            MessageStatus::QUEUED,
            None,
            None,
            &frame,
        );
        let sender = frame.transmitter;
        if self.buffer.insert(frame, host.now()) {
            return true;
        }
        self.stats.data_dropped_for_overlimit += 1;
        warn!(self.logger, "Packet buffer full, frame dropped"; "source"=>sender);
        false
    }

    // **************************************************
    // ********************* Helpers ********************
    // **************************************************

    fn request_flags(&self, broadcast: bool, reply_and_forward: bool) -> RREQFlags {
        let mut flags = RREQFlags::empty();
        flags.set(RREQFlags::BROADCAST, broadcast);
        flags.set(RREQFlags::DESTINATION_ONLY, self.params.rreq_do_flag);
        flags.set(RREQFlags::REPLY_AND_FORWARD, reply_and_forward);
        flags
    }

    /// Last sequence number known for `dest`, 0 if unknown.
    fn known_seq_no(&self, dest: MacAddress) -> u32 {
        self.route_table.get(dest).map(|e| e.seq_no).unwrap_or(0)
    }

    /// Decides whether a path to `addr` advertised with `seq_no` and `metric`
    /// should replace the stored route.
    pub(crate) fn freshness(&self, addr: MacAddress, seq_no: u32, metric: u32) -> Freshness {
        match self.route_table.lookup(addr) {
            (None, _) => Freshness::Update,
            (Some(e), is_active) if !is_active || e.seq_no == 0 => Freshness::Update,
            (Some(e), _) if e.seq_no > seq_no => Freshness::Stale,
            (Some(e), _) if e.seq_no < seq_no || e.metric > metric => Freshness::Update,
            _ => Freshness::Same,
        }
    }
}

/// Converts a duration to the millisecond lifetime carried in messages.
pub(crate) fn duration_to_ms(d: Duration) -> u32 {
    let ms = d.num_milliseconds();
    if ms <= 0 {
        0
    } else if ms > i64::from(u32::max_value()) {
        u32::max_value()
    } else {
        ms as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HwmpConfig, RouteDiscoveryType};
    use crate::tests::common::*;
    use pretty_assertions::assert_eq;

    fn started(me: u32, config: HwmpConfig) -> (MockHost, Hwmp) {
        let mut host = MockHost::new(addr(me));
        let mut hwmp = new_instance(addr(me), config);
        hwmp.init(&mut host).unwrap();
        host.clear();
        (host, hwmp)
    }

    fn rrep_to(source: MacAddress, dest: MacAddress, dest_seq: u32, hop_count: u8) -> RouteResponseMessage {
        RouteResponseMessage {
            flags: RREPFlags::empty(),
            hop_count,
            ttl: 7,
            destination: AddrSeq::new(dest, dest_seq),
            lifetime: 10_000,
            metric: u32::from(hop_count),
            sources: vec![AddrSeq::new(source, 1)],
        }
    }

    fn last_reply_timeout(host: &MockHost) -> TimerEvent {
        host.timers
            .iter()
            .rev()
            .map(|(_, e)| *e)
            .find(|e| matches!(e, TimerEvent::RreqReplyTimeout { .. }))
            .expect("no reply timeout armed")
    }

    #[test]
    fn test_first_request_uses_initial_ring() {
        let (mut host, mut hwmp) = started(1, HwmpConfig::new());
        hwmp.send_triggered_rreq(&mut host, addr(4), addr(1)).unwrap();

        let (ra, rreq) = host.last_rreq().unwrap();
        assert_eq!(ra, MacAddress::BROADCAST);
        assert_eq!(rreq.ttl, 2);
        assert_eq!(rreq.destination, AddrSeq::new(addr(4), 0));
        assert_eq!(rreq.source, AddrSeq::new(addr(1), 2));
        assert_eq!(rreq.hop_count, 0);
        assert_eq!(rreq.metric, 0);
        assert!(rreq.flags.contains(RREQFlags::BROADCAST));
        assert!(hwmp.sent_table().contains(addr(4)));
        assert!(host.timers.contains(&(
            Duration::milliseconds(400),
            TimerEvent::RreqReplyTimeout { dest: addr(4), source: addr(1), attempt: 1 }
        )));
        assert_eq!(hwmp.stats().rreq_bc_initiated, 1);
    }

    #[test]
    fn test_expanding_ring_until_discovery_fails() {
        let (mut host, mut hwmp) = started(1, HwmpConfig::new());
        hwmp.buffer_frame(&host, data_frame(1, 4, 1));
        hwmp.send_triggered_rreq(&mut host, addr(4), addr(1)).unwrap();

        //2 -> 4 -> 7 (past the threshold) -> 7
        let mut ttls = vec![host.last_rreq().unwrap().1.ttl];
        for _ in 0..3 {
            let timeout = last_reply_timeout(&host);
            hwmp.handle_timeout(&mut host, timeout).unwrap();
            ttls.push(host.last_rreq().unwrap().1.ttl);
        }
        assert_eq!(ttls, vec![2, 4, 7, 7]);
        assert_eq!(hwmp.stats().rreq_resent, 3);
        //Retries flag reply-and-forward and keep the sequence number
        let (_, last) = host.last_rreq().unwrap();
        assert!(last.flags.contains(RREQFlags::REPLY_AND_FORWARD));
        assert_eq!(last.source.seq_no, 2);
        //Second attempt at full TTL waits twice as long
        assert_eq!(host.timers.last().unwrap().0, Duration::milliseconds(2800));

        //Two attempts at full TTL were made, give up
        let timeout = last_reply_timeout(&host);
        hwmp.handle_timeout(&mut host, timeout).unwrap();
        assert!(!hwmp.sent_table().contains(addr(4)));
        assert!(hwmp.packet_buffer().is_empty());
        assert_eq!(hwmp.stats().data_dropped_for_no_route, 1);

        //Late timeouts are ignored
        let sent = host.control.len();
        hwmp.handle_timeout(&mut host, timeout).unwrap();
        assert_eq!(host.control.len(), sent);
    }

    #[test]
    fn test_full_ttl_discovery() {
        let config = HwmpConfig {
            route_discovery_type: Some(RouteDiscoveryType::FullTtl),
            ..Default::default()
        };
        let (mut host, mut hwmp) = started(1, config);
        hwmp.send_triggered_rreq(&mut host, addr(4), addr(1)).unwrap();
        assert_eq!(host.last_rreq().unwrap().1.ttl, 7);
        assert_eq!(hwmp.sent_table().sent_count_with_max_ttl(addr(4)), 1);
    }

    #[test]
    fn test_destination_answers_request() {
        let (mut host, mut hwmp) = started(4, HwmpConfig::new());
        let mut rreq = rreq_from(addr(1), 3, addr(4), 10);
        rreq.destination.seq_no = 9;
        rreq.hop_count = 1;
        rreq.metric = 1;
        hwmp.receive_control_frame(&mut host, addr(2), MacAddress::BROADCAST, Messages::RREQ(rreq))
            .unwrap();

        assert_eq!(hwmp.seq_no(), 9);
        let (ra, rrep) = host.last_rrep().unwrap();
        assert_eq!(ra, addr(2));
        assert_eq!(rrep.hop_count, 0);
        assert_eq!(rrep.destination, AddrSeq::new(addr(4), 9));
        assert_eq!(rrep.sources, vec![AddrSeq::new(addr(1), 3)]);
        assert_eq!(rrep.lifetime, 10_000);

        //Reverse route to the originator through the previous hop
        let entry = hwmp.route_table().get_valid(addr(1)).unwrap();
        assert_eq!(entry.next_hop, addr(2));
        assert_eq!(entry.hop_count, 2);
        assert_eq!(entry.seq_no, 3);
        assert_eq!(hwmp.stats().rrep_initiated_as_dest, 1);
    }

    #[test]
    fn test_duplicate_request_relayed_once() {
        let (mut host, mut hwmp) = started(2, HwmpConfig::new());
        host.neighbors = 3;
        let rreq = rreq_from(addr(1), 3, addr(9), 10);
        hwmp.receive_control_frame(&mut host, addr(1), MacAddress::BROADCAST, Messages::RREQ(rreq.clone()))
            .unwrap();
        hwmp.receive_control_frame(&mut host, addr(3), MacAddress::BROADCAST, Messages::RREQ(rreq))
            .unwrap();

        assert_eq!(host.control.len(), 1);
        let (ra, relayed) = host.last_rreq().unwrap();
        assert_eq!(ra, MacAddress::BROADCAST);
        assert_eq!(relayed.hop_count, 1);
        assert_eq!(relayed.ttl, 4);
        assert_eq!(relayed.metric, 1);
        assert_eq!(hwmp.stats().rreq_duplicate, 1);
        assert_eq!(hwmp.stats().rreq_relayed, 1);
    }

    #[test]
    fn test_stale_request_dropped() {
        let (mut host, mut hwmp) = started(2, HwmpConfig::new());
        host.neighbors = 3;
        hwmp.receive_control_frame(
            &mut host,
            addr(1),
            MacAddress::BROADCAST,
            Messages::RREQ(rreq_from(addr(1), 5, addr(9), 10)),
        )
        .unwrap();
        hwmp.receive_control_frame(
            &mut host,
            addr(1),
            MacAddress::BROADCAST,
            Messages::RREQ(rreq_from(addr(1), 4, addr(9), 11)),
        )
        .unwrap();
        assert_eq!(host.control.len(), 1);
        assert_eq!(hwmp.route_table().get(addr(1)).unwrap().seq_no, 5);
    }

    #[test]
    fn test_single_neighbor_does_not_relay() {
        let (mut host, mut hwmp) = started(2, HwmpConfig::new());
        host.neighbors = 1;
        hwmp.receive_control_frame(
            &mut host,
            addr(1),
            MacAddress::BROADCAST,
            Messages::RREQ(rreq_from(addr(1), 5, addr(9), 10)),
        )
        .unwrap();
        assert!(host.control.is_empty());
        assert!(hwmp.route_table().is_valid(addr(1)));
    }

    #[test]
    fn test_ttl_exhausted_request_dropped() {
        let (mut host, mut hwmp) = started(2, HwmpConfig::new());
        host.neighbors = 3;
        let mut rreq = rreq_from(addr(1), 5, addr(9), 10);
        rreq.ttl = 1;
        hwmp.receive_control_frame(&mut host, addr(1), MacAddress::BROADCAST, Messages::RREQ(rreq))
            .unwrap();
        assert!(host.control.is_empty());
        assert_eq!(hwmp.stats().rreq_ttl_expired, 1);
    }

    #[test]
    fn test_request_beyond_diameter_ignored() {
        let (mut host, mut hwmp) = started(2, HwmpConfig::new());
        let mut rreq = rreq_from(addr(1), 5, addr(9), 10);
        rreq.hop_count = 8;
        hwmp.receive_control_frame(&mut host, addr(3), MacAddress::BROADCAST, Messages::RREQ(rreq))
            .unwrap();
        assert!(hwmp.route_table().is_empty());
    }

    #[test]
    fn test_intermediate_reply_and_forward() {
        let (mut host, mut hwmp) = started(2, HwmpConfig::new());
        host.neighbors = 3;
        //Known fresh route to 9 via 3, two hops
        let rrep = rrep_to(addr(2), addr(9), 6, 1);
        hwmp.receive_control_frame(&mut host, addr(3), addr(2), Messages::RREP(rrep)).unwrap();
        host.clear();

        let mut rreq = rreq_from(addr(1), 5, addr(9), 10);
        rreq.flags = RREQFlags::BROADCAST | RREQFlags::REPLY_AND_FORWARD;
        rreq.destination.seq_no = 4;
        hwmp.receive_control_frame(&mut host, addr(1), MacAddress::BROADCAST, Messages::RREQ(rreq))
            .unwrap();

        let (ra, reply) = host.last_rrep().unwrap();
        assert_eq!(ra, addr(1));
        assert_eq!(reply.destination, AddrSeq::new(addr(9), 6));
        assert_eq!(reply.hop_count, 2);
        assert_eq!(hwmp.stats().rrep_initiated_as_intermediate, 1);

        //Forwarded with only the destination allowed to answer
        let (_, fwd) = host.last_rreq().unwrap();
        assert!(fwd.flags.contains(RREQFlags::DESTINATION_ONLY));
        assert!(!fwd.flags.contains(RREQFlags::REPLY_AND_FORWARD));
        assert_eq!(fwd.destination.seq_no, 6);

        //Precursors both ways
        assert!(hwmp.route_table().get(addr(9)).unwrap().precursors.contains(addr(1)));
        assert!(hwmp.route_table().get(addr(1)).unwrap().precursors.contains(addr(3)));
    }

    #[test]
    fn test_intermediate_reply_over_hop_limit_leaves_no_precursor() {
        let (mut host, mut hwmp) = started(2, HwmpConfig::new());
        host.neighbors = 3;
        let rrep = rrep_to(addr(2), addr(9), 6, 1);
        hwmp.receive_control_frame(&mut host, addr(3), addr(2), Messages::RREP(rrep)).unwrap();
        host.clear();

        //6 hops so far plus 2 more to 9 exceeds the diameter
        let mut rreq = rreq_from(addr(1), 5, addr(9), 10);
        rreq.hop_count = 6;
        rreq.destination.seq_no = 4;
        hwmp.receive_control_frame(&mut host, addr(4), MacAddress::BROADCAST, Messages::RREQ(rreq))
            .unwrap();

        assert!(host.last_rrep().is_none());
        assert_eq!(hwmp.stats().rrep_initiated_as_intermediate, 0);
        assert!(hwmp.route_table().get(addr(1)).unwrap().precursors.is_empty());
        assert!(!hwmp.route_table().get(addr(9)).unwrap().precursors.contains(addr(4)));
    }

    #[test]
    fn test_destination_only_request_is_relayed() {
        let (mut host, mut hwmp) = started(2, HwmpConfig::new());
        host.neighbors = 3;
        let rrep = rrep_to(addr(2), addr(9), 6, 1);
        hwmp.receive_control_frame(&mut host, addr(3), addr(2), Messages::RREP(rrep)).unwrap();
        host.clear();

        let mut rreq = rreq_from(addr(1), 5, addr(9), 10);
        rreq.flags = RREQFlags::BROADCAST | RREQFlags::DESTINATION_ONLY;
        hwmp.receive_control_frame(&mut host, addr(1), MacAddress::BROADCAST, Messages::RREQ(rreq))
            .unwrap();
        assert!(host.last_rrep().is_none());
        assert_eq!(host.last_rreq().unwrap().1.destination.seq_no, 6);
    }

    #[test]
    fn test_unicast_request_without_route_answers_with_rerr() {
        let (mut host, mut hwmp) = started(2, HwmpConfig::new());
        host.neighbors = 3;
        let mut rreq = rreq_from(addr(1), 5, addr(9), 10);
        rreq.flags = RREQFlags::DESTINATION_ONLY;
        hwmp.receive_control_frame(&mut host, addr(1), addr(2), Messages::RREQ(rreq)).unwrap();

        let (ra, msg) = host.control.pop().unwrap();
        assert_eq!(ra, addr(1));
        match msg {
            Messages::RERR(rerr) => assert_eq!(rerr.destinations, vec![AddrSeq::new(addr(9), 1)]),
            other => panic!("Unexpected message {:?}", other),
        }
        assert_eq!(hwmp.stats().rerr_initiated, 1);
    }

    #[test]
    fn test_reply_drains_buffer_at_source() {
        let (mut host, mut hwmp) = started(1, HwmpConfig::new());
        hwmp.buffer_frame(&host, data_frame(1, 4, 1));
        hwmp.buffer_frame(&host, data_frame(1, 4, 2));
        hwmp.send_triggered_rreq(&mut host, addr(4), addr(1)).unwrap();

        let rrep = rrep_to(addr(1), addr(4), 3, 1);
        hwmp.receive_control_frame(&mut host, addr(2), addr(1), Messages::RREP(rrep)).unwrap();

        let entry = hwmp.route_table().get_valid(addr(4)).unwrap();
        assert_eq!(entry.hop_count, 2);
        assert_eq!(entry.next_hop, addr(2));
        assert!(hwmp.route_table().is_valid(addr(2)));
        assert!(!hwmp.sent_table().contains(addr(4)));
        let seqs: Vec<u32> = host.data.iter().map(|f| f.seq_no).collect();
        assert_eq!(seqs, vec![1, 2]);
        assert!(host.data.iter().all(|f| f.receiver == addr(2) && f.transmitter == addr(1)));
        assert_eq!(hwmp.stats().data_initiated, 2);
    }

    #[test]
    fn test_reply_timeout_of_answered_discovery_is_ignored() {
        let (mut host, mut hwmp) = started(1, HwmpConfig::new());
        hwmp.send_triggered_rreq(&mut host, addr(9), addr(1)).unwrap();
        let answered = last_reply_timeout(&host);
        let rrep = rrep_to(addr(1), addr(9), 3, 1);
        hwmp.receive_control_frame(&mut host, addr(2), addr(1), Messages::RREP(rrep)).unwrap();
        assert!(!hwmp.sent_table().contains(addr(9)));

        //The route breaks and a second discovery starts
        hwmp.link_failure(&mut host, addr(2), None).unwrap();
        hwmp.send_triggered_rreq(&mut host, addr(9), addr(1)).unwrap();
        let before = *hwmp.sent_table().get(addr(9)).unwrap();
        let sent = host.control.len();

        hwmp.handle_timeout(&mut host, answered).unwrap();
        assert_eq!(host.control.len(), sent);
        assert_eq!(hwmp.sent_table().get(addr(9)), Some(&before));
        assert_eq!(hwmp.stats().rreq_resent, 0);

        //The second discovery's own timer still drives the retry
        let current = last_reply_timeout(&host);
        assert_ne!(current, answered);
        hwmp.handle_timeout(&mut host, current).unwrap();
        assert_eq!(hwmp.stats().rreq_resent, 1);
        assert_eq!(host.control.len(), sent + 1);
    }

    #[test]
    fn test_reply_timeout_drains_route_learned_from_request() {
        let (mut host, mut hwmp) = started(1, HwmpConfig::new());
        hwmp.buffer_frame(&host, data_frame(1, 4, 1));
        hwmp.send_triggered_rreq(&mut host, addr(4), addr(1)).unwrap();

        //4 floods its own request before answering ours
        let mut rreq = rreq_from(addr(4), 3, addr(7), 20);
        rreq.hop_count = 1;
        rreq.metric = 1;
        hwmp.receive_control_frame(&mut host, addr(2), MacAddress::BROADCAST, Messages::RREQ(rreq))
            .unwrap();
        assert!(hwmp.route_table().is_valid(addr(4)));
        assert!(host.data.is_empty());

        let timeout = last_reply_timeout(&host);
        hwmp.handle_timeout(&mut host, timeout).unwrap();
        assert!(!hwmp.sent_table().contains(addr(4)));
        assert!(hwmp.packet_buffer().is_empty());
        assert_eq!(host.data.len(), 1);
        assert_eq!(host.data[0].receiver, addr(2));
        assert_eq!(hwmp.stats().rreq_resent, 0);
    }

    #[test]
    fn test_reply_update_rules() {
        let (mut host, mut hwmp) = started(1, HwmpConfig::new());
        let deliver = |hwmp: &mut Hwmp, host: &mut MockHost, from: u32, seq: u32, hops: u8| {
            let rrep = rrep_to(addr(1), addr(4), seq, hops);
            hwmp.receive_control_frame(host, addr(from), addr(1), Messages::RREP(rrep)).unwrap();
        };

        deliver(&mut hwmp, &mut host, 2, 5, 2);
        assert_eq!(hwmp.route_table().get(addr(4)).unwrap().next_hop, addr(2));
        //Older sequence number is ignored
        deliver(&mut hwmp, &mut host, 3, 4, 0);
        assert_eq!(hwmp.route_table().get(addr(4)).unwrap().next_hop, addr(2));
        //Same sequence number, different next hop wins
        deliver(&mut hwmp, &mut host, 3, 5, 3);
        assert_eq!(hwmp.route_table().get(addr(4)).unwrap().next_hop, addr(3));
        //Same sequence number and next hop, better metric
        deliver(&mut hwmp, &mut host, 3, 5, 1);
        assert_eq!(hwmp.route_table().get(addr(4)).unwrap().hop_count, 2);
        //Newer sequence number always wins
        deliver(&mut hwmp, &mut host, 2, 6, 4);
        let entry = hwmp.route_table().get(addr(4)).unwrap();
        assert_eq!((entry.next_hop, entry.seq_no, entry.hop_count), (addr(2), 6, 5));
    }

    #[test]
    fn test_reply_relayed_with_precursors() {
        let (mut host, mut hwmp) = started(2, HwmpConfig::new());
        host.neighbors = 3;
        hwmp.receive_control_frame(
            &mut host,
            addr(1),
            MacAddress::BROADCAST,
            Messages::RREQ(rreq_from(addr(1), 5, addr(4), 10)),
        )
        .unwrap();
        host.clear();

        let rrep = RouteResponseMessage {
            sources: vec![AddrSeq::new(addr(1), 5)],
            ..rrep_to(addr(1), addr(4), 3, 0)
        };
        hwmp.receive_control_frame(&mut host, addr(4), addr(2), Messages::RREP(rrep)).unwrap();

        let (ra, relayed) = host.last_rrep().unwrap();
        assert_eq!(ra, addr(1));
        assert_eq!(relayed.hop_count, 1);
        assert_eq!(relayed.ttl, 6);
        assert_eq!(relayed.metric, 1);
        assert!(hwmp.route_table().get(addr(4)).unwrap().precursors.contains(addr(1)));
        assert!(hwmp.route_table().get(addr(1)).unwrap().precursors.contains(addr(4)));
        assert_eq!(hwmp.stats().rrep_forwarded, 1);
    }

    #[test]
    fn test_link_failure_single_upstream_unicasts_rerr() {
        let (mut host, mut hwmp) = started(2, HwmpConfig::new());
        //Routes to 5, 6 and 7 via 3, each handed to neighbor 1
        for dest in 5..8 {
            let rrep = rrep_to(addr(2), addr(dest), 4, 1);
            hwmp.receive_control_frame(&mut host, addr(3), addr(2), Messages::RREP(rrep)).unwrap();
            hwmp.route_table.add_precursor(addr(dest), addr(1));
        }
        hwmp.update_neighbor_route(&host, addr(1), Duration::seconds(5));
        host.clear();

        hwmp.link_failure(&mut host, addr(3), None).unwrap();

        assert_eq!(host.control.len(), 1);
        let (ra, msg) = host.control.pop().unwrap();
        assert_eq!(ra, addr(1));
        match msg {
            Messages::RERR(rerr) => assert_eq!(
                rerr.destinations,
                vec![
                    AddrSeq::new(addr(5), 5),
                    AddrSeq::new(addr(6), 5),
                    AddrSeq::new(addr(7), 5)
                ]
            ),
            other => panic!("Unexpected message {:?}", other),
        }
        for dest in 5..8 {
            let entry = hwmp.route_table().get(addr(dest)).unwrap();
            assert!(!entry.is_active);
            assert_eq!(entry.seq_no, 5);
        }
        assert!(host.timers.iter().any(|(d, e)| {
            *d == Duration::seconds(25) && matches!(e, TimerEvent::RouteDeleteExpiry { .. })
        }));
        assert_eq!(host.purged, vec![(addr(3), None)]);
    }

    #[test]
    fn test_link_failure_many_upstreams_broadcasts_rerr() {
        let (mut host, mut hwmp) = started(2, HwmpConfig::new());
        for (dest, precursor) in vec![(5, 1), (6, 8)] {
            let rrep = rrep_to(addr(2), addr(dest), 4, 1);
            hwmp.receive_control_frame(&mut host, addr(3), addr(2), Messages::RREP(rrep)).unwrap();
            hwmp.route_table.add_precursor(addr(dest), addr(precursor));
        }
        host.clear();

        hwmp.link_failure(&mut host, addr(3), None).unwrap();
        let (ra, _) = host.control.pop().unwrap();
        assert_eq!(ra, MacAddress::BROADCAST);
        assert_eq!(hwmp.stats().rerr_initiated, 1);
    }

    #[test]
    fn test_link_failure_without_precursors_is_silent() {
        let (mut host, mut hwmp) = started(2, HwmpConfig::new());
        let rrep = rrep_to(addr(2), addr(5), 4, 1);
        hwmp.receive_control_frame(&mut host, addr(3), addr(2), Messages::RREP(rrep)).unwrap();
        host.clear();

        hwmp.link_failure(&mut host, addr(3), None).unwrap();
        assert!(host.control.is_empty());
        assert!(!hwmp.route_table().is_valid(addr(5)));
    }

    #[test]
    fn test_received_rerr_propagates_to_precursors() {
        let (mut host, mut hwmp) = started(2, HwmpConfig::new());
        for dest in vec![5, 6] {
            let rrep = rrep_to(addr(2), addr(dest), 4, 1);
            hwmp.receive_control_frame(&mut host, addr(3), addr(2), Messages::RREP(rrep)).unwrap();
        }
        hwmp.route_table.add_precursor(addr(5), addr(1));
        hwmp.update_neighbor_route(&host, addr(1), Duration::seconds(5));
        host.clear();

        let rerr = RouteErrorMessage {
            destinations: vec![AddrSeq::new(addr(5), 5), AddrSeq::new(addr(6), 5), AddrSeq::new(addr(7), 2)],
        };
        hwmp.receive_control_frame(&mut host, addr(3), addr(2), Messages::RERR(rerr)).unwrap();

        assert!(!hwmp.route_table().is_valid(addr(5)));
        assert!(!hwmp.route_table().is_valid(addr(6)));
        assert_eq!(hwmp.route_table().get(addr(5)).unwrap().seq_no, 5);
        let (ra, msg) = host.control.pop().unwrap();
        assert_eq!(ra, addr(1));
        match msg {
            Messages::RERR(rerr) => assert_eq!(rerr.destinations, vec![AddrSeq::new(addr(5), 5)]),
            other => panic!("Unexpected message {:?}", other),
        }
        assert_eq!(host.purged, vec![(addr(3), Some(addr(5)))]);
        assert_eq!(hwmp.stats().rerr_forwarded, 1);
    }

    #[test]
    fn test_rerr_from_other_neighbor_ignored() {
        let (mut host, mut hwmp) = started(2, HwmpConfig::new());
        let rrep = rrep_to(addr(2), addr(5), 4, 1);
        hwmp.receive_control_frame(&mut host, addr(3), addr(2), Messages::RREP(rrep)).unwrap();

        let rerr = RouteErrorMessage {
            destinations: vec![AddrSeq::new(addr(5), 9)],
        };
        hwmp.receive_control_frame(&mut host, addr(8), addr(2), Messages::RERR(rerr)).unwrap();
        assert!(hwmp.route_table().is_valid(addr(5)));
    }

    #[test]
    fn test_registration_installs_proxies() {
        let mut config = HwmpConfig::root();
        config.jitter = Some(0);
        let (mut host, mut hwmp) = started(1, config);
        hwmp.buffer_frame(&host, data_frame(1, 300, 1));

        let rrep = RouteResponseMessage {
            flags: RREPFlags::GRATUITOUS,
            hop_count: 1,
            ttl: 6,
            destination: AddrSeq::new(addr(1), 2),
            lifetime: 10_000,
            metric: 1,
            sources: vec![AddrSeq::new(addr(3), 7), AddrSeq::new(addr(300), 7)],
        };
        hwmp.receive_control_frame(&mut host, addr(2), addr(1), Messages::RREP(rrep)).unwrap();

        let entry = hwmp.route_table().get_valid(addr(3)).unwrap();
        assert_eq!((entry.next_hop, entry.hop_count), (addr(2), 2));
        let item = hwmp.proxies().lookup(addr(300)).unwrap();
        assert!(item.is_proxied && item.in_mesh);
        assert_eq!(item.proxy, addr(3));
        assert_eq!(hwmp.forwarding.next_hop(addr(3)), Some(addr(2)));
        //The frame waiting for the station goes down the tree
        assert_eq!(host.data.len(), 1);
        assert_eq!(host.data[0].receiver, addr(2));
        assert_eq!(hwmp.stats().rrep_grat_received, 1);
    }

    #[test]
    fn test_registration_without_parent_is_dropped() {
        let (mut host, mut hwmp) = started(2, HwmpConfig::new());
        let rrep = RouteResponseMessage {
            flags: RREPFlags::GRATUITOUS,
            hop_count: 0,
            ttl: 7,
            destination: AddrSeq::new(addr(1), 2),
            lifetime: 10_000,
            metric: 0,
            sources: vec![AddrSeq::new(addr(3), 7)],
        };
        hwmp.receive_control_frame(&mut host, addr(3), addr(2), Messages::RREP(rrep)).unwrap();
        assert!(host.control.is_empty());
        assert_eq!(hwmp.stats().rrep_grat_forwarded, 0);
        //The registering node is still reachable
        assert!(hwmp.route_table().is_valid(addr(3)));
    }

    #[test]
    fn test_duration_to_ms() {
        assert_eq!(duration_to_ms(Duration::milliseconds(-5)), 0);
        assert_eq!(duration_to_ms(Duration::milliseconds(1500)), 1500);
        assert_eq!(duration_to_ms(Duration::days(100)), u32::max_value());
    }
}
