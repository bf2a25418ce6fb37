//! Per-frame forwarding decision. The host hands every data frame to
//! `MeshRouter::route_and_maybe_forward` and delivers the frame itself when the
//! answer is `RouteOutcome::NotHandled`.
use super::Hwmp;
use crate::host::{DataFrame, MeshHost};
use crate::logging::{self, MessageStatus};
use crate::HwmpError;

/// What the router did with a data frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// The frame was relayed, queued or dropped. The host is done with it.
    Handled,
    /// The frame terminates here. The host must deliver it upwards.
    NotHandled,
}

/// Entry point of the forwarding logic.
pub trait MeshRouter {
    fn route_and_maybe_forward(
        &mut self,
        host: &mut dyn MeshHost,
        frame: DataFrame,
    ) -> Result<RouteOutcome, HwmpError>;
}

impl MeshRouter for Hwmp {
    fn route_and_maybe_forward(
        &mut self,
        host: &mut dyn MeshHost,
        frame: DataFrame,
    ) -> Result<RouteOutcome, HwmpError> {
        let local_dest = host.is_self_or_station(frame.destination);
        let local_source = host.is_self_or_station(frame.source);

        if local_dest && local_source {
            //The station moved but the reassociation notice did not reach us
            warn!(self.logger, "Station not within the BSS"; "station"=>frame.source);
            host.station_disassociated(frame.source);
        }

        let res = if !local_source {
            self.receive_data(host, frame)
        } else if local_dest {
            Ok(())
        } else {
            self.originate_data(host, frame)
        };
        self.arm_route_timers(host);
        res?;

        if local_dest {
            Ok(RouteOutcome::NotHandled)
        } else {
            Ok(RouteOutcome::Handled)
        }
    }
}

impl Hwmp {
    /// A frame originated by this node or one of its stations.
    fn originate_data(&mut self, host: &mut dyn MeshHost, frame: DataFrame) -> Result<(), HwmpError> {
        let dest = frame.destination;
        if let Some((next_hop, _)) = self.route_table.next_hop(dest) {
            debug!(self.logger, "Route found, sending"; "destination"=>dest, "next_hop"=>next_hop);
            self.stats.data_initiated += 1;
            return self.relay_data_frame(host, next_hop, frame);
        }

        let frame = match self.try_tree(host, frame)? {
            Some(frame) => frame,
            None => {
                debug!(self.logger, "No route, sent along the tree"; "destination"=>dest);
                self.stats.data_initiated += 1;
                return Ok(());
            }
        };

        if self.sent_table.contains(dest) {
            debug!(self.logger, "Discovery pending, frame buffered"; "destination"=>dest);
            self.buffer_frame(host, frame);
            return Ok(());
        }
        let source = frame.source;
        if self.buffer_frame(host, frame) {
            self.send_triggered_rreq(host, dest, source)?;
        }
        Ok(())
    }

    /// A frame heard from a neighbor: either it ends here or it must be relayed.
    fn receive_data(&mut self, host: &mut dyn MeshHost, frame: DataFrame) -> Result<(), HwmpError> {
        let dest = frame.destination;
        let prev_hop = frame.transmitter;

        if host.is_self_or_station(dest) {
            self.stats.data_received += 1;
            logging::log_handle_message(
                &self.logger,
                prev_hop,
                MessageStatus::ACCEPTED,
                None,
                None,
                &frame,
            );
            let mut discovery_started = false;
            if frame.uses_tbr
                && !self.route_table.is_valid(frame.source)
                && !self.sent_table.contains(frame.source)
            {
                //Came down the tree: look for a direct path back
                debug!(self.logger, "Frame arrived along the tree, discovering the source"; "source"=>frame.source);
                self.send_triggered_rreq(host, frame.source, dest)?;
                discovery_started = true;
            }
            self.refresh_neighbor_route(host, prev_hop);
            if frame.source != prev_hop && !discovery_started {
                self.refresh_route(host, frame.source, None, None);
            }
            return Ok(());
        }

        if let Some((next_hop, _)) = self.route_table.next_hop(dest) {
            self.stats.data_forwarded += 1;
            logging::log_handle_message(
                &self.logger,
                prev_hop,
                MessageStatus::FORWARDING,
                None,
                None,
                &frame,
            );
            return self.relay_data_frame(host, next_hop, frame);
        }

        let frame = match self.try_tree(host, frame)? {
            Some(frame) => frame,
            None => {
                self.stats.data_forwarded += 1;
                return Ok(());
            }
        };

        if self.sent_table.contains(dest) {
            self.buffer_frame(host, frame);
            return Ok(());
        }
        self.stats.rerr_initiated += 1;
        self.stats.data_dropped_for_no_route += 1;
        self.log_drop(prev_hop, "NO_ROUTE", &frame);
        self.send_rerr_for_unreachable_dest(host, dest, prev_hop)
    }

    /// Hands the frame to the tree when it is ready. Gives the frame back if the
    /// tree cannot take it.
    fn try_tree(&mut self, host: &mut dyn MeshHost, frame: DataFrame) -> Result<Option<DataFrame>, HwmpError> {
        if !self.tree.is_forwarding() {
            return Ok(Some(frame));
        }
        let fallback = frame.clone();
        if self.tree_relay_data_frame(host, frame)? {
            Ok(None)
        } else {
            Ok(Some(fallback))
        }
    }
}
