extern crate hwmp_mesh;

use chrono::Duration;
use hwmp_mesh::config::HwmpConfig;
use hwmp_mesh::host::TimerEvent;
use hwmp_mesh::hwmp::messages::*;
use hwmp_mesh::hwmp::tbr::TbrState;
use hwmp_mesh::hwmp::{MeshRouter, PathUpdate, RouteOutcome};
use hwmp_mesh::tests::common::*;
use hwmp_mesh::MacAddress;

fn started(me: u32, neighbors: usize, config: HwmpConfig) -> (MockHost, hwmp_mesh::Hwmp) {
    let mut host = MockHost::new(addr(me));
    host.neighbors = neighbors;
    let mut hwmp = new_instance(addr(me), config);
    hwmp.init(&mut host).expect("init failed");
    host.clear();
    (host, hwmp)
}

fn announcement(root: u32, seq_no: u32, metric: u32) -> RootAnnouncementMessage {
    RootAnnouncementMessage {
        flags: RANNFlags::REGISTRATION,
        hop_count: 1,
        ttl: 6,
        root: addr(root),
        root_seq_no: seq_no,
        lifetime: 10_000,
        metric,
    }
}

//Node A asks for D, D answers, A sends what it buffered.
#[test]
fn discovery_request_reply_and_drain() -> TestResult {
    let (mut host_a, mut a) = started(1, 2, HwmpConfig::new());
    let (mut host_d, mut d) = started(4, 1, HwmpConfig::new());

    //A has no idea about D
    let outcome = a.route_and_maybe_forward(&mut host_a, data_frame(1, 4, 1))?;
    a.route_and_maybe_forward(&mut host_a, data_frame(1, 4, 2))?;
    assert_eq!(outcome, RouteOutcome::Handled);
    let (ra, rreq) = host_a.last_rreq().expect("no request sent");
    assert_eq!(ra, MacAddress::BROADCAST);
    assert!(rreq.flags.contains(RREQFlags::BROADCAST));
    assert_eq!(rreq.destination, AddrSeq::new(addr(4), 0));
    assert_eq!(rreq.ttl, 2);
    assert_eq!(rreq.hop_count, 0);
    assert!(a.sent_table().contains(addr(4)));
    assert_eq!(a.packet_buffer().len(), 2);
    assert!(host_a.data.is_empty());

    //D learns about a fresher copy of itself than it owns
    let mut heard = rreq.clone();
    heard.destination.seq_no = 9;
    d.receive_control_frame(&mut host_d, addr(1), MacAddress::BROADCAST, Messages::RREQ(heard))?;
    assert_eq!(d.seq_no(), 9);
    let (ra, rrep) = host_d.last_rrep().expect("no reply sent");
    assert_eq!(ra, addr(1));
    assert_eq!(rrep.hop_count, 0);
    assert_eq!(rrep.destination, AddrSeq::new(addr(4), 9));
    assert_eq!(rrep.source().map(|s| s.addr), Some(addr(1)));
    //Reverse route to A
    assert_eq!(d.route_table().next_hop(addr(1)), Some((addr(1), 0)));

    //A receives the reply from D directly
    a.receive_control_frame(&mut host_a, addr(4), addr(1), Messages::RREP(rrep))?;
    let entry = a.route_table().get(addr(4)).expect("no route to D");
    assert!(entry.is_active);
    assert_eq!(entry.hop_count, 1);
    assert_eq!(entry.seq_no, 9);
    assert_eq!(entry.next_hop, addr(4));
    assert!(!a.sent_table().contains(addr(4)));
    assert!(a.packet_buffer().is_empty());
    let sent: Vec<u32> = host_a.data.iter().map(|f| f.seq_no).collect();
    assert_eq!(sent, vec![1, 2]);
    assert!(host_a.data.iter().all(|f| f.receiver == addr(4)));

    Ok(())
}

//A relays replies for three destinations behind B towards one upstream neighbor.
#[test]
fn link_failure_reports_every_route_through_neighbor() -> TestResult {
    let (mut host, mut a) = started(2, 2, HwmpConfig::new());
    let upstream = addr(1);
    let b = addr(3);

    for dest in 5..8 {
        let rreq = rreq_from(upstream, 1, addr(dest), dest);
        a.receive_control_frame(&mut host, upstream, MacAddress::BROADCAST, Messages::RREQ(rreq))?;
        let rrep = RouteResponseMessage {
            flags: RREPFlags::empty(),
            hop_count: 1,
            ttl: 5,
            destination: AddrSeq::new(addr(dest), 10),
            lifetime: 5000,
            metric: 1,
            sources: vec![AddrSeq::new(upstream, 1)],
        };
        a.receive_control_frame(&mut host, b, addr(2), Messages::RREP(rrep))?;
    }
    for dest in 5..8 {
        let entry = a.route_table().get(addr(dest)).unwrap();
        assert_eq!(entry.next_hop, b);
        assert!(entry.precursors.contains(upstream));
    }
    host.clear();

    a.link_failure(&mut host, b, None)?;

    assert_eq!(host.purged, vec![(b, None)]);
    let rerrs: Vec<(MacAddress, RouteErrorMessage)> = host
        .control
        .iter()
        .filter_map(|(ra, msg)| match msg {
            Messages::RERR(m) => Some((*ra, m.clone())),
            _ => None,
        })
        .collect();
    assert_eq!(rerrs.len(), 1);
    let (ra, rerr) = &rerrs[0];
    //Single upstream: unicast
    assert_eq!(*ra, upstream);
    for dest in 5..8 {
        assert!(rerr.destinations.contains(&AddrSeq::new(addr(dest), 11)));
        let entry = a.route_table().get(addr(dest)).unwrap();
        assert!(!entry.is_active);
        assert!(entry.precursors.is_empty());
    }
    assert!(host
        .timers
        .iter()
        .any(|(_, e)| matches!(e, TimerEvent::RouteDeleteExpiry { .. })));
    assert_eq!(a.stats().rerr_initiated, 1);

    Ok(())
}

//The better announcement arrives first, the worse one carries the same sequence number.
#[test]
fn init_node_records_both_candidates_and_picks_lower_metric() -> TestResult {
    let (mut host, mut hwmp) = started(5, 3, HwmpConfig::new());
    assert_eq!(hwmp.tree_state(), TbrState::Init);

    hwmp.receive_control_frame(&mut host, addr(2), MacAddress::BROADCAST, Messages::RANN(announcement(1, 6, 2)))?;
    hwmp.receive_control_frame(&mut host, addr(3), MacAddress::BROADCAST, Messages::RANN(announcement(1, 6, 7)))?;

    let mut candidates = hwmp.parent_candidates();
    candidates.sort();
    assert_eq!(candidates, vec![addr(2), addr(3)]);
    assert_eq!(hwmp.route_table().next_hop(addr(1)), Some((addr(2), 0)));
    host.clear();

    //Registration required: the chosen candidate is validated first
    hwmp.handle_timeout(&mut host, TimerEvent::RannTimer)?;
    let (ra, rreq) = host.last_rreq().expect("no maintenance request");
    assert_eq!(ra, addr(2));
    assert_eq!(rreq.destination, AddrSeq::new(addr(1), 6));
    assert_eq!(hwmp.tree_state(), TbrState::Init);

    //The root answers through the candidate
    let rrep = RouteResponseMessage {
        flags: RREPFlags::empty(),
        hop_count: 1,
        ttl: 6,
        destination: AddrSeq::new(addr(1), 6),
        lifetime: 10_000,
        metric: 2,
        sources: vec![AddrSeq::new(addr(5), hwmp.seq_no())],
    };
    hwmp.receive_control_frame(&mut host, addr(2), addr(5), Messages::RREP(rrep))?;
    assert_eq!(hwmp.current_parent(), Some(addr(2)));
    assert_eq!(hwmp.tree_state(), TbrState::Forwarding);

    Ok(())
}

//A deletion timer that outlived the entry it was armed for does nothing.
#[test]
fn delete_timer_after_reactivation_is_noop() -> TestResult {
    let (mut host, mut hwmp) = started(1, 2, HwmpConfig::new());
    let update = PathUpdate {
        destination: addr(9),
        seq_no: 4,
        hop_count: 3,
        metric: 3,
        next_hop: addr(2),
        lifetime: Duration::seconds(3),
        is_active: true,
    };
    hwmp.path_update(&mut host, update);
    hwmp.link_failure(&mut host, addr(2), None)?;
    assert!(!hwmp.route_table().get(addr(9)).unwrap().is_active);
    let timer = host
        .take_timer(|e| matches!(e, TimerEvent::RouteDeleteExpiry { .. }))
        .expect("no delete timer");

    //Reactivated one second before the timer fires
    host.advance(hwmp.params().deletion_period() - Duration::seconds(1));
    hwmp.path_update(&mut host, update);
    host.advance(Duration::seconds(1));
    hwmp.handle_timeout(&mut host, timer)?;

    let entry = hwmp.route_table().get(addr(9)).expect("route deleted");
    assert!(entry.is_active);
    assert_eq!(entry.seq_no, 5);

    Ok(())
}

#[test]
fn duplicate_request_answered_once() -> TestResult {
    let (mut host, mut hwmp) = started(4, 2, HwmpConfig::new());
    let rreq = rreq_from(addr(1), 3, addr(4), 77);

    hwmp.receive_control_frame(&mut host, addr(2), MacAddress::BROADCAST, Messages::RREQ(rreq.clone()))?;
    hwmp.receive_control_frame(&mut host, addr(3), MacAddress::BROADCAST, Messages::RREQ(rreq))?;

    let replies = host
        .control
        .iter()
        .filter(|(_, m)| matches!(m, Messages::RREP(_)))
        .count();
    assert_eq!(replies, 1);
    assert_eq!(hwmp.stats().rreq_duplicate, 1);
    assert_eq!(hwmp.stats().rrep_initiated_as_dest, 1);

    Ok(())
}
