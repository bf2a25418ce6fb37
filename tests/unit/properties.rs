extern crate hwmp_mesh;

use hwmp_mesh::config::HwmpConfig;
use hwmp_mesh::hwmp::messages::*;
use hwmp_mesh::hwmp::MeshRouter;
use hwmp_mesh::tests::common::*;
use hwmp_mesh::MacAddress;

fn reply_for(dest: u32, seq_no: u32, metric: u32, source: u32) -> Messages {
    Messages::RREP(RouteResponseMessage {
        flags: RREPFlags::empty(),
        hop_count: 1,
        ttl: 5,
        destination: AddrSeq::new(addr(dest), seq_no),
        lifetime: 5000,
        metric,
        sources: vec![AddrSeq::new(addr(source), 1)],
    })
}

#[test]
fn stored_sequence_number_never_decreases() -> TestResult {
    let mut host = MockHost::new(addr(1));
    host.neighbors = 3;
    let mut hwmp = new_instance(addr(1), HwmpConfig::new());
    hwmp.init(&mut host)?;

    let offers = [(5, 2, 2), (3, 1, 3), (7, 9, 2), (6, 1, 3), (7, 4, 3)];
    let mut seen = Vec::new();
    for (seq_no, metric, neighbor) in offers.iter() {
        hwmp.receive_control_frame(&mut host, addr(*neighbor), addr(1), reply_for(9, *seq_no, *metric, 1))?;
        let entry = hwmp.route_table().get(addr(9)).expect("no route");
        seen.push(entry.seq_no);
    }
    assert_eq!(seen, vec![5, 5, 7, 7, 7]);
    //Same sequence number, better metric: the path moves
    assert_eq!(hwmp.route_table().next_hop(addr(9)), Some((addr(3), 0)));
    assert_eq!(hwmp.route_table().iter().filter(|e| e.destination == addr(9)).count(), 1);

    Ok(())
}

#[test]
fn buffer_never_exceeds_budget() -> TestResult {
    let mut host = MockHost::new(addr(1));
    let mut config = HwmpConfig::new();
    config.buffer_size_packets = Some(3);
    let mut hwmp = new_instance(addr(1), config);
    hwmp.init(&mut host)?;

    for seq_no in 0..5 {
        hwmp.route_and_maybe_forward(&mut host, data_frame(1, 9, seq_no))?;
        assert!(hwmp.packet_buffer().len() <= 3);
        assert_eq!(hwmp.stats().data_dropped_for_overlimit, seq_no.saturating_sub(2));
    }
    assert_eq!(hwmp.packet_buffer().len(), 3);
    //One discovery for the destination
    let requests = host
        .control
        .iter()
        .filter(|(ra, m)| *ra == MacAddress::BROADCAST && matches!(m, Messages::RREQ(_)))
        .count();
    assert_eq!(requests, 1);

    Ok(())
}

#[test]
fn no_route_no_forward() -> TestResult {
    let mut host = MockHost::new(addr(2));
    host.neighbors = 4;
    let mut hwmp = new_instance(addr(2), HwmpConfig::new());
    hwmp.init(&mut host)?;

    for dest in 10..20 {
        let mut frame = data_frame(1, dest, dest);
        frame.transmitter = addr(1);
        hwmp.route_and_maybe_forward(&mut host, frame)?;
    }
    assert!(host.data.is_empty());
    assert_eq!(hwmp.stats().data_dropped_for_no_route, 10);
    assert_eq!(hwmp.stats().data_forwarded, 0);

    Ok(())
}
