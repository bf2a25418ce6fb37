extern crate hwmp_mesh;

use hwmp_mesh::logging;
use hwmp_mesh::simulation::{SimConfig, Simulation};
use hwmp_mesh::tests::common::*;

fn load(spec: &str) -> Simulation {
    let config = SimConfig::from_file(get_test_path(spec)).expect("Could not load simulation file");
    Simulation::new(&config, logging::create_discard_logger()).expect("Could not build simulation")
}

#[test]
fn chain_discovery() -> TestResult {
    let mut sim = load("chain_discovery.toml");
    let report = sim.run()?;

    assert_eq!(report.frames_originated, 2);
    assert_eq!(report.frames_delivered, 2);
    assert_eq!(sim.delivered(4).len(), 1);
    assert_eq!(sim.delivered(1).len(), 1);
    assert_eq!(sim.delivered(1)[0].payload.len(), 256);

    let node1 = sim.node(1).expect("node 1 missing");
    let route = node1.route_table().get(addr(4)).expect("no route to node 4");
    assert_eq!(route.hop_count, 3);
    assert_eq!(route.next_hop, addr(2));
    //The first ring was too small
    assert!(node1.stats().rreq_bc_initiated >= 2);
    assert!(node1.packet_buffer().is_empty());

    Ok(())
}

#[test]
fn link_failure_rediscovers_through_other_branch() -> TestResult {
    let mut sim = load("link_failure.toml");

    sim.run_until(chrono::Duration::milliseconds(1500))?;
    let first_hop = sim.node(1).unwrap().route_table().next_hop(addr(4)).map(|(n, _)| n);
    assert_eq!(first_hop, Some(addr(2)));

    sim.run_until(chrono::Duration::milliseconds(2500))?;
    //Node 2 told node 1 the destination is gone
    let route = sim.node(1).unwrap().route_table().get(addr(4)).expect("route deleted early");
    assert!(!route.is_active);
    assert_eq!(sim.node(2).unwrap().stats().rerr_initiated, 1);

    let report = sim.run()?;
    assert_eq!(report.frames_delivered, 2);
    assert_eq!(sim.delivered(4).len(), 2);
    let next_hop = sim.node(1).unwrap().route_table().next_hop(addr(4)).map(|(n, _)| n);
    assert_eq!(next_hop, Some(addr(3)));

    Ok(())
}

#[test]
fn roaming_station_reached_at_new_mesh_point() -> TestResult {
    let mut sim = load("roaming_station.toml");
    let report = sim.run()?;

    assert_eq!(report.frames_delivered, 2);
    assert_eq!(sim.delivered(2).len(), 1);
    assert_eq!(sim.delivered(3).len(), 1);
    assert!(sim.stations(2).is_empty());
    assert_eq!(sim.stations(3), vec![addr(50)]);
    let next_hop = sim.node(1).unwrap().route_table().next_hop(addr(50)).map(|(n, _)| n);
    assert_eq!(next_hop, Some(addr(3)));

    Ok(())
}
