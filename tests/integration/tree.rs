extern crate hwmp_mesh;

use hwmp_mesh::hwmp::tbr::TbrState;
use hwmp_mesh::logging;
use hwmp_mesh::simulation::{SimConfig, Simulation};
use hwmp_mesh::tests::common::*;

#[test]
fn mesh_points_attach_to_root() -> TestResult {
    let config = SimConfig::from_file(get_test_path("root_tree.toml"))?;
    let mut sim = Simulation::new(&config, logging::create_discard_logger())?;
    let report = sim.run()?;

    let root = sim.node(1).unwrap();
    assert_eq!(root.tree_state(), TbrState::Forwarding);
    assert_eq!(root.current_parent(), None);
    //One announcement per period
    assert!(root.stats().rann_initiated >= 4);

    let middle = sim.node(2).unwrap();
    assert_eq!(middle.tree_state(), TbrState::Forwarding);
    assert_eq!(middle.current_parent(), Some(addr(1)));
    assert!(middle.stats().rann_relayed > 0);

    let leaf = sim.node(3).unwrap();
    assert_eq!(leaf.tree_state(), TbrState::Forwarding);
    assert_eq!(leaf.current_parent(), Some(addr(2)));

    //Root traffic reaches the station behind the leaf
    assert_eq!(report.frames_delivered, 1);
    assert_eq!(sim.delivered(3).len(), 1);
    assert_eq!(sim.delivered(3)[0].destination, addr(30));

    Ok(())
}
