extern crate hwmp_mesh;

use hwmp_mesh::logging::{self, *};
use hwmp_mesh::tests::common::*;
use std::path::Path;

#[test]
fn hwmp_sim_basic() {
    let test = get_test_path("chain_discovery.toml");
    let work_dir = create_test_dir("hwmp_sim_basic");
    let program = get_sim_path();

    println!("Running command: {} -c {} -d {}", &program, &test, &work_dir);

    //Assert the simulation finished succesfully
    assert_cli::Assert::command(&[&program])
        .with_args(&["-c", &test, "-d", &work_dir])
        .succeeds()
        .stdout()
        .contains("2/2 frames delivered")
        .unwrap();

    let results = Path::new(&work_dir).join("results.json");
    assert!(results.exists());

    let log_file = Path::new(&work_dir).join(LOG_DIR_NAME).join(DEFAULT_SIM_LOG);
    let records = logging::get_log_records_from_file(&log_file).unwrap();
    assert!(logging::find_record_by_msg("Simulation finished", &records).is_some());
    let delivered = records.iter().filter(|r| r.msg == "Frame delivered").count();
    assert_eq!(delivered, 2);
}

#[test]
fn hwmp_sim_rejects_missing_file() {
    let work_dir = create_test_dir("hwmp_sim_missing");
    let program = get_sim_path();

    assert_cli::Assert::command(&[&program])
        .with_args(&["-c", "/nonexistent/simulation.toml", "-d", &work_dir])
        .fails_with(2)
        .unwrap();
}
