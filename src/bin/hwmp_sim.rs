#[macro_use]
extern crate slog;
extern crate hwmp_mesh;

use clap::{App, Arg, ArgMatches};
use hwmp_mesh::logging;
use hwmp_mesh::simulation::{SimConfig, SimReport, Simulation};
use hwmp_mesh::{HwmpError, HwmpErrorKind};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::env;

const ARG_CONFIG: &str = "config";
const ARG_WORK_DIR: &str = "work_dir";
const ARG_DURATION: &str = "duration";
const ARG_TERMINAL_LOG: &str = "term_log";
const VERSION: &str = env!("CARGO_PKG_VERSION");
const CONFIG_FILE_NAME: &str = "simulation.toml";
const RESULTS_FILE_NAME: &str = "results.json";
const ERROR_EXECUTION_FAILURE: i32 = 1;
const ERROR_INITIALIZATION: i32 = 2;

/// Settings of one run, merged from the simulation file and the command line.
#[derive(Debug)]
struct RunConfig {
    sim: SimConfig,
    work_dir: PathBuf,
    term_log: bool,
}

fn run(config: RunConfig) -> Result<SimReport, HwmpError> {
    let log_file_name = config
        .work_dir
        .join(logging::LOG_DIR_NAME)
        .join(logging::DEFAULT_SIM_LOG);
    let logger = logging::create_logger(&log_file_name, config.term_log)
        .unwrap_or_else(|e| {
            println!("hwmp_sim failed with the following error: {}", e);
            ::std::process::exit(ERROR_INITIALIZATION);
        });

    info!(logger, "Simulation config: {:?}", &config.sim);
    let mut sim = Simulation::new(&config.sim, logger.clone())?;
    let report = sim.run()?;
    info!(logger, "Simulation finished";
        "frames_originated"=>report.frames_originated,
        "frames_delivered"=>report.frames_delivered,
        "control_transmissions"=>report.control_transmissions);

    let results_file = config.work_dir.join(RESULTS_FILE_NAME);
    let file = File::create(&results_file).map_err(|e| HwmpError {
        kind: HwmpErrorKind::Io(String::from("Could not create results file")),
        cause: Some(Box::new(e)),
    })?;
    serde_json::to_writer_pretty(file, &report).map_err(|e| HwmpError {
        kind: HwmpErrorKind::Serialization(String::from("Could not write results")),
        cause: Some(Box::new(e)),
    })?;

    Ok(report)
}

fn get_cli_parameters<'a>() -> ArgMatches<'a> {
    App::new("hwmp_sim").version(VERSION)
                        .author("Marco Caballero <marco.caballero@cl.cam.ac.uk>")
                        .about("Runs a discrete-event simulation of an HWMP mesh")
                        .arg(Arg::with_name(ARG_CONFIG)
                              .short("c")
                              .long("config")
                              .value_name("FILE")
                              .help("Simulation file describing nodes, links and actions.")
                              .takes_value(true))
                        .arg(Arg::with_name(ARG_WORK_DIR)
                              .short("d")
                              .long("work_dir")
                              .value_name("DIR")
                              .help("Operating directory for the program, where results and logs will be placed.")
                              .takes_value(true))
                        .arg(Arg::with_name(ARG_DURATION)
                              .short("t")
                              .long("duration")
                              .value_name("MILLISECONDS")
                              .help("Overrides the duration set in the simulation file.")
                              .takes_value(true))
                        .arg(Arg::with_name(ARG_TERMINAL_LOG)
                              .short("l")
                              .long("log_to_terminal")
                              .value_name("true/false")
                              .help("Should the simulation log to the terminal as well")
                              .takes_value(true))
                        .get_matches()
}

fn config_error(msg: &str) -> HwmpError {
    HwmpError {
        kind: HwmpErrorKind::Configuration(String::from(msg)),
        cause: None,
    }
}

fn validate_config(sim: &mut SimConfig, matches: &ArgMatches) -> Result<RunConfig, HwmpError> {
    //work_dir
    let work_dir = match matches.value_of(ARG_WORK_DIR) {
        Some(dir) => PathBuf::from(dir),
        None => env::current_dir().map_err(|e| HwmpError {
            kind: HwmpErrorKind::Configuration(String::from("Failed to read current directory")),
            cause: Some(Box::new(e)),
        })?,
    };
    let dir_info = fs::metadata(&work_dir).map_err(|e| HwmpError {
        kind: HwmpErrorKind::Configuration(String::from("work_dir is not a valid directory")),
        cause: Some(Box::new(e)),
    })?;
    if !dir_info.is_dir() || dir_info.permissions().readonly() {
        return Err(config_error("work_dir is not a valid directory or it's not writable"));
    }

    //Duration
    if let Some(duration) = matches.value_of(ARG_DURATION) {
        sim.duration = duration.parse::<u64>().map_err(|e| HwmpError {
            kind: HwmpErrorKind::Configuration(format!("Invalid duration {}", duration)),
            cause: Some(Box::new(e)),
        })?;
    }
    if sim.duration == 0 {
        return Err(config_error("The simulation duration must be greater than 0"));
    }
    if sim.nodes.is_empty() {
        return Err(config_error("The simulation has no nodes"));
    }

    // Log to terminal
    let term_log = matches
        .value_of(ARG_TERMINAL_LOG)
        .map(|v| v.parse::<bool>().unwrap_or(false))
        .unwrap_or(false);

    Ok(RunConfig {
        sim: sim.clone(),
        work_dir,
        term_log,
    })
}

/// Reads the simulation file and applies the command line overrides.
fn init(matches: &ArgMatches) -> Result<RunConfig, HwmpError> {
    let config_file_path = match matches.value_of(ARG_CONFIG) {
        Some(path) => PathBuf::from(path),
        //No simulation file was passed. Look for default option: current_dir + default name.
        None => Path::new(".").join(CONFIG_FILE_NAME),
    };
    let mut sim = SimConfig::from_file(&config_file_path)?;
    validate_config(&mut sim, matches)
}

fn main() {
    //Enable the a more readable version of backtraces
    color_backtrace::install();

    //Get the CLI parameters
    let matches = get_cli_parameters();

    //Initialization
    let config = init(&matches).unwrap_or_else(|e| {
        println!("hwmp_sim failed with the following error: {}", e);
        std::process::exit(ERROR_INITIALIZATION);
    });

    match run(config) {
        Ok(report) => {
            println!(
                "{}: {}/{} frames delivered, {} control frames transmitted",
                report.name,
                report.frames_delivered,
                report.frames_originated,
                report.control_transmissions
            );
        }
        Err(e) => {
            eprintln!("hwmp_sim failed with the following error: {}", e);
            std::process::exit(ERROR_EXECUTION_FAILURE);
        }
    }
}
