use std::io;
use std::path::PathBuf;
use std::process::exit;

use log::error;
use structopt::StructOpt;

use crate::loader::loader::load;
use crate::simulator::{load_simulator_config, Simulator};

mod simulator;
mod loader;
mod backend;
mod instructions;

#[derive(StructOpt, Debug)]
#[structopt(name = "Tomasulo Simulator")]
struct Opt {
    /// Path of the program to load
    #[structopt(short, long, parse(from_os_str))]
    file: PathBuf,

    /// Sets a custom config file
    #[structopt(short, long, parse(from_os_str), default_value = "tomasulo.yaml")]
    config: PathBuf,

    /// Advance instructions by number from stdin instead of running automatically
    #[structopt(short, long)]
    interactive: bool,

    /// Print the final state as YAML
    #[structopt(short, long)]
    dump: bool,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let opt = Opt::from_args();

    let config_path = opt.config.to_string_lossy();
    let config = match load_simulator_config(&config_path) {
        Ok(config) => config,
        Err(err) => {
            error!("Failed to load {}. Cause: {}", config_path, err);
            exit(1);
        }
    };

    let path = opt.file.to_string_lossy();
    println!("Loading {}", path);
    let program = match load(&config, &path) {
        Ok(program) => program,
        Err(err) => {
            error!("Loading program '{}' failed. {}", path, err);
            exit(1);
        }
    };

    let mut simulator = Simulator::new(&config);
    let result = if opt.interactive {
        simulator.run_interactive(&program, io::stdin().lock(), io::stdout())
    } else {
        simulator.run(&program)
    };

    if let Err(err) = result {
        error!("{}", err);
        exit(1);
    }

    {
        let perf_counters = simulator.perf_counters.borrow();
        println!("Cycles: {}, issued: {}, executed: {}, written: {}, stalls: {}",
                 perf_counters.cycle_cnt,
                 perf_counters.issue_cnt,
                 perf_counters.execute_cnt,
                 perf_counters.write_result_cnt,
                 perf_counters.stall_cnt);
    }

    if opt.dump {
        match serde_yaml::to_string(&simulator.snapshot()) {
            Ok(yaml) => print!("{}", yaml),
            Err(err) => {
                error!("Failed to render state: {}", err);
                exit(1);
            }
        }
    }
}
