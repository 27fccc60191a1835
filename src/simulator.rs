use std::cell::RefCell;
use std::error::Error;
use std::fs::File;
use std::io::{BufRead, Write};
use std::rc::Rc;
use std::thread;
use std::time::Duration;

use log::info;
use serde::Deserialize;
use thiserror::Error;

use crate::backend::backend::{Backend, BackendError, Snapshot};
use crate::backend::instruction_status::{AdvanceOutcome, InstrPhase};
use crate::instructions::instructions::Program;

pub(crate) struct PerfCounters {
    pub issue_cnt: u64,
    pub execute_cnt: u64,
    pub write_result_cnt: u64,
    pub stall_cnt: u64,
    pub cycle_cnt: u64,
}

impl PerfCounters {
    pub fn new() -> Self {
        Self { issue_cnt: 0, execute_cnt: 0, write_result_cnt: 0, stall_cnt: 0, cycle_cnt: 0 }
    }
}

#[derive(Clone, Deserialize, Debug, Default)]
#[serde(default)]
pub(crate) struct Trace {
    pub issue: bool,
    pub execute: bool,
    pub write_result: bool,
    pub cycle: bool,
}

#[derive(Clone, Deserialize, Debug)]
#[serde(default)]
pub(crate) struct SimulatorConfig {
    // the number of functional units per type
    pub(crate) load_units: u8,
    pub(crate) add_units: u8,
    pub(crate) mult_units: u8,
    pub(crate) store_units: u8,
    // F0, F2, .. F(2n-2)
    pub(crate) fp_reg_count: u8,
    // R0 .. R(n-1)
    pub(crate) int_reg_count: u8,
    // the number of instructions that can be issued per cycle, in program order.
    pub(crate) issue_n_wide: u8,
    // the number of results that can be broadcast on the common data bus per cycle.
    pub(crate) cdb_n_wide: u8,
    // the run is aborted after this many cycles.
    pub(crate) max_cycles: u64,
    // the frequency of the simulation in Hz; 0 runs as fast as possible.
    pub(crate) frequency_hz: u64,
    pub(crate) trace: Trace,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        SimulatorConfig {
            load_units: 2,
            add_units: 3,
            mult_units: 2,
            store_units: 2,
            fp_reg_count: 8,
            int_reg_count: 8,
            issue_n_wide: 1,
            cdb_n_wide: 1,
            max_cycles: 1000,
            frequency_hz: 0,
            trace: Trace::default(),
        }
    }
}

// F254 is the highest even register a u8 can name.
const MAX_FP_REG_COUNT: u8 = 128;

#[derive(Debug, Error, PartialEq, Eq)]
pub(crate) enum ConfigError {
    #[error("fp_reg_count must be at most 128, but is {0}")]
    TooManyFpRegisters(u8),
    #[error("{0} must be at least 1")]
    Zero(&'static str),
}

impl SimulatorConfig {
    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.fp_reg_count > MAX_FP_REG_COUNT {
            return Err(ConfigError::TooManyFpRegisters(self.fp_reg_count));
        }
        if self.issue_n_wide == 0 {
            return Err(ConfigError::Zero("issue_n_wide"));
        }
        if self.cdb_n_wide == 0 {
            return Err(ConfigError::Zero("cdb_n_wide"));
        }
        Ok(())
    }

    /// Unit counts in Load, Add, Mult, Store order.
    pub(crate) fn unit_counts(&self) -> [u8; 4] {
        [self.load_units, self.add_units, self.mult_units, self.store_units]
    }
}

pub fn load_simulator_config(file_path: &str) -> Result<SimulatorConfig, Box<dyn Error>> {
    let file = File::open(file_path)?;
    let config: SimulatorConfig = serde_yaml::from_reader(file)?;
    config.validate()?;
    Ok(config)
}

#[derive(Debug, Error)]
pub(crate) enum SimulatorError {
    #[error("Program did not complete within {0} cycles")]
    CycleLimitExceeded(u64),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    IO(#[from] std::io::Error),
    #[error(transparent)]
    Render(#[from] serde_yaml::Error),
}

/// Drives the backend, either automatically cycle by cycle or one user
/// step at a time.
pub(crate) struct Simulator {
    pub(crate) backend: Backend,
    issue_n_wide: u8,
    cdb_n_wide: u8,
    max_cycles: u64,
    cycle_period: Option<Duration>,
    trace: Trace,
    pub(crate) perf_counters: Rc<RefCell<PerfCounters>>,
}

impl Simulator {
    pub(crate) fn new(config: &SimulatorConfig) -> Simulator {
        let perf_counters = Rc::new(RefCell::new(PerfCounters::new()));
        let backend = Backend::new(config, Rc::clone(&perf_counters));

        let cycle_period = if config.frequency_hz > 0 {
            Some(Duration::from_micros(1_000_000 / config.frequency_hz))
        } else {
            None
        };

        Simulator {
            backend,
            issue_n_wide: config.issue_n_wide,
            cdb_n_wide: config.cdb_n_wide,
            max_cycles: config.max_cycles,
            cycle_period,
            trace: config.trace.clone(),
            perf_counters,
        }
    }

    pub(crate) fn init(&mut self, program: &Program) {
        for instr in &program.code {
            self.backend.read(instr.clone());
        }
    }

    /// Runs until every instruction wrote its result.
    pub(crate) fn run(&mut self, program: &Program) -> Result<(), SimulatorError> {
        self.init(program);

        while !self.backend.all_written() {
            if self.perf_counters.borrow().cycle_cnt >= self.max_cycles {
                return Err(SimulatorError::CycleLimitExceeded(self.max_cycles));
            }

            self.do_cycle()?;

            if self.trace.cycle {
                let perf_counters = self.perf_counters.borrow();
                info!("[Cycle:{}][Issued={}][Executed={}][Written={}][Stalls={}]",
                      self.backend.cycle(),
                      perf_counters.issue_cnt,
                      perf_counters.execute_cnt,
                      perf_counters.write_result_cnt,
                      perf_counters.stall_cnt);
            }

            if let Some(period) = self.cycle_period {
                thread::sleep(period);
            }
        }

        info!("Program complete!");
        Ok(())
    }

    /// One automatic cycle: every unfinished instruction gets one step, in
    /// program order. Issue stays in program order and is limited to
    /// `issue_n_wide`; at most `cdb_n_wide` results are written.
    pub(crate) fn do_cycle(&mut self) -> Result<(), SimulatorError> {
        self.backend.next_cycle();
        self.perf_counters.borrow_mut().cycle_cnt += 1;

        let mut issued = 0;
        let mut written = 0;
        let mut issue_blocked = false;

        for id in 0..self.backend.instruction_count() {
            match self.backend.phase(id)? {
                InstrPhase::WAITING => {
                    if issue_blocked || issued >= self.issue_n_wide {
                        issue_blocked = true;
                        continue;
                    }
                    match self.backend.advance(id)? {
                        AdvanceOutcome::Issued(_) => issued += 1,
                        _ => issue_blocked = true,
                    }
                }
                InstrPhase::ISSUED => {
                    self.backend.advance(id)?;
                }
                InstrPhase::EXECUTED => {
                    if written >= self.cdb_n_wide {
                        continue;
                    }
                    if let AdvanceOutcome::WroteResult(_) = self.backend.advance(id)? {
                        written += 1;
                    }
                }
                InstrPhase::WRITTEN => {}
            }
        }

        Ok(())
    }

    /// A single user-triggered step on instruction `id`.
    pub(crate) fn step(&mut self, id: usize) -> Result<AdvanceOutcome, SimulatorError> {
        self.backend.phase(id)?;
        self.backend.next_cycle();
        self.perf_counters.borrow_mut().cycle_cnt += 1;
        Ok(self.backend.advance(id)?)
    }

    pub(crate) fn snapshot(&self) -> Snapshot {
        self.backend.snapshot()
    }

    /// Reads one command per line: an instruction number advances that
    /// instruction, `next` runs an automatic cycle, `quit` stops. The state
    /// is written as YAML after every command.
    pub(crate) fn run_interactive<R: BufRead, W: Write>(&mut self,
                                                        program: &Program,
                                                        input: R,
                                                        mut output: W) -> Result<(), SimulatorError> {
        self.init(program);
        for (id, entry) in self.backend.log().iter().enumerate() {
            writeln!(output, "{}: {}", id, entry.instr)?;
        }

        for line in input.lines() {
            let line = line?;
            let command = line.trim();
            match command {
                "" => continue,
                "q" | "quit" => break,
                "n" | "next" => self.do_cycle()?,
                _ => match command.parse::<usize>() {
                    Ok(id) => match self.step(id) {
                        Ok(outcome) if outcome.is_progress() => writeln!(output, "{}: {}", id, outcome)?,
                        Ok(outcome) => {
                            writeln!(output, "{}: {}", id, outcome)?;
                            continue;
                        }
                        Err(SimulatorError::Backend(BackendError::UnknownInstruction(_))) => {
                            writeln!(output, "No instruction {}", id)?;
                            continue;
                        }
                        Err(err) => return Err(err),
                    },
                    Err(_) => {
                        writeln!(output, "Unknown command '{}'", command)?;
                        continue;
                    }
                },
            }

            output.write_all(serde_yaml::to_string(&self.snapshot())?.as_bytes())?;

            if self.backend.all_written() {
                writeln!(output, "Program complete!")?;
                break;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    fn write_config(name: &str, yaml: &str) -> String {
        let path = std::env::temp_dir().join(format!("tomasulo_{}_{}.yaml", name, std::process::id()));
        fs::write(&path, yaml).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let config: SimulatorConfig = serde_yaml::from_str("add_units: 1\ntrace:\n  issue: true\n").unwrap();
        assert_eq!(config.unit_counts(), [2, 1, 2, 2]);
        assert!(config.trace.issue);
        assert!(!config.trace.cycle);
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn test_too_many_fp_registers_rejected() {
        let config: SimulatorConfig = serde_yaml::from_str("fp_reg_count: 200").unwrap();
        assert_eq!(config.validate(), Err(ConfigError::TooManyFpRegisters(200)));

        let path = write_config("fp_regs", "fp_reg_count: 200\n");
        let result = load_simulator_config(&path);
        fs::remove_file(&path).unwrap();
        let err = result.unwrap_err();
        assert_eq!(err.to_string(), "fp_reg_count must be at most 128, but is 200");
    }

    #[test]
    fn test_largest_fp_register_file_accepted() {
        let path = write_config("fp_regs_max", "fp_reg_count: 128\n");
        let result = load_simulator_config(&path);
        fs::remove_file(&path).unwrap();
        let config = result.unwrap();

        let simulator = Simulator::new(&config);
        assert!(simulator.snapshot().register_status.iter().any(|reg| reg.register == "F254"));
    }

    #[test]
    fn test_zero_width_rejected() {
        let config: SimulatorConfig = serde_yaml::from_str("cdb_n_wide: 0").unwrap();
        assert_eq!(config.validate(), Err(ConfigError::Zero("cdb_n_wide")));
    }
}
