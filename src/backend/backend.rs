use std::cell::RefCell;
use std::rc::Rc;

use log::{debug, info, trace};
use serde::Serialize;
use thiserror::Error;

use crate::backend::execution_unit::UnitId;
use crate::backend::instruction_status::{AdvanceOutcome, InstrPhase, InstructionStatusLog};
use crate::backend::register_file::RegisterFile;
use crate::backend::register_status::RegisterStatusTable;
use crate::backend::reservation_station::FunctionalUnitPool;
use crate::instructions::instructions::{Instr, Register};
use crate::simulator::{PerfCounters, SimulatorConfig, Trace};

#[derive(Debug, Error, PartialEq, Eq)]
pub(crate) enum BackendError {
    #[error("Functional unit {0} attempted writeback without instruction")]
    ProtocolViolation(UnitId),
    #[error("Unknown functional unit {0}")]
    UnknownUnit(UnitId),
    #[error("Unknown instruction {0}")]
    UnknownInstruction(usize),
    #[error("Unknown register {0}")]
    UnknownRegister(Register),
}

/// The scheduling core: register status, functional units and the
/// instruction status log. Everything changes through [Backend::advance].
pub(crate) struct Backend {
    register_status: RegisterStatusTable,
    pool: FunctionalUnitPool,
    log: InstructionStatusLog,
    cycle: u64,
    trace: Trace,
    perf_counters: Rc<RefCell<PerfCounters>>,
}

impl Backend {
    pub(crate) fn new(config: &SimulatorConfig, perf_counters: Rc<RefCell<PerfCounters>>) -> Backend {
        let register_file = RegisterFile::new(config.fp_reg_count, config.int_reg_count);
        Backend {
            register_status: RegisterStatusTable::new(&register_file),
            pool: FunctionalUnitPool::new(config.unit_counts()),
            log: InstructionStatusLog::new(),
            cycle: 0,
            trace: config.trace.clone(),
            perf_counters,
        }
    }

    /// Appends an instruction in program order and returns its id.
    pub(crate) fn read(&mut self, instr: Instr) -> usize {
        let text = instr.to_string();
        let id = self.log.read(instr);
        debug!("Read [{}] as instruction {}", text, id);
        id
    }

    pub(crate) fn cycle(&self) -> u64 {
        self.cycle
    }

    pub(crate) fn next_cycle(&mut self) {
        self.cycle += 1;
    }

    pub(crate) fn instruction_count(&self) -> usize {
        self.log.len()
    }

    pub(crate) fn phase(&self, id: usize) -> Result<InstrPhase, BackendError> {
        self.log.get(id)
            .map(|entry| entry.phase())
            .ok_or(BackendError::UnknownInstruction(id))
    }

    pub(crate) fn all_written(&self) -> bool {
        self.log.all_written()
    }

    pub(crate) fn log(&self) -> &InstructionStatusLog {
        &self.log
    }

    #[cfg(test)]
    pub(crate) fn pool(&self) -> &FunctionalUnitPool {
        &self.pool
    }

    #[cfg(test)]
    pub(crate) fn register_status(&self) -> &RegisterStatusTable {
        &self.register_status
    }

    /// One user step on instruction `id`: issue, execute or write result,
    /// whichever is next for it.
    pub(crate) fn advance(&mut self, id: usize) -> Result<AdvanceOutcome, BackendError> {
        let outcome = self.log.advance(id, self.cycle, &mut self.pool, &mut self.register_status)?;
        let instr = match self.log.get(id) {
            Some(entry) => Rc::clone(&entry.instr),
            None => return Err(BackendError::UnknownInstruction(id)),
        };

        let mut perf_counters = self.perf_counters.borrow_mut();
        match outcome {
            AdvanceOutcome::Issued(unit) => {
                perf_counters.issue_cnt += 1;
                if self.trace.issue {
                    info!("Issued [{}] to {}", instr, unit);
                }
            }
            AdvanceOutcome::IssueStalled => {
                perf_counters.stall_cnt += 1;
                debug!("Issue [{}] stalled: no idle {} unit", instr, instr.unit_type());
            }
            AdvanceOutcome::AddressComputed(unit) => {
                if self.trace.execute {
                    info!("Address computed [{}] on {}", instr, unit);
                }
            }
            AdvanceOutcome::Executed(unit) => {
                perf_counters.execute_cnt += 1;
                if self.trace.execute {
                    info!("Executed [{}] on {}", instr, unit);
                }
            }
            AdvanceOutcome::ExecuteStalled(unit) => {
                perf_counters.stall_cnt += 1;
                debug!("Execute [{}] stalled: {} waits for an operand", instr, unit);
            }
            AdvanceOutcome::WroteResult(unit) => {
                perf_counters.write_result_cnt += 1;
                if self.trace.write_result {
                    info!("Wrote result [{}] from {}", instr, unit);
                }
            }
            AdvanceOutcome::Unchanged => trace!("Nothing to do for [{}]", instr),
        }

        Ok(outcome)
    }

    /// The complete observable state, for rendering.
    pub(crate) fn snapshot(&self) -> Snapshot {
        let instructions = self.log.iter().map(|entry| InstructionView {
            id: entry.index,
            instruction: entry.instr.to_string(),
            issue: entry.issued,
            execute: entry.executed,
            write_result: entry.wrote_result,
            unit: entry.unit.map(|unit| unit.to_string()),
            issue_cycle: entry.issue_cycle,
            execute_cycle: entry.execute_cycle,
            write_result_cycle: entry.write_result_cycle,
        }).collect();

        let units = self.pool.iter().map(|unit| UnitView {
            name: unit.id.to_string(),
            busy: unit.busy,
            state: format!("{:?}", unit.state()),
            op: unit.opcode.map(|op| op.to_string()),
            vj: unit.vj.map(|v| v.to_string()),
            vk: unit.vk.map(|v| v.to_string()),
            qj: unit.qj.map(|q| q.to_string()),
            qk: unit.qk.map(|q| q.to_string()),
            a: unit.address.map(|a| a.to_string()),
            result: unit.result_ready,
        }).collect();

        let register_status = self.register_status.iter().map(|(reg, tag)| RegisterStatusView {
            register: reg.to_string(),
            qi: tag.map(|unit| unit.to_string()),
        }).collect();

        Snapshot { cycle: self.cycle, instructions, units, register_status }
    }
}

#[derive(Serialize, Debug)]
pub(crate) struct Snapshot {
    pub(crate) cycle: u64,
    pub(crate) instructions: Vec<InstructionView>,
    pub(crate) units: Vec<UnitView>,
    pub(crate) register_status: Vec<RegisterStatusView>,
}

#[derive(Serialize, Debug)]
pub(crate) struct InstructionView {
    pub(crate) id: usize,
    pub(crate) instruction: String,
    pub(crate) issue: bool,
    pub(crate) execute: bool,
    pub(crate) write_result: bool,
    pub(crate) unit: Option<String>,
    pub(crate) issue_cycle: Option<u64>,
    pub(crate) execute_cycle: Option<u64>,
    pub(crate) write_result_cycle: Option<u64>,
}

#[derive(Serialize, Debug)]
pub(crate) struct UnitView {
    pub(crate) name: String,
    pub(crate) busy: bool,
    pub(crate) state: String,
    pub(crate) op: Option<String>,
    pub(crate) vj: Option<String>,
    pub(crate) vk: Option<String>,
    pub(crate) qj: Option<String>,
    pub(crate) qk: Option<String>,
    pub(crate) a: Option<String>,
    pub(crate) result: bool,
}

#[derive(Serialize, Debug)]
pub(crate) struct RegisterStatusView {
    pub(crate) register: String,
    pub(crate) qi: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instructions::instructions::{Assembler, UnitType};

    fn backend() -> (Backend, Rc<RefCell<PerfCounters>>) {
        let perf_counters = Rc::new(RefCell::new(PerfCounters::new()));
        (Backend::new(&SimulatorConfig::default(), Rc::clone(&perf_counters)), perf_counters)
    }

    #[test]
    fn test_snapshot_after_issue() {
        let (mut backend, _) = backend();
        let regs = RegisterFile::new(8, 8);
        let asm = Assembler::new(&regs);
        let id = backend.read(asm.decode("L.D", &["F6", "R2", "32"]).unwrap());
        backend.next_cycle();
        backend.advance(id).unwrap();

        let snapshot = backend.snapshot();
        assert_eq!(snapshot.cycle, 1);
        assert_eq!(snapshot.instructions[0].instruction, "L.D F6,32(R2)");
        assert!(snapshot.instructions[0].issue);
        assert_eq!(snapshot.instructions[0].unit.as_deref(), Some("Load0"));
        assert_eq!(snapshot.instructions[0].issue_cycle, Some(1));

        let load0 = &snapshot.units[0];
        assert_eq!(load0.name, "Load0");
        assert!(load0.busy);
        assert_eq!(load0.state, "EXECUTING");
        assert_eq!(load0.op.as_deref(), Some("L.D"));
        assert_eq!(load0.vj.as_deref(), Some("Regs[R2]"));
        assert_eq!(load0.a, None);
        assert_eq!(snapshot.units.len(), 9);

        let f6 = snapshot.register_status.iter().find(|r| r.register == "F6").unwrap();
        assert_eq!(f6.qi.as_deref(), Some("Load0"));
    }

    #[test]
    fn test_advance_counts() {
        let (mut backend, perf_counters) = backend();
        let regs = RegisterFile::new(8, 8);
        let asm = Assembler::new(&regs);
        for _ in 0..4 {
            backend.read(asm.decode("ADD.D", &["F0", "F2", "F4"]).unwrap());
        }
        for id in 0..4 {
            backend.advance(id).unwrap();
        }

        assert_eq!(backend.phase(3).unwrap(), InstrPhase::WAITING);
        let counters = perf_counters.borrow();
        assert_eq!(counters.issue_cnt, 3);
        assert_eq!(counters.stall_cnt, 1);
        // the last rename wins
        assert_eq!(backend.register_status().tag_of(Register::F(0)).unwrap(), Some(UnitId::new(UnitType::Add, 2)));
    }

    #[test]
    fn test_unknown_instruction() {
        let (mut backend, _) = backend();
        assert_eq!(backend.advance(0), Err(BackendError::UnknownInstruction(0)));
        assert_eq!(backend.phase(0), Err(BackendError::UnknownInstruction(0)));
    }
}
