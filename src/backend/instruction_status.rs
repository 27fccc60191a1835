use std::fmt;
use std::rc::Rc;

use log::debug;

use crate::backend::backend::BackendError;
use crate::backend::execution_unit::{ExecuteOutcome, UnitId};
use crate::backend::register_status::RegisterStatusTable;
use crate::backend::reservation_station::FunctionalUnitPool;
use crate::instructions::instructions::Instr;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum InstrPhase {
    WAITING,
    ISSUED,
    EXECUTED,
    WRITTEN,
}

/// What a single step did. Stalls are ordinary results, not errors.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum AdvanceOutcome {
    Issued(UnitId),
    // no idle unit of the required type
    IssueStalled,
    AddressComputed(UnitId),
    Executed(UnitId),
    // an operand is still pending
    ExecuteStalled(UnitId),
    WroteResult(UnitId),
    // the step isn't allowed in the current phase
    Unchanged,
}

impl AdvanceOutcome {
    pub(crate) fn is_progress(&self) -> bool {
        !matches!(self, AdvanceOutcome::IssueStalled | AdvanceOutcome::ExecuteStalled(_) | AdvanceOutcome::Unchanged)
    }
}

impl fmt::Display for AdvanceOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdvanceOutcome::Issued(unit) => write!(f, "issued to {}", unit),
            AdvanceOutcome::IssueStalled => write!(f, "issue stalled"),
            AdvanceOutcome::AddressComputed(unit) => write!(f, "address computed on {}", unit),
            AdvanceOutcome::Executed(unit) => write!(f, "executed on {}", unit),
            AdvanceOutcome::ExecuteStalled(unit) => write!(f, "{} waits for an operand", unit),
            AdvanceOutcome::WroteResult(unit) => write!(f, "{} wrote result", unit),
            AdvanceOutcome::Unchanged => write!(f, "nothing to do"),
        }
    }
}

/// One instruction of the program and how far it got.
pub(crate) struct InstructionStatus {
    pub(crate) index: usize,
    pub(crate) instr: Rc<Instr>,
    pub(crate) issued: bool,
    pub(crate) executed: bool,
    pub(crate) wrote_result: bool,
    // the unit holding the instruction between issue and write result
    pub(crate) unit: Option<UnitId>,
    pub(crate) issue_cycle: Option<u64>,
    pub(crate) execute_cycle: Option<u64>,
    pub(crate) write_result_cycle: Option<u64>,
}

impl InstructionStatus {
    fn new(index: usize, instr: Instr) -> Self {
        Self {
            index,
            instr: Rc::new(instr),
            issued: false,
            executed: false,
            wrote_result: false,
            unit: None,
            issue_cycle: None,
            execute_cycle: None,
            write_result_cycle: None,
        }
    }

    pub(crate) fn phase(&self) -> InstrPhase {
        if self.wrote_result {
            InstrPhase::WRITTEN
        } else if self.executed {
            InstrPhase::EXECUTED
        } else if self.issued {
            InstrPhase::ISSUED
        } else {
            InstrPhase::WAITING
        }
    }

    /// Reserves a unit and renames the destination register to it.
    pub(crate) fn issue(&mut self,
                        cycle: u64,
                        pool: &mut FunctionalUnitPool,
                        register_status: &mut RegisterStatusTable) -> Result<AdvanceOutcome, BackendError> {
        if self.issued {
            return Ok(AdvanceOutcome::Unchanged);
        }

        let unit = match pool.issue(Rc::clone(&self.instr), self.index, register_status)? {
            Some(unit) => unit,
            None => return Ok(AdvanceOutcome::IssueStalled),
        };

        if let Some(dest) = self.instr.destination() {
            if register_status.is_full(dest)? {
                debug!("{} renamed again, now produced by {}", dest, unit);
            }
            register_status.set_tag(dest, Some(unit))?;
        }

        self.issued = true;
        self.unit = Some(unit);
        self.issue_cycle = Some(cycle);
        Ok(AdvanceOutcome::Issued(unit))
    }

    pub(crate) fn execute(&mut self, cycle: u64, pool: &mut FunctionalUnitPool) -> Result<AdvanceOutcome, BackendError> {
        let unit = match self.unit {
            Some(unit) if self.issued && !self.executed => unit,
            _ => return Ok(AdvanceOutcome::Unchanged),
        };

        match pool.execute(unit)? {
            ExecuteOutcome::Completed => {
                self.executed = true;
                self.execute_cycle = Some(cycle);
                Ok(AdvanceOutcome::Executed(unit))
            }
            ExecuteOutcome::AddressComputed => Ok(AdvanceOutcome::AddressComputed(unit)),
            ExecuteOutcome::NotReady => Ok(AdvanceOutcome::ExecuteStalled(unit)),
        }
    }

    pub(crate) fn write_result(&mut self,
                               cycle: u64,
                               pool: &mut FunctionalUnitPool,
                               register_status: &mut RegisterStatusTable) -> Result<AdvanceOutcome, BackendError> {
        let unit = match self.unit {
            Some(unit) if self.executed && !self.wrote_result => unit,
            _ => return Ok(AdvanceOutcome::Unchanged),
        };

        pool.write_back(unit, register_status)?;

        // a later issue may have renamed the destination to another unit
        if let Some(dest) = self.instr.destination() {
            if register_status.tag_of(dest)? == Some(unit) {
                register_status.set_tag(dest, None)?;
            }
        }

        self.wrote_result = true;
        self.unit = None;
        self.write_result_cycle = Some(cycle);
        Ok(AdvanceOutcome::WroteResult(unit))
    }
}

/// The program in order, with the Issue/Execute/Write result status of every
/// instruction.
pub(crate) struct InstructionStatusLog {
    entries: Vec<InstructionStatus>,
}

impl InstructionStatusLog {
    pub(crate) fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// Appends `instr` in program order and returns its id.
    pub(crate) fn read(&mut self, instr: Instr) -> usize {
        let index = self.entries.len();
        self.entries.push(InstructionStatus::new(index, instr));
        index
    }

    pub(crate) fn get(&self, id: usize) -> Option<&InstructionStatus> {
        self.entries.get(id)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &InstructionStatus> {
        self.entries.iter()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn all_written(&self) -> bool {
        self.entries.iter().all(|entry| entry.wrote_result)
    }

    /// Moves instruction `id` one phase forward, if it can.
    pub(crate) fn advance(&mut self,
                          id: usize,
                          cycle: u64,
                          pool: &mut FunctionalUnitPool,
                          register_status: &mut RegisterStatusTable) -> Result<AdvanceOutcome, BackendError> {
        let entry = self.entries.get_mut(id).ok_or(BackendError::UnknownInstruction(id))?;

        match entry.phase() {
            InstrPhase::WAITING => entry.issue(cycle, pool, register_status),
            InstrPhase::ISSUED => entry.execute(cycle, pool),
            InstrPhase::EXECUTED => entry.write_result(cycle, pool, register_status),
            InstrPhase::WRITTEN => Ok(AdvanceOutcome::Unchanged),
        }
    }
}
