use std::fmt;
use std::rc::Rc;

use log::trace;

use crate::backend::backend::BackendError;
use crate::backend::register_status::RegisterStatusTable;
use crate::instructions::instructions::{Address, Instr, Opcode, Register, UnitType};

/// Identifies a functional unit; this is the tag stored in Qj/Qk and in the
/// register status table.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub(crate) struct UnitId {
    pub(crate) kind: UnitType,
    pub(crate) ordinal: u8,
}

impl UnitId {
    pub(crate) fn new(kind: UnitType, ordinal: u8) -> Self {
        Self { kind, ordinal }
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.kind, self.ordinal)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum UnitState {
    IDLE,
    // waiting for at least one operand
    ISSUED,
    EXECUTING,
    COMPLETED,
}

/// The content of a Vj/Vk slot. No numeric values are simulated, only where
/// the value came from.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum OperandValue {
    // read from the register file at issue
    Register(Register),
    // delivered by a broadcast of the producing unit
    Forwarded(UnitId),
}

impl fmt::Display for OperandValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperandValue::Register(reg) => write!(f, "{}", Address::new(*reg, None)),
            OperandValue::Forwarded(unit) => write!(f, "Result({})", unit),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum ExecuteOutcome {
    // first step of a load; the result isn't there yet
    AddressComputed,
    Completed,
    NotReady,
}

/// A single functional unit together with its reservation station fields.
pub(crate) struct FunctionalUnit {
    pub(crate) id: UnitId,
    pub(crate) busy: bool,
    pub(crate) opcode: Option<Opcode>,
    pub(crate) vj: Option<OperandValue>,
    pub(crate) vk: Option<OperandValue>,
    pub(crate) qj: Option<UnitId>,
    pub(crate) qk: Option<UnitId>,
    pub(crate) address: Option<Address>,
    pub(crate) result_ready: bool,
    pub(crate) instr: Option<Rc<Instr>>,
    // index of the bound entry in the instruction status log
    pub(crate) status_index: Option<usize>,
}

impl FunctionalUnit {
    pub(crate) fn new(id: UnitId) -> Self {
        Self {
            id,
            busy: false,
            opcode: None,
            vj: None,
            vk: None,
            qj: None,
            qk: None,
            address: None,
            result_ready: false,
            instr: None,
            status_index: None,
        }
    }

    pub(crate) fn state(&self) -> UnitState {
        if !self.busy {
            UnitState::IDLE
        } else if self.result_ready {
            UnitState::COMPLETED
        } else if self.qj.is_some() || self.qk.is_some() {
            UnitState::ISSUED
        } else {
            UnitState::EXECUTING
        }
    }

    /// Binds `instr` to this unit. Returns `false` when the unit is busy.
    ///
    /// Every source register that still has a pending producer is recorded as
    /// a tag instead of a value; this is where register renaming happens.
    pub(crate) fn issue(&mut self,
                        instr: Rc<Instr>,
                        status_index: usize,
                        register_status: &RegisterStatusTable) -> Result<bool, BackendError> {
        if self.busy {
            return Ok(false);
        }

        // look up all tags first; an unknown register must leave the unit idle
        let mut sources = Vec::with_capacity(2);
        for reg in instr.wants() {
            sources.push((reg, register_status.tag_of(reg)?));
        }

        self.busy = true;
        self.opcode = Some(instr.opcode);
        self.status_index = Some(status_index);
        if instr.opcode == Opcode::SD {
            self.address = instr.address();
        }

        for (reg, producer) in sources {
            self.bind_source(reg, producer);
        }

        trace!("{} bound [{}] Vj={:?} Vk={:?} Qj={:?} Qk={:?}",
               self.id, instr, self.vj, self.vk, self.qj, self.qk);
        self.instr = Some(instr);
        Ok(true)
    }

    // Fills the first operand pair (j before k) that holds neither a value nor a tag.
    fn bind_source(&mut self, reg: Register, producer: Option<UnitId>) {
        let j_free = self.vj.is_none() && self.qj.is_none();
        match producer {
            Some(tag) if j_free => self.qj = Some(tag),
            Some(tag) => self.qk = Some(tag),
            None if j_free => self.vj = Some(OperandValue::Register(reg)),
            None => self.vk = Some(OperandValue::Register(reg)),
        }
    }

    pub(crate) fn execute(&mut self) -> ExecuteOutcome {
        let instr = match &self.instr {
            Some(instr) if self.busy => Rc::clone(instr),
            _ => return ExecuteOutcome::NotReady,
        };

        if instr.opcode == Opcode::LD && self.address.is_none() {
            self.address = instr.address();
            return ExecuteOutcome::AddressComputed;
        }

        if self.qj.is_some() || self.qk.is_some() {
            return ExecuteOutcome::NotReady;
        }

        self.vj = None;
        self.vk = None;
        self.result_ready = true;
        ExecuteOutcome::Completed
    }

    /// True if `other` is this unit's Qj or Qk.
    ///
    /// Returns false as soon as either tag is empty, even if the other one
    /// matches. Callers that need every consumer must use [FunctionalUnit::resolve].
    // TODO: confirm whether a unit with a single pending tag should count as waiting.
    pub(crate) fn waiting_on(&self, other: UnitId) -> bool {
        if self.qj.is_none() || self.qk.is_none() {
            return false;
        }
        self.qj == Some(other) || self.qk == Some(other)
    }

    /// Snoops a broadcast: every tag equal to `producer` becomes a value.
    pub(crate) fn resolve(&mut self, producer: UnitId) {
        if self.qj == Some(producer) {
            self.qj = None;
            self.vj = Some(OperandValue::Forwarded(producer));
        }
        if self.qk == Some(producer) {
            self.qk = None;
            self.vk = Some(OperandValue::Forwarded(producer));
        }
    }

    /// Returns the unit to idle and drops any register status entry still
    /// naming it as producer.
    pub(crate) fn clear(&mut self, register_status: &mut RegisterStatusTable) {
        self.busy = false;
        self.opcode = None;
        self.vj = None;
        self.vk = None;
        self.qj = None;
        self.qk = None;
        self.address = None;
        self.result_ready = false;
        self.instr = None;
        self.status_index = None;
        register_status.scrub(self.id);
    }
}
