use std::rc::Rc;

use log::{debug, trace};

use crate::backend::backend::BackendError;
use crate::backend::execution_unit::{ExecuteOutcome, FunctionalUnit, UnitId};
use crate::backend::register_status::RegisterStatusTable;
use crate::instructions::instructions::{Instr, UnitType};

/// All functional units of the machine, grouped per [UnitType].
///
/// Selection is a plain scan in enumeration order (Load, Add, Mult, Store and
/// lowest ordinal first), so the outcome of an issue is deterministic.
pub(crate) struct FunctionalUnitPool {
    groups: [Vec<FunctionalUnit>; 4],
}

impl FunctionalUnitPool {
    /// `counts` holds the number of units per type in [UnitType::ALL] order.
    pub(crate) fn new(counts: [u8; 4]) -> Self {
        let groups = UnitType::ALL.map(|kind| {
            (0..counts[kind.index()])
                .map(|ordinal| FunctionalUnit::new(UnitId::new(kind, ordinal)))
                .collect::<Vec<_>>()
        });

        Self { groups }
    }

    pub(crate) fn get(&self, id: UnitId) -> Option<&FunctionalUnit> {
        self.groups[id.kind.index()].get(id.ordinal as usize)
    }

    fn get_mut(&mut self, id: UnitId) -> Option<&mut FunctionalUnit> {
        self.groups[id.kind.index()].get_mut(id.ordinal as usize)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &FunctionalUnit> {
        self.groups.iter().flatten()
    }

    /// Issues `instr` to the first idle unit of its type.
    ///
    /// `Ok(None)` is a structural hazard: every unit of the type is busy and the
    /// caller has to try again later.
    pub(crate) fn issue(&mut self,
                        instr: Rc<Instr>,
                        status_index: usize,
                        register_status: &RegisterStatusTable) -> Result<Option<UnitId>, BackendError> {
        let kind = instr.unit_type();
        let unit = match self.groups[kind.index()].iter_mut().find(|unit| !unit.busy) {
            Some(unit) => unit,
            None => {
                trace!("No idle {} unit for [{}]", kind, instr);
                return Ok(None);
            }
        };

        if unit.issue(instr, status_index, register_status)? {
            Ok(Some(unit.id))
        } else {
            Ok(None)
        }
    }

    /// Executes the instruction bound to `id`; see [FunctionalUnit::execute].
    pub(crate) fn execute(&mut self, id: UnitId) -> Result<ExecuteOutcome, BackendError> {
        let unit = self.get_mut(id).ok_or(BackendError::UnknownUnit(id))?;
        Ok(unit.execute())
    }

    /// The common data bus. Broadcasts `finished` to every unit (itself
    /// included), then returns it to idle.
    ///
    /// Writing back a unit that holds no instruction is a protocol violation.
    pub(crate) fn write_back(&mut self,
                             finished: UnitId,
                             register_status: &mut RegisterStatusTable) -> Result<UnitId, BackendError> {
        match self.get(finished) {
            Some(unit) if unit.busy => {}
            Some(_) => return Err(BackendError::ProtocolViolation(finished)),
            None => return Err(BackendError::UnknownUnit(finished)),
        }

        debug!("CDB broadcast {} to {:?}", finished, self.consumers_of(finished));

        for unit in self.groups.iter_mut().flatten() {
            unit.resolve(finished);
        }

        if let Some(unit) = self.get_mut(finished) {
            unit.clear(register_status);
        }
        Ok(finished)
    }

    /// The units that report [FunctionalUnit::waiting_on] `producer`.
    pub(crate) fn consumers_of(&self, producer: UnitId) -> Vec<UnitId> {
        self.iter()
            .filter(|unit| unit.waiting_on(producer))
            .map(|unit| unit.id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::execution_unit::{OperandValue, UnitState};
    use crate::backend::register_file::RegisterFile;
    use crate::instructions::instructions::{Assembler, Register};

    struct Fixture {
        regs: RegisterFile,
        status: RegisterStatusTable,
        pool: FunctionalUnitPool,
    }

    impl Fixture {
        fn new() -> Self {
            let regs = RegisterFile::new(8, 8);
            let status = RegisterStatusTable::new(&regs);
            Fixture { regs, status, pool: FunctionalUnitPool::new([2, 3, 2, 2]) }
        }

        fn instr(&self, mnemonic: &str, operands: &[&str]) -> Rc<Instr> {
            Rc::new(Assembler::new(&self.regs).decode(mnemonic, operands).unwrap())
        }

        fn issue(&mut self, mnemonic: &str, operands: &[&str]) -> Option<UnitId> {
            let instr = self.instr(mnemonic, operands);
            let dest = instr.destination();
            let unit = self.pool.issue(instr, 0, &self.status).unwrap();
            if let (Some(unit), Some(dest)) = (unit, dest) {
                self.status.set_tag(dest, Some(unit)).unwrap();
            }
            unit
        }
    }

    #[test]
    fn test_inventory() {
        let pool = FunctionalUnitPool::new([2, 3, 2, 2]);
        let names: Vec<String> = pool.iter().map(|unit| unit.id.to_string()).collect();
        assert_eq!(names, vec!["Load0", "Load1", "Add0", "Add1", "Add2", "Mult0", "Mult1", "Store0", "Store1"]);
        assert!(pool.iter().all(|unit| unit.state() == UnitState::IDLE));
    }

    #[test]
    fn test_issue_picks_lowest_idle_unit() {
        let mut f = Fixture::new();
        assert_eq!(f.issue("ADD.D", &["F0", "F2", "F4"]), Some(UnitId::new(UnitType::Add, 0)));
        assert_eq!(f.issue("SUB.D", &["F6", "F2", "F4"]), Some(UnitId::new(UnitType::Add, 1)));
        assert_eq!(f.issue("MUL.D", &["F8", "F2", "F4"]), Some(UnitId::new(UnitType::Mult, 0)));
    }

    #[test]
    fn test_full_group_rejects_until_write_back() {
        let mut f = Fixture::new();
        let first = f.issue("ADD.D", &["F0", "F2", "F4"]).unwrap();
        f.issue("ADD.D", &["F6", "F2", "F4"]).unwrap();
        f.issue("ADD.D", &["F8", "F2", "F4"]).unwrap();

        assert_eq!(f.issue("SUB.D", &["F10", "F2", "F4"]), None);
        assert_eq!(f.issue("SUB.D", &["F10", "F2", "F4"]), None);
        // other types are unaffected
        assert!(f.issue("MUL.D", &["F12", "F2", "F4"]).is_some());

        assert_eq!(f.pool.execute(first).unwrap(), ExecuteOutcome::Completed);
        f.pool.write_back(first, &mut f.status).unwrap();

        assert_eq!(f.issue("SUB.D", &["F10", "F2", "F4"]), Some(first));
    }

    #[test]
    fn test_write_back_resolves_every_consumer() {
        let mut f = Fixture::new();
        let load = f.issue("L.D", &["F2", "R3", "44"]).unwrap();
        let mult = f.issue("MUL.D", &["F0", "F2", "F4"]).unwrap();
        let sub = f.issue("SUB.D", &["F8", "F6", "F2"]).unwrap();
        let add = f.issue("ADD.D", &["F10", "F2", "F2"]).unwrap();

        // only the unit waiting on two tags is reported
        assert_eq!(f.pool.consumers_of(load), vec![add]);

        f.pool.execute(load).unwrap();
        f.pool.execute(load).unwrap();
        f.pool.write_back(load, &mut f.status).unwrap();

        for unit in f.pool.iter() {
            assert_ne!(unit.qj, Some(load));
            assert_ne!(unit.qk, Some(load));
        }
        assert_eq!(f.pool.get(mult).unwrap().vj, Some(OperandValue::Forwarded(load)));
        assert_eq!(f.pool.get(sub).unwrap().vk, Some(OperandValue::Forwarded(load)));
        assert_eq!(f.pool.get(add).unwrap().state(), UnitState::EXECUTING);
        assert_eq!(f.pool.get(load).unwrap().state(), UnitState::IDLE);
        assert_eq!(f.status.tag_of(Register::F(2)).unwrap(), None);
    }

    #[test]
    fn test_write_back_idle_unit_is_protocol_violation() {
        let mut f = Fixture::new();
        let idle = UnitId::new(UnitType::Store, 1);
        assert_eq!(f.pool.write_back(idle, &mut f.status), Err(BackendError::ProtocolViolation(idle)));
    }

    #[test]
    fn test_unknown_unit() {
        let mut f = Fixture::new();
        let missing = UnitId::new(UnitType::Add, 7);
        assert!(f.pool.get(missing).is_none());
        assert_eq!(f.pool.execute(missing), Err(BackendError::UnknownUnit(missing)));
    }
}
