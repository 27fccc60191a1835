use crate::backend::backend::BackendError;
use crate::backend::execution_unit::UnitId;
use crate::backend::register_file::RegisterFile;
use crate::instructions::instructions::Register;

/// The Register Status table (Qi). The entry for a register names the
/// functional unit that will produce its next value. As long as such an
/// entry exists, readers of the register must wait for that unit instead of
/// reading the register itself.
pub(crate) struct RegisterStatusTable {
    registers: Vec<Register>,
    // parallel to `registers`
    tags: Vec<Option<UnitId>>,
}

impl RegisterStatusTable {
    pub(crate) fn new(register_file: &RegisterFile) -> Self {
        Self {
            registers: register_file.registers().to_vec(),
            tags: vec![None; register_file.len()],
        }
    }

    fn slot(&self, reg: Register) -> Result<usize, BackendError> {
        self.registers.iter()
            .position(|r| *r == reg)
            .ok_or(BackendError::UnknownRegister(reg))
    }

    pub(crate) fn tag_of(&self, reg: Register) -> Result<Option<UnitId>, BackendError> {
        let slot = self.slot(reg)?;
        Ok(self.tags[slot])
    }

    /// Overwrites the tag; a register has at most one pending producer.
    pub(crate) fn set_tag(&mut self, reg: Register, tag: Option<UnitId>) -> Result<(), BackendError> {
        let slot = self.slot(reg)?;
        self.tags[slot] = tag;
        Ok(())
    }

    pub(crate) fn is_full(&self, reg: Register) -> Result<bool, BackendError> {
        Ok(self.tag_of(reg)?.is_some())
    }

    /// Clears every slot that still points at `unit`.
    pub(crate) fn scrub(&mut self, unit: UnitId) {
        for tag in self.tags.iter_mut() {
            if *tag == Some(unit) {
                *tag = None;
            }
        }
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (Register, Option<UnitId>)> + '_ {
        self.registers.iter().copied().zip(self.tags.iter().copied())
    }
}
