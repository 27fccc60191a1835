use crate::instructions::instructions::Register;

/// The architectural registers known to the simulation.
///
/// Registers carry no value: the scheduling only cares about which unit will
/// produce a register, not what it produces.
pub(crate) struct RegisterFile {
    registers: Vec<Register>,
}

impl RegisterFile {
    /// Creates `F0, F2, .., F(2*fp_count-2)` followed by `R0 .. R(int_count-1)`.
    pub(crate) fn new(fp_count: u8, int_count: u8) -> RegisterFile {
        let mut registers = Vec::with_capacity(fp_count as usize + int_count as usize);
        for i in 0..fp_count {
            registers.push(Register::F(i * 2));
        }
        for i in 0..int_count {
            registers.push(Register::R(i));
        }

        RegisterFile { registers }
    }

    pub(crate) fn registers(&self) -> &[Register] {
        &self.registers
    }

    pub(crate) fn len(&self) -> usize {
        self.registers.len()
    }

    pub(crate) fn index_of(&self, reg: Register) -> Option<usize> {
        self.registers.iter().position(|r| *r == reg)
    }

    pub(crate) fn contains(&self, reg: Register) -> bool {
        self.index_of(reg).is_some()
    }
}
