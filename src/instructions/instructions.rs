use std::fmt;

use thiserror::Error;

use crate::backend::register_file::RegisterFile;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum Opcode {
    LD,
    SD,
    ADDD,
    SUBD,
    MULD,
    DIVD,
}

pub(crate) fn mnemonic(opcode: Opcode) -> &'static str {
    match opcode {
        Opcode::LD => "L.D",
        Opcode::SD => "S.D",
        Opcode::ADDD => "ADD.D",
        Opcode::SUBD => "SUB.D",
        Opcode::MULD => "MUL.D",
        Opcode::DIVD => "DIV.D",
    }
}

/// Accepts both the dotted (`L.D`) and the compact (`LD`) spelling, in any case.
pub(crate) fn get_opcode(mnemonic: &str) -> Option<Opcode> {
    let compact: String = mnemonic.to_uppercase().chars().filter(|c| *c != '.').collect();

    match compact.as_str() {
        "LD" => Some(Opcode::LD),
        "SD" => Some(Opcode::SD),
        "ADDD" => Some(Opcode::ADDD),
        "SUBD" => Some(Opcode::SUBD),
        "MULD" => Some(Opcode::MULD),
        "DIVD" => Some(Opcode::DIVD),
        _ => None,
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", mnemonic(*self))
    }
}

/// The kind of functional unit an instruction needs.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub(crate) enum UnitType {
    Load,
    Add,
    Mult,
    Store,
}

impl UnitType {
    // The fixed enumeration order of the functional unit pool.
    pub(crate) const ALL: [UnitType; 4] = [UnitType::Load, UnitType::Add, UnitType::Mult, UnitType::Store];

    pub(crate) fn index(self) -> usize {
        match self {
            UnitType::Load => 0,
            UnitType::Add => 1,
            UnitType::Mult => 2,
            UnitType::Store => 3,
        }
    }
}

impl fmt::Display for UnitType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitType::Load => write!(f, "Load"),
            UnitType::Add => write!(f, "Add"),
            UnitType::Mult => write!(f, "Mult"),
            UnitType::Store => write!(f, "Store"),
        }
    }
}

/// An architectural register. Floating point registers are even numbered.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub(crate) enum Register {
    F(u8),
    R(u8),
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Register::F(n) => write!(f, "F{}", n),
            Register::R(n) => write!(f, "R{}", n),
        }
    }
}

pub(crate) fn get_register(name: &str) -> Option<Register> {
    let name_uppercased = name.trim().to_uppercase();
    if name_uppercased.len() < 2 {
        return None;
    }

    let (bank, number) = name_uppercased.split_at(1);
    if !number.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let number: u8 = number.parse().ok()?;
    match bank {
        "F" => Some(Register::F(number)),
        "R" => Some(Register::R(number)),
        _ => None,
    }
}

/// A symbolic memory reference; the simulation never resolves it to a number.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) struct Address {
    pub(crate) register: Register,
    pub(crate) offset: Option<i32>,
}

impl Address {
    pub(crate) fn new(register: Register, offset: Option<i32>) -> Self {
        Self { register, offset }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Regs[{}]", self.register)?;
        match self.offset {
            Some(offset) if offset < 0 => write!(f, " - {}", offset.unsigned_abs()),
            Some(offset) => write!(f, " + {}", offset),
            None => Ok(()),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum Operands {
    // ADD.D/SUB.D/MUL.D/DIV.D rd,rs,rt
    Register { rd: Register, rs: Register, rt: Register },
    // L.D reg,offset(base) loads into reg; S.D reg,offset(base) stores reg.
    Memory { reg: Register, base: Register, offset: i32 },
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub(crate) struct Instr {
    pub(crate) opcode: Opcode,
    pub(crate) operands: Operands,
}

impl Instr {
    pub(crate) fn unit_type(&self) -> UnitType {
        match self.opcode {
            Opcode::LD => UnitType::Load,
            Opcode::SD => UnitType::Store,
            Opcode::ADDD | Opcode::SUBD => UnitType::Add,
            Opcode::MULD | Opcode::DIVD => UnitType::Mult,
        }
    }

    /// The register this instruction writes. A store writes memory, so it has none.
    pub(crate) fn destination(&self) -> Option<Register> {
        match self.operands {
            Operands::Register { rd, .. } => Some(rd),
            Operands::Memory { .. } if self.opcode == Opcode::SD => None,
            Operands::Memory { reg, .. } => Some(reg),
        }
    }

    /// The registers this instruction reads, in operand order.
    ///
    /// A load reads its base register. A store reads the register holding the
    /// value to store; its address comes from [Instr::address] instead.
    pub(crate) fn wants(&self) -> Vec<Register> {
        match self.operands {
            Operands::Register { rs, rt, .. } => vec![rs, rt],
            Operands::Memory { reg, .. } if self.opcode == Opcode::SD => vec![reg],
            Operands::Memory { base, .. } => vec![base],
        }
    }

    pub(crate) fn address(&self) -> Option<Address> {
        match self.operands {
            Operands::Memory { base, offset, .. } => Some(Address::new(base, Some(offset))),
            Operands::Register { .. } => None,
        }
    }
}

impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.operands {
            Operands::Register { rd, rs, rt } => write!(f, "{} {},{},{}", self.opcode, rd, rs, rt),
            Operands::Memory { reg, base, offset } => write!(f, "{} {},{}({})", self.opcode, reg, offset, base),
        }
    }
}

#[derive(Debug)]
pub(crate) struct Program {
    pub(crate) code: Vec<Instr>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub(crate) enum DecodeError {
    #[error("Unknown mnemonic '{0}'")]
    UnknownMnemonic(String),
    #[error("{mnemonic} expects {expected} operands, but {actual} are provided")]
    OperandCount { mnemonic: &'static str, expected: usize, actual: usize },
    #[error("Illegal register '{0}'")]
    UnknownRegister(String),
    #[error("Malformed operand '{0}'")]
    MalformedOperand(String),
}

/// Builds [Instr] values from a mnemonic and its textual operands.
///
/// Register names are checked against the register file so that nothing
/// downstream ever sees a register it can't tag.
pub(crate) struct Assembler<'a> {
    register_file: &'a RegisterFile,
}

impl<'a> Assembler<'a> {
    pub(crate) fn new(register_file: &'a RegisterFile) -> Self {
        Self { register_file }
    }

    /// Register form takes `[rd, rs, rt]`, memory form takes `[reg, base, offset]`.
    pub(crate) fn decode(&self, mnemonic_text: &str, operands: &[&str]) -> Result<Instr, DecodeError> {
        let opcode = get_opcode(mnemonic_text)
            .ok_or_else(|| DecodeError::UnknownMnemonic(mnemonic_text.to_string()))?;

        if operands.len() != 3 {
            return Err(DecodeError::OperandCount {
                mnemonic: mnemonic(opcode),
                expected: 3,
                actual: operands.len(),
            });
        }

        let operands = match opcode {
            Opcode::ADDD | Opcode::SUBD | Opcode::MULD | Opcode::DIVD => Operands::Register {
                rd: self.register(operands[0])?,
                rs: self.register(operands[1])?,
                rt: self.register(operands[2])?,
            },
            Opcode::LD | Opcode::SD => Operands::Memory {
                reg: self.register(operands[0])?,
                base: self.register(operands[1])?,
                offset: parse_offset(operands[2])?,
            },
        };

        Ok(Instr { opcode, operands })
    }

    fn register(&self, name: &str) -> Result<Register, DecodeError> {
        match get_register(name) {
            Some(reg) if self.register_file.contains(reg) => Ok(reg),
            _ => Err(DecodeError::UnknownRegister(name.trim().to_string())),
        }
    }
}

fn parse_offset(text: &str) -> Result<i32, DecodeError> {
    let trimmed = text.trim();
    let digits = trimmed.strip_prefix('#').unwrap_or(trimmed);
    digits.parse().map_err(|_| DecodeError::MalformedOperand(trimmed.to_string()))
}
