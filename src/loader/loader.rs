use std::fs;

use log::debug;
use regex::Regex;
use thiserror::Error;

use crate::backend::register_file::RegisterFile;
use crate::instructions::instructions::{Assembler, DecodeError, Instr, Program};
use crate::simulator::SimulatorConfig;

#[derive(Debug, Error)]
pub(crate) enum LoadError {
    #[error("Failed to read '{path}': {source}")]
    IOError { path: String, source: std::io::Error },
    #[error("Line {line}: {source}")]
    ParseError { line: usize, source: DecodeError },
    #[error("Line {line}: can't parse '{text}'")]
    SyntaxError { line: usize, text: String },
    #[error("The program contains no instructions")]
    EmptyProgram,
    #[error(transparent)]
    Pattern(#[from] regex::Error),
}

struct Loader {
    register_file: RegisterFile,
    instr_pattern: Regex,
    memory_pattern: Regex,
    code: Vec<Instr>,
}

impl Loader {
    fn new(config: &SimulatorConfig) -> Result<Loader, LoadError> {
        Ok(Loader {
            register_file: RegisterFile::new(config.fp_reg_count, config.int_reg_count),
            // MNEMONIC operand,operand,...
            instr_pattern: Regex::new(r"^([A-Za-z][A-Za-z.]*)\s+(.+)$")?,
            // offset(base)
            memory_pattern: Regex::new(r"^([+-]?#?\d+)\s*\(\s*([A-Za-z]\w*)\s*\)$")?,
            code: Vec::new(),
        })
    }

    fn load(&mut self, src: &str) -> Result<(), LoadError> {
        for (index, raw_line) in src.lines().enumerate() {
            let line = index + 1;
            let text = strip_comment(raw_line).trim();
            if text.is_empty() {
                continue;
            }

            let instr = self.parse_instr(line, text)?;
            debug!("Loaded line {}: [{}]", line, instr);
            self.code.push(instr);
        }

        if self.code.is_empty() {
            return Err(LoadError::EmptyProgram);
        }
        Ok(())
    }

    fn parse_instr(&self, line: usize, text: &str) -> Result<Instr, LoadError> {
        let captures = self.instr_pattern.captures(text)
            .ok_or_else(|| LoadError::SyntaxError { line, text: text.to_string() })?;
        let mnemonic = &captures[1];
        let operand_text = &captures[2];

        let mut operands: Vec<&str> = operand_text.split(',').map(|op| op.trim()).collect();

        // `reg,offset(base)` becomes `reg,base,offset`
        if operands.len() == 2 {
            if let Some(memory) = self.memory_pattern.captures(operands[1]) {
                let offset = memory.get(1).map_or("", |m| m.as_str());
                let base = memory.get(2).map_or("", |m| m.as_str());
                operands = vec![operands[0], base, offset];
            }
        }

        Assembler::new(&self.register_file)
            .decode(mnemonic, &operands)
            .map_err(|source| LoadError::ParseError { line, source })
    }
}

fn strip_comment(line: &str) -> &str {
    let end = [line.find(';'), line.find("//")]
        .into_iter()
        .flatten()
        .min()
        .unwrap_or(line.len());
    &line[..end]
}

pub(crate) fn load(config: &SimulatorConfig, path: &str) -> Result<Program, LoadError> {
    let src = fs::read_to_string(path)
        .map_err(|source| LoadError::IOError { path: path.to_string(), source })?;
    load_from_string(config, &src)
}

pub(crate) fn load_from_string(config: &SimulatorConfig, src: &str) -> Result<Program, LoadError> {
    let mut loader = Loader::new(config)?;
    loader.load(src)?;
    Ok(Program { code: loader.code })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load_src(src: &str) -> Result<Program, LoadError> {
        load_from_string(&SimulatorConfig::default(), src)
    }

    #[test]
    fn test_load_program() {
        let src = r#"
; the running example
    L.D   F6,32(R2)
    L.D   F2,44(R3)
    MUL.D F0,F2,F4
    SUB.D F8,F2,F6   ; reads both loads
    DIV.D F10,F0,F6
    ADD.D F6,F8,F2
    S.D   F6,32(R2)
"#;
        let program = load_src(src).unwrap();
        let text: Vec<String> = program.code.iter().map(|instr| instr.to_string()).collect();
        assert_eq!(text, vec![
            "L.D F6,32(R2)",
            "L.D F2,44(R3)",
            "MUL.D F0,F2,F4",
            "SUB.D F8,F2,F6",
            "DIV.D F10,F0,F6",
            "ADD.D F6,F8,F2",
            "S.D F6,32(R2)",
        ]);
    }

    #[test]
    fn test_compact_mnemonics_and_spacing() {
        let program = load_src("ld f0, -8 ( r1 )\nmuld F4, F0, F2 // scale\nsd F4, 0(R1)").unwrap();
        let text: Vec<String> = program.code.iter().map(|instr| instr.to_string()).collect();
        assert_eq!(text, vec!["L.D F0,-8(R1)", "MUL.D F4,F0,F2", "S.D F4,0(R1)"]);
    }

    #[test]
    fn test_unknown_mnemonic_reports_line() {
        let err = load_src("L.D F6,32(R2)\n\nBNEZ R1,F2,F4\n").unwrap_err();
        match err {
            LoadError::ParseError { line, source } => {
                assert_eq!(line, 3);
                assert_eq!(source, DecodeError::UnknownMnemonic("BNEZ".to_string()));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_missing_operand() {
        let err = load_src("ADD.D F0,F2").unwrap_err();
        assert!(matches!(err, LoadError::ParseError { line: 1, source: DecodeError::OperandCount { .. } }));
    }

    #[test]
    fn test_syntax_error() {
        let err = load_src("L.D").unwrap_err();
        assert!(matches!(err, LoadError::SyntaxError { line: 1, .. }));
    }

    #[test]
    fn test_empty_program() {
        assert!(matches!(load_src("; nothing\n\n"), Err(LoadError::EmptyProgram)));
    }

    #[test]
    fn test_missing_file() {
        let err = load(&SimulatorConfig::default(), "does/not/exist.asm").unwrap_err();
        assert!(matches!(err, LoadError::IOError { .. }));
    }
}
