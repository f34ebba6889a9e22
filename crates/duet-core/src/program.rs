//! Instruction and program model, plus the line parser that builds them.
//!
//! A program is parsed once, validated completely, and then shared read-only
//! by every processor that runs it. Nothing in this module executes code.

use crate::config::Dialect;
use crate::error::{DuetError, ParseReason, Result};
use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// A single-letter register name (`a`..=`z`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Register(char);

impl Register {
    /// Create a register from a lowercase ASCII letter.
    pub fn new(name: char) -> Option<Self> {
        name.is_ascii_lowercase().then_some(Self(name))
    }

    /// Create a register without validating the name.
    pub(crate) const fn new_unchecked(name: char) -> Self {
        Self(name)
    }

    pub fn name(&self) -> char {
        self.0
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Instruction operand: a register reference or a signed literal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    Register(Register),
    Literal(i64),
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Register(reg) => write!(f, "{}", reg),
            Operand::Literal(value) => write!(f, "{}", value),
        }
    }
}

/// The fixed opcode set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    Set,
    Add,
    Sub,
    Mul,
    Mod,
    Jgz,
    Jnz,
    Snd,
    Rcv,
}

impl Opcode {
    pub const ALL: [Opcode; 9] = [
        Opcode::Set,
        Opcode::Add,
        Opcode::Sub,
        Opcode::Mul,
        Opcode::Mod,
        Opcode::Jgz,
        Opcode::Jnz,
        Opcode::Snd,
        Opcode::Rcv,
    ];

    pub fn mnemonic(&self) -> &'static str {
        match self {
            Opcode::Set => "set",
            Opcode::Add => "add",
            Opcode::Sub => "sub",
            Opcode::Mul => "mul",
            Opcode::Mod => "mod",
            Opcode::Jgz => "jgz",
            Opcode::Jnz => "jnz",
            Opcode::Snd => "snd",
            Opcode::Rcv => "rcv",
        }
    }

    pub fn from_mnemonic(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.mnemonic() == s)
    }

    /// Number of operands the opcode takes.
    pub fn arity(&self) -> usize {
        match self {
            Opcode::Snd | Opcode::Rcv => 1,
            _ => 2,
        }
    }

    /// True when the opcode is available in `dialect`.
    pub fn in_dialect(&self, dialect: Dialect) -> bool {
        match dialect {
            Dialect::Extended => true,
            Dialect::Sound => !matches!(self, Opcode::Sub | Opcode::Jnz),
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

/// One decoded instruction. Immutable once parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    Set(Register, Operand),
    Add(Register, Operand),
    Sub(Register, Operand),
    Mul(Register, Operand),
    Mod(Register, Operand),
    Jgz(Operand, Operand),
    Jnz(Operand, Operand),
    Snd(Operand),
    Rcv(Register),
}

impl Instruction {
    pub fn opcode(&self) -> Opcode {
        match self {
            Instruction::Set(..) => Opcode::Set,
            Instruction::Add(..) => Opcode::Add,
            Instruction::Sub(..) => Opcode::Sub,
            Instruction::Mul(..) => Opcode::Mul,
            Instruction::Mod(..) => Opcode::Mod,
            Instruction::Jgz(..) => Opcode::Jgz,
            Instruction::Jnz(..) => Opcode::Jnz,
            Instruction::Snd(_) => Opcode::Snd,
            Instruction::Rcv(_) => Opcode::Rcv,
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = self.opcode();
        match self {
            Instruction::Set(x, y)
            | Instruction::Add(x, y)
            | Instruction::Sub(x, y)
            | Instruction::Mul(x, y)
            | Instruction::Mod(x, y) => write!(f, "{} {} {}", op, x, y),
            Instruction::Jgz(x, y) | Instruction::Jnz(x, y) => write!(f, "{} {} {}", op, x, y),
            Instruction::Snd(x) => write!(f, "{} {}", op, x),
            Instruction::Rcv(x) => write!(f, "{} {}", op, x),
        }
    }
}

/// An ordered, 0-indexed, immutable instruction sequence.
///
/// Cloning is cheap; clones share the same instructions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Program {
    instructions: Arc<[Instruction]>,
}

impl Program {
    /// Build a program from already-decoded instructions.
    pub fn new(instructions: Vec<Instruction>) -> Result<Self> {
        if instructions.is_empty() {
            return Err(DuetError::EmptyProgram);
        }
        Ok(Self {
            instructions: instructions.into(),
        })
    }

    /// Parse program text with a one-off parser.
    pub fn parse(text: &str, dialect: Dialect) -> Result<Self> {
        Parser::new(dialect).parse_program(text)
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Fetch the instruction at `pc`, or `None` when `pc` is out of bounds.
    pub fn fetch(&self, pc: i64) -> Option<&Instruction> {
        usize::try_from(pc)
            .ok()
            .and_then(|index| self.instructions.get(index))
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }
}

impl FromStr for Program {
    type Err = DuetError;

    fn from_str(s: &str) -> Result<Self> {
        Program::parse(s, Dialect::default())
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for instruction in self.instructions.iter() {
            writeln!(f, "{}", instruction)?;
        }
        Ok(())
    }
}

const OPERAND_PATTERN: &str = r"^(?:(?P<reg>[a-z])|(?P<lit>-?[0-9]+))$";

/// Line-oriented program parser.
///
/// Build one and reuse it; it holds the compiled operand pattern.
#[derive(Debug, Clone)]
pub struct Parser {
    operand: Regex,
    dialect: Dialect,
}

impl Parser {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            operand: Regex::new(OPERAND_PATTERN).expect("operand regex must compile"),
            dialect,
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Parse a whole program. Trailing blank lines are ignored; a blank line
    /// between instructions is rejected because jumps are relative.
    pub fn parse_program(&self, text: &str) -> Result<Program> {
        let lines: Vec<&str> = text.lines().map(str::trim).collect();
        let end = lines
            .iter()
            .rposition(|line| !line.is_empty())
            .map_or(0, |last| last + 1);
        // Leading blank lines come from indented heredoc-style text.
        let start = lines[..end]
            .iter()
            .position(|line| !line.is_empty())
            .unwrap_or(end);

        let mut instructions = Vec::with_capacity(end - start);
        for (index, line) in lines.iter().enumerate().take(end).skip(start) {
            let instruction = self
                .parse_line(line)
                .map_err(|reason| DuetError::parse(index, *line, reason))?;
            instructions.push(instruction);
        }
        Program::new(instructions)
    }

    /// Parse one instruction line.
    pub fn parse_line(&self, line: &str) -> std::result::Result<Instruction, ParseReason> {
        let mut tokens = line.split_whitespace();
        let mnemonic = tokens.next().ok_or(ParseReason::BlankLine)?;
        let opcode = Opcode::from_mnemonic(mnemonic)
            .ok_or_else(|| ParseReason::UnknownOpcode(mnemonic.to_string()))?;
        if !opcode.in_dialect(self.dialect) {
            return Err(ParseReason::NotInDialect(opcode.mnemonic()));
        }

        let raw: Vec<&str> = tokens.collect();
        if raw.len() != opcode.arity() {
            return Err(ParseReason::OperandCount {
                opcode: opcode.mnemonic(),
                expected: opcode.arity(),
                found: raw.len(),
            });
        }

        let operands = raw
            .iter()
            .map(|token| self.parse_operand(token))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let target = || match operands[0] {
            Operand::Register(reg) => Ok(reg),
            Operand::Literal(_) => Err(ParseReason::RegisterRequired {
                opcode: opcode.mnemonic(),
                found: raw[0].to_string(),
            }),
        };

        let instruction = match opcode {
            Opcode::Set => Instruction::Set(target()?, operands[1]),
            Opcode::Add => Instruction::Add(target()?, operands[1]),
            Opcode::Sub => Instruction::Sub(target()?, operands[1]),
            Opcode::Mul => Instruction::Mul(target()?, operands[1]),
            Opcode::Mod => Instruction::Mod(target()?, operands[1]),
            Opcode::Jgz => Instruction::Jgz(operands[0], operands[1]),
            Opcode::Jnz => Instruction::Jnz(operands[0], operands[1]),
            Opcode::Snd => Instruction::Snd(operands[0]),
            Opcode::Rcv => Instruction::Rcv(target()?),
        };
        Ok(instruction)
    }

    fn parse_operand(&self, token: &str) -> std::result::Result<Operand, ParseReason> {
        let invalid = || ParseReason::InvalidOperand(token.to_string());
        let caps = self.operand.captures(token).ok_or_else(invalid)?;

        if let Some(reg) = caps.name("reg") {
            let name = reg.as_str().chars().next().ok_or_else(invalid)?;
            return Register::new(name).map(Operand::Register).ok_or_else(invalid);
        }
        caps.name("lit")
            .and_then(|lit| lit.as_str().parse::<i64>().ok())
            .map(Operand::Literal)
            .ok_or_else(invalid)
    }
}

impl Default for Parser {
    fn default() -> Self {
        Self::new(Dialect::default())
    }
}
