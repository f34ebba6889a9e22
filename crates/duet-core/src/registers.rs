//! Per-processor register storage.
//!
//! Reading a register that was never written returns zero and records the
//! register in the file, so snapshots list every register a program touched.

use crate::program::{Operand, Register};
use std::collections::BTreeMap;

/// Named 64-bit registers, owned by exactly one processor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegisterFile {
    values: BTreeMap<Register, i64>,
}

impl RegisterFile {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a register, materializing it as zero when absent.
    pub fn get(&mut self, reg: Register) -> i64 {
        *self.values.entry(reg).or_insert(0)
    }

    pub fn set(&mut self, reg: Register, value: i64) {
        self.values.insert(reg, value);
    }

    /// Resolve an operand to its value.
    pub fn value_of(&mut self, operand: Operand) -> i64 {
        match operand {
            Operand::Register(reg) => self.get(reg),
            Operand::Literal(value) => value,
        }
    }

    /// Read without materializing.
    pub fn peek(&self, reg: Register) -> Option<i64> {
        self.values.get(&reg).copied()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Registers in name order.
    pub fn snapshot(&self) -> BTreeMap<char, i64> {
        self.values
            .iter()
            .map(|(reg, value)| (reg.name(), *value))
            .collect()
    }
}
