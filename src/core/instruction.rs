//! Instruction interning.
//!
//! Each instruction is identified by its address and carries a byte size and
//! an optional disassembly text loaded from an `-i` metadata file. The
//! registry is keyed by address: a lookup for an unknown address creates an
//! entry with the requested size; a lookup for a known zero-sized entry
//! adopts the requested size if it is positive. A size is never overwritten
//! once it is non-zero.

use std::collections::HashMap;
use std::fmt;
use std::io::BufRead;

use serde::{Deserialize, Serialize};

use crate::core::address::Address;
use crate::error::Result;

/// A single decoded-or-assumed instruction at a fixed address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    pub address: Address,
    pub size: u32,
    pub text: Option<String>,
}

impl Instruction {
    pub fn new(address: Address, size: u32) -> Self {
        Instruction {
            address,
            size,
            text: None,
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.text {
            Some(text) => write!(f, "{} <+{}>: {}", self.address, self.size, text),
            None => write!(f, "{} <+{}>", self.address, self.size),
        }
    }
}

/// Per-loader interning table of `address -> Instruction`.
///
/// A loader-scoped collaborator rather than a process-wide global:
/// callers thread a single `InstructionRegistry` into each reader they
/// construct for one load, so the same address always resolves to the
/// same `Instruction`.
#[derive(Debug, Default)]
pub struct InstructionRegistry {
    instructions: HashMap<Address, Instruction>,
}

impl InstructionRegistry {
    pub fn new() -> Self {
        InstructionRegistry::default()
    }

    /// Look up or create the instruction at `address`. A size of 0 on an
    /// existing size-0 entry keeps it unresolved; a positive size refines a
    /// size-0 entry; an already-positive size is never contradicted.
    pub fn get(&mut self, address: Address, size: u32) -> Instruction {
        let entry = self
            .instructions
            .entry(address)
            .or_insert_with(|| Instruction::new(address, size));

        if entry.size == 0 && size > 0 {
            entry.size = size;
        }

        entry.clone()
    }

    /// Populate disassembly text from a line-oriented `address:size:text`
    /// file, refining sizes the same way `get` does.
    pub fn load<R: BufRead>(&mut self, reader: R) -> Result<()> {
        for line in reader.lines() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let mut parts = line.splitn(3, ':');
            let addr_str = parts.next().unwrap_or_default();
            let size_str = parts.next().unwrap_or_default();
            let text = parts.next().unwrap_or_default();

            let addr_str = addr_str.trim_start_matches("0x").trim_start_matches("0X");
            let addr = match u64::from_str_radix(addr_str, 16) {
                Ok(v) => Address::new(v),
                Err(_) => continue,
            };
            let size: u32 = size_str.parse().unwrap_or(0);

            let entry = self
                .instructions
                .entry(addr)
                .or_insert_with(|| Instruction::new(addr, size));
            if entry.size == 0 && size > 0 {
                entry.size = size;
            }
            entry.text = Some(text.to_string());
        }

        Ok(())
    }

    pub fn clear(&mut self) {
        self.instructions.clear();
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }
}
