//! Reader A: the flat `bftrace` directive format.
//!
//! Grounded on `BFTraceReader::loadCFGs`: a first pass collects `symbol`,
//! `program-entry`, `block`, `call`, `return` and `br` directives into
//! per-symbol scratch state, then a second pass walks each symbol's entry
//! blocks breadth-first, materializing `Block` nodes and edges as it goes.
//! `call`/`return` operands are scanned and discarded — this format carries
//! no call count, so Entry/Exit-adjacency counts are left at zero and no
//! `Call` record is ever produced from it (spec.md §9 Open Question a).

use std::collections::{BTreeMap, BTreeSet};

use crate::core::{Address, CfgTable};
use crate::error::{CfgConvError, Result};
use crate::token::{Scanner, Token};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Terminator {
    Jump,
    Call,
    Return,
    Other,
}

#[derive(Debug, Default)]
struct BlockInfo {
    size: u32,
    is_exit: bool,
    terminator: Option<Terminator>,
}

#[derive(Debug, Default)]
struct Symbol {
    filename: String,
    functname: String,
    blocks: BTreeMap<Address, BlockInfo>,
    entries: BTreeSet<Address>,
    edges: BTreeMap<Address, BTreeSet<Address>>,
}

/// Parses and loads a bftrace file's worth of CFGs into `table`.
pub struct BFTraceReader<'a> {
    scanner: Scanner<'a>,
    current: Token,
}

impl<'a> BFTraceReader<'a> {
    pub fn new(input: &'a str) -> Result<Self> {
        let mut scanner = Scanner::new(input);
        let current = scanner.next_token()?;
        Ok(BFTraceReader { scanner, current })
    }

    fn bump(&mut self) -> Result<Token> {
        let next = self.scanner.next_token()?;
        Ok(std::mem::replace(&mut self.current, next))
    }

    fn unexpected(&self, expected: &str) -> CfgConvError {
        CfgConvError::Syntax {
            offset: self.scanner.offset(),
            expected: expected.to_string(),
            found: self.current.to_string(),
        }
    }

    fn expect_addr(&mut self) -> Result<Address> {
        match self.bump()? {
            Token::Addr(a) => Ok(a),
            _ => Err(self.unexpected("ADDR")),
        }
    }

    fn expect_string(&mut self) -> Result<String> {
        match self.bump()? {
            Token::Str(s) => Ok(s),
            _ => Err(self.unexpected("STRING")),
        }
    }

    fn expect_bool(&mut self) -> Result<bool> {
        match self.bump()? {
            Token::Bool(b) => Ok(b),
            _ => Err(self.unexpected("BOOL")),
        }
    }

    fn expect_keyword(&mut self) -> Result<String> {
        match self.bump()? {
            Token::Keyword(k) => Ok(k),
            _ => Err(self.unexpected("KEYWORD")),
        }
    }

    /// Runs both passes and leaves every discovered procedure, validated, in
    /// `table`.
    pub fn load_cfgs(mut self, table: &mut CfgTable) -> Result<()> {
        let mut symbols: Vec<Symbol> = Vec::new();
        let mut current_symbol: Option<usize> = None;

        loop {
            let kw = match &self.current {
                Token::Keyword(k) => k.clone(),
                Token::Eof => break,
                _ => return Err(self.unexpected("directive keyword or EOF")),
            };
            self.bump()?;

            match kw.as_str() {
                "symbol" => {
                    let _start = self.expect_addr()?;
                    let _end = self.expect_addr()?;
                    let filename = self.expect_string()?;
                    let functname = self.expect_string()?;
                    let _bias = self.expect_addr()?;
                    symbols.push(Symbol {
                        filename,
                        functname,
                        ..Default::default()
                    });
                    current_symbol = Some(symbols.len() - 1);
                }
                "program-entry" => {
                    self.expect_addr()?;
                    self.expect_addr()?;
                    current_symbol = None;
                }
                "block" => {
                    let idx = current_symbol
                        .ok_or_else(|| CfgConvError::Semantic("block directive outside symbol".into()))?;
                    self.expect_addr()?; // containing-function address, unused here
                    let bb_addr = self.expect_addr()?;
                    let bb_end = self.expect_addr()?;
                    self.expect_addr()?; // unused fourth address
                    let term = self.expect_keyword()?;
                    let terminator = match term.as_str() {
                        "jump" => Terminator::Jump,
                        "call" => Terminator::Call,
                        "return" => Terminator::Return,
                        "other" => Terminator::Other,
                        other => {
                            return Err(CfgConvError::Semantic(format!(
                                "unknown block terminator: {other}"
                            )))
                        }
                    };
                    let is_entry = self.expect_bool()?;
                    let is_exit = self.expect_bool()?;

                    let size = bb_end.value().saturating_sub(bb_addr.value()) as u32;
                    let sym = &mut symbols[idx];
                    sym.blocks.insert(
                        bb_addr,
                        BlockInfo {
                            size,
                            is_exit,
                            terminator: Some(terminator),
                        },
                    );
                    if is_entry {
                        sym.entries.insert(bb_addr);
                    }
                }
                "call" | "return" => {
                    self.expect_addr()?;
                    self.expect_addr()?;
                }
                "br" => {
                    let idx = current_symbol
                        .ok_or_else(|| CfgConvError::Semantic("br directive outside symbol".into()))?;
                    let src = self.expect_addr()?;
                    let dst = self.expect_addr()?;
                    symbols[idx].edges.entry(src).or_default().insert(dst);
                }
                other => {
                    return Err(CfgConvError::Semantic(format!("unknown directive: {other}")))
                }
            }
        }

        for sym in symbols {
            for &entry_addr in &sym.entries {
                let cfg = table.instance(entry_addr);
                cfg.set_function_name(format!("{}::{}", sym.filename, sym.functname));

                let mut queue = vec![entry_addr];
                let mut seen = BTreeSet::new();
                seen.insert(entry_addr);
                let mut i = 0;
                while i < queue.len() {
                    let addr = queue[i];
                    i += 1;

                    let cfg = table.instance(entry_addr);

                    // A referenced address with no `block` directive stays a
                    // Phantom (spec.md §4.5): the predecessor's `node_with_addr`
                    // call already created it, or this is the entry address
                    // itself and we create it here.
                    let Some(info) = sym.blocks.get(&addr) else {
                        cfg.node_with_addr(addr);
                        continue;
                    };

                    let node = cfg.add_block(addr, info.size, false);

                    if addr == entry_addr {
                        let entry_node = cfg.entry_node();
                        cfg.add_edge(entry_node, node, 0);
                    }
                    if info.is_exit || info.terminator == Some(Terminator::Return) {
                        let exit_node = cfg.exit_node();
                        cfg.add_edge(node, exit_node, 0);
                    }

                    if let Some(dsts) = sym.edges.get(&addr) {
                        for &dst in dsts {
                            let dst_node = cfg.node_with_addr(dst);
                            cfg.add_edge(node, dst_node, 0);
                            if seen.insert(dst) {
                                queue.push(dst);
                            }
                        }
                    }
                }

                table.instance(entry_addr).check();
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_function_is_valid_and_complete() {
        let input = r#"
            symbol 0x400 0x420 "a.c" "f" 0x0
            block 0x400 0x400 0x408 0x0 jump true false
            block 0x400 0x408 0x410 0x0 return false true
            br 0x400 0x408
        "#;
        let reader = BFTraceReader::new(input).unwrap();
        let mut table = CfgTable::new();
        reader.load_cfgs(&mut table).unwrap();

        let cfg = table.get(Address(0x400)).unwrap();
        assert_eq!(cfg.status(), crate::core::CfgStatus::Valid);
        assert!(cfg.complete());
        assert_eq!(cfg.function_name(), "a.c::f");
    }

    #[test]
    fn test_call_and_return_operands_are_discarded() {
        let input = r#"
            symbol 0x400 0x420 "a.c" "f" 0x0
            block 0x400 0x400 0x408 0x0 call true false
            block 0x400 0x408 0x410 0x0 return false true
            br 0x400 0x408
            call 0x404 0x800
            return 0x800 0x406
        "#;
        let reader = BFTraceReader::new(input).unwrap();
        let mut table = CfgTable::new();
        reader.load_cfgs(&mut table).unwrap();

        assert!(table.get(Address(0x800)).is_none());
        let cfg = table.get(Address(0x400)).unwrap();
        let block = cfg.node_by_addr(Address(0x400)).unwrap();
        assert!(cfg.node(block).as_block().unwrap().calls.is_empty());
    }

    #[test]
    fn test_undescribed_target_becomes_phantom() {
        let input = r#"
            symbol 0x400 0x420 "a.c" "f" 0x0
            block 0x400 0x400 0x408 0x0 other true true
            br 0x400 0x408
        "#;
        let reader = BFTraceReader::new(input).unwrap();
        let mut table = CfgTable::new();
        reader.load_cfgs(&mut table).unwrap();

        let cfg = table.get(Address(0x400)).unwrap();
        let phantom = cfg.node_by_addr(Address(0x408)).unwrap();
        assert!(cfg.node(phantom).is_phantom());
        assert_eq!(cfg.status(), crate::core::CfgStatus::Valid);
        assert!(!cfg.complete());
    }
}
