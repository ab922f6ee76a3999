//! Reader B: the bracketed structural format.
//!
//! Grounded on `CFGGrindReader::loadCFGs`: a flat sequence of `[cfg ...]`
//! and `[node ...]` records, each self-contained (no forward pass needed
//! beyond the universal Phantom-placeholder strategy every reader uses for
//! successor addresses it hasn't seen a `node` record for yet). A `[node
//! ...]` record may carry one extra bracket group after the call list,
//! `[sigid:handler[:count] ...]`: absent from spec.md's normative grammar
//! and its literal inputs, but present in the canonical text dump this
//! reader must be able to round-trip (invariant 8), so the group is
//! optional — a bare BOOL after the calls group means there is no signals
//! group at all.

use crate::core::{Address, CfgTable, InstructionRegistry};
use crate::error::{CfgConvError, Result};
use crate::token::{Scanner, Token};

enum Target {
    Addr(Address),
    Exit,
    Halt,
}

/// Parses and loads a cfggrind file's worth of CFGs into `table`, interning
/// instruction bytes into `instructions` as node records declare them.
pub struct CfgGrindReader<'a> {
    scanner: Scanner<'a>,
    current: Token,
}

impl<'a> CfgGrindReader<'a> {
    pub fn new(input: &'a str) -> Result<Self> {
        let mut scanner = Scanner::new(input);
        let current = scanner.next_token()?;
        Ok(CfgGrindReader { scanner, current })
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

    fn expect_number(&mut self) -> Result<i64> {
        match self.bump()? {
            Token::Number(n) => Ok(n),
            _ => Err(self.unexpected("NUMBER")),
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

    fn expect_bracket_open(&mut self) -> Result<()> {
        match self.bump()? {
            Token::BracketOpen => Ok(()),
            _ => Err(self.unexpected("'['")),
        }
    }

    /// Optional `: NUMBER` suffix, consumed if present.
    fn optional_count(&mut self) -> Result<u64> {
        if matches!(self.current, Token::Colon) {
            self.bump()?;
            Ok(self.expect_number()? as u64)
        } else {
            Ok(0)
        }
    }

    pub fn load_cfgs(
        mut self,
        table: &mut CfgTable,
        instructions: &mut InstructionRegistry,
    ) -> Result<()> {
        loop {
            match self.current {
                Token::Eof => break,
                Token::BracketOpen => {
                    self.bump()?;
                    let kw = self.expect_keyword()?;
                    match kw.as_str() {
                        "cfg" => self.parse_cfg(table)?,
                        "node" => self.parse_node(table, instructions)?,
                        other => {
                            return Err(CfgConvError::Semantic(format!(
                                "unknown bracketed record: {other}"
                            )))
                        }
                    }
                    match self.bump()? {
                        Token::BracketClose => {}
                        _ => return Err(self.unexpected("']'")),
                    }
                }
                _ => return Err(self.unexpected("'['")),
            }
        }

        table.check_all();
        Ok(())
    }

    fn parse_cfg(&mut self, table: &mut CfgTable) -> Result<()> {
        let addr = self.expect_addr()?;
        let count = self.optional_count()?;
        let name = self.expect_string()?;
        let _declared_complete = self.expect_bool()?;

        let cfg = table.instance(addr);
        cfg.set_function_name(name);
        cfg.update_execs(count);
        Ok(())
    }

    fn parse_node(
        &mut self,
        table: &mut CfgTable,
        instructions: &mut InstructionRegistry,
    ) -> Result<()> {
        let cfg_addr = self.expect_addr()?;
        let block_addr = self.expect_addr()?;
        let declared_size = self.expect_number()? as u32;

        self.expect_bracket_open()?;
        let mut instr_sizes = Vec::new();
        while !matches!(self.current, Token::BracketClose) {
            instr_sizes.push(self.expect_number()? as u32);
        }
        self.bump()?;

        self.expect_bracket_open()?;
        let mut calls = Vec::new();
        while !matches!(self.current, Token::BracketClose) {
            let callee = self.expect_addr()?;
            let count = self.optional_count()?;
            calls.push((callee, count));
        }
        self.bump()?;

        // The signals group is absent from spec.md's normative grammar and
        // its literal §8 inputs (S2/S3/S6 go straight from the calls group
        // to INDIRECT); it only appears when re-ingesting this reader's own
        // §4.8 dump (invariant 8). Peek for '[' versus a bare BOOL to tell
        // the two shapes apart.
        let mut signal_handlers = Vec::new();
        if matches!(self.current, Token::BracketOpen) {
            self.bump()?;
            while !matches!(self.current, Token::BracketClose) {
                let sigid = self.expect_number()? as i32;
                if !matches!(self.current, Token::Colon) {
                    return Err(self.unexpected("':'"));
                }
                self.bump()?;
                let handler = self.expect_addr()?;
                let count = self.optional_count()?;
                signal_handlers.push((sigid, handler, count));
            }
            self.bump()?;
        }

        let indirect = self.expect_bool()?;

        self.expect_bracket_open()?;
        let mut successors = Vec::new();
        while !matches!(self.current, Token::BracketClose) {
            let target = match &self.current {
                Token::Addr(a) => {
                    let a = *a;
                    self.bump()?;
                    Target::Addr(a)
                }
                Token::Keyword(k) if k == "exit" => {
                    self.bump()?;
                    Target::Exit
                }
                Token::Keyword(k) if k == "halt" => {
                    self.bump()?;
                    Target::Halt
                }
                _ => return Err(self.unexpected("ADDR, 'exit' or 'halt'")),
            };
            let count = self.optional_count()?;
            successors.push((target, count));
        }
        self.bump()?;

        let cfg = table.instance(cfg_addr);
        let block = cfg.add_block(block_addr, declared_size, indirect);

        let mut cursor = block_addr;
        let mut total_size = 0u32;
        for size in instr_sizes {
            let instr = instructions.get(cursor, size);
            cfg.add_instruction(block, instr);
            cursor = cursor
                .checked_add(size as u64)
                .unwrap_or(Address::new(u64::MAX));
            total_size += size;
        }
        if total_size != declared_size {
            return Err(CfgConvError::Semantic(format!(
                "node at {block_addr}: instruction sizes sum to {total_size}, declared size is {declared_size}"
            )));
        }

        for (callee, count) in calls {
            table.add_call(cfg_addr, block, callee, count);
        }

        for (sigid, handler, count) in signal_handlers {
            table.add_signal_handler(cfg_addr, block, sigid, handler, count);
        }

        for (target, count) in successors {
            let cfg = table.instance(cfg_addr);
            let dst = match target {
                Target::Addr(a) => cfg.node_with_addr(a),
                Target::Exit => cfg.exit_node(),
                Target::Halt => cfg.halt_node(),
            };
            cfg.add_edge(block, dst, count);
        }

        if block_addr == cfg_addr {
            let cfg = table.instance(cfg_addr);
            let entry = cfg.entry_node();
            let execs = cfg.execs();
            cfg.add_edge(entry, block, execs);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::CfgStatus;

    fn load(input: &str) -> CfgTable {
        let reader = CfgGrindReader::new(input).unwrap();
        let mut table = CfgTable::new();
        let mut instructions = InstructionRegistry::new();
        reader.load_cfgs(&mut table, &mut instructions).unwrap();
        table
    }

    #[test]
    fn test_cfggrind_with_count() {
        // Literal S2 input from spec.md §8: three bracket groups, no
        // signals group.
        let input = r#"
            [cfg 0x100:5 "g" true]
            [node 0x100 0x100 4 [4] [] false [exit:5]]
        "#;
        let table = load(input);
        let cfg = table.get(Address(0x100)).unwrap();
        assert_eq!(cfg.execs(), 5);
        assert_eq!(cfg.status(), CfgStatus::Valid);
        assert!(cfg.complete());

        let block = cfg.node_by_addr(Address(0x100)).unwrap();
        let data = cfg.node(block).as_block().unwrap();
        assert_eq!(data.instructions.len(), 1);
        assert_eq!(data.instructions[0].size, 4);
    }

    #[test]
    fn test_cfggrind_with_phantom_successor() {
        // Literal S3 input from spec.md §8: three bracket groups.
        let input = r#"
            [cfg 0x200 "h" true]
            [node 0x200 0x200 4 [4] [] false [0x300]]
        "#;
        let table = load(input);
        let cfg = table.get(Address(0x200)).unwrap();
        assert_eq!(cfg.status(), CfgStatus::Valid);
        assert!(!cfg.complete());

        let phantom = cfg.node_by_addr(Address(0x300)).unwrap();
        assert!(cfg.node(phantom).is_phantom());
    }

    #[test]
    fn test_cfggrind_three_group_and_four_group_nodes_agree() {
        // A node with no signals group (spec.md's normative grammar) and
        // one with an explicit empty signals group (this reader's own
        // dump, invariant 8) must produce the same CFG.
        let three_group = load(
            r#"
            [cfg 0x100:5 "g" true]
            [node 0x100 0x100 4 [4] [] false [exit:5]]
            "#,
        );
        let four_group = load(
            r#"
            [cfg 0x100:5 "g" true]
            [node 0x100 0x100 4 [4] [] [] false [exit:5]]
            "#,
        );
        assert_eq!(
            crate::render::render_text(three_group.get(Address(0x100)).unwrap()),
            crate::render::render_text(four_group.get(Address(0x100)).unwrap()),
        );
    }

    #[test]
    fn test_cfggrind_instruction_size_mismatch_errors() {
        let input = r#"
            [cfg 0x100 "g" true]
            [node 0x100 0x100 8 [4] [] [] false [exit]]
        "#;
        let reader = CfgGrindReader::new(input).unwrap();
        let mut table = CfgTable::new();
        let mut instructions = InstructionRegistry::new();
        let err = reader
            .load_cfgs(&mut table, &mut instructions)
            .unwrap_err();
        assert!(matches!(err, CfgConvError::Semantic(_)));
    }

    #[test]
    fn test_cfggrind_call_updates_callee() {
        let input = r#"
            [cfg 0x100:3 "caller" true]
            [node 0x100 0x100 4 [4] [0x900:3] [] false [exit:3]]
            [cfg 0x900 "callee" true]
            [node 0x900 0x900 4 [4] [] [] false [exit:3]]
        "#;
        let table = load(input);
        let callee = table.get(Address(0x900)).unwrap();
        assert_eq!(callee.execs(), 3); // entirely from the call, its own header declares none
        assert_eq!(callee.status(), CfgStatus::Valid);

        let caller = table.get(Address(0x100)).unwrap();
        let block = caller.node_by_addr(Address(0x100)).unwrap();
        let data = caller.node(block).as_block().unwrap();
        assert_eq!(data.calls[&Address(0x900)].count, 3);
    }

    #[test]
    fn test_cfggrind_signal_handler_bracket() {
        let input = r#"
            [cfg 0x100:2 "g" true]
            [node 0x100 0x100 4 [4] [] [11:0x900:2] false [exit:2]]
            [cfg 0x900 "handler" true]
            [node 0x900 0x900 4 [4] [] [] false [exit:2]]
        "#;
        let table = load(input);

        let caller = table.get(Address(0x100)).unwrap();
        let block = caller.node_by_addr(Address(0x100)).unwrap();
        let data = caller.node(block).as_block().unwrap();
        let handler = &data.signal_handlers[&11];
        assert_eq!(handler.handler, Address(0x900));
        assert_eq!(handler.count, 2);

        let handler_cfg = table.get(Address(0x900)).unwrap();
        assert_eq!(handler_cfg.execs(), 2);
    }
}
