//! CFG node payloads: Block data, Call records, and signal-handler records.
//!
//! The five node kinds (Entry, Block, Phantom, Exit, Halt) are modeled as a
//! plain enum rather than a class hierarchy with a `setData` state
//! transition: promoting a Phantom to a Block is just assigning a new
//! `Node::Block(..)` into the arena slot the `NodeId` already points at, so
//! no holder of a `NodeId` ever observes an invalidated reference.

use std::collections::BTreeMap;

use crate::core::address::Address;
use crate::core::instruction::Instruction;

/// A call made from a Block to another procedure, unique by called address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub called: Address,
    pub count: u64,
}

impl Call {
    pub fn update_count(&mut self, count: u64) {
        self.count += count;
    }
}

/// A signal-handler attachment on a Block, unique by signal id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalHandler {
    pub sigid: i32,
    pub handler: Address,
    pub count: u64,
}

impl SignalHandler {
    pub fn update_count(&mut self, count: u64) {
        self.count += count;
    }
}

/// Payload of a Block node.
#[derive(Debug, Clone, Default)]
pub struct BlockData {
    pub addr: Address,
    pub size: u32,
    pub indirect: bool,
    pub instructions: Vec<Instruction>,
    pub calls: BTreeMap<Address, Call>,
    pub signal_handlers: BTreeMap<i32, SignalHandler>,
}

impl BlockData {
    pub fn new(addr: Address, size: u32, indirect: bool) -> Self {
        BlockData {
            addr,
            size,
            indirect,
            instructions: Vec::new(),
            calls: BTreeMap::new(),
            signal_handlers: BTreeMap::new(),
        }
    }

    pub fn set_indirect(&mut self, indirect: bool) {
        self.indirect = indirect;
    }

    /// Appends an instruction immediately following the current tail and
    /// widens `size` to cover it if necessary.
    pub fn add_instruction(&mut self, instr: Instruction) {
        let end = instr.address.value() + instr.size as u64;
        let size = (end - self.addr.value()) as u32;
        self.instructions.push(instr);
        if size > self.size {
            self.size = size;
        }
    }

    pub fn first_instruction(&self) -> Option<&Instruction> {
        self.instructions.first()
    }

    pub fn last_instruction(&self) -> Option<&Instruction> {
        self.instructions.last()
    }

    pub fn clear_instructions(&mut self) {
        self.instructions.clear();
        self.size = 0;
    }

    pub fn add_call(&mut self, called: Address, count: u64) {
        self.calls
            .entry(called)
            .and_modify(|c| c.update_count(count))
            .or_insert(Call { called, count });
    }

    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }

    pub fn add_signal_handler(&mut self, sigid: i32, handler: Address, count: u64) {
        self.signal_handlers
            .entry(sigid)
            .and_modify(|h| h.update_count(count))
            .or_insert(SignalHandler {
                sigid,
                handler,
                count,
            });
    }

    pub fn clear_signal_handlers(&mut self) {
        self.signal_handlers.clear();
    }
}

/// A node in a CFG. `NodeId` (an index into `Cfg`'s node arena) is the
/// stable handle readers and edges hold; the variant stored at that index
/// may change exactly once, Phantom -> Block.
#[derive(Debug, Clone)]
pub enum Node {
    Entry,
    Block(BlockData),
    Phantom(Address),
    Exit,
    Halt,
}

impl Node {
    /// Entry/Exit/Halt resolve to address 0 (spec.md §3's node-address
    /// invariant); Block/Phantom report their own non-zero address.
    pub fn addr(&self) -> Address {
        match self {
            Node::Block(data) => data.addr,
            Node::Phantom(addr) => *addr,
            Node::Entry | Node::Exit | Node::Halt => Address::NONE,
        }
    }

    pub fn as_block(&self) -> Option<&BlockData> {
        match self {
            Node::Block(data) => Some(data),
            _ => None,
        }
    }

    pub fn as_block_mut(&mut self) -> Option<&mut BlockData> {
        match self {
            Node::Block(data) => Some(data),
            _ => None,
        }
    }

    pub fn is_phantom(&self) -> bool {
        matches!(self, Node::Phantom(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub usize);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_add_instruction_widens_size() {
        let mut b = BlockData::new(Address(0x400), 0, false);
        b.add_instruction(Instruction::new(Address(0x400), 4));
        b.add_instruction(Instruction::new(Address(0x404), 4));
        assert_eq!(b.size, 8);
        assert_eq!(b.instructions.len(), 2);
    }

    #[test]
    fn test_call_additive_count() {
        let mut b = BlockData::new(Address(0x400), 4, false);
        b.add_call(Address(0x500), 3);
        b.add_call(Address(0x500), 4);
        assert_eq!(b.calls[&Address(0x500)].count, 7);
        assert_eq!(b.calls.len(), 1);
    }

    #[test]
    fn test_signal_handler_additive_count() {
        let mut b = BlockData::new(Address(0x400), 4, false);
        b.add_signal_handler(11, Address(0x600), 1);
        b.add_signal_handler(11, Address(0x600), 2);
        assert_eq!(b.signal_handlers[&11].count, 3);
    }

    #[test]
    fn test_node_addr() {
        assert_eq!(Node::Entry.addr(), Address::NONE);
        assert_eq!(Node::Phantom(Address(0x10)).addr(), Address(0x10));
        let block = Node::Block(BlockData::new(Address(0x20), 4, false));
        assert_eq!(block.addr(), Address(0x20));
    }
}
