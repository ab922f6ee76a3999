//! The CFG model: node arena, edge table, validator, and the per-loader
//! CFG table that owns every procedure.
//!
//! Grounded on `CFG`/`CFGReader` in the original `rimsa/cfgconv` sources:
//! `addNode`/`addEdge`/`successors`/`predecessors`/`check` keep their
//! shapes, reworked onto an arena of `Node`s indexed by `NodeId` so that
//! Phantom -> Block promotion never invalidates a reference (see
//! `core::node`).

use std::collections::BTreeMap;

use tracing::{debug, trace};

use crate::core::address::Address;
use crate::core::instruction::Instruction;
use crate::core::node::{BlockData, Node, NodeId};

/// Three-valued validator outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CfgStatus {
    Unchecked,
    Invalid,
    Valid,
}

impl std::fmt::Display for CfgStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CfgStatus::Unchecked => "unchecked",
            CfgStatus::Invalid => "invalid",
            CfgStatus::Valid => "valid",
        };
        write!(f, "{}", s)
    }
}

/// A single procedure: its node arena, adjacency lists, and validator state.
#[derive(Debug, Clone)]
pub struct Cfg {
    addr: Address,
    function_name: String,
    execs: u64,
    status: CfgStatus,
    complete: bool,

    nodes: Vec<Node>,
    entry: Option<NodeId>,
    exit: Option<NodeId>,
    halt: Option<NodeId>,
    addr_index: BTreeMap<Address, NodeId>,

    succs: BTreeMap<usize, Vec<NodeId>>,
    preds: BTreeMap<usize, Vec<NodeId>>,
    edge_counts: BTreeMap<(usize, usize), u64>,
}

impl Cfg {
    pub fn new(addr: Address) -> Self {
        Cfg {
            addr,
            function_name: "unknown".to_string(),
            execs: 0,
            status: CfgStatus::Unchecked,
            complete: false,
            nodes: Vec::new(),
            entry: None,
            exit: None,
            halt: None,
            addr_index: BTreeMap::new(),
            succs: BTreeMap::new(),
            preds: BTreeMap::new(),
            edge_counts: BTreeMap::new(),
        }
    }

    pub fn addr(&self) -> Address {
        self.addr
    }

    pub fn function_name(&self) -> &str {
        &self.function_name
    }

    pub fn set_function_name(&mut self, name: impl Into<String>) {
        self.function_name = name.into();
    }

    pub fn execs(&self) -> u64 {
        self.execs
    }

    pub fn update_execs(&mut self, count: u64) {
        self.execs += count;
    }

    pub fn status(&self) -> CfgStatus {
        self.status
    }

    /// Mirrors `CFG::complete()`: only meaningful when VALID.
    pub fn complete(&self) -> bool {
        matches!(self.status, CfgStatus::Valid) && self.complete
    }

    pub fn entry_id(&self) -> Option<NodeId> {
        self.entry
    }

    pub fn exit_id(&self) -> Option<NodeId> {
        self.exit
    }

    pub fn halt_id(&self) -> Option<NodeId> {
        self.halt
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        self.status = CfgStatus::Unchecked;
        &mut self.nodes[id.0]
    }

    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        (0..self.nodes.len()).map(NodeId)
    }

    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes.iter().enumerate().map(|(i, n)| (NodeId(i), n))
    }

    pub fn node_by_addr(&self, addr: Address) -> Option<NodeId> {
        self.addr_index.get(&addr).copied()
    }

    fn push_node(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(node);
        id
    }

    /// Inserts the Entry sentinel, creating it if absent.
    pub fn entry_node(&mut self) -> NodeId {
        if let Some(id) = self.entry {
            return id;
        }
        let id = self.push_node(Node::Entry);
        self.entry = Some(id);
        self.status = CfgStatus::Unchecked;
        id
    }

    pub fn exit_node(&mut self) -> NodeId {
        if let Some(id) = self.exit {
            return id;
        }
        let id = self.push_node(Node::Exit);
        self.exit = Some(id);
        self.status = CfgStatus::Unchecked;
        id
    }

    pub fn halt_node(&mut self) -> NodeId {
        if let Some(id) = self.halt {
            return id;
        }
        let id = self.push_node(Node::Halt);
        self.halt = Some(id);
        self.status = CfgStatus::Unchecked;
        id
    }

    /// Returns the node at `addr`, creating a Phantom if it isn't known yet.
    /// This is the forward-reference resolution strategy every reader uses.
    pub fn node_with_addr(&mut self, addr: Address) -> NodeId {
        if let Some(id) = self.addr_index.get(&addr) {
            return *id;
        }
        let id = self.push_node(Node::Phantom(addr));
        self.addr_index.insert(addr, id);
        self.status = CfgStatus::Unchecked;
        id
    }

    /// Materializes (creating or promoting) a Block at `addr`. Promotes a
    /// pre-existing Phantom in place; asserts (returns the existing node
    /// unchanged) if a Block already sits there, matching the original's
    /// "Block re-added" tolerance used by readers that revisit a site.
    pub fn add_block(&mut self, addr: Address, size: u32, indirect: bool) -> NodeId {
        if let Some(id) = self.addr_index.get(&addr).copied() {
            let node = &mut self.nodes[id.0];
            match node {
                Node::Phantom(_) => {
                    *node = Node::Block(BlockData::new(addr, size, indirect));
                }
                Node::Block(_) => {
                    // Already materialized; leave as-is (reader revisits the
                    // same site, e.g. a shared destination of two edges).
                }
                _ => unreachable!("address-indexed node must be Block or Phantom"),
            }
            self.status = CfgStatus::Unchecked;
            return id;
        }

        let id = self.push_node(Node::Block(BlockData::new(addr, size, indirect)));
        self.addr_index.insert(addr, id);
        self.status = CfgStatus::Unchecked;
        id
    }

    pub fn mark_indirect(&mut self, id: NodeId) {
        if let Some(data) = self.nodes[id.0].as_block_mut() {
            data.set_indirect(true);
        }
        self.status = CfgStatus::Unchecked;
    }

    pub fn add_instruction(&mut self, id: NodeId, instr: Instruction) {
        if let Some(data) = self.nodes[id.0].as_block_mut() {
            data.add_instruction(instr);
        }
        self.status = CfgStatus::Unchecked;
    }

    pub fn add_call(&mut self, id: NodeId, called: Address, count: u64) {
        if let Some(data) = self.nodes[id.0].as_block_mut() {
            data.add_call(called, count);
        }
        self.status = CfgStatus::Unchecked;
    }

    pub fn add_signal_handler(&mut self, id: NodeId, sigid: i32, handler: Address, count: u64) {
        if let Some(data) = self.nodes[id.0].as_block_mut() {
            data.add_signal_handler(sigid, handler, count);
        }
        self.status = CfgStatus::Unchecked;
    }

    /// Idempotent on `(src, dst)`: a re-add sums into the existing count.
    pub fn add_edge(&mut self, src: NodeId, dst: NodeId, count: u64) {
        let key = (src.0, dst.0);
        if let Some(existing) = self.edge_counts.get_mut(&key) {
            *existing += count;
        } else {
            self.edge_counts.insert(key, count);
            self.succs.entry(src.0).or_default().push(dst);
            self.preds.entry(dst.0).or_default().push(src);
        }
        self.status = CfgStatus::Unchecked;
        trace!(src = src.0, dst = dst.0, count, "edge added");
    }

    pub fn find_edge(&self, src: NodeId, dst: NodeId) -> Option<u64> {
        self.edge_counts.get(&(src.0, dst.0)).copied()
    }

    pub fn successors(&self, id: NodeId) -> &[NodeId] {
        self.succs.get(&id.0).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn predecessors(&self, id: NodeId) -> &[NodeId] {
        self.preds.get(&id.0).map(|v| v.as_slice()).unwrap_or(&[])
    }

    fn sum_incoming(&self, id: NodeId) -> u64 {
        self.predecessors(id)
            .iter()
            .map(|p| self.find_edge(*p, id).unwrap_or(0))
            .sum()
    }

    fn sum_outgoing(&self, id: NodeId) -> u64 {
        self.successors(id)
            .iter()
            .map(|s| self.find_edge(id, *s).unwrap_or(0))
            .sum()
    }

    /// Recomputes `status`/`complete` from scratch. Never returns an
    /// error: structural failure is a normal INVALID result, not a fault.
    pub fn check(&mut self) -> CfgStatus {
        self.complete = true;
        self.status = CfgStatus::Invalid;

        let entry = match self.entry {
            Some(e) => e,
            None => return self.status,
        };
        if self.exit.is_none() && self.halt.is_none() {
            return self.status;
        }

        for id in self.node_ids() {
            let node = self.node(id).clone();
            match node {
                Node::Entry => {
                    if !self.predecessors(id).is_empty() {
                        return self.status;
                    }
                    let succs = self.successors(id);
                    if succs.len() != 1 || self.node(succs[0]).addr() != self.addr {
                        return self.status;
                    }
                    if self.find_edge(id, succs[0]).unwrap_or(0) != self.execs {
                        return self.status;
                    }
                }
                Node::Block(data) => {
                    if self.predecessors(id).is_empty() || self.successors(id).is_empty() {
                        return self.status;
                    }
                    if data.indirect {
                        self.complete = false;
                    }
                    if self.sum_incoming(id) != self.sum_outgoing(id) {
                        return self.status;
                    }
                }
                Node::Phantom(_) => {
                    if self.predecessors(id).is_empty() || !self.successors(id).is_empty() {
                        return self.status;
                    }
                    if self.sum_incoming(id) != 0 {
                        return self.status;
                    }
                    self.complete = false;
                }
                Node::Exit | Node::Halt => {
                    if self.predecessors(id).is_empty() || !self.successors(id).is_empty() {
                        return self.status;
                    }
                }
            }
        }

        let exit_halt_in: u64 = [self.exit, self.halt]
            .into_iter()
            .flatten()
            .map(|n| self.sum_incoming(n))
            .sum();
        if exit_halt_in != self.execs {
            return self.status;
        }

        self.status = CfgStatus::Valid;
        self.status
    }
}

/// Per-loader table of entry-address -> CFG, created on demand.
#[derive(Debug, Default)]
pub struct CfgTable {
    cfgs: BTreeMap<Address, Cfg>,
}

impl CfgTable {
    pub fn new() -> Self {
        CfgTable::default()
    }

    /// Fetch-or-create the CFG at `addr`.
    pub fn instance(&mut self, addr: Address) -> &mut Cfg {
        self.cfgs.entry(addr).or_insert_with(|| {
            debug!(addr = %addr, "new CFG instantiated");
            Cfg::new(addr)
        })
    }

    pub fn get(&self, addr: Address) -> Option<&Cfg> {
        self.cfgs.get(&addr)
    }

    pub fn cfgs(&self) -> impl Iterator<Item = &Cfg> {
        self.cfgs.values()
    }

    pub fn check_all(&mut self) {
        for cfg in self.cfgs.values_mut() {
            cfg.check();
        }
    }

    /// Adds a Call from `block` in `caller_addr`'s CFG to `called_addr`,
    /// updating the callee's execution count and its Entry->first-block
    /// edge exactly as `CFGReader::addCall` does. Split into two owned
    /// borrows (callee instantiated first) since Rust cannot hold two
    /// `&mut Cfg` into the same map at once.
    pub fn add_call(
        &mut self,
        caller_addr: Address,
        block: NodeId,
        called_addr: Address,
        count: u64,
    ) {
        self.instance(called_addr);

        {
            let caller = self.instance(caller_addr);
            caller.add_call(block, called_addr, count);
        }

        let called = self.instance(called_addr);
        called.update_execs(count);
        if let (Some(entry), Some(first)) = (called.entry_id(), called.node_by_addr(called_addr))
        {
            called.add_edge(entry, first, count);
        }
    }

    /// Adds a signal-handler attachment, updating the handler CFG's
    /// execution count and re-wiring its Entry->first-block edge exactly
    /// as `add_call` does for a callee.
    pub fn add_signal_handler(
        &mut self,
        caller_addr: Address,
        block: NodeId,
        sigid: i32,
        handler_addr: Address,
        count: u64,
    ) {
        self.instance(handler_addr);

        {
            let caller = self.instance(caller_addr);
            caller.add_signal_handler(block, sigid, handler_addr, count);
        }

        let handler = self.instance(handler_addr);
        handler.update_execs(count);
        if let (Some(entry), Some(first)) =
            (handler.entry_id(), handler.node_by_addr(handler_addr))
        {
            handler.add_edge(entry, first, count);
        }
    }
}
