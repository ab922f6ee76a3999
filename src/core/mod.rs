//! Core CFG data types: addresses, instructions, nodes/edges, and the CFG
//! container itself.

pub mod address;
pub mod cfg;
pub mod instruction;
pub mod node;

pub use address::Address;
pub use cfg::{Cfg, CfgStatus, CfgTable};
pub use instruction::{Instruction, InstructionRegistry};
pub use node::{BlockData, Call, Node, NodeId, SignalHandler};
