//! Graph-description (`.dot`) dump, grounded on `CFG::toDOT()`: Blocks
//! render as record-shaped labels carrying address, size, instruction and
//! call/signal lists; indirect blocks get a dashed edge to an auxiliary `?`
//! target; Phantoms render dashed; Entry/Exit/Halt get fixed sentinel
//! shapes.

use std::fmt::Write as _;

use crate::core::{Cfg, Node, NodeId};

fn dot_id(id: NodeId) -> String {
    format!("n{}", id.0)
}

fn escape(label: &str) -> String {
    label.replace('\\', "\\\\").replace('"', "\\\"")
}

fn dot_label(cfg: &Cfg, id: NodeId) -> String {
    match cfg.node(id) {
        Node::Entry => "entry".to_string(),
        Node::Exit => "exit".to_string(),
        Node::Halt => "halt".to_string(),
        Node::Phantom(addr) => addr.to_string(),
        Node::Block(data) => {
            let mut label = format!("{{{}|size {}", data.addr, data.size);
            if !data.instructions.is_empty() {
                let instrs: Vec<String> = data.instructions.iter().map(|i| i.to_string()).collect();
                write!(label, "|{}", instrs.join("\\l")).unwrap();
            }
            if !data.calls.is_empty() {
                let calls: Vec<String> = data
                    .calls
                    .values()
                    .map(|c| format!("{}:{}", c.called, c.count))
                    .collect();
                write!(label, "|calls: {}", calls.join(", ")).unwrap();
            }
            if !data.signal_handlers.is_empty() {
                let handlers: Vec<String> = data
                    .signal_handlers
                    .values()
                    .map(|h| format!("sig{}:{}:{}", h.sigid, h.handler, h.count))
                    .collect();
                write!(label, "|signals: {}", handlers.join(", ")).unwrap();
            }
            label.push('}');
            label
        }
    }
}

fn shape_for(node: &Node) -> &'static str {
    match node {
        Node::Entry => "ellipse",
        Node::Exit => "ellipse",
        Node::Halt => "doubleoctagon",
        Node::Phantom(_) => "box",
        Node::Block(_) => "record",
    }
}

/// Renders a single CFG's graph description, suitable for `cfg-0xADDR.dot`.
pub fn render_dot(cfg: &Cfg) -> String {
    let mut out = String::new();
    writeln!(out, "digraph \"{}\" {{", cfg.addr()).unwrap();
    writeln!(out, "  node [fontname=\"monospace\"];").unwrap();

    for id in cfg.node_ids() {
        let node = cfg.node(id);
        let shape = shape_for(node);
        let dashed = if node.is_phantom() { ", style=dashed" } else { "" };
        writeln!(
            out,
            "  {} [shape={}, label=\"{}\"{}];",
            dot_id(id),
            shape,
            escape(&dot_label(cfg, id)),
            dashed
        )
        .unwrap();

        if let Node::Block(data) = node {
            if data.indirect {
                let aux = format!("{}_indirect", dot_id(id));
                writeln!(out, "  {} [shape=point, label=\"?\"];", aux).unwrap();
                writeln!(out, "  {} -> {} [style=dashed];", dot_id(id), aux).unwrap();
            }
        }
    }

    for id in cfg.node_ids() {
        for succ in cfg.successors(id) {
            let count = cfg.find_edge(id, *succ).unwrap_or(0);
            if count > 0 {
                writeln!(out, "  {} -> {} [label=\"{}\"];", dot_id(id), dot_id(*succ), count).unwrap();
            } else {
                writeln!(out, "  {} -> {};", dot_id(id), dot_id(*succ)).unwrap();
            }
        }
    }

    writeln!(out, "}}").unwrap();
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Address, Cfg};

    #[test]
    fn test_dot_output_contains_digraph_header_and_edges() {
        let mut cfg = Cfg::new(Address(0x400));
        let entry = cfg.entry_node();
        let block = cfg.add_block(Address(0x400), 8, false);
        let exit = cfg.exit_node();
        cfg.add_edge(entry, block, 0);
        cfg.add_edge(block, exit, 0);
        cfg.check();

        let dot = render_dot(&cfg);
        assert!(dot.starts_with("digraph \"0x400\" {\n"));
        assert!(dot.contains("shape=record"));
        assert!(dot.contains("->"));
        assert!(dot.ends_with("}\n"));
    }

    #[test]
    fn test_dot_marks_indirect_block_with_auxiliary_target() {
        let mut cfg = Cfg::new(Address(0x400));
        let entry = cfg.entry_node();
        let block = cfg.add_block(Address(0x400), 8, false);
        let exit = cfg.exit_node();
        cfg.add_edge(entry, block, 0);
        cfg.add_edge(block, exit, 0);
        cfg.mark_indirect(block);

        let dot = render_dot(&cfg);
        assert!(dot.contains("label=\"?\""));
        assert!(dot.contains("_indirect"));
    }
}
