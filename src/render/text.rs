//! Canonical line-oriented text dump, grounded on `CFG::str()`: one `[cfg
//! ...]` header line followed by one `[node ...]` line per Block. Phantom,
//! Entry, Exit and Halt nodes never get their own line; they only ever
//! appear as successor names.

use std::fmt::Write as _;

use crate::core::{Cfg, Node, NodeId};

fn node_label(cfg: &Cfg, id: NodeId) -> String {
    match cfg.node(id) {
        Node::Entry => "entry".to_string(),
        Node::Exit => "exit".to_string(),
        Node::Halt => "halt".to_string(),
        Node::Block(data) => data.addr.to_string(),
        Node::Phantom(addr) => addr.to_string(),
    }
}

/// Renders a single CFG as its canonical text dump.
pub fn render_text(cfg: &Cfg) -> String {
    let mut out = String::new();

    write!(out, "[cfg {}", cfg.addr()).unwrap();
    if cfg.execs() > 0 {
        write!(out, ":{}", cfg.execs()).unwrap();
    }
    writeln!(out, " \"{}\" {}]", cfg.function_name(), cfg.complete()).unwrap();

    for id in cfg.node_ids() {
        let data = match cfg.node(id) {
            Node::Block(data) => data,
            _ => continue,
        };

        write!(out, "[node {} {} {} [", cfg.addr(), node_label(cfg, id), data.size).unwrap();
        for (i, instr) in data.instructions.iter().enumerate() {
            if i > 0 {
                write!(out, " ").unwrap();
            }
            write!(out, "{}", instr.size).unwrap();
        }
        write!(out, "] [").unwrap();
        for (i, call) in data.calls.values().enumerate() {
            if i > 0 {
                write!(out, " ").unwrap();
            }
            write!(out, "{}", call.called).unwrap();
            if call.count > 0 {
                write!(out, ":{}", call.count).unwrap();
            }
        }
        write!(out, "] [").unwrap();
        for (i, handler) in data.signal_handlers.values().enumerate() {
            if i > 0 {
                write!(out, " ").unwrap();
            }
            write!(out, "{}:{}", handler.sigid, handler.handler).unwrap();
            if handler.count > 0 {
                write!(out, ":{}", handler.count).unwrap();
            }
        }
        write!(out, "] {} [", data.indirect).unwrap();
        for (i, succ) in cfg.successors(id).iter().enumerate() {
            if i > 0 {
                write!(out, " ").unwrap();
            }
            write!(out, "{}", node_label(cfg, *succ)).unwrap();
            let count = cfg.find_edge(id, *succ).unwrap_or(0);
            if count > 0 {
                write!(out, ":{}", count).unwrap();
            }
        }
        writeln!(out, "]]").unwrap();
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Address, CfgTable, InstructionRegistry};
    use crate::readers::cfggrind::CfgGrindReader;

    #[test]
    fn test_render_text_matches_s2_scenario() {
        // Literal S2 input from spec.md §8 (no signals group); the
        // renderer always emits the signals group, populated or not.
        let input = r#"
            [cfg 0x100:5 "g" true]
            [node 0x100 0x100 4 [4] [] false [exit:5]]
        "#;
        let reader = CfgGrindReader::new(input).unwrap();
        let mut table = CfgTable::new();
        let mut instructions = InstructionRegistry::new();
        reader.load_cfgs(&mut table, &mut instructions).unwrap();

        let cfg = table.get(Address(0x100)).unwrap();
        let text = render_text(cfg);

        assert!(text.starts_with("[cfg 0x100:5 \"g\" true]\n"));
        assert!(text.contains("[node 0x100 0x100 4 [4] [] [] false [exit:5]]"));
    }
}
