//! Graph Description Output
//!
//! Renders a CFG or its dominator tree in the `dot` directed-graph format,
//! one graph per function, for offline visualization.

use std::fmt::Write;

use crate::opt::analysis::dominators::Dominators;
use crate::opt::cfg::Cfg;

/// Builds up one `digraph` description.
struct DotWriter {
    buf: String,
}

impl DotWriter {
    fn new(name: &str) -> Self {
        let mut buf = String::new();
        let _ = writeln!(buf, "digraph \"{}\" {{", escape(name));
        buf.push_str("  rankdir=TD;\n  ordering=out;\n");
        Self { buf }
    }

    fn node(&mut self, name: &str, label: &str) {
        let _ = writeln!(
            self.buf,
            "  \"{}\" [shape = box, label = \"{}\"];",
            escape(name),
            label
        );
    }

    fn edge(&mut self, from: &str, to: &str) {
        let _ = writeln!(self.buf, "  \"{}\" -> \"{}\";", escape(from), escape(to));
    }

    fn finish(mut self) -> String {
        self.buf.push_str("}\n");
        self.buf
    }
}

fn escape(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Renders the CFG with each node's block contents, plus a `START` marker
/// pointing at the entry.
#[must_use]
pub fn cfg_graph(cfg: &Cfg) -> String {
    let mut writer = DotWriter::new(&cfg.name);

    for &id in &cfg.order {
        let node = cfg.node(id);
        let mut label = format!("{}\\l", escape(&node.name));
        for item in &node.block {
            let _ = write!(label, "  {}\\l", escape(&item.to_string()));
        }
        writer.node(&node.name, &label);
    }

    let _ = writeln!(writer.buf, "  START [shape = none];");
    writer.edge("START", &cfg.node(cfg.entry).name);
    for &id in &cfg.order {
        for &succ in &cfg.node(id).succs {
            writer.edge(&cfg.node(id).name, &cfg.node(succ).name);
        }
    }

    writer.finish()
}

/// Renders the dominator tree: one edge per immediate-dominator relation.
#[must_use]
pub fn dominator_tree_graph(cfg: &Cfg, doms: &Dominators) -> String {
    let mut writer = DotWriter::new(&cfg.name);

    for &id in &cfg.order {
        writer.node(&cfg.node(id).name, &escape(&cfg.node(id).name));
    }
    for &id in &cfg.order {
        for &child in doms.children(id) {
            writer.edge(&cfg.node(id).name, &cfg.node(child).name);
        }
    }

    writer.finish()
}
