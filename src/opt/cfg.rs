//! Control-Flow Graph
//!
//! Partitions a function's flat instruction list into basic blocks, wraps
//! them into graph nodes with symmetric predecessor/successor edge lists, and
//! flattens the graph back into a function. Nodes live in an arena indexed by
//! [`NodeId`] handles; `order` is the authoritative traversal list, which
//! lets pruning drop nodes without disturbing handle identity.
//!
//! A synthetic empty entry node precedes the real entry of every graph so
//! that any node, the original entry included, can host phi instructions.

use std::collections::{HashMap, VecDeque};

use crate::bril::{Argument, Function, Instruction, Item, Op, Program, Type};
use crate::opt::fresh::FreshLabels;

/// Stable arena handle for a CFG node.
pub type NodeId = usize;

/// One basic block wrapped in its graph context.
///
/// `preds` and `succs` are kept mutually consistent: `a` appears in
/// `b.preds` exactly when `b` appears in `a.succs`.
#[derive(Debug, Clone)]
pub struct Node {
    /// Unique node name, taken from the block's leading label or freshly
    /// generated.
    pub name: String,
    /// The block's items: at most one leading label, at most one trailing
    /// terminator.
    pub block: Vec<Item>,
    pub preds: Vec<NodeId>,
    pub succs: Vec<NodeId>,
}

impl Node {
    /// Returns the block's leading label, if it has one.
    #[must_use]
    pub fn leading_label(&self) -> Option<&str> {
        self.block.first().and_then(Item::as_label)
    }

    /// Returns the label a jump into this node must name: the leading label
    /// when present, otherwise the node name (which flattening emits as a
    /// label for label-less blocks).
    #[must_use]
    pub fn jump_target(&self) -> &str {
        self.leading_label().unwrap_or(&self.name)
    }

    /// Returns the block's last instruction, if any.
    #[must_use]
    pub fn last_instr(&self) -> Option<&Instruction> {
        self.block.iter().rev().find_map(Item::as_instr)
    }
}

/// A per-function control-flow graph.
#[derive(Debug, Clone)]
pub struct Cfg {
    pub name: String,
    pub args: Vec<Argument>,
    pub return_type: Option<Type>,
    /// The virtual entry node.
    pub entry: NodeId,
    /// Node arena. Handles stay valid for the graph's lifetime; nodes
    /// removed by pruning remain allocated but leave `order`.
    pub nodes: Vec<Node>,
    /// Live nodes in flattening order. Every traversal goes through this
    /// list, never the raw arena.
    pub order: Vec<NodeId>,
}

/// Partitions a flat instruction list into non-empty basic blocks: a new
/// block starts at every label, and the current block closes after every
/// terminator.
#[must_use]
pub fn partition(items: &[Item]) -> Vec<Vec<Item>> {
    let mut blocks = Vec::new();
    let mut current: Vec<Item> = Vec::new();

    for item in items {
        match item {
            Item::Label(_) => {
                if !current.is_empty() {
                    blocks.push(std::mem::take(&mut current));
                }
                current.push(item.clone());
            }
            Item::Instr(instr) => {
                current.push(item.clone());
                if instr.is_terminator() {
                    blocks.push(std::mem::take(&mut current));
                }
            }
        }
    }
    if !current.is_empty() {
        blocks.push(current);
    }

    blocks
}

impl Cfg {
    /// Builds the graph for one function, wiring edges from each block's
    /// last instruction.
    ///
    /// # Panics
    ///
    /// Panics if a jump or branch names a label with no matching block.
    #[must_use]
    pub fn of(func: &Function, labels: &mut FreshLabels) -> Self {
        let blocks = partition(&func.instrs);

        let mut nodes = Vec::with_capacity(blocks.len() + 1);
        let mut order = Vec::with_capacity(blocks.len() + 1);
        let mut label_to_node: HashMap<String, NodeId> = HashMap::new();

        // Virtual entry first, so phis can live in the real entry block.
        let entry: NodeId = 0;
        nodes.push(Node {
            name: labels.get(&func.name),
            block: Vec::new(),
            preds: Vec::new(),
            succs: Vec::new(),
        });
        order.push(entry);

        for block in blocks {
            let id = nodes.len();
            let name = match block.first().and_then(Item::as_label) {
                Some(label) => {
                    label_to_node.insert(label.to_string(), id);
                    labels.claim(label)
                }
                None => labels.get(&func.name),
            };

            nodes.push(Node {
                name,
                block,
                preds: Vec::new(),
                succs: Vec::new(),
            });
            order.push(id);
        }

        let mut cfg = Self {
            name: func.name.clone(),
            args: func.args.clone(),
            return_type: func.return_type.clone(),
            entry,
            nodes,
            order,
        };

        if let Some(&real_entry) = cfg.order.get(1) {
            cfg.add_edge(entry, real_entry);
        }

        for idx in 1..cfg.order.len() {
            let id = cfg.order[idx];
            let terminator = cfg.nodes[id]
                .last_instr()
                .filter(|instr| instr.is_terminator())
                .map(|instr| (instr.op(), instr.labels().to_vec()));

            match terminator {
                Some((Op::Ret, _)) => {}
                Some((_, targets)) => {
                    for label in targets {
                        let target = *label_to_node.get(&label).unwrap_or_else(|| {
                            panic!(
                                "malformed control-flow graph: jump target '{label}' has no block"
                            )
                        });
                        cfg.add_edge(id, target);
                    }
                }
                None => {
                    // Implicit fall-through to the textually next block.
                    if let Some(&next) = cfg.order.get(idx + 1) {
                        cfg.add_edge(id, next);
                    }
                }
            }
        }

        cfg
    }

    /// Adds the edge `from -> to`, keeping both sides' lists consistent.
    pub fn add_edge(&mut self, from: NodeId, to: NodeId) {
        self.nodes[from].succs.push(to);
        self.nodes[to].preds.push(from);
    }

    #[must_use]
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id]
    }

    /// Looks up a live node by name.
    #[must_use]
    pub fn node_named(&self, name: &str) -> Option<NodeId> {
        self.order.iter().copied().find(|&id| self.nodes[id].name == name)
    }

    /// Looks up a live node by the label a jump into it must name. Distinct
    /// from [`Cfg::node_named`] for labeled blocks whose name was freshened
    /// against a duplicate in another function.
    #[must_use]
    pub fn node_targeted(&self, label: &str) -> Option<NodeId> {
        self.order.iter().copied().find(|&id| self.nodes[id].jump_target() == label)
    }

    /// Flattens the graph back into a function, the inverse of [`Cfg::of`].
    ///
    /// Walks nodes in list order. A block without a leading label gets its
    /// node name emitted as one. A block without a terminator gets an
    /// explicit jump to its unique successor (omitted when that successor is
    /// the textually next node) or a return when it has no successors.
    ///
    /// # Panics
    ///
    /// Panics if an unterminated block has more than one successor.
    #[must_use]
    pub fn to_function(&self) -> Function {
        let mut instrs = Vec::new();

        for (idx, &id) in self.order.iter().enumerate() {
            let node = &self.nodes[id];

            if node.leading_label().is_none() {
                instrs.push(Item::Label(node.name.clone()));
            }
            instrs.extend(node.block.iter().cloned());

            if node.last_instr().is_some_and(Instruction::is_terminator) {
                continue;
            }
            match node.succs.as_slice() {
                [] => instrs.push(Item::Instr(Instruction::Effect {
                    op: Op::Ret,
                    args: vec![],
                    funcs: vec![],
                    labels: vec![],
                })),
                &[succ] => {
                    if self.order.get(idx + 1) == Some(&succ) {
                        continue;
                    }
                    instrs.push(Item::Instr(Instruction::Effect {
                        op: Op::Jmp,
                        args: vec![],
                        funcs: vec![],
                        labels: vec![self.nodes[succ].jump_target().to_string()],
                    }));
                }
                succs => panic!(
                    "malformed control-flow graph: node '{}' has no terminator but {} successors",
                    node.name,
                    succs.len()
                ),
            }
        }

        Function {
            name: self.name.clone(),
            args: self.args.clone(),
            return_type: self.return_type.clone(),
            instrs,
        }
    }

    /// Drops nodes unreachable from the entry and strips their dangling
    /// predecessor references from the surviving nodes.
    pub fn prune(&mut self) {
        let mut reachable = vec![false; self.nodes.len()];
        let mut queue = VecDeque::from([self.entry]);
        reachable[self.entry] = true;

        while let Some(id) = queue.pop_front() {
            for &succ in &self.nodes[id].succs {
                if !reachable[succ] {
                    reachable[succ] = true;
                    queue.push_back(succ);
                }
            }
        }

        self.order.retain(|&id| reachable[id]);
        for &id in &self.order.clone() {
            self.nodes[id].preds.retain(|&pred| reachable[pred]);
        }
    }
}

/// The per-function graphs of a whole program.
#[derive(Debug, Clone)]
pub struct CfgProgram {
    pub graphs: Vec<Cfg>,
}

impl CfgProgram {
    /// Builds one graph per function, sharing a single label generator so
    /// node names are unique across the whole program.
    #[must_use]
    pub fn of(program: &Program, labels: &mut FreshLabels) -> Self {
        let graphs = program
            .functions
            .iter()
            .map(|func| Cfg::of(func, labels))
            .collect();

        Self { graphs }
    }

    /// Flattens every graph back into its function.
    #[must_use]
    pub fn to_program(&self) -> Program {
        Program {
            functions: self.graphs.iter().map(Cfg::to_function).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::bril::json::parse_program;

    fn cfg_of(input: &str) -> Cfg {
        let program = parse_program(input).unwrap();
        let mut labels = FreshLabels::of(&program);
        Cfg::of(&program.functions[0], &mut labels)
    }

    const DIAMOND: &str = r#"{
        "functions": [{
            "name": "main",
            "instrs": [
                { "op": "const", "dest": "cond", "type": "bool", "value": true },
                { "op": "br", "args": ["cond"], "labels": ["left", "right"] },
                { "label": "left" },
                { "op": "const", "dest": "x", "type": "int", "value": 1 },
                { "op": "jmp", "labels": ["join"] },
                { "label": "right" },
                { "op": "const", "dest": "x", "type": "int", "value": 2 },
                { "label": "join" },
                { "op": "print", "args": ["x"] }
            ]
        }]
    }"#;

    #[test]
    fn partition_splits_at_labels_and_terminators() {
        let program = parse_program(DIAMOND).unwrap();
        let blocks = partition(&program.functions[0].instrs);

        assert_eq!(blocks.len(), 4);
        assert_eq!(blocks[0].len(), 2);
        assert_eq!(blocks[1][0], Item::Label("left".into()));
        assert_eq!(blocks[2][0], Item::Label("right".into()));
        // The trailing unterminated block is kept as-is.
        assert_eq!(blocks[3].len(), 2);
    }

    #[test]
    fn partition_of_empty_list_is_empty() {
        assert!(partition(&[]).is_empty());
    }

    #[test]
    fn builder_wires_diamond_edges() {
        let cfg = cfg_of(DIAMOND);
        assert_eq!(cfg.order.len(), 5);

        let virt = cfg.entry;
        let head = cfg.order[1];
        let left = cfg.node_named("left").unwrap();
        let right = cfg.node_named("right").unwrap();
        let join = cfg.node_named("join").unwrap();

        assert!(cfg.node(virt).block.is_empty());
        assert_eq!(cfg.node(virt).preds, Vec::<NodeId>::new());
        assert_eq!(cfg.node(virt).succs, vec![head]);
        assert_eq!(cfg.node(head).succs, vec![left, right]);
        assert_eq!(cfg.node(left).succs, vec![join]);
        assert_eq!(cfg.node(right).succs, vec![join]);
        assert_eq!(cfg.node(join).succs, Vec::<NodeId>::new());
        assert_eq!(cfg.node(join).preds, vec![left, right]);
    }

    #[test]
    fn edges_are_mutually_consistent() {
        let cfg = cfg_of(DIAMOND);
        for &id in &cfg.order {
            for &succ in &cfg.node(id).succs {
                assert!(cfg.node(succ).preds.contains(&id));
            }
            for &pred in &cfg.node(id).preds {
                assert!(cfg.node(pred).succs.contains(&id));
            }
        }
    }

    #[test]
    fn return_ends_the_block_with_no_successors() {
        let cfg = cfg_of(
            r#"{
                "functions": [{
                    "name": "f",
                    "instrs": [
                        { "op": "ret" },
                        { "label": "after" },
                        { "op": "nop" }
                    ]
                }]
            }"#,
        );

        let first = cfg.order[1];
        assert!(cfg.node(first).succs.is_empty());
        let after = cfg.node_named("after").unwrap();
        assert!(cfg.node(after).preds.is_empty());
    }

    #[test]
    #[should_panic(expected = "malformed control-flow graph")]
    fn missing_jump_target_panics() {
        let _ = cfg_of(
            r#"{
                "functions": [{
                    "name": "f",
                    "instrs": [{ "op": "jmp", "labels": ["nowhere"] }]
                }]
            }"#,
        );
    }

    #[test]
    fn flattening_preserves_program_meaning() {
        let program = parse_program(DIAMOND).unwrap();
        let mut labels = FreshLabels::of(&program);
        let cfg = Cfg::of(&program.functions[0], &mut labels);
        let flat = cfg.to_function();

        // Every original instruction survives in order; fall-through
        // successors need no synthesized jump, and the unterminated final
        // block gets an explicit return.
        let original: Vec<_> = program.functions[0]
            .instrs
            .iter()
            .filter_map(Item::as_instr)
            .collect();
        let flattened: Vec<_> = flat.instrs.iter().filter_map(Item::as_instr).collect();
        assert_eq!(flattened[..original.len()], original[..]);
        assert_eq!(flattened.len(), original.len() + 1);
        assert_eq!(flattened.last().map(|instr| instr.op()), Some(Op::Ret));

        // Rebuilding from the flattened function yields the same structure.
        let mut relabels = FreshLabels::default();
        let rebuilt = Cfg::of(&flat, &mut relabels);
        assert_eq!(rebuilt.order.len(), cfg.order.len() + 1);
    }

    #[test]
    fn flattening_synthesizes_jump_when_fallthrough_moves() {
        let mut cfg = cfg_of(DIAMOND);

        // Swap the two branch arms in list order; "left" no longer falls
        // through to "join" textually, so a jump must appear for "right".
        let left_pos = cfg.order.iter().position(|&id| cfg.node(id).name == "left").unwrap();
        let right_pos = cfg.order.iter().position(|&id| cfg.node(id).name == "right").unwrap();
        cfg.order.swap(left_pos, right_pos);

        let flat = cfg.to_function();
        let jumps: Vec<_> = flat
            .instrs
            .iter()
            .filter_map(Item::as_instr)
            .filter(|instr| instr.op() == Op::Jmp)
            .collect();
        assert_eq!(jumps.len(), 2);
        assert!(jumps.iter().all(|jmp| jmp.labels() == ["join"]));
    }

    #[test]
    fn prune_drops_unreachable_nodes() {
        let mut cfg = cfg_of(
            r#"{
                "functions": [{
                    "name": "f",
                    "instrs": [
                        { "op": "jmp", "labels": ["end"] },
                        { "label": "orphan" },
                        { "op": "const", "dest": "x", "type": "int", "value": 1 },
                        { "label": "end" },
                        { "op": "ret" }
                    ]
                }]
            }"#,
        );

        let end = cfg.node_named("end").unwrap();
        assert_eq!(cfg.node(end).preds.len(), 2);

        cfg.prune();
        assert!(cfg.node_named("orphan").is_none());
        assert_eq!(cfg.node(end).preds.len(), 1);
        for &id in &cfg.order {
            for &pred in &cfg.node(id).preds {
                assert!(cfg.order.contains(&pred));
            }
        }
    }

    #[test]
    fn duplicate_labels_across_functions_get_unique_node_names() {
        let program = parse_program(
            r#"{
                "functions": [
                    { "name": "f", "instrs": [{ "label": "loop" }, { "op": "ret" }] },
                    { "name": "g", "instrs": [{ "label": "loop" }, { "op": "ret" }] }
                ]
            }"#,
        )
        .unwrap();

        let mut labels = FreshLabels::of(&program);
        let graphs = CfgProgram::of(&program, &mut labels);

        let f_loop = &graphs.graphs[0].nodes[1].name;
        let g_loop = &graphs.graphs[1].nodes[1].name;
        assert_eq!(f_loop, "loop");
        assert_ne!(f_loop, g_loop);
    }
}
