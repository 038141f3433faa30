//! Loop Analysis
//!
//! Finds natural loops from back-edges and decides which instructions inside
//! a loop are invariant, feeding loop-invariant code motion.

use std::collections::{BTreeSet, HashSet, VecDeque};

use crate::bril::{Instruction, Item, Op};
use crate::opt::analysis::dataflow::{DataflowResult, DefSet, ReachingDefs};
use crate::opt::analysis::dominators::Dominators;
use crate::opt::cfg::{Cfg, NodeId};

/// A natural loop: the header and the set of nodes that reach the back-edge
/// source without leaving through the header.
#[derive(Debug, Clone)]
pub struct NaturalLoop {
    pub header: NodeId,
    pub nodes: HashSet<NodeId>,
}

impl NaturalLoop {
    /// Loop exits: successors of loop members that lie outside the loop.
    #[must_use]
    pub fn exits(&self, cfg: &Cfg) -> HashSet<NodeId> {
        let mut exits = HashSet::new();
        for &node in &self.nodes {
            for &succ in &cfg.node(node).succs {
                if !self.nodes.contains(&succ) {
                    exits.insert(succ);
                }
            }
        }
        exits
    }
}

/// Edges `a -> b` where `b` dominates `a`.
#[must_use]
pub fn back_edges(cfg: &Cfg, doms: &Dominators) -> Vec<(NodeId, NodeId)> {
    let mut edges = Vec::new();
    for &node in &cfg.order {
        for &succ in &cfg.node(node).succs {
            if doms.dominated(succ).contains(&node) {
                edges.push((node, succ));
            }
        }
    }
    edges
}

/// The natural loop of each back-edge: reverse reachability from the edge
/// source, never walking past the header.
#[must_use]
pub fn natural_loops(cfg: &Cfg, doms: &Dominators) -> Vec<NaturalLoop> {
    back_edges(cfg, doms)
        .into_iter()
        .map(|(tail, header)| {
            let mut nodes = HashSet::from([header, tail]);
            let mut queue = VecDeque::from([tail]);
            while let Some(node) = queue.pop_front() {
                if node == header {
                    continue;
                }
                for &pred in &cfg.node(node).preds {
                    if nodes.insert(pred) {
                        queue.push_back(pred);
                    }
                }
            }
            NaturalLoop { header, nodes }
        })
        .collect()
}

/// Positions of loop-invariant instructions, as `(node, item index)` pairs.
///
/// Fixed point over the loop body: a constant is always invariant; a pure
/// non-phi value operation becomes invariant once every reaching definition
/// of each argument is either outside the loop or itself already invariant.
#[must_use]
pub fn invariant_positions(
    cfg: &Cfg,
    natural: &NaturalLoop,
    reaching: &DataflowResult<DefSet>,
) -> BTreeSet<(NodeId, usize)> {
    let mut invariant: BTreeSet<(NodeId, usize)> = BTreeSet::new();

    let mut changed = true;
    while changed {
        changed = false;

        for &node in &natural.nodes {
            for (index, item) in cfg.node(node).block.iter().enumerate() {
                let Item::Instr(instr) = item else { continue };
                if invariant.contains(&(node, index)) {
                    continue;
                }

                let is_invariant = match instr {
                    Instruction::Constant { .. } => true,
                    Instruction::Value { op, .. } if instr.is_pure() && *op != Op::Phi => {
                        let at = ReachingDefs::reaching_at(cfg, node, index, reaching.input(node));
                        instr.args().iter().all(|arg| {
                            at.iter().filter(|def| &def.dest == arg).all(|def| {
                                !natural.nodes.contains(&def.node)
                                    || invariant.contains(&(def.node, def.index))
                            })
                        })
                    }
                    _ => false,
                };

                if is_invariant {
                    invariant.insert((node, index));
                    changed = true;
                }
            }
        }
    }

    invariant
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bril::json::parse_program;
    use crate::opt::analysis::dataflow::solve;
    use crate::opt::fresh::FreshLabels;

    fn cfg_of(input: &str) -> Cfg {
        let program = parse_program(input).unwrap();
        let mut labels = FreshLabels::of(&program);
        Cfg::of(&program.functions[0], &mut labels)
    }

    /// A loop whose body computes `x = a * b` from values defined before the
    /// loop, alongside a genuine induction update.
    const HOISTABLE: &str = r#"{
        "functions": [{
            "name": "main",
            "instrs": [
                { "op": "const", "dest": "a", "type": "int", "value": 6 },
                { "op": "const", "dest": "b", "type": "int", "value": 7 },
                { "op": "const", "dest": "i", "type": "int", "value": 0 },
                { "op": "const", "dest": "limit", "type": "int", "value": 10 },
                { "label": "head" },
                { "op": "lt", "dest": "cond", "type": "bool", "args": ["i", "limit"] },
                { "op": "br", "args": ["cond"], "labels": ["body", "done"] },
                { "label": "body" },
                { "op": "mul", "dest": "x", "type": "int", "args": ["a", "b"] },
                { "op": "const", "dest": "one", "type": "int", "value": 1 },
                { "op": "add", "dest": "i", "type": "int", "args": ["i", "one"] },
                { "op": "jmp", "labels": ["head"] },
                { "label": "done" },
                { "op": "print", "args": ["x"] },
                { "op": "ret" }
            ]
        }]
    }"#;

    #[test]
    fn back_edge_and_loop_body() {
        let cfg = cfg_of(HOISTABLE);
        let doms = Dominators::of(&cfg);

        let head = cfg.node_named("head").unwrap();
        let body = cfg.node_named("body").unwrap();
        let done = cfg.node_named("done").unwrap();

        assert_eq!(back_edges(&cfg, &doms), vec![(body, head)]);

        let loops = natural_loops(&cfg, &doms);
        assert_eq!(loops.len(), 1);
        assert_eq!(loops[0].header, head);
        assert_eq!(loops[0].nodes, HashSet::from([head, body]));
        assert_eq!(loops[0].exits(&cfg), HashSet::from([done]));
    }

    #[test]
    fn invariance_covers_constants_and_outside_operands() {
        let cfg = cfg_of(HOISTABLE);
        let doms = Dominators::of(&cfg);
        let reaching = solve(&ReachingDefs, &cfg);
        let natural = natural_loops(&cfg, &doms).remove(0);

        let body = cfg.node_named("body").unwrap();
        let invariant = invariant_positions(&cfg, &natural, &reaching);

        // `x = mul a b` (operands defined before the loop) and the constant
        // are invariant; the induction update and the branch condition are
        // not.
        assert!(invariant.contains(&(body, 1)));
        assert!(invariant.contains(&(body, 2)));
        assert!(!invariant.contains(&(body, 3)));
        let head = natural.header;
        assert!(!invariant.contains(&(head, 1)));
    }

    #[test]
    fn chained_invariance_reaches_a_fixed_point() {
        let cfg = cfg_of(
            r#"{
                "functions": [{
                    "name": "main",
                    "instrs": [
                        { "op": "const", "dest": "a", "type": "int", "value": 2 },
                        { "op": "const", "dest": "run", "type": "bool", "value": true },
                        { "label": "head" },
                        { "op": "br", "args": ["run"], "labels": ["body", "done"] },
                        { "label": "body" },
                        { "op": "mul", "dest": "b", "type": "int", "args": ["a", "a"] },
                        { "op": "mul", "dest": "c", "type": "int", "args": ["b", "a"] },
                        { "op": "jmp", "labels": ["head"] },
                        { "label": "done" },
                        { "op": "ret" }
                    ]
                }]
            }"#,
        );
        let doms = Dominators::of(&cfg);
        let reaching = solve(&ReachingDefs, &cfg);
        let natural = natural_loops(&cfg, &doms).remove(0);

        let body = cfg.node_named("body").unwrap();
        let invariant = invariant_positions(&cfg, &natural, &reaching);

        // `c` depends on the in-loop `b`, which is itself invariant.
        assert!(invariant.contains(&(body, 1)));
        assert!(invariant.contains(&(body, 2)));
    }
}
