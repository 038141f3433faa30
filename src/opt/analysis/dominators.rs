//! Dominator Analysis
//!
//! Computes the dominator relation for a CFG with the naive iterative fixed
//! point, then derives the transposed dominated sets, immediate dominators,
//! the dominator tree, and dominance frontiers. Quadratic in the node count,
//! which is fine at the block counts this tool sees.

use std::collections::{HashMap, HashSet};

use crate::opt::cfg::{Cfg, NodeId};

/// The full dominance structure of one CFG.
#[derive(Debug)]
pub struct Dominators {
    /// `dom[n]` is the set of nodes dominating `n`, including `n` itself.
    dom: HashMap<NodeId, HashSet<NodeId>>,
    /// Transpose of `dom`: the set of nodes each node dominates.
    dominated: HashMap<NodeId, HashSet<NodeId>>,
    /// Immediate dominator of each node; the entry has none.
    idom: HashMap<NodeId, NodeId>,
    /// Dominator-tree children: nodes whose immediate dominator is the key.
    children: HashMap<NodeId, Vec<NodeId>>,
    /// Dominance frontier of each node.
    frontier: HashMap<NodeId, HashSet<NodeId>>,
}

impl Dominators {
    /// Runs the analysis over the CFG's live nodes.
    #[must_use]
    pub fn of(cfg: &Cfg) -> Self {
        let dom = dominator_sets(cfg);

        let mut dominated: HashMap<NodeId, HashSet<NodeId>> =
            cfg.order.iter().map(|&id| (id, HashSet::new())).collect();
        for (&node, doms) in &dom {
            for &d in doms {
                dominated
                    .get_mut(&d)
                    .unwrap_or_else(|| {
                        panic!("malformed control-flow graph: dominator {d} is not a live node")
                    })
                    .insert(node);
            }
        }

        let mut idom = HashMap::new();
        let mut children: HashMap<NodeId, Vec<NodeId>> =
            cfg.order.iter().map(|&id| (id, Vec::new())).collect();
        for &node in &cfg.order {
            let strict: Vec<NodeId> = dom[&node].iter().copied().filter(|&d| d != node).collect();
            // The immediate dominator is the deepest strict dominator: the
            // one that strictly dominates no other member of the set.
            let immediate = strict.iter().copied().find(|&d| {
                strict
                    .iter()
                    .all(|&other| other == d || !dominated[&d].contains(&other))
            });
            if let Some(parent) = immediate {
                idom.insert(node, parent);
                children.entry(parent).or_default().push(node);
            }
        }
        for list in children.values_mut() {
            list.sort_unstable();
        }

        let mut frontier: HashMap<NodeId, HashSet<NodeId>> =
            cfg.order.iter().map(|&id| (id, HashSet::new())).collect();
        for &node in &cfg.order {
            for &d in &dominated[&node] {
                for &succ in &cfg.node(d).succs {
                    // In the frontier when the successor escapes this node's
                    // strictly-dominated region. The node itself qualifies
                    // when it dominates one of its own predecessors.
                    if succ == node || !dominated[&node].contains(&succ) {
                        frontier
                            .get_mut(&node)
                            .unwrap_or_else(|| {
                                panic!("malformed control-flow graph: node {node} is not live")
                            })
                            .insert(succ);
                    }
                }
            }
        }

        Self {
            dom,
            dominated,
            idom,
            children,
            frontier,
        }
    }

    /// Returns the nodes dominating `node`, itself included.
    #[must_use]
    pub fn dominators(&self, node: NodeId) -> &HashSet<NodeId> {
        &self.dom[&node]
    }

    /// Returns the nodes `node` dominates, itself included.
    #[must_use]
    pub fn dominated(&self, node: NodeId) -> &HashSet<NodeId> {
        &self.dominated[&node]
    }

    /// Returns `true` if `a` dominates `b`.
    #[must_use]
    pub fn dominates(&self, a: NodeId, b: NodeId) -> bool {
        self.dominated[&a].contains(&b)
    }

    /// Returns `node`'s immediate dominator, or `None` for the entry.
    #[must_use]
    pub fn idom(&self, node: NodeId) -> Option<NodeId> {
        self.idom.get(&node).copied()
    }

    /// Returns `node`'s dominator-tree children.
    #[must_use]
    pub fn children(&self, node: NodeId) -> &[NodeId] {
        &self.children[&node]
    }

    /// Returns `node`'s dominance frontier.
    #[must_use]
    pub fn frontier(&self, node: NodeId) -> &HashSet<NodeId> {
        &self.frontier[&node]
    }
}

/// Iterative intersection fixed point: every node starts dominated by all
/// nodes, then `Dom(n) = {n} ∪ ⋂ Dom(p)` over predecessors until stable.
fn dominator_sets(cfg: &Cfg) -> HashMap<NodeId, HashSet<NodeId>> {
    let all: HashSet<NodeId> = cfg.order.iter().copied().collect();
    let mut dom: HashMap<NodeId, HashSet<NodeId>> = cfg
        .order
        .iter()
        .map(|&id| {
            if id == cfg.entry {
                (id, HashSet::from([id]))
            } else {
                (id, all.clone())
            }
        })
        .collect();

    let mut changed = true;
    while changed {
        changed = false;

        for &node in &cfg.order {
            if node == cfg.entry {
                continue;
            }

            let mut next: Option<HashSet<NodeId>> = None;
            for &pred in &cfg.node(node).preds {
                let pred_dom = &dom[&pred];
                next = Some(match next {
                    None => pred_dom.clone(),
                    Some(acc) => acc.intersection(pred_dom).copied().collect(),
                });
            }
            let mut next = next.unwrap_or_default();
            next.insert(node);

            if next != dom[&node] {
                dom.insert(node, next);
                changed = true;
            }
        }
    }

    dom
}
