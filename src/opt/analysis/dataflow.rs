//! Dataflow Framework
//!
//! A direction-parameterized worklist fixed-point solver, generic over the
//! lattice value an analysis computes per node, plus the three concrete
//! instances the tool ships: reaching definitions, live variables, and
//! constant propagation.
//!
//! Termination is the caller's contract: `merge`/`transfer` must be monotone
//! over a lattice without infinite ascending chains. The shipped instances
//! use finite power-sets over a bounded variable universe and a flat
//! constant lattice.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt::Write;

use crate::bril::{Instruction, Item, Literal};
use crate::opt::cfg::{Cfg, NodeId};

/// One dataflow analysis: a lattice value plus the functions the solver
/// needs to drive it to a fixed point.
pub trait Analysis {
    type Value: Clone + PartialEq;

    /// `true` to propagate along successor edges, `false` against them.
    fn forward(&self) -> bool;

    /// The value every node starts from.
    fn init(&self) -> Self::Value;

    /// The value flowing into a node with no influencers. For a forward
    /// analysis this is the function-entry boundary value.
    fn start(&self, _cfg: &Cfg) -> Self::Value {
        self.init()
    }

    /// Combines influencer values. Must be insensitive to their order.
    fn merge(&self, values: &[&Self::Value]) -> Self::Value;

    /// Pushes a value through one node's block.
    fn transfer(&self, cfg: &Cfg, node: NodeId, value: &Self::Value) -> Self::Value;
}

/// Per-node fixed-point values. `input` is the value at block entry and
/// `output` the value at block exit, regardless of analysis direction.
#[derive(Debug)]
pub struct DataflowResult<V> {
    values: HashMap<NodeId, (V, V)>,
}

impl<V> DataflowResult<V> {
    /// Returns the value at the node's block entry.
    #[must_use]
    pub fn input(&self, node: NodeId) -> &V {
        &self.values[&node].0
    }

    /// Returns the value at the node's block exit.
    #[must_use]
    pub fn output(&self, node: NodeId) -> &V {
        &self.values[&node].1
    }
}

/// Runs the analysis to a fixed point over the CFG's live nodes.
pub fn solve<A: Analysis>(analysis: &A, cfg: &Cfg) -> DataflowResult<A::Value> {
    let forward = analysis.forward();

    let mut inputs: HashMap<NodeId, A::Value> = cfg
        .order
        .iter()
        .map(|&id| (id, analysis.init()))
        .collect();
    let mut outputs = inputs.clone();

    let mut worklist: VecDeque<NodeId> = cfg.order.iter().copied().collect();
    let mut queued: HashSet<NodeId> = worklist.iter().copied().collect();

    while let Some(node) = worklist.pop_front() {
        queued.remove(&node);

        let influencers = if forward {
            &cfg.node(node).preds
        } else {
            &cfg.node(node).succs
        };
        let produced_by = if forward { &outputs } else { &inputs };
        let influences: Vec<&A::Value> = influencers
            .iter()
            .map(|id| &produced_by[id])
            .collect();
        let received = if influences.is_empty() {
            analysis.start(cfg)
        } else {
            analysis.merge(&influences)
        };
        let produced = analysis.transfer(cfg, node, &received);

        if forward {
            inputs.insert(node, received);
        } else {
            outputs.insert(node, received);
        }

        let slot = if forward {
            outputs.get_mut(&node)
        } else {
            inputs.get_mut(&node)
        };
        let slot = slot.unwrap_or_else(|| {
            panic!("malformed control-flow graph: node {node} is not live")
        });
        if *slot != produced {
            *slot = produced;

            let followers = if forward {
                &cfg.node(node).succs
            } else {
                &cfg.node(node).preds
            };
            for &follower in followers {
                if queued.insert(follower) {
                    worklist.push_back(follower);
                }
            }
        }
    }

    let values = cfg
        .order
        .iter()
        .map(|&id| {
            (
                id,
                (
                    inputs.remove(&id).unwrap_or_else(|| analysis.init()),
                    outputs.remove(&id).unwrap_or_else(|| analysis.init()),
                ),
            )
        })
        .collect();

    DataflowResult { values }
}

/// Handle identity of one write: the node, the item index inside its block,
/// and the destination it writes. Two textually identical instructions in
/// different positions are distinct definitions.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Def {
    pub node: NodeId,
    pub index: usize,
    pub dest: String,
}

pub type DefSet = BTreeSet<Def>;

/// Forward analysis: the set of writes whose effect may still be visible.
pub struct ReachingDefs;

impl ReachingDefs {
    /// Definitions reaching the item at `index` inside `node`: the block's
    /// in-set with earlier same-block writes applied.
    #[must_use]
    pub fn reaching_at(cfg: &Cfg, node: NodeId, index: usize, input: &DefSet) -> DefSet {
        let mut defs = input.clone();
        for (i, item) in cfg.node(node).block.iter().enumerate().take(index) {
            if let Item::Instr(instr) = item
                && let Some(dest) = instr.dest()
            {
                defs.retain(|def| def.dest != dest);
                defs.insert(Def {
                    node,
                    index: i,
                    dest: dest.to_string(),
                });
            }
        }
        defs
    }
}

impl Analysis for ReachingDefs {
    type Value = DefSet;

    fn forward(&self) -> bool {
        true
    }

    fn init(&self) -> Self::Value {
        DefSet::new()
    }

    fn merge(&self, values: &[&Self::Value]) -> Self::Value {
        values.iter().flat_map(|set| set.iter().cloned()).collect()
    }

    fn transfer(&self, cfg: &Cfg, node: NodeId, value: &Self::Value) -> Self::Value {
        Self::reaching_at(cfg, node, cfg.node(node).block.len(), value)
    }
}

pub type NameSet = BTreeSet<String>;

/// Backward analysis: the variables possibly read before being overwritten
/// along some future path.
pub struct LiveVariables;

impl Analysis for LiveVariables {
    type Value = NameSet;

    fn forward(&self) -> bool {
        false
    }

    fn init(&self) -> Self::Value {
        NameSet::new()
    }

    fn merge(&self, values: &[&Self::Value]) -> Self::Value {
        values.iter().flat_map(|set| set.iter().cloned()).collect()
    }

    fn transfer(&self, cfg: &Cfg, node: NodeId, value: &Self::Value) -> Self::Value {
        let mut live = value.clone();
        for item in cfg.node(node).block.iter().rev() {
            let Item::Instr(instr) = item else { continue };
            if let Some(dest) = instr.dest() {
                live.remove(dest);
            }
            for arg in instr.args() {
                live.insert(arg.clone());
            }
        }
        live
    }
}

/// What constant propagation knows about one variable.
#[derive(Debug, Clone, PartialEq)]
pub enum ConstVal {
    Known(Literal),
    Ambiguous,
}

pub type ConstMap = BTreeMap<String, ConstVal>;

/// Forward analysis: variables with one knowable constant value. A variable
/// absent from the map has not been assigned along any path yet.
pub struct ConstProp;

impl ConstProp {
    fn assign(map: &mut ConstMap, dest: &str, val: ConstVal) {
        let next = match (map.get(dest), &val) {
            // Re-assigning the same constant keeps it known; any
            // disagreement collapses to ambiguous.
            (Some(ConstVal::Known(old)), ConstVal::Known(new)) if old == new => val,
            (Some(_), _) => ConstVal::Ambiguous,
            (None, _) => val,
        };
        map.insert(dest.to_string(), next);
    }
}

impl Analysis for ConstProp {
    type Value = ConstMap;

    fn forward(&self) -> bool {
        true
    }

    fn init(&self) -> Self::Value {
        ConstMap::new()
    }

    /// Parameters have a value on entry, just not a knowable one.
    fn start(&self, cfg: &Cfg) -> Self::Value {
        cfg.args
            .iter()
            .map(|arg| (arg.name.clone(), ConstVal::Ambiguous))
            .collect()
    }

    fn merge(&self, values: &[&Self::Value]) -> Self::Value {
        let mut merged = ConstMap::new();
        for map in values {
            for (name, val) in map.iter() {
                match merged.get(name) {
                    None => {
                        merged.insert(name.clone(), val.clone());
                    }
                    Some(existing) if existing == val => {}
                    Some(_) => {
                        merged.insert(name.clone(), ConstVal::Ambiguous);
                    }
                }
            }
        }
        merged
    }

    fn transfer(&self, cfg: &Cfg, node: NodeId, value: &Self::Value) -> Self::Value {
        let mut map = value.clone();
        for item in &cfg.node(node).block {
            let Item::Instr(instr) = item else { continue };
            match instr {
                Instruction::Constant { dest, value, .. } => {
                    Self::assign(&mut map, dest, ConstVal::Known(value.clone()));
                }
                Instruction::Value { dest, .. } => {
                    Self::assign(&mut map, dest, ConstVal::Ambiguous);
                }
                Instruction::Effect { .. } => {}
            }
        }
        map
    }
}

/// Renders a definition set for analysis printing, e.g. `{x@head.2, y@body.0}`.
#[must_use]
pub fn format_defs(cfg: &Cfg, defs: &DefSet) -> String {
    let mut out = String::from("{");
    for (i, def) in defs.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        let _ = write!(out, "{}@{}.{}", def.dest, cfg.node(def.node).name, def.index);
    }
    out.push('}');
    out
}

/// Renders a variable-name set for analysis printing.
#[must_use]
pub fn format_names(names: &NameSet) -> String {
    let mut out = String::from("{");
    for (i, name) in names.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        out.push_str(name);
    }
    out.push('}');
    out
}

/// Renders a constant map for analysis printing, e.g. `{n: ?, one: 1}`.
#[must_use]
pub fn format_consts(map: &ConstMap) -> String {
    let mut out = String::from("{");
    for (i, (name, val)) in map.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        match val {
            ConstVal::Known(lit) => {
                let _ = write!(out, "{name}: {lit}");
            }
            ConstVal::Ambiguous => {
                let _ = write!(out, "{name}: ?");
            }
        }
    }
    out.push('}');
    out
}
