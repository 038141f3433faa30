//! Loop-Invariant Code Motion
//!
//! Runs over SSA form: convert, hoist one loop at a time into a synthesized
//! pre-header, convert back. Analyses are re-derived after each loop because
//! inserting a pre-header changes dominance and reaching definitions.
//!
//! An invariant instruction is hoisted only when its node dominates every
//! loop exit; anything weaker could execute it on a path the original
//! program never took.

use std::collections::{HashMap, HashSet};

use crate::bril::{Instruction, Item, Op};
use crate::opt::analysis::dataflow::{DataflowResult, DefSet, ReachingDefs, solve};
use crate::opt::analysis::dominators::Dominators;
use crate::opt::analysis::loops::{NaturalLoop, invariant_positions, natural_loops};
use crate::opt::cfg::{Cfg, Node, NodeId};
use crate::opt::fresh::{FreshLabels, FreshNames};
use crate::opt::passes::ssa::{from_ssa, to_ssa};

/// Hoists loop-invariant instructions out of every natural loop.
pub fn licm(cfg: &mut Cfg, labels: &mut FreshLabels, names: &mut FreshNames) {
    to_ssa(cfg, names);

    let mut processed: HashSet<NodeId> = HashSet::new();
    loop {
        let doms = Dominators::of(cfg);
        let reaching = solve(&ReachingDefs, cfg);

        // Loops sharing a header (multiple back-edges) are one loop: union
        // their bodies.
        let mut by_header: HashMap<NodeId, NaturalLoop> = HashMap::new();
        for natural in natural_loops(cfg, &doms) {
            by_header
                .entry(natural.header)
                .and_modify(|merged| merged.nodes.extend(natural.nodes.iter().copied()))
                .or_insert(natural);
        }

        let Some(header) = by_header
            .keys()
            .copied()
            .filter(|header| !processed.contains(header))
            .min()
        else {
            break;
        };
        processed.insert(header);

        hoist(cfg, &by_header[&header], &doms, &reaching, labels, names);
    }

    from_ssa(cfg);
}

fn hoist(
    cfg: &mut Cfg,
    natural: &NaturalLoop,
    doms: &Dominators,
    reaching: &DataflowResult<DefSet>,
    labels: &mut FreshLabels,
    names: &mut FreshNames,
) {
    let exits = natural.exits(cfg);
    let mut movable: Vec<(NodeId, usize)> = invariant_positions(cfg, natural, reaching)
        .into_iter()
        .filter(|&(node, _)| exits.iter().all(|&exit| doms.dominates(node, exit)))
        .collect();
    if movable.is_empty() {
        return;
    }
    // Definition-before-use order: in SSA a definition dominates its uses,
    // and a strict dominator always has the smaller dominator set.
    movable.sort_by_key(|&(node, index)| (doms.dominators(node).len(), node, index));

    let header = natural.header;
    let header_target = cfg.node(header).jump_target().to_string();
    let pre_name = labels.get(&format!("{}_pre", cfg.node(header).name));

    let mut hoisted: Vec<Item> = movable
        .iter()
        .map(|&(node, index)| cfg.node(node).block[index].clone())
        .collect();
    hoisted.push(Item::Instr(Instruction::Effect {
        op: Op::Jmp,
        args: vec![],
        funcs: vec![],
        labels: vec![header_target.clone()],
    }));

    // Remove hoisted instructions from their loop blocks, highest index
    // first so earlier positions stay valid.
    let mut by_node: HashMap<NodeId, Vec<usize>> = HashMap::new();
    for &(node, index) in &movable {
        by_node.entry(node).or_default().push(index);
    }
    for (node, mut indices) in by_node {
        indices.sort_unstable_by(|a, b| b.cmp(a));
        for index in indices {
            cfg.nodes[node].block.remove(index);
        }
    }

    let pre = cfg.nodes.len();
    cfg.nodes.push(Node {
        name: pre_name.clone(),
        block: hoisted,
        preds: Vec::new(),
        succs: Vec::new(),
    });

    // Every edge into the header from outside the loop now enters the
    // pre-header instead, including the label its terminator names.
    for p in cfg.node(header).preds.clone() {
        if natural.nodes.contains(&p) {
            continue;
        }
        for succ in &mut cfg.nodes[p].succs {
            if *succ == header {
                *succ = pre;
            }
        }
        if let Some(Item::Instr(instr)) = cfg.nodes[p].block.last_mut()
            && instr.is_terminator()
        {
            match instr {
                Instruction::Value { labels, .. } | Instruction::Effect { labels, .. } => {
                    for label in labels {
                        if *label == header_target {
                            *label = pre_name.clone();
                        }
                    }
                }
                Instruction::Constant { .. } => {}
            }
        }
        cfg.nodes[pre].preds.push(p);
    }
    let nodes = &natural.nodes;
    cfg.nodes[header].preds.retain(|p| nodes.contains(p));
    cfg.add_edge(pre, header);

    split_header_phis(cfg, natural, pre, &pre_name, names);

    let at = cfg
        .order
        .iter()
        .position(|&id| id == header)
        .unwrap_or_else(|| panic!("malformed control-flow graph: loop header is not live"));
    cfg.order.insert(at, pre);

    if cfg.entry == header {
        cfg.entry = pre;
    }
}

/// For every header phi with incoming values from outside the loop, moves
/// those pairs into a fresh phi in the pre-header and wires the original phi
/// to read it along the pre-header edge.
fn split_header_phis(
    cfg: &mut Cfg,
    natural: &NaturalLoop,
    pre: NodeId,
    pre_name: &str,
    names: &mut FreshNames,
) {
    let header = natural.header;

    let mut outside: HashMap<String, bool> = HashMap::new();
    let in_loop = |cfg: &Cfg, label: &str, cache: &mut HashMap<String, bool>| {
        if let Some(&known) = cache.get(label) {
            return known;
        }
        let node = cfg.node_targeted(label).unwrap_or_else(|| {
            panic!("malformed control-flow graph: phi references unknown label '{label}'")
        });
        let inside = natural.nodes.contains(&node);
        cache.insert(label.to_string(), inside);
        inside
    };

    let mut new_phis: Vec<Instruction> = Vec::new();
    let header_block = std::mem::take(&mut cfg.nodes[header].block);
    let header_block = header_block
        .into_iter()
        .map(|item| {
            let Item::Instr(Instruction::Value {
                op: Op::Phi,
                dest,
                ty,
                args,
                funcs,
                labels,
            }) = item
            else {
                return item;
            };

            let (inside, moved): (Vec<(String, String)>, Vec<(String, String)>) = args
                .into_iter()
                .zip(labels)
                .partition(|(_, label)| in_loop(cfg, label, &mut outside));
            let (mut args, mut labels): (Vec<String>, Vec<String>) = inside.into_iter().unzip();

            if !moved.is_empty() {
                let split_dest = names.get(&dest);
                let (split_args, split_labels) = moved.into_iter().unzip();
                new_phis.push(Instruction::Value {
                    op: Op::Phi,
                    dest: split_dest.clone(),
                    ty: ty.clone(),
                    args: split_args,
                    funcs: vec![],
                    labels: split_labels,
                });
                args.push(split_dest);
                labels.push(pre_name.to_string());
            }

            Item::Instr(Instruction::Value {
                op: Op::Phi,
                dest,
                ty,
                args,
                funcs,
                labels,
            })
        })
        .collect();
    cfg.nodes[header].block = header_block;

    for phi in new_phis.into_iter().rev() {
        cfg.nodes[pre].block.insert(0, Item::Instr(phi));
    }
}
