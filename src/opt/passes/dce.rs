//! Dead Code Elimination
//!
//! Two strengths. [`dce`] is the trivial form: drop pure writes whose
//! destination is never read anywhere in the function, plus same-block
//! writes clobbered before any read, iterated to a fixed point. [`dce_live`]
//! uses the live-variables analysis and also removes writes that are only
//! read on paths the values never reach.

use std::collections::HashSet;

use crate::bril::Item;
use crate::opt::analysis::dataflow::{LiveVariables, solve};
use crate::opt::cfg::Cfg;

/// Trivial dead code elimination over one CFG. Also drops blocks that are
/// unreachable from the entry, since their reads would otherwise keep dead
/// writes alive.
pub fn dce(cfg: &mut Cfg) {
    cfg.prune();

    loop {
        let mut changed = drop_unread_writes(cfg);
        changed |= drop_clobbered_writes(cfg);
        if !changed {
            break;
        }
    }
}

/// Deletes pure writes whose destination no instruction in the function
/// reads.
fn drop_unread_writes(cfg: &mut Cfg) -> bool {
    let mut read: HashSet<String> = HashSet::new();
    for &id in &cfg.order {
        for item in &cfg.node(id).block {
            if let Item::Instr(instr) = item {
                read.extend(instr.args().iter().cloned());
            }
        }
    }

    let mut changed = false;
    for &id in &cfg.order.clone() {
        let before = cfg.node(id).block.len();
        cfg.nodes[id].block.retain(|item| match item.as_instr() {
            Some(instr) => match instr.dest() {
                Some(dest) => !instr.is_pure() || read.contains(dest),
                None => true,
            },
            None => true,
        });
        changed |= cfg.node(id).block.len() != before;
    }
    changed
}

/// Deletes pure writes overwritten later in the same block with no read in
/// between.
fn drop_clobbered_writes(cfg: &mut Cfg) -> bool {
    let mut changed = false;

    for &id in &cfg.order.clone() {
        let block = std::mem::take(&mut cfg.nodes[id].block);
        let mut kept: Vec<Item> = Vec::with_capacity(block.len());
        // Destinations written below the current item without an
        // intervening read.
        let mut clobbered: HashSet<String> = HashSet::new();

        for item in block.into_iter().rev() {
            if let Item::Instr(instr) = &item {
                if let Some(dest) = instr.dest()
                    && instr.is_pure()
                    && clobbered.contains(dest)
                {
                    changed = true;
                    continue;
                }
                if let Some(dest) = instr.dest() {
                    clobbered.insert(dest.to_string());
                }
                for arg in instr.args() {
                    clobbered.remove(arg);
                }
            }
            kept.push(item);
        }

        kept.reverse();
        cfg.nodes[id].block = kept;
    }

    changed
}

/// Live-variables-based dead code elimination: a pure write whose
/// destination is not live immediately after it is deleted.
pub fn dce_live(cfg: &mut Cfg) {
    let result = solve(&LiveVariables, cfg);

    for &id in &cfg.order.clone() {
        let mut live = result.output(id).clone();
        let block = std::mem::take(&mut cfg.nodes[id].block);
        let mut kept: Vec<Item> = Vec::with_capacity(block.len());

        for item in block.into_iter().rev() {
            if let Item::Instr(instr) = &item {
                match instr.dest() {
                    Some(dest) if instr.is_pure() && !live.contains(dest) => {
                        continue;
                    }
                    Some(dest) => {
                        live.remove(dest);
                    }
                    None => {}
                }
                live.extend(instr.args().iter().cloned());
            }
            kept.push(item);
        }

        kept.reverse();
        cfg.nodes[id].block = kept;
    }
}
