//! Local Value Numbering
//!
//! Numbers the values computed inside each basic block, canonicalizing
//! commutative argument order, so repeated computations collapse into copies
//! of the first. Impure operations and phis never enter the table; a
//! destination that is overwritten later in the block is renamed so its row's
//! canonical variable stays valid.

use std::collections::HashMap;

use crate::bril::{Instruction, Item, Op};
use crate::opt::cfg::Cfg;
use crate::opt::fresh::FreshNames;

/// Runs value numbering over every block of the CFG.
pub fn lvn(cfg: &mut Cfg, names: &mut FreshNames) {
    for &id in &cfg.order.clone() {
        let block = std::mem::take(&mut cfg.nodes[id].block);
        cfg.nodes[id].block = lvn_block(block, names);
    }
}

/// Identity of one computed value within a block.
#[derive(Debug, PartialEq, Eq, Hash)]
enum ValueKey {
    /// Rendered type and literal, e.g. `int|4`.
    Const(String),
    /// Operator over the value numbers of its arguments.
    Expr(Op, Vec<usize>),
}

#[derive(Default)]
struct Numbering {
    /// Canonical variable holding each numbered value.
    rows: Vec<String>,
    table: HashMap<ValueKey, usize>,
    env: HashMap<String, usize>,
}

impl Numbering {
    /// The value number a variable currently holds; a variable first seen as
    /// an argument gets an opaque row of its own (its value was computed
    /// outside this block).
    fn number_of(&mut self, var: &str) -> usize {
        if let Some(&n) = self.env.get(var) {
            return n;
        }
        let n = self.fresh_row(var.to_string());
        self.env.insert(var.to_string(), n);
        n
    }

    /// Allocates a row with the given canonical variable, without a table
    /// entry.
    fn fresh_row(&mut self, canonical: String) -> usize {
        self.rows.push(canonical);
        self.rows.len() - 1
    }

    fn canonical(&self, n: usize) -> String {
        self.rows[n].clone()
    }
}

fn lvn_block(items: Vec<Item>, names: &mut FreshNames) -> Vec<Item> {
    // Destinations written again later in the block must not stay canonical
    // under their final name.
    let mut last_write: HashMap<String, usize> = HashMap::new();
    for (idx, item) in items.iter().enumerate() {
        if let Some(dest) = item.as_instr().and_then(Instruction::dest) {
            last_write.insert(dest.to_string(), idx);
        }
    }

    let mut numbering = Numbering::default();
    let mut out = Vec::with_capacity(items.len());

    for (idx, item) in items.into_iter().enumerate() {
        let Item::Instr(instr) = item else {
            out.push(item);
            continue;
        };

        match instr {
            Instruction::Constant { dest, ty, value } => {
                let key = ValueKey::Const(format!("{ty}|{value}"));
                if let Some(&n) = numbering.table.get(&key) {
                    numbering.env.insert(dest.clone(), n);
                    out.push(Item::Instr(Instruction::Value {
                        op: Op::Id,
                        dest,
                        ty,
                        args: vec![numbering.canonical(n)],
                        funcs: vec![],
                        labels: vec![],
                    }));
                } else {
                    let emitted = rename_if_overwritten(&dest, idx, &last_write, names);
                    let n = numbering.fresh_row(emitted.clone());
                    numbering.table.insert(key, n);
                    numbering.env.insert(dest, n);
                    out.push(Item::Instr(Instruction::Constant {
                        dest: emitted,
                        ty,
                        value,
                    }));
                }
            }
            Instruction::Value {
                op: Op::Id,
                dest,
                ty,
                args,
                ..
            } => {
                // Copy propagation: the destination aliases the source's row.
                let n = numbering.number_of(&args[0]);
                let emitted = rename_if_overwritten(&dest, idx, &last_write, names);
                numbering.env.insert(dest, n);
                out.push(Item::Instr(Instruction::Value {
                    op: Op::Id,
                    dest: emitted,
                    ty,
                    args: vec![numbering.canonical(n)],
                    funcs: vec![],
                    labels: vec![],
                }));
            }
            Instruction::Value {
                op,
                dest,
                ty,
                mut args,
                funcs,
                labels,
            } => {
                if op.is_impure() || op == Op::Phi {
                    // Never cached; phi arguments come from other blocks and
                    // are left untouched.
                    if op != Op::Phi {
                        for arg in &mut args {
                            let n = numbering.number_of(arg);
                            *arg = numbering.canonical(n);
                        }
                    }
                    let emitted = rename_if_overwritten(&dest, idx, &last_write, names);
                    let n = numbering.fresh_row(emitted.clone());
                    numbering.env.insert(dest, n);
                    out.push(Item::Instr(Instruction::Value {
                        op,
                        dest: emitted,
                        ty,
                        args,
                        funcs,
                        labels,
                    }));
                    continue;
                }

                let mut nums: Vec<usize> =
                    args.iter().map(|arg| numbering.number_of(arg)).collect();
                for (arg, &n) in args.iter_mut().zip(&nums) {
                    *arg = numbering.canonical(n);
                }
                if op.is_commutative() {
                    nums.sort_unstable();
                }

                let key = ValueKey::Expr(op, nums);
                if let Some(&n) = numbering.table.get(&key) {
                    numbering.env.insert(dest.clone(), n);
                    out.push(Item::Instr(Instruction::Value {
                        op: Op::Id,
                        dest,
                        ty,
                        args: vec![numbering.canonical(n)],
                        funcs: vec![],
                        labels: vec![],
                    }));
                } else {
                    let emitted = rename_if_overwritten(&dest, idx, &last_write, names);
                    let n = numbering.fresh_row(emitted.clone());
                    numbering.table.insert(key, n);
                    numbering.env.insert(dest, n);
                    out.push(Item::Instr(Instruction::Value {
                        op,
                        dest: emitted,
                        ty,
                        args,
                        funcs,
                        labels,
                    }));
                }
            }
            Instruction::Effect {
                op,
                mut args,
                funcs,
                labels,
            } => {
                for arg in &mut args {
                    let n = numbering.number_of(arg);
                    *arg = numbering.canonical(n);
                }
                out.push(Item::Instr(Instruction::Effect {
                    op,
                    args,
                    funcs,
                    labels,
                }));
            }
        }
    }

    out
}

fn rename_if_overwritten(
    dest: &str,
    idx: usize,
    last_write: &HashMap<String, usize>,
    names: &mut FreshNames,
) -> String {
    if last_write.get(dest).copied() > Some(idx) {
        names.get(dest)
    } else {
        dest.to_string()
    }
}
