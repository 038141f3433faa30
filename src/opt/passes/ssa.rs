//! SSA Construction and Destruction
//!
//! Classic minimal SSA. Construction places phi instructions at dominance
//! frontiers, iterated to a fixed point, then renames variables during a
//! dominator-tree walk with one name stack per original variable.
//! Destruction replaces every phi with copies on the edges it summarizes.
//!
//! A phi argument read along a path that never defined the variable is left
//! as the [`UNDEFINED`] sentinel; destruction turns it into a zero-valued
//! constant of the phi's type.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use crate::bril::{Instruction, Item, Literal, Op, Type};
use crate::opt::analysis::dominators::Dominators;
use crate::opt::cfg::{Cfg, NodeId};
use crate::opt::fresh::FreshNames;

/// Sentinel argument for a value that was never defined on some path.
pub const UNDEFINED: &str = "__undefined";

/// A phi under construction: the original variable it merges, its renamed
/// destination, and the incoming value per predecessor jump label.
#[derive(Debug)]
struct Phi {
    var: String,
    dest: String,
    ty: Type,
    incoming: BTreeMap<String, String>,
}

/// Rewrites the CFG into SSA form: phi insertion, then renaming.
pub fn to_ssa(cfg: &mut Cfg, names: &mut FreshNames) {
    let doms = Dominators::of(cfg);

    // Variable universe: every block-defined destination plus the function
    // parameters, which count as definitions at the virtual entry.
    let mut types: BTreeMap<String, Type> = BTreeMap::new();
    let mut def_sites: BTreeMap<String, BTreeSet<NodeId>> = BTreeMap::new();
    for arg in &cfg.args {
        types.insert(arg.name.clone(), arg.ty.clone());
        def_sites.entry(arg.name.clone()).or_default().insert(cfg.entry);
    }
    for &id in &cfg.order {
        for item in &cfg.node(id).block {
            if let Item::Instr(instr) = item
                && let Some(dest) = instr.dest()
            {
                types.insert(
                    dest.to_string(),
                    instr
                        .dest_type()
                        .unwrap_or_else(|| {
                            panic!("write instruction '{dest}' carries no type")
                        })
                        .clone(),
                );
                def_sites.entry(dest.to_string()).or_default().insert(id);
            }
        }
    }

    // Phase 1: iterated phi placement on dominance frontiers. A new phi is
    // itself a definition, so its node joins the worklist.
    let mut phis: HashMap<NodeId, Vec<Phi>> = HashMap::new();
    for (var, sites) in &def_sites {
        let mut placed: BTreeSet<NodeId> = BTreeSet::new();
        let mut worklist: VecDeque<NodeId> = sites.iter().copied().collect();

        while let Some(site) = worklist.pop_front() {
            let mut frontier: Vec<NodeId> = doms.frontier(site).iter().copied().collect();
            frontier.sort_unstable();
            for node in frontier {
                if placed.insert(node) {
                    phis.entry(node).or_default().push(Phi {
                        var: var.clone(),
                        dest: var.clone(),
                        ty: types[var].clone(),
                        incoming: BTreeMap::new(),
                    });
                    worklist.push_back(node);
                }
            }
        }
    }

    // Phase 2: dominator-tree renaming.
    let mut stacks: HashMap<String, Vec<String>> = types
        .keys()
        .map(|var| (var.clone(), Vec::new()))
        .collect();
    for arg in &cfg.args {
        stacks.insert(arg.name.clone(), vec![arg.name.clone()]);
    }
    let mut renamer = Renamer {
        doms,
        stacks,
        phis,
        names,
    };
    let entry = cfg.entry;
    renamer.rename(cfg, entry);

    // Materialize the finished phis right after each block's leading label.
    for (node, mut node_phis) in renamer.phis {
        // Deterministic block layout regardless of placement order.
        node_phis.sort_by(|a, b| a.dest.cmp(&b.dest));
        let at = usize::from(cfg.node(node).leading_label().is_some());
        for phi in node_phis.into_iter().rev() {
            let (labels, args) = phi.incoming.into_iter().unzip();
            cfg.node_mut(node).block.insert(
                at,
                Item::Instr(Instruction::Value {
                    op: Op::Phi,
                    dest: phi.dest,
                    ty: phi.ty,
                    args,
                    funcs: vec![],
                    labels,
                }),
            );
        }
    }
}

struct Renamer<'a> {
    doms: Dominators,
    /// One stack per original variable; the top is the name current on this
    /// dominator-tree path.
    stacks: HashMap<String, Vec<String>>,
    phis: HashMap<NodeId, Vec<Phi>>,
    names: &'a mut FreshNames,
}

impl Renamer<'_> {
    fn rename(&mut self, cfg: &mut Cfg, node: NodeId) {
        // Every push is recorded so this visit can restore the stacks
        // exactly; sibling subtrees must never see these bindings.
        let mut pushed: Vec<String> = Vec::new();

        if let Some(node_phis) = self.phis.get_mut(&node) {
            for phi in node_phis {
                let fresh = self.names.get(&phi.var);
                phi.dest = fresh.clone();
                self.stacks
                    .get_mut(&phi.var)
                    .unwrap_or_else(|| panic!("no name stack for variable '{}'", phi.var))
                    .push(fresh);
                pushed.push(phi.var.clone());
            }
        }

        for item in &mut cfg.nodes[node].block {
            let Item::Instr(instr) = item else { continue };

            if let Some(args) = instr.args_mut() {
                // A name with no stack is not a variable this function ever
                // defines and is left untouched.
                for arg in args {
                    if let Some(stack) = self.stacks.get(arg.as_str()) {
                        *arg = stack
                            .last()
                            .map_or_else(|| UNDEFINED.to_string(), Clone::clone);
                    }
                }
            }

            if let Some(dest) = instr.dest() {
                let var = dest.to_string();
                let fresh = self.names.get(&var);
                self.stacks
                    .get_mut(&var)
                    .unwrap_or_else(|| panic!("no name stack for variable '{var}'"))
                    .push(fresh.clone());
                pushed.push(var);
                instr.set_dest(fresh);
            }
        }

        // Tell every successor's phis which name arrives along this edge.
        // Edges are keyed by the label flattening emits for this block, not
        // the node name: the two differ when a label was freshened against a
        // duplicate in another function.
        let name = cfg.node(node).jump_target().to_string();
        for succ in cfg.node(node).succs.clone() {
            if let Some(succ_phis) = self.phis.get_mut(&succ) {
                for phi in succ_phis {
                    let value = self.stacks[&phi.var]
                        .last()
                        .map_or_else(|| UNDEFINED.to_string(), Clone::clone);
                    phi.incoming.insert(name.clone(), value);
                }
            }
        }

        for child in self.doms.children(node).to_vec() {
            self.rename(cfg, child);
        }

        for var in pushed.into_iter().rev() {
            self.stacks
                .get_mut(&var)
                .unwrap_or_else(|| panic!("no name stack for variable '{var}'"))
                .pop();
        }
    }
}

/// Rewrites the CFG out of SSA form by materializing each phi's incoming
/// values as copies in the predecessor blocks, then deleting the phis.
pub fn from_ssa(cfg: &mut Cfg) {
    struct Copy {
        source: String,
        dest: String,
        ty: Type,
        arg: String,
    }

    let mut copies: Vec<Copy> = Vec::new();
    for &id in &cfg.order {
        for item in &cfg.node(id).block {
            let Item::Instr(Instruction::Value {
                op: Op::Phi,
                dest,
                ty,
                args,
                labels,
                ..
            }) = item
            else {
                continue;
            };

            for (arg, label) in args.iter().zip(labels) {
                // A self-referential incoming value is degenerate; a copy
                // would read the not-yet-defined destination.
                if arg == dest {
                    continue;
                }
                copies.push(Copy {
                    source: label.clone(),
                    dest: dest.clone(),
                    ty: ty.clone(),
                    arg: arg.clone(),
                });
            }
        }
    }

    for copy in copies {
        let source = cfg.node_targeted(&copy.source).unwrap_or_else(|| {
            panic!(
                "malformed control-flow graph: phi references unknown label '{}'",
                copy.source
            )
        });

        let instr = if copy.arg == UNDEFINED {
            Instruction::Constant {
                dest: copy.dest,
                value: Literal::zero(&copy.ty),
                ty: copy.ty,
            }
        } else {
            Instruction::Value {
                op: Op::Id,
                dest: copy.dest,
                ty: copy.ty,
                args: vec![copy.arg],
                funcs: vec![],
                labels: vec![],
            }
        };

        let block = &mut cfg.nodes[source].block;
        let at = if block.last().and_then(Item::as_instr).is_some_and(Instruction::is_terminator) {
            block.len() - 1
        } else {
            block.len()
        };
        block.insert(at, Item::Instr(instr));
    }

    for &id in &cfg.order.clone() {
        cfg.nodes[id]
            .block
            .retain(|item| !matches!(item.as_instr(), Some(instr) if instr.op() == Op::Phi));
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, HashSet};

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::bril::json::parse_program;
    use crate::opt::cfg::CfgProgram;
    use crate::opt::fresh::FreshLabels;

    fn cfg_of(input: &str) -> Cfg {
        let program = parse_program(input).unwrap();
        let mut labels = FreshLabels::of(&program);
        Cfg::of(&program.functions[0], &mut labels)
    }

    fn ssa_of(input: &str) -> Cfg {
        let program = parse_program(input).unwrap();
        let mut labels = FreshLabels::of(&program);
        let mut names = FreshNames::of(&program.functions[0]);
        let mut cfg = Cfg::of(&program.functions[0], &mut labels);
        to_ssa(&mut cfg, &mut names);
        cfg
    }

    fn phis_in(cfg: &Cfg, node: NodeId) -> Vec<&Instruction> {
        cfg.node(node)
            .block
            .iter()
            .filter_map(Item::as_instr)
            .filter(|instr| instr.op() == Op::Phi)
            .collect()
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
                { "op": "print", "args": ["x"] },
                { "op": "ret" }
            ]
        }]
    }"#;

    const LOOP: &str = r#"{
        "functions": [{
            "name": "main",
            "args": [{ "name": "n", "type": "int" }],
            "instrs": [
                { "op": "const", "dest": "i", "type": "int", "value": 0 },
                { "label": "head" },
                { "op": "lt", "dest": "cond", "type": "bool", "args": ["i", "n"] },
                { "op": "br", "args": ["cond"], "labels": ["body", "done"] },
                { "label": "body" },
                { "op": "const", "dest": "one", "type": "int", "value": 1 },
                { "op": "add", "dest": "i", "type": "int", "args": ["i", "one"] },
                { "op": "jmp", "labels": ["head"] },
                { "label": "done" },
                { "op": "print", "args": ["i"] },
                { "op": "ret" }
            ]
        }]
    }"#;

    #[test]
    fn diamond_gets_exactly_one_phi_at_the_join() {
        let cfg = ssa_of(DIAMOND);
        let join = cfg.node_named("join").unwrap();

        let phis = phis_in(&cfg, join);
        assert_eq!(phis.len(), 1);

        let phi = phis[0];
        assert_eq!(phi.args().len(), 2);
        assert_eq!(phi.labels().len(), 2);
        let mut sources = phi.labels().to_vec();
        sources.sort_unstable();
        assert_eq!(sources, ["left", "right"]);

        // The print reads the phi's destination.
        let print = cfg
            .node(join)
            .block
            .iter()
            .filter_map(Item::as_instr)
            .find(|instr| instr.op() == Op::Print)
            .unwrap();
        assert_eq!(print.args(), [phi.dest().unwrap()]);
    }

    #[test]
    fn construction_yields_single_assignment() {
        for input in [DIAMOND, LOOP] {
            let cfg = ssa_of(input);

            let mut writes: HashMap<String, usize> = HashMap::new();
            for &id in &cfg.order {
                for item in &cfg.node(id).block {
                    if let Some(dest) = item.as_instr().and_then(Instruction::dest) {
                        *writes.entry(dest.to_string()).or_default() += 1;
                    }
                }
            }
            for (dest, count) in writes {
                assert_eq!(count, 1, "'{dest}' written {count} times");
            }

            // Every phi carries one incoming entry per predecessor.
            for &id in &cfg.order {
                for phi in phis_in(&cfg, id) {
                    assert_eq!(phi.labels().len(), cfg.node(id).preds.len());
                }
            }
        }
    }

    #[test]
    fn loop_phi_can_select_the_incoming_parameter() {
        let cfg = ssa_of(LOOP);
        let head = cfg.node_named("head").unwrap();

        // Minimal SSA places header phis for everything assigned in the
        // loop: `i`, the condition, and the body-local `one`. The parameter
        // `n` is only ever read, so it needs none.
        let phis = phis_in(&cfg, head);
        assert_eq!(phis.len(), 3);
        let i_phis: Vec<_> = phis
            .iter()
            .filter(|phi| phi.dest().unwrap().starts_with("i."))
            .collect();
        assert_eq!(i_phis.len(), 1);
        assert!(phis.iter().all(|phi| !phi.dest().unwrap().starts_with("n.")));

        // One incoming value is the untouched parameter-style initializer
        // path, the other the increment's fresh name.
        assert_eq!(i_phis[0].labels().len(), 2);
    }

    #[test]
    fn unset_path_reads_the_undefined_sentinel() {
        let cfg = ssa_of(
            r#"{
                "functions": [{
                    "name": "main",
                    "instrs": [
                        { "op": "const", "dest": "cond", "type": "bool", "value": true },
                        { "op": "br", "args": ["cond"], "labels": ["set", "skip"] },
                        { "label": "set" },
                        { "op": "const", "dest": "x", "type": "int", "value": 1 },
                        { "label": "skip" },
                        { "op": "print", "args": ["x"] },
                        { "op": "ret" }
                    ]
                }]
            }"#,
        );

        let skip = cfg.node_named("skip").unwrap();
        let phis = phis_in(&cfg, skip);
        assert_eq!(phis.len(), 1);
        assert!(phis[0].args().contains(&UNDEFINED.to_string()));
    }

    #[test]
    fn destruction_inserts_copies_before_terminators() {
        let mut cfg = ssa_of(DIAMOND);
        from_ssa(&mut cfg);

        for &id in &cfg.order {
            assert!(phis_in(&cfg, id).is_empty());
        }

        // One copy per arm. "left" ends in a jump, so the copy sits right
        // before it; "right" falls through, so the copy is appended.
        let left = cfg.node_named("left").unwrap();
        let left_block = &cfg.node(left).block;
        let copy = left_block[left_block.len() - 2].as_instr().unwrap();
        assert_eq!(copy.op(), Op::Id);
        assert!(left_block.last().and_then(Item::as_instr).unwrap().is_terminator());

        let right = cfg.node_named("right").unwrap();
        let copy = cfg.node(right).block.last().and_then(Item::as_instr).unwrap();
        assert_eq!(copy.op(), Op::Id);
    }

    #[test]
    fn destruction_replaces_undefined_with_a_zero_constant() {
        let mut cfg = ssa_of(
            r#"{
                "functions": [{
                    "name": "main",
                    "instrs": [
                        { "op": "const", "dest": "cond", "type": "bool", "value": true },
                        { "op": "br", "args": ["cond"], "labels": ["set", "skip"] },
                        { "label": "set" },
                        { "op": "const", "dest": "x", "type": "int", "value": 1 },
                        { "label": "skip" },
                        { "op": "print", "args": ["x"] },
                        { "op": "ret" }
                    ]
                }]
            }"#,
        );
        from_ssa(&mut cfg);

        // The branch-to-skip edge never defined `x`; its copy becomes a
        // zero constant in the branching block.
        let head = cfg.order[1];
        let zero = cfg
            .node(head)
            .block
            .iter()
            .filter_map(Item::as_instr)
            .find(|instr| {
                matches!(instr, Instruction::Constant { value, .. } if *value == Literal::Int(0))
            });
        assert!(zero.is_some());

        for &id in &cfg.order {
            for item in &cfg.node(id).block {
                if let Item::Instr(instr) = item {
                    assert!(!instr.args().contains(&UNDEFINED.to_string()));
                }
            }
        }
    }

    #[test]
    fn round_trip_keeps_observable_instruction_semantics() {
        let mut cfg = ssa_of(LOOP);
        from_ssa(&mut cfg);
        let flat = cfg.to_function();

        // Still a well-formed function: one add, one compare, one print,
        // no phis, and every read has a matching write or parameter.
        let instrs: Vec<_> = flat.instrs.iter().filter_map(Item::as_instr).collect();
        assert!(instrs.iter().all(|instr| instr.op() != Op::Phi));
        assert_eq!(instrs.iter().filter(|i| i.op() == Op::Add).count(), 1);

        let mut defined: Vec<&str> = flat.args.iter().map(|arg| arg.name.as_str()).collect();
        defined.extend(instrs.iter().filter_map(|instr| instr.dest()));
        for instr in &instrs {
            for arg in instr.args() {
                assert!(defined.contains(&arg.as_str()), "undefined read '{arg}'");
            }
        }
    }

    #[test]
    fn phi_labels_stay_defined_when_functions_share_labels() {
        // Both functions use the same branch labels. The second function's
        // node names are freshened against the first, but its emitted labels
        // are not, and the phis must reference the emitted ones.
        let arm = r#"[
            { "op": "const", "dest": "cond", "type": "bool", "value": true },
            { "op": "br", "args": ["cond"], "labels": ["left", "right"] },
            { "label": "left" },
            { "op": "const", "dest": "x", "type": "int", "value": 1 },
            { "op": "jmp", "labels": ["join"] },
            { "label": "right" },
            { "op": "const", "dest": "x", "type": "int", "value": 2 },
            { "label": "join" },
            { "op": "print", "args": ["x"] },
            { "op": "ret" }
        ]"#;
        let program = parse_program(&format!(
            r#"{{
                "functions": [
                    {{ "name": "f", "instrs": {arm} }},
                    {{ "name": "g", "instrs": {arm} }}
                ]
            }}"#,
        ))
        .unwrap();

        let mut labels = FreshLabels::of(&program);
        let mut graphs = CfgProgram::of(&program, &mut labels);
        for (cfg, func) in graphs.graphs.iter_mut().zip(&program.functions) {
            let mut names = FreshNames::of(func);
            to_ssa(cfg, &mut names);
        }

        for flat in graphs.to_program().functions {
            let defined: HashSet<&str> = flat.instrs.iter().filter_map(Item::as_label).collect();
            for instr in flat.instrs.iter().filter_map(Item::as_instr) {
                if instr.op() == Op::Phi {
                    for label in instr.labels() {
                        assert!(
                            defined.contains(label.as_str()),
                            "@{}: phi references undefined label '{label}'",
                            flat.name
                        );
                    }
                }
            }
        }

        // Destruction resolves the same labels back to their blocks.
        for cfg in &mut graphs.graphs {
            from_ssa(cfg);
            for &id in &cfg.order {
                assert!(phis_in(cfg, id).is_empty());
            }
        }
    }

    #[test]
    fn self_referential_phi_arguments_are_skipped() {
        // Hand-build a node whose phi lists its own destination as an
        // incoming value; destruction must not copy it.
        let mut cfg = cfg_of(LOOP);
        let head = cfg.node_named("head").unwrap();
        let head_name = cfg.node(head).name.clone();
        let entry_name = cfg.node(cfg.order[1]).name.clone();
        cfg.node_mut(head).block.insert(
            1,
            Item::Instr(Instruction::Value {
                op: Op::Phi,
                dest: "i".into(),
                ty: Type::Int,
                args: vec!["i".into(), "i".into()],
                funcs: vec![],
                labels: vec![entry_name.clone(), head_name],
            }),
        );

        from_ssa(&mut cfg);
        let entry = cfg.node_named(&entry_name).unwrap();
        let ids: Vec<_> = cfg
            .node(entry)
            .block
            .iter()
            .filter_map(Item::as_instr)
            .filter(|instr| instr.op() == Op::Id)
            .collect();
        assert!(ids.is_empty());
    }
}
