//! Optimizing middle-end for the _Bril_ intermediate language.

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::use_self)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::missing_panics_doc)]
#![warn(rust_2018_idioms)]
#![warn(missing_debug_implementations)]

pub mod args;
pub mod bril;
pub mod error;
pub mod opt;

pub type Result<T> = std::result::Result<T, error::Error>;

use std::fs;
use std::io::{self, Read};
use std::process;

use crate::args::{Action, Args};
use crate::opt::analysis::dataflow::{
    self, ConstProp, DataflowResult, LiveVariables, ReachingDefs,
};
use crate::opt::analysis::dominators::Dominators;
use crate::opt::cfg::{Cfg, CfgProgram, NodeId};
use crate::opt::dot;
use crate::opt::fresh::{FreshLabels, FreshNames};
use crate::opt::passes::{dce, licm, lvn, ssa};

fn main() {
    let args = Args::parse();

    if let Err(err) = run(&args) {
        report_err!(&args.program, "{err}");
        process::exit(1);
    }
}

fn run(args: &Args) -> Result<()> {
    let input = match &args.in_path {
        Some(path) => fs::read_to_string(path)?,
        None => {
            let mut buf = String::new();
            io::stdin().read_to_string(&mut buf)?;
            buf
        }
    };
    let program = bril::json::parse_program(&input)?;

    // Name generators are seeded once from the whole program and threaded
    // through every pass that mints labels or variables.
    let mut labels = FreshLabels::of(&program);
    let mut names: Vec<FreshNames> = program.functions.iter().map(FreshNames::of).collect();
    let mut cfgs = CfgProgram::of(&program, &mut labels);

    for &action in &args.actions {
        match action {
            Action::Lvn => {
                for (cfg, names) in cfgs.graphs.iter_mut().zip(&mut names) {
                    lvn::lvn(cfg, names);
                }
            }
            Action::Dce => {
                for cfg in &mut cfgs.graphs {
                    dce::dce(cfg);
                }
            }
            Action::Licm => {
                for (cfg, names) in cfgs.graphs.iter_mut().zip(&mut names) {
                    licm::licm(cfg, &mut labels, names);
                }
            }
            Action::Ssa => {
                for (cfg, names) in cfgs.graphs.iter_mut().zip(&mut names) {
                    ssa::to_ssa(cfg, names);
                }
            }
            Action::Unssa => {
                for cfg in &mut cfgs.graphs {
                    ssa::from_ssa(cfg);
                }
            }
            Action::Reach => {
                for cfg in &cfgs.graphs {
                    let result = dataflow::solve(&ReachingDefs, cfg);
                    print_dataflow(cfg, &result, |v| dataflow::format_defs(cfg, v));
                }
            }
            Action::Live => {
                for cfg in &cfgs.graphs {
                    let result = dataflow::solve(&LiveVariables, cfg);
                    print_dataflow(cfg, &result, dataflow::format_names);
                }
            }
            Action::ConstProp => {
                for cfg in &cfgs.graphs {
                    let result = dataflow::solve(&ConstProp, cfg);
                    print_dataflow(cfg, &result, dataflow::format_consts);
                }
            }
            Action::Dominators => {
                for cfg in &cfgs.graphs {
                    let doms = Dominators::of(cfg);
                    println!("@{}:", cfg.name);
                    for &id in &cfg.order {
                        let set = format_nodes(cfg, doms.dominators(id).iter().copied());
                        println!("  {}: {set}", cfg.node(id).name);
                    }
                }
            }
            Action::DomTree => {
                for cfg in &cfgs.graphs {
                    let doms = Dominators::of(cfg);
                    println!("@{}:", cfg.name);
                    for &id in &cfg.order {
                        let children = format_nodes(cfg, doms.children(id).iter().copied());
                        println!("  {}: {children}", cfg.node(id).name);
                    }
                    fs::write(
                        format!("{}.dot", cfg.name),
                        dot::dominator_tree_graph(cfg, &doms),
                    )?;
                }
            }
            Action::DomFrontier => {
                for cfg in &cfgs.graphs {
                    let doms = Dominators::of(cfg);
                    println!("@{}:", cfg.name);
                    for &id in &cfg.order {
                        let set = format_nodes(cfg, doms.frontier(id).iter().copied());
                        println!("  {}: {set}", cfg.node(id).name);
                    }
                }
            }
            Action::CfgDot => {
                for cfg in &cfgs.graphs {
                    fs::write(format!("{}-cfg.dot", cfg.name), dot::cfg_graph(cfg))?;
                }
            }
        }
    }

    // Final pipeline: value numbering, then liveness-based cleanup.
    for (cfg, names) in cfgs.graphs.iter_mut().zip(&mut names) {
        lvn::lvn(cfg, names);
        dce::dce_live(cfg);
    }

    if args.emit {
        println!("{}", bril::json::program_to_json(&cfgs.to_program()));
    }

    Ok(())
}

fn print_dataflow<V>(cfg: &Cfg, result: &DataflowResult<V>, fmt: impl Fn(&V) -> String) {
    println!("@{}:", cfg.name);
    for &id in &cfg.order {
        println!("  {}:", cfg.node(id).name);
        println!("    in:  {}", fmt(result.input(id)));
        println!("    out: {}", fmt(result.output(id)));
    }
}

fn format_nodes(cfg: &Cfg, ids: impl IntoIterator<Item = NodeId>) -> String {
    let mut names: Vec<&str> = ids.into_iter().map(|id| cfg.node(id).name.as_str()).collect();
    names.sort_unstable();
    format!("{{{}}}", names.join(", "))
}
