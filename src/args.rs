//! Module for parsing command-line arguments passed to the optimizer.

use std::path::PathBuf;
use std::process;

use crate::report_err;

/// One pass or analysis selected on the command line, run in argument order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Local value numbering over every block.
    Lvn,
    /// Trivial dead code elimination.
    Dce,
    /// Loop-invariant code motion.
    Licm,
    /// Rewrite into SSA form.
    Ssa,
    /// Rewrite out of SSA form.
    Unssa,
    /// Print reaching definitions.
    Reach,
    /// Print live variables.
    Live,
    /// Print constant propagation.
    ConstProp,
    /// Print dominator sets.
    Dominators,
    /// Print the dominator tree and write one `.dot` file per function.
    DomTree,
    /// Print dominance frontiers.
    DomFrontier,
    /// Write one `.dot` CFG description per function.
    CfgDot,
}

/// Optimizer command-line arguments.
#[derive(Debug)]
pub struct Args {
    /// Name of the program.
    pub program: String,
    /// Selected passes/analyses, in argument order.
    pub actions: Vec<Action>,
    /// Whether to print the transformed program when done.
    pub emit: bool,
    /// Input file containing program JSON (defaults to standard input).
    pub in_path: Option<PathBuf>,
}

impl Args {
    /// Parses command-line arguments from `std::env::args()`, [exiting] on
    /// error.
    ///
    /// [exiting]: std::process::exit
    #[must_use]
    pub fn parse() -> Self {
        let mut args = std::env::args().peekable();
        let program = args.next().unwrap_or("brilo".into());

        let mut actions = Vec::new();
        let mut emit = true;
        let mut in_path = None;

        while let Some(arg) = args.peek() {
            if arg.starts_with('-') {
                // Already peeked the next argument.
                let flag_name = args.next().expect("next argument should be present");

                match flag_name.as_str() {
                    "--nout" => emit = false,
                    "-h" | "--help" => print_usage(&program),
                    "-v" | "--version" => print_version(&program),
                    name => {
                        let Some(flag) = FLAG_REGISTRY.iter().find(|flag| flag.name == name)
                        else {
                            report_err!(&program, "invalid flag '{name}'");
                            print_usage(&program);
                        };
                        actions.push(flag.action);
                    }
                }
            } else {
                // Remaining argument is the input file.
                break;
            }
        }

        if let Some(path) = args.next() {
            in_path = Some(PathBuf::from(path));
        }
        if let Some(extra) = args.next() {
            report_err!(&program, "unexpected argument '{extra}'");
            print_usage(&program);
        }

        Self {
            program,
            actions,
            emit,
            in_path,
        }
    }
}

struct Flag {
    name: &'static str,
    description: &'static str,
    action: Action,
}

const FLAG_REGISTRY: &[Flag] = &[
    Flag {
        name: "--lvn",
        description: "       run local value numbering.",
        action: Action::Lvn,
    },
    Flag {
        name: "--dce",
        description: "       run trivial dead code elimination.",
        action: Action::Dce,
    },
    Flag {
        name: "--licm",
        description: "      run loop-invariant code motion.",
        action: Action::Licm,
    },
    Flag {
        name: "--ssa",
        description: "       rewrite the program into SSA form.",
        action: Action::Ssa,
    },
    Flag {
        name: "--unssa",
        description: "     rewrite the program out of SSA form.",
        action: Action::Unssa,
    },
    Flag {
        name: "--reach",
        description: "     print per-block reaching definitions.",
        action: Action::Reach,
    },
    Flag {
        name: "--live",
        description: "      print per-block live variables.",
        action: Action::Live,
    },
    Flag {
        name: "--cp",
        description: "        print per-block constant propagation.",
        action: Action::ConstProp,
    },
    Flag {
        name: "--dom",
        description: "       print per-block dominator sets.",
        action: Action::Dominators,
    },
    Flag {
        name: "--domtree",
        description: "   print the dominator tree and write '<fn>.dot' per function.",
        action: Action::DomTree,
    },
    Flag {
        name: "--domfront",
        description: "  print per-block dominance frontiers.",
        action: Action::DomFrontier,
    },
    Flag {
        name: "--cfg",
        description: "       write '<fn>-cfg.dot' per function.",
        action: Action::CfgDot,
    },
];

/// Prints the usage information for the program, exiting with a non-zero
/// status.
pub fn print_usage(program: &str) -> ! {
    eprintln!("\x1b[1;1musage:\x1b[0m");
    eprintln!("      {program} [options] [infile]");
    eprintln!("\x1b[1;1moptions:\x1b[0m");

    for flag in FLAG_REGISTRY {
        eprintln!("   {}  {}", flag.name, flag.description);
    }
    eprintln!("   --nout      suppress final program output.");
    eprintln!("   -h, --help  print this summary.");

    process::exit(1);
}

fn print_version(program: &str) -> ! {
    println!(
        "\x1b[1;1m{} - {}\x1b[0m",
        program,
        env!("CARGO_PKG_VERSION")
    );
    process::exit(0);
}
