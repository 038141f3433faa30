//! Fresh Name Generation
//!
//! Two collision-avoiding string generators, seeded with every name already
//! present in the program and threaded explicitly through any pass that
//! synthesizes labels or variables. Labels prefer the bare base name and fall
//! back to a suffixed form; variables always carry a numeric suffix so that
//! renamed SSA values are visibly derived from their source.

use std::collections::HashSet;

use crate::bril::{Function, Item, Program};

/// Generates labels that collide with nothing already seen.
#[derive(Debug, Default)]
pub struct FreshLabels {
    used: HashSet<String>,
    claimed: HashSet<String>,
}

impl FreshLabels {
    /// Seeds the generator with every label and function name in the program,
    /// so generated block names are unique program-wide.
    #[must_use]
    pub fn of(program: &Program) -> Self {
        let mut used = HashSet::new();

        for func in &program.functions {
            used.insert(func.name.clone());
            for item in &func.instrs {
                if let Item::Label(label) = item {
                    used.insert(label.clone());
                }
            }
        }

        Self {
            used,
            claimed: HashSet::new(),
        }
    }

    /// Returns the base name itself if unused, otherwise the first unused
    /// `base_i`. The returned name is recorded as taken.
    pub fn get(&mut self, base: &str) -> String {
        if self.used.insert(base.to_string()) {
            self.claimed.insert(base.to_string());
            return base.to_string();
        }

        let mut i = 0usize;
        loop {
            let candidate = format!("{base}_{i}");
            if self.used.insert(candidate.clone()) {
                self.claimed.insert(candidate.clone());
                return candidate;
            }
            i += 1;
        }
    }

    /// Claims a seeded source label for use as a node name. The first claim
    /// returns the label itself; a duplicate label in a later function is
    /// freshened so node names stay unique across the whole program.
    pub fn claim(&mut self, label: &str) -> String {
        if self.claimed.insert(label.to_string()) {
            label.to_string()
        } else {
            self.get(label)
        }
    }
}

/// Generates variable names that collide with nothing already seen.
#[derive(Debug, Default)]
pub struct FreshNames {
    used: HashSet<String>,
}

impl FreshNames {
    /// Seeds the generator with every destination and parameter name in the
    /// function.
    #[must_use]
    pub fn of(func: &Function) -> Self {
        let mut used = HashSet::new();

        for arg in &func.args {
            used.insert(arg.name.clone());
        }
        for item in &func.instrs {
            if let Item::Instr(instr) = item
                && let Some(dest) = instr.dest()
            {
                used.insert(dest.to_string());
            }
        }

        Self { used }
    }

    /// Returns the first unused `base.i`. The returned name is recorded as
    /// taken.
    pub fn get(&mut self, base: &str) -> String {
        let mut i = 0usize;
        loop {
            let candidate = format!("{base}.{i}");
            if self.used.insert(candidate.clone()) {
                return candidate;
            }
            i += 1;
        }
    }
}
