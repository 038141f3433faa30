//! Transformation passes over a function's CFG.

pub mod dce;
pub mod licm;
pub mod lvn;
pub mod ssa;
