//! Function-level analyses: dominance, the generic dataflow solver and its
//! instances, and natural-loop detection.

pub mod dataflow;
pub mod dominators;
pub mod loops;
