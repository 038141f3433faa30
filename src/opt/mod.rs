//! Middle-end: control-flow graphs, analyses, and transformation passes over
//! the Bril representation.

pub mod analysis;
pub mod cfg;
pub mod dot;
pub mod fresh;
pub mod passes;
