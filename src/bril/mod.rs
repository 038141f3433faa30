//! Bril program surface: the typed intermediate representation and the JSON
//! layer that cooks raw program text into it (and serializes it back out).

pub mod json;
pub mod types;

pub use types::{Argument, Function, Instruction, Item, Literal, Op, Program, Type};
