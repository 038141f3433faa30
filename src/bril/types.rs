//! Intermediate Representation
//!
//! Typed model of a Bril program: functions over flat instruction-or-label
//! sequences. Instructions form a closed union (constant, value operation,
//! effect operation) with their read/write capabilities exposed as accessor
//! methods that pattern-match on the variant.

use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// A Bril type: either a primitive or a parametrized type wrapping a smaller
/// one (currently only `ptr`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Type {
    Int,
    Bool,
    Float,
    Ptr(Box<Type>),
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Int => write!(f, "int"),
            Type::Bool => write!(f, "bool"),
            Type::Float => write!(f, "float"),
            Type::Ptr(inner) => write!(f, "ptr<{inner}>"),
        }
    }
}

/// Literal values produced by `const` instructions.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Int(i64),
    Bool(bool),
    Float(f64),
}

impl Literal {
    /// Returns the zero value of the given type, used when a phi selected a
    /// value along a path where the variable was never defined.
    #[must_use]
    pub const fn zero(ty: &Type) -> Self {
        match ty {
            Type::Int | Type::Ptr(_) => Literal::Int(0),
            Type::Bool => Literal::Bool(false),
            Type::Float => Literal::Float(0.0),
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Int(v) => write!(f, "{v}"),
            Literal::Bool(v) => write!(f, "{v}"),
            Literal::Float(v) => write!(f, "{v:?}"),
        }
    }
}

/// Bril operators.
///
/// Operator name strings map 1:1 to these variants; an unknown string is a
/// hard parse error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Const,
    Add,
    Mul,
    Sub,
    Div,
    Eq,
    Lt,
    Gt,
    Le,
    Ge,
    Not,
    And,
    Or,
    Jmp,
    Br,
    Call,
    Ret,
    Id,
    Print,
    Nop,
    // Floating-point extension.
    Fadd,
    Fmul,
    Fsub,
    Fdiv,
    Feq,
    Flt,
    Fgt,
    Fle,
    Fge,
    // SSA and memory extensions.
    Phi,
    Alloc,
    Store,
    Load,
    Free,
    Ptradd,
}

impl Op {
    /// Returns the Bril operator name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Op::Const => "const",
            Op::Add => "add",
            Op::Mul => "mul",
            Op::Sub => "sub",
            Op::Div => "div",
            Op::Eq => "eq",
            Op::Lt => "lt",
            Op::Gt => "gt",
            Op::Le => "le",
            Op::Ge => "ge",
            Op::Not => "not",
            Op::And => "and",
            Op::Or => "or",
            Op::Jmp => "jmp",
            Op::Br => "br",
            Op::Call => "call",
            Op::Ret => "ret",
            Op::Id => "id",
            Op::Print => "print",
            Op::Nop => "nop",
            Op::Fadd => "fadd",
            Op::Fmul => "fmul",
            Op::Fsub => "fsub",
            Op::Fdiv => "fdiv",
            Op::Feq => "feq",
            Op::Flt => "flt",
            Op::Fgt => "fgt",
            Op::Fle => "fle",
            Op::Fge => "fge",
            Op::Phi => "phi",
            Op::Alloc => "alloc",
            Op::Store => "store",
            Op::Load => "load",
            Op::Free => "free",
            Op::Ptradd => "ptradd",
        }
    }

    /// Returns `true` if swapping the operator's arguments preserves its
    /// meaning (used to canonicalize argument order).
    #[must_use]
    pub const fn is_commutative(self) -> bool {
        matches!(
            self,
            Op::Add | Op::Mul | Op::Eq | Op::And | Op::Or | Op::Fadd | Op::Fmul | Op::Feq
        )
    }

    /// Returns `true` if this operator ends a basic block.
    #[must_use]
    pub const fn is_terminator(self) -> bool {
        matches!(self, Op::Jmp | Op::Br | Op::Ret)
    }

    /// Returns `true` if this operator has effects beyond producing a value:
    /// terminators, calls, and memory operations. Impure operations are never
    /// treated as cacheable pure values.
    #[must_use]
    pub const fn is_impure(self) -> bool {
        self.is_terminator()
            || matches!(self, Op::Call | Op::Alloc | Op::Store | Op::Load | Op::Free)
    }
}

impl FromStr for Op {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "const" => Op::Const,
            "add" => Op::Add,
            "mul" => Op::Mul,
            "sub" => Op::Sub,
            "div" => Op::Div,
            "eq" => Op::Eq,
            "lt" => Op::Lt,
            "gt" => Op::Gt,
            "le" => Op::Le,
            "ge" => Op::Ge,
            "not" => Op::Not,
            "and" => Op::And,
            "or" => Op::Or,
            "jmp" => Op::Jmp,
            "br" => Op::Br,
            "call" => Op::Call,
            "ret" => Op::Ret,
            "id" => Op::Id,
            "print" => Op::Print,
            "nop" => Op::Nop,
            "fadd" => Op::Fadd,
            "fmul" => Op::Fmul,
            "fsub" => Op::Fsub,
            "fdiv" => Op::Fdiv,
            "feq" => Op::Feq,
            "flt" => Op::Flt,
            "fgt" => Op::Fgt,
            "fle" => Op::Fle,
            "fge" => Op::Fge,
            "phi" => Op::Phi,
            "alloc" => Op::Alloc,
            "store" => Op::Store,
            "load" => Op::Load,
            "free" => Op::Free,
            "ptradd" => Op::Ptradd,
            _ => return Err(Error::UnknownOperator(s.to_string())),
        })
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A function argument.
#[derive(Debug, Clone, PartialEq)]
pub struct Argument {
    pub name: String,
    pub ty: Type,
}

/// One unit of a function body: a label marking a jump target, or an
/// instruction performing computation.
#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    Label(String),
    Instr(Instruction),
}

impl Item {
    /// Returns the instruction, if this item is one.
    #[must_use]
    pub const fn as_instr(&self) -> Option<&Instruction> {
        match self {
            Item::Instr(instr) => Some(instr),
            Item::Label(_) => None,
        }
    }

    /// Returns the label name, if this item is one.
    #[must_use]
    pub fn as_label(&self) -> Option<&str> {
        match self {
            Item::Label(label) => Some(label),
            Item::Instr(_) => None,
        }
    }
}

impl fmt::Display for Item {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Item::Label(label) => write!(f, ".{label}:"),
            Item::Instr(instr) => write!(f, "{instr}"),
        }
    }
}

/// A Bril instruction.
///
/// A *constant* produces a literal value, a *value operation* consumes
/// arguments and produces a value, and an *effect operation* consumes
/// arguments but produces nothing (jumps, branches, returns, calls as
/// statements, memory operations, prints).
#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    Constant {
        dest: String,
        ty: Type,
        value: Literal,
    },
    Value {
        op: Op,
        dest: String,
        ty: Type,
        args: Vec<String>,
        funcs: Vec<String>,
        labels: Vec<String>,
    },
    Effect {
        op: Op,
        args: Vec<String>,
        funcs: Vec<String>,
        labels: Vec<String>,
    },
}

impl Instruction {
    /// Returns this instruction's operator.
    #[must_use]
    pub const fn op(&self) -> Op {
        match self {
            Instruction::Constant { .. } => Op::Const,
            Instruction::Value { op, .. } | Instruction::Effect { op, .. } => *op,
        }
    }

    /// Returns the destination variable, if this instruction writes one.
    #[must_use]
    pub fn dest(&self) -> Option<&str> {
        match self {
            Instruction::Constant { dest, .. } | Instruction::Value { dest, .. } => {
                Some(dest.as_str())
            }
            Instruction::Effect { .. } => None,
        }
    }

    /// Returns the type of the destination variable, if this instruction
    /// writes one.
    #[must_use]
    pub const fn dest_type(&self) -> Option<&Type> {
        match self {
            Instruction::Constant { ty, .. } | Instruction::Value { ty, .. } => Some(ty),
            Instruction::Effect { .. } => None,
        }
    }

    /// Replaces the destination variable.
    ///
    /// # Panics
    ///
    /// Panics if the instruction is an effect operation, which has no
    /// destination to replace.
    pub fn set_dest(&mut self, name: String) {
        match self {
            Instruction::Constant { dest, .. } | Instruction::Value { dest, .. } => *dest = name,
            Instruction::Effect { .. } => {
                panic!("effect operations have no destination to replace")
            }
        }
    }

    /// Returns the ordered argument-name list this instruction reads.
    #[must_use]
    pub fn args(&self) -> &[String] {
        match self {
            Instruction::Constant { .. } => &[],
            Instruction::Value { args, .. } | Instruction::Effect { args, .. } => args,
        }
    }

    /// Returns the argument list for in-place rewriting, or `None` if this
    /// instruction reads nothing.
    #[must_use]
    pub const fn args_mut(&mut self) -> Option<&mut Vec<String>> {
        match self {
            Instruction::Constant { .. } => None,
            Instruction::Value { args, .. } | Instruction::Effect { args, .. } => Some(args),
        }
    }

    /// Returns the jump-target labels this instruction carries.
    #[must_use]
    pub fn labels(&self) -> &[String] {
        match self {
            Instruction::Constant { .. } => &[],
            Instruction::Value { labels, .. } | Instruction::Effect { labels, .. } => labels,
        }
    }

    /// Returns `true` if this instruction ends a basic block.
    #[must_use]
    pub const fn is_terminator(&self) -> bool {
        self.op().is_terminator()
    }

    /// Returns `true` if this instruction has no effect beyond producing a
    /// value.
    #[must_use]
    pub const fn is_pure(&self) -> bool {
        !self.op().is_impure()
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::Constant { dest, ty, value } => {
                write!(f, "{dest}: {ty} = const {value}")
            }
            Instruction::Value {
                op,
                dest,
                ty,
                args,
                funcs,
                labels,
            } => {
                write!(f, "{dest}: {ty} = {op}")?;
                fmt_operands(f, args, funcs, labels)
            }
            Instruction::Effect {
                op,
                args,
                funcs,
                labels,
            } => {
                write!(f, "{op}")?;
                fmt_operands(f, args, funcs, labels)
            }
        }
    }
}

fn fmt_operands(
    f: &mut fmt::Formatter<'_>,
    args: &[String],
    funcs: &[String],
    labels: &[String],
) -> fmt::Result {
    for func in funcs {
        write!(f, " @{func}")?;
    }
    for arg in args {
        write!(f, " {arg}")?;
    }
    for label in labels {
        write!(f, " .{label}")?;
    }
    Ok(())
}

/// A Bril function: a name, typed parameters, an optional return type, and an
/// ordered sequence of instruction-or-label items.
#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub name: String,
    pub args: Vec<Argument>,
    pub return_type: Option<Type>,
    pub instrs: Vec<Item>,
}

/// A Bril program: an ordered sequence of functions.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub functions: Vec<Function>,
}
