//! Error types and reporting macros.

use thiserror::Error;

/// Errors surfaced while ingesting a Bril program.
///
/// Analysis and transformation passes do not produce these: once a program
/// has been cooked into the typed representation, a failed lookup inside a
/// pass is a programming-contract breach and panics instead.
#[derive(Debug, Error)]
pub enum Error {
    /// An operator string with no corresponding typed operator.
    #[error("unknown operator '{0}'")]
    UnknownOperator(String),
    /// A type that is neither a known primitive nor a known parametrized type.
    #[error("unknown type '{0}'")]
    UnknownType(String),
    /// An instruction missing a field its operator shape requires.
    #[error("malformed instruction: {0}")]
    MalformedInstruction(String),
    /// The input was not valid program JSON.
    #[error("invalid program JSON: {0}")]
    Json(#[from] serde_json::Error),
    /// The input could not be read.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Report a generic error message, printing to `stderr`.
#[macro_export]
macro_rules! report_err {
    ($program:expr, $($arg:tt)+) => {{
        eprintln!("\x1b[1;1m{}\x1b[0m: \x1b[1;31merror:\x1b[0m {}", $program, format!($($arg)+));
    }};
}
