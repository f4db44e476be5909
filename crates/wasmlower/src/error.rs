//! Typed errors for the decode and lowering pipeline.
//!
//! Every stage fails fast: the first error aborts the module. The CLI and
//! cache layer wrap these in `anyhow` with context.

use thiserror::Error;

/// Byte-level encoding faults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LexError {
    #[error("unexpected end of input")]
    UnexpectedEof,
    #[error("integer representation too long or out of range")]
    IntegerOverflow,
    #[error("malformed UTF-8 encoding")]
    InvalidUtf8,
}

#[derive(Debug, Error)]
pub enum Error {
    /// Malformed byte-level encoding.
    #[error("lexing error at offset {offset:#x}: {kind}")]
    Lexing { offset: usize, kind: LexError },

    /// Structurally invalid input (bad header, unknown opcode, size mismatch,
    /// invalid kind tag).
    #[error("parsing error at offset {offset:#x}: {message}")]
    Parsing { offset: usize, message: String },

    /// The compile-time operand stack does not hold the expected types.
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },

    #[error("operand stack underflow: needed {needed} value(s), {available} available")]
    StackUnderflow { needed: usize, available: usize },

    #[error("invalid local index {0}")]
    InvalidLocalIndex(u32),

    /// The module is well-formed but semantically illegal.
    #[error("validation error: {0}")]
    Validation(String),

    /// The input was not binary and failed to parse as WebAssembly text.
    #[error("text format error: {0}")]
    Text(#[from] wat::Error),
}

impl Error {
    pub(crate) fn parsing(offset: usize, message: impl Into<String>) -> Self {
        Error::Parsing {
            offset,
            message: message.into(),
        }
    }

    pub(crate) fn mismatch(expected: impl ToString, found: impl ToString) -> Self {
        Error::TypeMismatch {
            expected: expected.to_string(),
            found: found.to_string(),
        }
    }

    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Error::Validation(message.into())
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
