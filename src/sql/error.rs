//! Runtime error types.

use thiserror::Error;

use super::runtime_types::ConversionError;

/// Errors raised while executing a query. Any of these aborts the query; the
/// driver joins surviving workers and reports the first recorded error.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ExecutionError {
    #[error("division by zero")]
    DivisionByZero,

    #[error(transparent)]
    Conversion(#[from] ConversionError),

    #[error("invalid cast from {from} to {to}")]
    InvalidCast { from: String, to: String },

    #[error("no function '{0}' in module")]
    MissingFunction(String),

    #[error("malformed bytecode at offset {0}")]
    MalformedBytecode(usize),

    #[error("unknown table id {0}")]
    UnknownTable(u16),

    #[error("not implemented: {0}")]
    NotImplemented(String),
}

pub type Result<T> = std::result::Result<T, ExecutionError>;
