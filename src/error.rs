//! Error types for the recursive-union executor

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ExecError>;

#[derive(Error, Debug)]
pub enum ExecError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("Data corruption: {0}")]
    Corruption(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Type error: {0}")]
    TypeError(String),

    #[error("Column not found: {0}")]
    ColumnNotFound(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Division by zero")]
    DivisionByZero,

    #[error("Config error: {0}")]
    Config(String),

    #[error("Query cancelled")]
    Cancelled,
}

impl From<bincode::Error> for ExecError {
    fn from(err: bincode::Error) -> Self {
        ExecError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for ExecError {
    fn from(err: serde_json::Error) -> Self {
        ExecError::Config(err.to_string())
    }
}
