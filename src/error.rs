// Error types
// Every fallible operation of the query runtime returns DaoResult<T>

use thiserror::Error;

/// Errors raised by queries, lazy lists and the database collaborators
#[derive(Error, Debug)]
pub enum DaoError {
    /// A reserved or nonexistent parameter slot was addressed
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The operation is not possible in the current state
    /// (limit/offset not configured, list already closed, ...)
    #[error("Illegal state: {0}")]
    IllegalState(String),

    /// A lazy list was indexed outside of `[0, size)`
    #[error("Index {index} out of range for a result of {size} row(s)")]
    OutOfRange { index: usize, size: usize },

    /// A unique-result query matched more than one row
    #[error("Expected unique result, but count was {0}")]
    NonUniqueResult(usize),

    /// `unique_or_throw` matched no row
    #[error("No entity found for query")]
    EntityNotFound,

    /// The entity mapper could not decode a row
    #[error("Could not decode row: {0}")]
    Decode(String),

    /// The database failed to execute a statement
    #[error("SQL execution failed: {0:#}")]
    Execution(anyhow::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),
}

// anyhow::Error is not a std::error::Error, so #[from] can't be used here
impl From<anyhow::Error> for DaoError {
    fn from(err: anyhow::Error) -> Self {
        DaoError::Execution(err)
    }
}

/// Result type used throughout the crate
pub type DaoResult<T> = Result<T, DaoError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_error_keeps_context() {
        let err: DaoError = anyhow::anyhow!("no such table: t")
            .context("while running SELECT")
            .into();
        let message = err.to_string();
        assert!(message.contains("while running SELECT"));
        assert!(message.contains("no such table: t"));
    }

    #[test]
    fn test_non_unique_message() {
        assert_eq!(
            DaoError::NonUniqueResult(3).to_string(),
            "Expected unique result, but count was 3"
        );
    }
}
