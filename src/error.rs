use thiserror::Error;

/// Oracle-layer error type.
pub type OracleError = Box<dyn std::error::Error + Send + Sync>;

/// Crate result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// Oracle error wrapper.
    #[error("oracle error: {0}")]
    Oracle(#[source] OracleError),
    /// Invalid identifier input.
    #[error("invalid id: {0}")]
    InvalidId(String),
    /// Invalid permission input.
    #[error("invalid permission: {0}")]
    InvalidPermission(String),
}

impl From<OracleError> for Error {
    fn from(error: OracleError) -> Self {
        Self::Oracle(error)
    }
}
