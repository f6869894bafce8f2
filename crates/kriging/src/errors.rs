use thiserror::Error;

/// A result type for kriging algorithms
pub type Result<T> = std::result::Result<T, KrigingError>;

/// An error when fitting or using a [`Kriging`](crate::Kriging) model
#[derive(Error, Debug)]
pub enum KrigingError {
    /// When training data are inconsistent (length mismatch, empty set, zero dimension...)
    #[error("Validation error: {0}")]
    ValidationError(String),
    /// When a kernel, trend, optimizer or objective is unknown or badly specified
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
    /// When an operation requires a fitted model
    #[error("State error: {0}")]
    StateError(String),
    /// When a factorization cannot be recovered even with jitter
    #[error("Numerical error: {0}")]
    NumericalError(String),
    /// When linear algebra computation fails
    #[error(transparent)]
    LinalgError(#[from] linfa_linalg::LinalgError),
    /// When a linfa error occurs
    #[error(transparent)]
    LinfaError(#[from] linfa::error::Error),
    /// When saving a model fails
    #[cfg(feature = "persistent")]
    #[error("Save error: {0}")]
    SaveError(#[from] serde_json::Error),
    /// When error during loading
    #[error("Load IO error")]
    LoadIoError(#[from] std::io::Error),
}
