//! Error type shared by the numerical cores (fixed effects, SARIMA, isolation forest).
//!
//! I/O and CLI code keeps using `anyhow`; model code returns [`ModelError`] so
//! callers can tell a degenerate series apart from a broken file.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    /// Too few usable observations for the requested model.
    #[error("insufficient data: needed {needed}, got {got}")]
    InsufficientData { needed: usize, got: usize },

    /// Design matrix or covariance could not be inverted.
    #[error("singular system: {0}")]
    Singular(String),

    /// A NaN or infinity reached a place it must not.
    #[error("non-finite value: {0}")]
    NonFinite(String),

    /// The parameter search failed to produce a result.
    #[error("optimizer failure: {0}")]
    Optimizer(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

pub type ModelResult<T> = std::result::Result<T, ModelError>;
