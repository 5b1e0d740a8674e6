//! Error types shared by every stage of the denominator computation.

use thiserror::Error;

/// Errors raised while building models or running the forward-backward engine.
///
/// None of these are transient: each one points at a malformed model, a
/// caller passing inconsistent matrices, or a numerical fault, and the
/// computation that raised it produces no partial result.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum Error {
    /// The transition model or the HMM derived from it is malformed.
    #[error("invalid model: {0}")]
    InvalidModel(String),

    /// Matrix shapes or the sequence count disagree with each other or with the model.
    #[error("dimension mismatch: {0}")]
    DimensionMismatch(String),

    /// A zero or non-finite denominator, output or forward/backward mass.
    #[error("numerical error: {0}")]
    Numerical(String),

    /// `forward`/`backward` called out of order on one engine.
    #[error("invalid call order: {0}")]
    CallOrder(String),

    /// Bad argument or option value.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
