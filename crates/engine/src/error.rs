//! Error kinds, per spec §7.
//!
//! Build-time errors (shape/precision/index math) are raised eagerly and
//! nothing partial is returned. Execution-time errors abort the current
//! step leaving the session exactly as it was before the step.

use crate::precision::Precision;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid model directory: {0}")]
    InvalidModelDirectory(String),

    #[error("shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    #[error("rank mismatch: expected rank {expected}, got rank {got}")]
    RankMismatch { expected: usize, got: usize },

    #[error("unsupported precision combination for {op}: {precisions:?}")]
    UnsupportedPrecisionCombo {
        op: &'static str,
        precisions: Vec<Precision>,
    },

    #[error("index {index} out of range (bound {bound})")]
    IndexOutOfRange { index: usize, bound: usize },

    #[error("buffer too small: needed {needed}, available {available}")]
    BufferTooSmall { needed: usize, available: usize },

    #[error("tokenization error: {0}")]
    TokenizationError(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
