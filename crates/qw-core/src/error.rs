use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum WaveError {
    /// Empty, NaN or infinite embedding input.
    InvalidEmbedding(String),
    /// Fusion attempted with a zero-amplitude pattern.
    FusionOnDormant,
    NegativeMagnitude { field: &'static str, value: f64 },
    /// A stored or imported pattern breaks a structural invariant.
    InvariantViolation(String),
}

impl fmt::Display for WaveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WaveError::InvalidEmbedding(msg) => write!(f, "invalid embedding: {msg}"),
            WaveError::FusionOnDormant => write!(f, "cannot fuse a dormant (zero-amplitude) pattern"),
            WaveError::NegativeMagnitude { field, value } => {
                write!(f, "{field} must be non-negative, got {value}")
            }
            WaveError::InvariantViolation(msg) => write!(f, "invariant violation: {msg}"),
        }
    }
}

impl std::error::Error for WaveError {}

pub type Result<T> = std::result::Result<T, WaveError>;
