use std::{
    error::Error,
    fmt::{self, Display},
};

/// The result type used in the entire model crate.
pub type Result<T> = std::result::Result<T, GlowErr>;

/// The model crate's error type.
#[derive(Debug)]
pub enum GlowErr {
    ShapeMismatch {
        what: &'static str,
        got: usize,
        expected: usize,
    },
    NotGroupable {
        samples: usize,
        n_group: usize,
    },
    InvalidConfig(String),
    InvalidSigma(f32),
    MissingForward,
}

impl Display for GlowErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GlowErr::ShapeMismatch {
                what,
                got,
                expected,
            } => {
                write!(f, "Shape mismatch on {what}, got {got} and expected {expected}")
            }
            GlowErr::NotGroupable { samples, n_group } => write!(
                f,
                "Audio length {samples} is not divisible into groups of {n_group}"
            ),
            GlowErr::InvalidConfig(msg) => write!(f, "Invalid model config: {msg}"),
            GlowErr::InvalidSigma(sigma) => {
                write!(f, "Sampling sigma must be a positive finite number, got {sigma}")
            }
            GlowErr::MissingForward => {
                write!(f, "Backward was called without a preceding forward pass")
            }
        }
    }
}

impl Error for GlowErr {}
