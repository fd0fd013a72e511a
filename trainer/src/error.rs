use std::{fmt, io, path::PathBuf};

use dataset::DatasetErr;
use dist::DistErr;
use glow::GlowErr;

/// All errors that can terminate the training driver.
#[derive(Debug)]
pub enum TrainerError {
    /// The run configuration could not be parsed.
    Config {
        path: PathBuf,
        source: serde_json::Error,
    },
    /// Single-process training requested on a non-zero rank.
    SingleProcessRank(usize),
    /// A split produced no full batches.
    EmptyLoader { split: &'static str },
    /// Checkpoint serialization or deserialization failed.
    Checkpoint(String),
    Dataset(DatasetErr),
    Dist(DistErr),
    Model(GlowErr),
    Audio(hound::Error),
    Io(io::Error),
}

impl fmt::Display for TrainerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config { path, source } => {
                write!(f, "failed to parse config {}: {source}", path.display())
            }
            Self::SingleProcessRank(rank) => {
                write!(f, "doing single process training on rank {rank} > 0")
            }
            Self::EmptyLoader { split } => {
                write!(f, "the {split} set yields no full batches")
            }
            Self::Checkpoint(msg) => write!(f, "checkpoint error: {msg}"),
            Self::Dataset(e) => write!(f, "dataset error: {e}"),
            Self::Dist(e) => write!(f, "distributed error: {e}"),
            Self::Model(e) => write!(f, "model error: {e}"),
            Self::Audio(e) => write!(f, "audio write error: {e}"),
            Self::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl std::error::Error for TrainerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Config { source, .. } => Some(source),
            Self::Dataset(e) => Some(e),
            Self::Dist(e) => Some(e),
            Self::Model(e) => Some(e),
            Self::Audio(e) => Some(e),
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<DatasetErr> for TrainerError {
    fn from(e: DatasetErr) -> Self {
        Self::Dataset(e)
    }
}

impl From<DistErr> for TrainerError {
    fn from(e: DistErr) -> Self {
        Self::Dist(e)
    }
}

impl From<GlowErr> for TrainerError {
    fn from(e: GlowErr) -> Self {
        Self::Model(e)
    }
}

impl From<hound::Error> for TrainerError {
    fn from(e: hound::Error) -> Self {
        Self::Audio(e)
    }
}

impl From<io::Error> for TrainerError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}
