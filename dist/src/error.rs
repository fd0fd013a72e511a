use std::{fmt, io};

/// The result type used in the entire dist crate.
pub type Result<T> = std::result::Result<T, DistErr>;

/// All errors that can occur in the process group.
#[derive(Debug)]
pub enum DistErr {
    /// Invalid rank/world combination — caught before connecting.
    InvalidRank { rank: usize, world_size: usize },
    /// A peer presented the wrong group name.
    GroupMismatch { expected: String, got: String },
    /// A peer presented a rank outside the group, or a duplicate one.
    BadPeerRank { rank: usize },
    /// The coordinator could not be reached.
    ConnectFailed { addr: String, source: io::Error },
    /// An underlying I/O error, including wire protocol violations.
    Io(io::Error),
}

impl fmt::Display for DistErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidRank { rank, world_size } => {
                write!(f, "rank {rank} is invalid for a group of {world_size}")
            }
            Self::GroupMismatch { expected, got } => {
                write!(f, "peer joined group '{got}', expected '{expected}'")
            }
            Self::BadPeerRank { rank } => write!(f, "peer presented unusable rank {rank}"),
            Self::ConnectFailed { addr, source } => {
                write!(f, "failed to reach coordinator at {addr}: {source}")
            }
            Self::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl std::error::Error for DistErr {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ConnectFailed { source, .. } => Some(source),
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for DistErr {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}
