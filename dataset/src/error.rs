use std::{fmt, io, path::PathBuf};

/// The result type used in the entire dataset crate.
pub type Result<T> = std::result::Result<T, DatasetErr>;

/// All errors that can occur while producing (mel, audio) pairs.
#[derive(Debug)]
pub enum DatasetErr {
    /// Failed to read a file list or an audio file.
    Io { path: PathBuf, source: io::Error },
    /// A file list resolved to zero entries.
    EmptyFileList(PathBuf),
    /// A WAV file could not be decoded.
    Wav {
        path: PathBuf,
        source: hound::Error,
    },
    /// A clip's sample rate disagrees with the configured one.
    SampleRateMismatch {
        path: PathBuf,
        got: u32,
        expected: u32,
    },
    /// A clip is not 16-bit mono PCM.
    UnsupportedWav { path: PathBuf, detail: String },
    /// The STFT configuration is unusable.
    InvalidStft(String),
    /// A clip is too short for the analysis window.
    ClipTooShort { samples: usize, needed: usize },
}

impl fmt::Display for DatasetErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { path, source } => write!(f, "io error on {}: {source}", path.display()),
            Self::EmptyFileList(path) => {
                write!(f, "file list {} contains no entries", path.display())
            }
            Self::Wav { path, source } => {
                write!(f, "failed to decode {}: {source}", path.display())
            }
            Self::SampleRateMismatch {
                path,
                got,
                expected,
            } => write!(
                f,
                "{} has sample rate {got}, config expects {expected}",
                path.display()
            ),
            Self::UnsupportedWav { path, detail } => {
                write!(f, "{} is not 16-bit mono PCM: {detail}", path.display())
            }
            Self::InvalidStft(msg) => write!(f, "invalid stft config: {msg}"),
            Self::ClipTooShort { samples, needed } => write!(
                f,
                "clip holds {samples} samples, the analysis window needs at least {needed}"
            ),
        }
    }
}

impl std::error::Error for DatasetErr {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Wav { source, .. } => Some(source),
            _ => None,
        }
    }
}
