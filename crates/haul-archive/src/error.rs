use std::fmt;
use std::io;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unrecognized archive format: {reason}")]
    UnrecognizedFormat { reason: String },

    #[error("refusing to extract {format} file")]
    RefusedFormat { format: String },

    #[error("could not open '{name}': {source}")]
    OpenFailed {
        name: String,
        #[source]
        source: BoxError,
    },

    #[error("{phase} failed ({context}): {source}")]
    ExtractFailed {
        phase: Phase,
        context: String,
        #[source]
        source: BoxError,
    },

    /// A checkpoint save asked the extractor to stop. Not a failure.
    #[error("extraction stopped after saving a checkpoint")]
    StoppedForCheckpoint,

    #[error("stage two failed for '{path}' during {step}: {source}")]
    StageTwoFailed {
        path: String,
        step: StageTwoStep,
        #[source]
        source: Box<Error>,
    },

    #[error("entry path escapes the destination: '{path}'")]
    UnsafePath { path: String },

    #[error("symlink target escapes the destination: '{link}' -> '{target}'")]
    SymlinkEscape { link: String, target: String },

    #[error("entry '{path}' would be written through symlinked directory '{link}'")]
    LinkedParent { path: String, link: String },

    #[error("cannot use a released extractor")]
    Released,

    #[error("could not provision native dependency '{name}'")]
    MissingDependency { name: String },

    #[error("invalid checkpoint: {0}")]
    Checkpoint(#[from] serde_json::Error),

    #[error(transparent)]
    Fs(#[from] haul_fs::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn extract(phase: Phase, context: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::ExtractFailed {
            phase,
            context: context.into(),
            source: source.into(),
        }
    }

    pub fn open(name: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::OpenFailed {
            name: name.into(),
            source: source.into(),
        }
    }

    /// Whether this is the checkpoint stop signal rather than a real failure.
    pub fn is_stop(&self) -> bool {
        matches!(self, Self::StoppedForCheckpoint)
    }
}

/// Which part of an extraction run failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Preallocate,
    Extract,
    Finalize,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Preallocate => "preallocate",
            Self::Extract => "extract",
            Self::Finalize => "finalize",
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StageTwoStep {
    Open,
    Probe,
    GetExtractor,
    Extract,
    CloseSink,
}

impl fmt::Display for StageTwoStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Open => "open",
            Self::Probe => "probe",
            Self::GetExtractor => "get-extractor",
            Self::Extract => "extract",
            Self::CloseSink => "close-sink",
        })
    }
}
