use crate::backend::ExeContext;
use std::ffi::OsString;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid arguments: {0}")]
    Args(#[from] pico_args::Error),

    #[error("unused arguments: {0:?}")]
    UnusedArguments(Vec<OsString>),

    #[error("unknown execution context `{0}` (expected `numpy` or `gpu`)")]
    UnknownContext(String),

    #[error("execution context `{0}` is not available in this build (enable the `wgpu` feature)")]
    ContextUnavailable(ExeContext),

    #[error("{path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path:?}: malformed idx file: {reason}")]
    Idx { path: PathBuf, reason: String },

    #[error("could not determine the home directory for the dataset cache")]
    NoHomeDir,

    #[error("{path:?}: failed to load config: {reason}")]
    Config { path: PathBuf, reason: String },

    #[error("invalid model config: {0}")]
    InvalidConfig(String),

    #[error("{path:?}: failed to record the model: {reason}")]
    Record { path: PathBuf, reason: String },

    #[error("batch size must be greater than zero")]
    ZeroBatchSize,

    #[error("{split} split has {len} items, fewer than one batch of {batch_size}")]
    SplitTooSmall {
        split: &'static str,
        len: usize,
        batch_size: usize,
    },
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}
