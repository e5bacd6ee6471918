use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the signal, editing and persistence layers.
#[derive(Debug, Error)]
pub enum PhysioError {
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("invalid index {index}: {reason}")]
    InvalidIndex { index: usize, reason: String },
    #[error("no peak at index {0}")]
    NotFound(usize),
    #[error("nothing to undo in this session")]
    NothingToUndo,
    #[error("editing session already closed")]
    SessionClosed,
    #[error("insufficient data: {peaks} peak(s), at least 2 required")]
    InsufficientData { peaks: usize },
    #[error("config error: {0}")]
    Config(String),
    #[error("corrupt history artifact {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl PhysioError {
    pub fn invalid_parameter(msg: impl Into<String>) -> Self {
        Self::InvalidParameter(msg.into())
    }

    pub fn invalid_index(index: usize, reason: impl Into<String>) -> Self {
        Self::InvalidIndex {
            index,
            reason: reason.into(),
        }
    }

    /// Editor misuse the operator can recover from without leaving the session.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::InvalidIndex { .. } | Self::NotFound(_) | Self::NothingToUndo
        )
    }
}

pub type PhysioResult<T> = Result<T, PhysioError>;
