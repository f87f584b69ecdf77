use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed input at {}:{line}: {reason}", .path.display())]
    Malformed {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("vocabulary error: {0}")]
    Vocabulary(String),

    #[error("tokenizer error: {0}")]
    Tokenizer(String),

    #[error("candle error: {0}")]
    Candle(#[from] candle_core::Error),

    #[error("scorer failed: {0}")]
    Scorer(String),

    #[error("scorer did not finish within {0:?}")]
    ScorerTimeout(Duration),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("serde_json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("nothing to evaluate: {0}")]
    EmptyEvaluation(&'static str),
}

pub(crate) fn malformed<P: Into<PathBuf>, S: Into<String>>(path: P, line: usize, reason: S) -> Error {
    Error::Malformed {
        path: path.into(),
        line,
        reason: reason.into(),
    }
}
