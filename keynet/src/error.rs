use cv_projector::ProjectionError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{what} has shape {actual:?}, expected {expected}")]
    Shape {
        what: &'static str,
        expected: String,
        actual: Vec<usize>,
    },
    #[error("cannot select {requested} {what} out of {available} candidates")]
    InsufficientCandidates {
        what: &'static str,
        requested: usize,
        available: usize,
    },
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("projection failed: {0}")]
    Projection(#[from] ProjectionError),
    #[error("memory swap file {path} could not be accessed: {source}")]
    SwapIo {
        path: std::path::PathBuf,
        source: std::io::Error,
    },
    #[error("memory swap file could not be encoded or decoded: {0}")]
    SwapEncoding(#[from] bincode::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Builds an [`Error::Shape`] from any array shape.
pub(crate) fn shape_error(what: &'static str, expected: impl Into<String>, actual: &[usize]) -> Error {
    Error::Shape {
        what,
        expected: expected.into(),
        actual: actual.to_vec(),
    }
}
