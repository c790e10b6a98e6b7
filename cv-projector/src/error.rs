use thiserror::Error;

/// Contract violations detected while projecting batches of points.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProjectionError {
    #[error("{what} has batch size {actual}, expected {expected}")]
    BatchMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("{what} has shape {actual:?}, expected {expected}")]
    Shape {
        what: &'static str,
        expected: &'static str,
        actual: Vec<usize>,
    },
    #[error("image of {height}x{width} is too small to normalize coordinates")]
    ImageTooSmall { height: usize, width: usize },
}

pub type Result<T> = std::result::Result<T, ProjectionError>;
