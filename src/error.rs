//! Error types for the simulation engine.

use thiserror::Error;

/// Errors that can occur while building, stepping or exporting a simulation.
#[derive(Error, Debug)]
pub enum WireworldError {
    /// Grid width or height was zero.
    #[error("invalid dimensions: {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },

    /// A cell buffer did not match the grid it was meant for.
    #[error("size mismatch: expected {expected} cells, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },

    /// Allocation, compilation or dispatch failure inside the compute backend.
    #[error("backend resource error: {0}")]
    BackendResource(String),

    /// The image could not be decoded or encoded.
    #[error("image error: {0}")]
    Decode(#[from] image::ImageError),

    /// Filesystem access failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A palette color was not of the form `rrggbb`.
    #[error("invalid color {0:?}; expected form: rrggbb")]
    PaletteParse(String),

    /// A grid was bound in two roles at once.
    #[error("binding conflict: {0}")]
    BindingConflict(String),

    /// A previous backend failure left the simulation unusable.
    #[error("simulation faulted; reload it to continue")]
    Faulted,
}

/// Result type for engine operations.
pub type WireworldResult<T> = Result<T, WireworldError>;
