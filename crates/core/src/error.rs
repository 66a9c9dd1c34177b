//! # Error Types
//!
//! Shape and attribute errors surface when a layer is constructed, before
//! any data flows. Configuration errors (missing runtime bindings) surface
//! on the first forward/backward call. Numeric edge cases are not errors:
//! they propagate as non-finite values.

use thiserror::Error;

use crate::dtype::DType;
use crate::shape::Shape;

/// Errors raised while building or running layers.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum LayerError {
    /// Axis argument outside `[-rank, rank)`.
    #[error("Invalid axis {axis} for rank {rank}")]
    InvalidAxis { axis: isize, rank: usize },

    /// A tensor does not have the shape a layer was built for.
    #[error("Shape mismatch: expected {expected}, got {got:?}")]
    ShapeMismatch { expected: Shape, got: Vec<usize> },

    /// A shape argument is malformed (wrong length, wildcard where a fixed
    /// extent is needed, element counts that disagree, ...).
    #[error("Invalid shape: {reason}")]
    InvalidShape { reason: String },

    /// Kernel/stride arguments of the windowing algebra are invalid.
    #[error("Invalid kernel: {reason}")]
    InvalidKernel { reason: String },

    /// A tensor carries a different dtype than expected.
    #[error("DType mismatch: expected {expected}, got {got}")]
    DTypeMismatch { expected: DType, got: DType },

    /// A dtype name outside the supported set.
    #[error("Unsupported dtype: {name}")]
    UnsupportedDType { name: String },

    /// Type or attribute names that are not valid identifiers.
    #[error("Invalid name {name:?}: {reason}")]
    InvalidName { name: String, reason: String },

    /// A required attribute has no default and was not supplied.
    #[error("You must specify attribute `{name}` for {layer}")]
    MissingAttribute { layer: String, name: String },

    /// An attribute was supplied that the layer does not declare.
    #[error("Unknown attribute `{name}` for {layer}")]
    UnknownAttribute { layer: String, name: String },

    /// An attribute value is out of its valid range.
    #[error("Invalid attribute `{name}`: {reason}")]
    InvalidAttribute { name: String, reason: String },

    /// A runtime variable has not been bound yet.
    #[error("Runtime variable `{name}` of {layer} is not set, bind it with set_runtime_vars first")]
    MissingRuntimeVar { layer: String, name: String },

    /// A runtime variable was bound with the wrong kind of value.
    #[error("Runtime variable `{name}`: {reason}")]
    InvalidRuntimeVar { name: String, reason: String },

    /// Two stages of a pipeline cannot be chained.
    #[error("Cannot compose: {reason}")]
    Composition { reason: String },

    /// Malformed layer configuration.
    #[error("Invalid configuration: {reason}")]
    Config { reason: String },
}

/// Result alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, LayerError>;
