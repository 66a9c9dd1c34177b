//! # Core - Foundations for Hand-Differentiated Pipelines
//!
//! This crate provides the pieces every layer builds on:
//!
//! - **DTypes**: the closed set of element types and their promotion rule
//! - **Shapes**: declared shapes with a batch wildcard
//! - **Tensors**: dtype-tagged `ndarray` arrays with column-major helpers
//! - **Windows**: the sparse windowing algebra behind pooling and
//!   convolution-like products
//! - **Layers**: the forward/backward contract, runtime variables and the
//!   trainable-parameter capability
//! - **Errors**: shape, type, naming and configuration failures
//!
//! ## Design Philosophy
//!
//! No automatic differentiation. Each layer supplies its own analytic
//! backward map; this crate only fixes the contract and the bookkeeping
//! (shapes, dtypes, bindings) around it.

pub mod dtype;
pub mod error;
pub mod layer;
pub mod shape;
pub mod tensor;
pub mod windows;

pub use dtype::DType;
pub use error::{LayerError, Result};
pub use layer::{Gradient, Layer, RuntimeValue, RuntimeVars, SetMode, Signature, Tags, Trainable};
pub use shape::{normalize_axis, Dim, Shape};
pub use tensor::{Element, Tensor};
pub use windows::{compute_windows, Boundary, Windows};
