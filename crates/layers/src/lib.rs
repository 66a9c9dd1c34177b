//! # Layers - Hand-Differentiated Operator Catalog
//!
//! Every layer here implements [`Layer`](handgrad_core::Layer) with a
//! hand-written backward map:
//!
//! - **Pointwise**: trigonometric, hyperbolic, exponential and scaling
//!   functions built through the [`factory`], plus sigmoid-family
//!   activations and ReLU
//! - **Reductions**: `Sum` and `Mean` along an axis
//! - **Structural**: reshape, transpose, dtype cast
//! - **Stochastic**: seeded dropout
//! - **Losses**: softmax, cross entropy and square loss
//! - **Windowed**: pooling and convolution products over the windowing
//!   algebra, plus a plane-wave filter
//! - **Trainable**: `Linear` and `Apdot`
//!
//! [`pipeline::Pipeline`] chains layers, [`config`] builds them from serde
//! descriptions and [`check`] verifies backward maps numerically.
//!
//! ## Example
//!
//! ```rust
//! use handgrad_core::{DType, Layer, Shape, Tensor};
//! use handgrad_layers::reduce::Sum;
//! use ndarray::array;
//!
//! let mut sum = Sum::new(Shape::fixed(&[3]), DType::Float64, 0).unwrap();
//! let x = Tensor::from(array![1.0, 2.0, 3.0].into_dyn());
//! let y = sum.forward(&x).unwrap();
//! assert_eq!(y.to_real_vec(), vec![6.0]);
//! ```

pub mod activation;
pub mod cache;
pub mod check;
pub mod config;
pub mod dropout;
pub mod elementwise;
pub mod factory;
pub mod filter;
pub mod kernels;
pub mod linear;
pub mod loss;
pub mod norm;
pub mod pipeline;
pub mod reduce;
pub mod structural;
pub mod windowed;

pub use activation::{Log2cosh, ReLU, Sigmoid};
pub use cache::Cache;
pub use check::{check_numdiff, check_numdiff_variables, GradCheckError};
pub use config::{LayerConfig, PipelineConfig};
pub use dropout::DropOut;
pub use factory::{AttrDecl, Pointwise, Wrapped};
pub use filter::Filter;
pub use linear::{Apdot, GradMask, Linear};
pub use loss::{CrossEntropy, SoftMax, SoftMaxCrossEntropy, SquareLoss};
pub use norm::BatchNorm;
pub use pipeline::{Pipeline, PipelineGradient};
pub use reduce::{Mean, Sum};
pub use structural::{Reshape, Transpose, TypeCast};
pub use windowed::{ConvProd, PoolMode, Pooling};
