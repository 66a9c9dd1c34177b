//! # Configuration
//!
//! Serde descriptions of parameter-free layers and of whole pipelines.
//! Each stage takes its input shape and dtype from the stage before it,
//! so a configuration only names the pipeline input once:
//!
//! ```rust
//! use handgrad_layers::config::PipelineConfig;
//!
//! let config = PipelineConfig::from_json(r#"{
//!     "input_shape": [-1, 4],
//!     "dtype": "float64",
//!     "layers": [
//!         {"type": "tanh"},
//!         {"type": "softmax", "axis": 1},
//!         {"type": "sum", "axis": 1}
//!     ]
//! }"#).unwrap();
//! let net = config.build().unwrap();
//! assert_eq!(net.len(), 3);
//! ```

use handgrad_core::{Boundary, DType, Layer, LayerError, Result, Shape};
use ndarray::{ArrayD, IxDyn};
use serde::{Deserialize, Serialize};

use crate::activation::{Log2cosh, ReLU, Sigmoid};
use crate::cache::Cache;
use crate::dropout::DropOut;
use crate::elementwise::{
    ArcTan, Cos, Cosh, Exp, Log, Mod, Mul, Power, Sin, Sinh, SoftPlus, Tan, Tanh,
};
use crate::filter::Filter;
use crate::loss::{CrossEntropy, SoftMax, SoftMaxCrossEntropy, SquareLoss};
use crate::norm::{BatchNorm, EPS};
use crate::pipeline::Pipeline;
use crate::reduce::{Mean, Sum};
use crate::structural::{Reshape, Transpose, TypeCast};
use crate::windowed::{ConvProd, PoolMode, Pooling};

fn default_eps() -> f64 {
    EPS
}

/// One layer, minus its input shape and dtype.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LayerConfig {
    Sin,
    Cos,
    Sinh,
    Cosh,
    Tan,
    Tanh,
    #[serde(rename = "arctan")]
    ArcTan,
    Exp,
    Log,
    #[serde(rename = "softplus")]
    SoftPlus,
    Mul {
        alpha: f64,
    },
    Mod {
        n: f64,
    },
    Power {
        order: f64,
    },
    Sigmoid,
    Log2cosh,
    #[serde(rename = "relu")]
    ReLU {
        #[serde(default)]
        leak: f64,
    },
    Sum {
        axis: isize,
    },
    Mean {
        axis: isize,
    },
    Reshape {
        output_shape: Shape,
    },
    Transpose {
        axes: Vec<isize>,
    },
    #[serde(rename = "typecast")]
    TypeCast {
        dtype: DType,
    },
    #[serde(rename = "dropout")]
    DropOut {
        keep_rate: f64,
        axis: isize,
        #[serde(default)]
        inplace: bool,
    },
    #[serde(rename = "softmax")]
    SoftMax {
        axis: isize,
    },
    CrossEntropy {
        axis: isize,
    },
    #[serde(rename = "softmax_cross_entropy")]
    SoftMaxCrossEntropy {
        axis: isize,
    },
    SquareLoss,
    Pooling {
        kernel_shape: Vec<usize>,
        mode: PoolMode,
        #[serde(default)]
        strides: Option<Vec<usize>>,
        #[serde(default)]
        boundary: Boundary,
    },
    /// `powers` lists the kernel exponents in row-major order.
    ConvProd {
        kernel_shape: Vec<usize>,
        powers: Vec<i32>,
        #[serde(default)]
        strides: Option<Vec<usize>>,
        #[serde(default)]
        boundary: Boundary,
    },
    Filter {
        momentum: Vec<f64>,
        axes: Vec<isize>,
    },
    BatchNorm {
        #[serde(default)]
        axis: Option<isize>,
        #[serde(default = "default_eps")]
        eps: f64,
    },
    Cache,
}

impl LayerConfig {
    /// Construct the described layer for inputs of `input_shape` and `dtype`.
    pub fn build(&self, input_shape: Shape, dtype: DType) -> Result<Box<dyn Layer>> {
        let s = input_shape;
        let layer: Box<dyn Layer> = match self {
            LayerConfig::Sin => Box::new(Sin::new(s, dtype, &[])?),
            LayerConfig::Cos => Box::new(Cos::new(s, dtype, &[])?),
            LayerConfig::Sinh => Box::new(Sinh::new(s, dtype, &[])?),
            LayerConfig::Cosh => Box::new(Cosh::new(s, dtype, &[])?),
            LayerConfig::Tan => Box::new(Tan::new(s, dtype, &[])?),
            LayerConfig::Tanh => Box::new(Tanh::new(s, dtype, &[])?),
            LayerConfig::ArcTan => Box::new(ArcTan::new(s, dtype, &[])?),
            LayerConfig::Exp => Box::new(Exp::new(s, dtype, &[])?),
            LayerConfig::Log => Box::new(Log::new(s, dtype, &[])?),
            LayerConfig::SoftPlus => Box::new(SoftPlus::new(s, dtype, &[])?),
            LayerConfig::Mul { alpha } => Box::new(Mul::new(s, dtype, &[("alpha", *alpha)])?),
            LayerConfig::Mod { n } => Box::new(Mod::new(s, dtype, &[("n", *n)])?),
            LayerConfig::Power { order } => {
                Box::new(Power::new(s, dtype, &[("order", *order)])?)
            }
            LayerConfig::Sigmoid => Box::new(Sigmoid::new(s, dtype, &[])?),
            LayerConfig::Log2cosh => Box::new(Log2cosh::new(s, dtype, &[])?),
            LayerConfig::ReLU { leak } => Box::new(ReLU::new(s, dtype, *leak)?),
            LayerConfig::Sum { axis } => Box::new(Sum::new(s, dtype, *axis)?),
            LayerConfig::Mean { axis } => Box::new(Mean::new(s, dtype, *axis)?),
            LayerConfig::Reshape { output_shape } => {
                Box::new(Reshape::new(s, dtype, output_shape.clone())?)
            }
            LayerConfig::Transpose { axes } => Box::new(Transpose::new(s, dtype, axes)?),
            LayerConfig::TypeCast { dtype: to } => Box::new(TypeCast::new(s, dtype, *to)),
            LayerConfig::DropOut {
                keep_rate,
                axis,
                inplace,
            } => Box::new(DropOut::new(s, dtype, *keep_rate, *axis)?.inplace(*inplace)),
            LayerConfig::SoftMax { axis } => Box::new(SoftMax::new(s, dtype, *axis)?),
            LayerConfig::CrossEntropy { axis } => Box::new(CrossEntropy::new(s, dtype, *axis)?),
            LayerConfig::SoftMaxCrossEntropy { axis } => {
                Box::new(SoftMaxCrossEntropy::new(s, dtype, *axis)?)
            }
            LayerConfig::SquareLoss => Box::new(SquareLoss::new(s, dtype)),
            LayerConfig::Pooling {
                kernel_shape,
                mode,
                strides,
                boundary,
            } => Box::new(Pooling::new(
                s,
                dtype,
                kernel_shape,
                *mode,
                strides.clone(),
                *boundary,
            )?),
            LayerConfig::ConvProd {
                kernel_shape,
                powers,
                strides,
                boundary,
            } => {
                let powers = ArrayD::from_shape_vec(IxDyn(kernel_shape), powers.clone())
                    .map_err(|e| LayerError::Config {
                        reason: format!("powers do not fit kernel {kernel_shape:?}: {e}"),
                    })?;
                Box::new(ConvProd::new(s, dtype, powers, strides.clone(), *boundary)?)
            }
            LayerConfig::Filter { momentum, axes } => {
                Box::new(Filter::new(s, dtype, momentum, axes)?)
            }
            LayerConfig::BatchNorm { axis, eps } => {
                Box::new(BatchNorm::new(s, dtype, *axis)?.with_eps(*eps))
            }
            LayerConfig::Cache => Box::new(Cache::new(s, dtype)),
        };
        Ok(layer)
    }
}

/// A pipeline: input shape and dtype plus the stages in order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub input_shape: Shape,
    pub dtype: DType,
    pub layers: Vec<LayerConfig>,
}

impl PipelineConfig {
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| LayerError::Config {
            reason: e.to_string(),
        })
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| LayerError::Config {
            reason: e.to_string(),
        })
    }

    pub fn build(&self) -> Result<Pipeline> {
        let mut net = Pipeline::new();
        let mut shape = self.input_shape.clone();
        let mut dtype = self.dtype;
        for config in &self.layers {
            let layer = config.build(shape, dtype)?;
            shape = layer.output_shape().clone();
            dtype = layer.output_dtype();
            net.push(layer)?;
        }
        tracing::debug!(stages = net.len(), "pipeline built from configuration");
        Ok(net)
    }
}
