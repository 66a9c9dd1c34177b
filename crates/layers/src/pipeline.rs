//! # Pipelines
//!
//! An ordered sequence of layers where each stage consumes the previous
//! stage's output. A training-style pass is `forward` (which keeps every
//! intermediate) followed by `backward`; `predict` is the cache-free
//! forward pass and lets in-place layers reuse buffers.
//!
//! ```rust
//! use handgrad_core::{DType, Shape, Tensor};
//! use handgrad_layers::elementwise::Exp;
//! use handgrad_layers::pipeline::Pipeline;
//! use handgrad_layers::reduce::Sum;
//! use ndarray::array;
//!
//! let mut net = Pipeline::new();
//! net.push(Box::new(Exp::new(Shape::fixed(&[2]), DType::Float64, &[]).unwrap())).unwrap();
//! net.push(Box::new(Sum::new(Shape::fixed(&[2]), DType::Float64, 0).unwrap())).unwrap();
//!
//! let x = Tensor::from(array![0.0, 0.0].into_dyn());
//! let y = net.forward(&x).unwrap();
//! assert_eq!(y, Tensor::from(ndarray::arr0(2.0).into_dyn()));
//!
//! let grads = net.backward(&Tensor::from(ndarray::arr0(1.0).into_dyn())).unwrap();
//! assert_eq!(grads.input, Tensor::from(array![1.0, 1.0].into_dyn()));
//! ```

use handgrad_core::{
    DType, Layer, LayerError, Result, RuntimeVars, SetMode, Shape, Tensor,
};

/// Gradients produced by [`Pipeline::backward`].
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineGradient {
    /// Parameter gradient of every stage, in stage order. Parameter-free
    /// stages contribute empty placeholders.
    pub params: Vec<Tensor>,
    /// Gradient with respect to the pipeline input.
    pub input: Tensor,
}

#[derive(Debug, Default)]
pub struct Pipeline {
    layers: Vec<Box<dyn Layer>>,
    /// Values seen by the last `forward`: the input, then every stage output.
    activations: Vec<Tensor>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a stage. Its input must accept the current output.
    pub fn push(&mut self, layer: Box<dyn Layer>) -> Result<()> {
        if let Some(last) = self.layers.last() {
            if last.output_dtype() != layer.input_dtype() {
                return Err(LayerError::Composition {
                    reason: format!(
                        "{} produces {} but {} expects {}",
                        last.name(),
                        last.output_dtype(),
                        layer.name(),
                        layer.input_dtype()
                    ),
                });
            }
            if !last.output_shape().is_compatible(layer.input_shape()) {
                return Err(LayerError::Composition {
                    reason: format!(
                        "{} produces {} but {} expects {}",
                        last.name(),
                        last.output_shape(),
                        layer.name(),
                        layer.input_shape()
                    ),
                });
            }
        }
        tracing::debug!(stage = self.layers.len(), layer = layer.name(), "stage added");
        self.layers.push(layer);
        self.activations.clear();
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn layers(&self) -> &[Box<dyn Layer>] {
        &self.layers
    }

    pub fn layer_mut(&mut self, index: usize) -> Option<&mut (dyn Layer + 'static)> {
        self.layers.get_mut(index).map(|l| l.as_mut())
    }

    pub fn input_shape(&self) -> Option<&Shape> {
        self.layers.first().map(|l| l.input_shape())
    }

    pub fn output_shape(&self) -> Option<&Shape> {
        self.layers.last().map(|l| l.output_shape())
    }

    pub fn output_dtype(&self) -> Option<DType> {
        self.layers.last().map(|l| l.output_dtype())
    }

    /// Run every stage, keeping the intermediates for `backward`.
    pub fn forward(&mut self, x: &Tensor) -> Result<Tensor> {
        self.activations.clear();
        let mut current = x.clone();
        for (stage, layer) in self.layers.iter_mut().enumerate() {
            let next = layer.forward(&current)?;
            tracing::debug!(stage, layer = layer.name(), shape = ?next.shape(), "forward");
            self.activations.push(current);
            current = next;
        }
        self.activations.push(current.clone());
        Ok(current)
    }

    /// Propagate `dy` back through the stages of the last `forward`.
    pub fn backward(&mut self, dy: &Tensor) -> Result<PipelineGradient> {
        if self.activations.len() != self.layers.len() + 1 {
            return Err(LayerError::Composition {
                reason: "backward called without a preceding forward".to_string(),
            });
        }
        let mut params = Vec::with_capacity(self.layers.len());
        let mut grad = dy.clone();
        for (stage, layer) in self.layers.iter_mut().enumerate().rev() {
            let x = &self.activations[stage];
            let y = &self.activations[stage + 1];
            let g = layer.backward(x, y, &grad)?;
            tracing::debug!(stage, layer = layer.name(), "backward");
            params.push(g.params);
            grad = g.input;
        }
        params.reverse();
        Ok(PipelineGradient {
            params,
            input: grad,
        })
    }

    /// Forward pass without caching. In-place stages reuse buffers.
    pub fn predict(&mut self, x: Tensor) -> Result<Tensor> {
        self.layers
            .iter_mut()
            .try_fold(x, |current, layer| layer.forward_inplace(current))
    }

    /// Hand `vars` to every stage that declares at least one of its names.
    pub fn set_runtime_vars(&mut self, vars: &RuntimeVars) -> Result<()> {
        for layer in &mut self.layers {
            if layer.tags().runtimes.iter().any(|n| vars.contains(n)) {
                layer.set_runtime_vars(vars)?;
                tracing::debug!(layer = layer.name(), "runtime variables bound");
            }
        }
        Ok(())
    }

    pub fn num_variables(&self) -> usize {
        self.layers
            .iter()
            .filter_map(|l| l.as_trainable())
            .map(|t| t.num_variables())
            .sum()
    }

    /// Parameters of every trainable stage, concatenated in stage order.
    pub fn get_variables(&self, dtype: DType) -> Tensor {
        let data: Vec<_> = self
            .layers
            .iter()
            .filter_map(|l| l.as_trainable())
            .flat_map(|t| t.get_variables().to_complex_vec())
            .collect();
        Tensor::from(ndarray::Array1::from(data).into_dyn()).cast(dtype)
    }

    /// Inverse of [`Pipeline::get_variables`].
    pub fn set_variables(&mut self, variables: &Tensor, mode: SetMode) -> Result<()> {
        if variables.shape() != [self.num_variables()] {
            return Err(LayerError::ShapeMismatch {
                expected: Shape::fixed(&[self.num_variables()]),
                got: variables.shape().to_vec(),
            });
        }
        let data = variables.to_complex_vec();
        let mut offset = 0;
        for layer in &mut self.layers {
            if let Some(t) = layer.as_trainable_mut() {
                let n = t.num_variables();
                let chunk = Tensor::from_fortran(&[n], data[offset..offset + n].to_vec())?;
                t.set_variables(&chunk, mode)?;
                offset += n;
            }
        }
        Ok(())
    }
}
