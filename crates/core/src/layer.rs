//! # The Layer Contract
//!
//! Every operator is a `Layer`: it is built once from an input shape, an
//! input dtype and its attributes, which fixes its [`Signature`]. After
//! that it maps `x -> y` forward and `(x, y, dy) -> (d_params, dx)`
//! backward, any number of times.
//!
//! Trainable parameters are a separate capability, [`Trainable`], which
//! only the layers that own parameters implement.
//!
//! Some layers depend on values that are only known at run time (labels,
//! random seeds, precomputed statistics). They list those names in
//! [`Tags::runtimes`] and refuse to run until every one has been bound
//! through [`Layer::set_runtime_vars`].

use std::collections::HashMap;
use std::fmt;

use crate::dtype::DType;
use crate::error::{LayerError, Result};
use crate::shape::Shape;
use crate::tensor::Tensor;

/// Static properties of a layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tags {
    /// The layer may overwrite its input buffer.
    pub inplace: bool,
    /// Names that must be bound before forward/backward.
    pub runtimes: Vec<&'static str>,
    /// Highest derivative order supplied in closed form.
    pub analytical: u8,
}

impl Default for Tags {
    fn default() -> Self {
        Self {
            inplace: false,
            runtimes: Vec::new(),
            analytical: 1,
        }
    }
}

impl Tags {
    pub fn inplace(mut self, inplace: bool) -> Self {
        self.inplace = inplace;
        self
    }

    pub fn runtimes(mut self, names: &[&'static str]) -> Self {
        self.runtimes = names.to_vec();
        self
    }

    pub fn analytical(mut self, order: u8) -> Self {
        self.analytical = order;
        self
    }
}

/// Shapes, dtypes and tags frozen at construction.
#[derive(Debug, Clone, PartialEq)]
pub struct Signature {
    pub name: String,
    pub input_shape: Shape,
    pub output_shape: Shape,
    pub input_dtype: DType,
    pub output_dtype: DType,
    pub tags: Tags,
}

impl Signature {
    /// A signature whose output type equals its input type.
    pub fn new(
        name: impl Into<String>,
        input_shape: Shape,
        output_shape: Shape,
        dtype: DType,
    ) -> Self {
        Self::converting(name, input_shape, output_shape, dtype, dtype)
    }

    /// A signature whose output type differs from its input type.
    pub fn converting(
        name: impl Into<String>,
        input_shape: Shape,
        output_shape: Shape,
        input_dtype: DType,
        output_dtype: DType,
    ) -> Self {
        let sig = Self {
            name: name.into(),
            input_shape,
            output_shape,
            input_dtype,
            output_dtype,
            tags: Tags::default(),
        };
        tracing::debug!(
            layer = %sig.name,
            input = %sig.input_shape,
            output = %sig.output_shape,
            input_dtype = %input_dtype,
            output_dtype = %output_dtype,
            "layer constructed"
        );
        sig
    }

    /// Identity shape rule.
    pub fn pointwise(name: impl Into<String>, shape: Shape, dtype: DType) -> Self {
        Self::new(name, shape.clone(), shape, dtype)
    }

    pub fn with_tags(mut self, tags: Tags) -> Self {
        self.tags = tags;
        self
    }

    /// Validate a forward input.
    pub fn check_input(&self, x: &Tensor) -> Result<()> {
        check_tensor(x, self.input_dtype, &self.input_shape)
    }

    /// Validate the cached pair and upstream gradient of a backward call.
    pub fn check_backward(&self, x: &Tensor, y: &Tensor, dy: &Tensor) -> Result<()> {
        check_tensor(x, self.input_dtype, &self.input_shape)?;
        check_tensor(y, self.output_dtype, &self.output_shape)?;
        check_tensor(dy, self.output_dtype, &self.output_shape)?;
        if y.shape() != dy.shape() {
            return Err(LayerError::ShapeMismatch {
                expected: Shape::fixed(y.shape()),
                got: dy.shape().to_vec(),
            });
        }
        Ok(())
    }
}

fn check_tensor(t: &Tensor, dtype: DType, shape: &Shape) -> Result<()> {
    if t.dtype() != dtype {
        return Err(LayerError::DTypeMismatch {
            expected: dtype,
            got: t.dtype(),
        });
    }
    shape.check(t.shape())
}

/// Result of a backward call.
#[derive(Debug, Clone, PartialEq)]
pub struct Gradient {
    /// Flattened parameter gradient (empty for parameter-free layers).
    pub params: Tensor,
    /// Gradient with respect to the layer input.
    pub input: Tensor,
}

impl Gradient {
    /// Gradient of a layer without parameters.
    pub fn input_only(input: Tensor) -> Self {
        Self {
            params: Tensor::empty(input.dtype()),
            input,
        }
    }
}

/// A value bound to a layer after construction.
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeValue {
    Seed(u64),
    Tensor(Tensor),
}

/// Named runtime bindings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuntimeVars {
    values: HashMap<String, RuntimeValue>,
}

impl RuntimeVars {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_seed(mut self, name: &str, seed: u64) -> Self {
        self.values.insert(name.to_string(), RuntimeValue::Seed(seed));
        self
    }

    pub fn with_tensor(mut self, name: &str, value: Tensor) -> Self {
        self.values
            .insert(name.to_string(), RuntimeValue::Tensor(value));
        self
    }

    pub fn insert(&mut self, name: &str, value: RuntimeValue) {
        self.values.insert(name.to_string(), value);
    }

    pub fn get(&self, name: &str) -> Option<&RuntimeValue> {
        self.values.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Fail unless every name in `names` is bound.
    pub fn require(&self, layer: &str, names: &[&str]) -> Result<()> {
        match names.iter().find(|n| !self.contains(n)) {
            Some(name) => Err(LayerError::MissingRuntimeVar {
                layer: layer.to_string(),
                name: name.to_string(),
            }),
            None => Ok(()),
        }
    }

    pub fn seed(&self, name: &str) -> Result<u64> {
        match self.get(name) {
            Some(RuntimeValue::Seed(s)) => Ok(*s),
            Some(_) => Err(LayerError::InvalidRuntimeVar {
                name: name.to_string(),
                reason: "expected an integer seed".to_string(),
            }),
            None => Err(LayerError::InvalidRuntimeVar {
                name: name.to_string(),
                reason: "not bound".to_string(),
            }),
        }
    }

    pub fn tensor(&self, name: &str) -> Result<&Tensor> {
        match self.get(name) {
            Some(RuntimeValue::Tensor(t)) => Ok(t),
            Some(_) => Err(LayerError::InvalidRuntimeVar {
                name: name.to_string(),
                reason: "expected a tensor".to_string(),
            }),
            None => Err(LayerError::InvalidRuntimeVar {
                name: name.to_string(),
                reason: "not bound".to_string(),
            }),
        }
    }
}

/// A differentiable operator with a hand-written backward map.
pub trait Layer: fmt::Debug + Send {
    /// Shapes, dtypes and tags fixed at construction.
    fn signature(&self) -> &Signature;

    /// Compute `y` from `x`.
    fn forward(&mut self, x: &Tensor) -> Result<Tensor>;

    /// Compute `(d_params, dx)` from the cached pair `(x, y)` and `dy`.
    fn backward(&mut self, x: &Tensor, y: &Tensor, dy: &Tensor) -> Result<Gradient>;

    /// Forward pass that may consume `x`'s buffer.
    ///
    /// Layers tagged `inplace` override this; everything else copies.
    fn forward_inplace(&mut self, x: Tensor) -> Result<Tensor> {
        self.forward(&x)
    }

    /// Bind runtime variables. The default only checks presence.
    fn set_runtime_vars(&mut self, vars: &RuntimeVars) -> Result<()> {
        let sig = self.signature();
        vars.require(&sig.name, &sig.tags.runtimes)
    }

    fn as_trainable(&self) -> Option<&dyn Trainable> {
        None
    }

    fn as_trainable_mut(&mut self) -> Option<&mut dyn Trainable> {
        None
    }

    fn name(&self) -> &str {
        &self.signature().name
    }

    fn input_shape(&self) -> &Shape {
        &self.signature().input_shape
    }

    fn output_shape(&self) -> &Shape {
        &self.signature().output_shape
    }

    fn input_dtype(&self) -> DType {
        self.signature().input_dtype
    }

    fn output_dtype(&self) -> DType {
        self.signature().output_dtype
    }

    fn tags(&self) -> &Tags {
        &self.signature().tags
    }
}

/// How `set_variables` combines the new values with the old ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SetMode {
    #[default]
    Overwrite,
    Accumulate,
}

/// Layers that own trainable parameters.
pub trait Trainable {
    /// Length of the flattened parameter vector.
    fn num_variables(&self) -> usize;

    /// Parameters flattened in declaration order (weight, then bias).
    fn get_variables(&self) -> Tensor;

    /// Replace or accumulate into the parameters from a flattened vector.
    fn set_variables(&mut self, variables: &Tensor, mode: SetMode) -> Result<()>;
}
