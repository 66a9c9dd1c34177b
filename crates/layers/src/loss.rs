//! # Probabilities and Losses
//!
//! | Layer | Shape | Forward | Backward |
//! |-------|-------|---------|----------|
//! | SoftMax | identity | `exp(x − max) / Σ exp(x − max)` | `dy·y − (Σ dy·y)·y` |
//! | CrossEntropy | drop axis | `−Σ t·log(max(x, ε))` | `−dy·t / max(x, ε)` |
//! | SoftMaxCrossEntropy | drop axis | `Σ (log Z + max − x)·t` | `dy·(softmax(x) − t)` |
//! | SquareLoss | identity | `conj(x − t)·(x − t)` | `2(x − t)·dy`, or `(x − t)·dy` if complex |
//!
//! `t` is the runtime variable `y_true`. It is cast to the layer's input
//! dtype when bound and must have the same shape as `x`.
//!
//! The fused `SoftMaxCrossEntropy` is kept separate from `SoftMax`
//! followed by `CrossEntropy`: it never materialises probabilities that
//! could underflow to zero.

use handgrad_core::{
    dispatch, DType, Element, Gradient, Layer, LayerError, Result, RuntimeVars, Shape, Signature,
    Tags, Tensor,
};
use ndarray::{ArrayD, Axis};

/// Floor applied to probabilities before taking their logarithm.
pub const ZERO_REF: f64 = 1e-15;

/// `x` minus its per-lane maximum (by real part) along `axis`.
fn shift_by_max<T: Element>(x: &ArrayD<T>, axis: usize) -> ArrayD<T> {
    let max = x
        .map_axis(Axis(axis), |lane| {
            lane.iter().map(|v| v.real()).fold(f64::NEG_INFINITY, f64::max)
        })
        .mapv(T::from_real)
        .insert_axis(Axis(axis));
    x - &max
}

/// Returns the shifted input, `exp` of it and the partition function with
/// the reduced axis kept.
fn partition<T: Element>(x: &ArrayD<T>, axis: usize) -> (ArrayD<T>, ArrayD<T>, ArrayD<T>) {
    let shifted = shift_by_max(x, axis);
    let rho = shifted.mapv(|v| v.exp());
    let z = rho.sum_axis(Axis(axis)).insert_axis(Axis(axis));
    (shifted, rho, z)
}

fn softmax<T: Element>(x: &ArrayD<T>, axis: usize) -> ArrayD<T> {
    let (_, rho, z) = partition(x, axis);
    rho / &z
}

/// `dy` with the reduced axis reinserted, for broadcasting.
fn expand<T: Element>(dy: &Tensor, axis: usize) -> Result<ndarray::ArrayViewD<'_, T>> {
    Ok(dy.view::<T>()?.view().insert_axis(Axis(axis)))
}

/// The bound `y_true`, shared by every loss layer.
#[derive(Debug, Clone, Default)]
struct Target {
    y_true: Option<Tensor>,
}

impl Target {
    fn bind(&mut self, sig: &Signature, vars: &RuntimeVars) -> Result<()> {
        vars.require(&sig.name, &sig.tags.runtimes)?;
        let y_true = vars.tensor("y_true")?.cast(sig.input_dtype);
        tracing::debug!(layer = %sig.name, shape = ?y_true.shape(), "y_true bound");
        self.y_true = Some(y_true);
        Ok(())
    }

    fn get<T: Element>(&self, sig: &Signature, x: &ArrayD<T>) -> Result<&ArrayD<T>> {
        let y_true = self.y_true.as_ref().ok_or_else(|| LayerError::MissingRuntimeVar {
            layer: sig.name.clone(),
            name: "y_true".to_string(),
        })?;
        if y_true.shape() != x.shape() {
            return Err(LayerError::InvalidRuntimeVar {
                name: "y_true".to_string(),
                reason: format!(
                    "shape {:?} does not match input shape {:?}",
                    y_true.shape(),
                    x.shape()
                ),
            });
        }
        y_true.view::<T>()
    }
}

fn reduced(name: &str, input_shape: Shape, dtype: DType, axis: isize) -> Result<(Signature, usize)> {
    let axis = input_shape.axis(axis)?;
    let output_shape = input_shape.remove_axis(axis);
    let sig = Signature::new(name, input_shape, output_shape, dtype)
        .with_tags(Tags::default().runtimes(&["y_true"]));
    Ok((sig, axis))
}

/// Numerically stable softmax along one axis.
#[derive(Debug, Clone)]
pub struct SoftMax {
    sig: Signature,
    axis: usize,
}

impl SoftMax {
    pub fn new(input_shape: Shape, dtype: DType, axis: isize) -> Result<Self> {
        let axis = input_shape.axis(axis)?;
        Ok(Self {
            sig: Signature::pointwise("SoftMax", input_shape, dtype),
            axis,
        })
    }

    fn backward_array<T: Element>(&self, y: &ArrayD<T>, dy: &Tensor) -> Result<ArrayD<T>> {
        let dyy = dy.view::<T>()? * y;
        let total = dyy.sum_axis(Axis(self.axis)).insert_axis(Axis(self.axis));
        Ok(dyy - &(y * &total))
    }
}

impl Layer for SoftMax {
    fn signature(&self) -> &Signature {
        &self.sig
    }

    fn forward(&mut self, x: &Tensor) -> Result<Tensor> {
        self.sig.check_input(x)?;
        Ok(dispatch!(x, a => Tensor::from(softmax(a, self.axis))))
    }

    fn backward(&mut self, x: &Tensor, y: &Tensor, dy: &Tensor) -> Result<Gradient> {
        self.sig.check_backward(x, y, dy)?;
        let dx = dispatch!(y, b => Tensor::from(self.backward_array(b, dy)?));
        Ok(Gradient::input_only(dx))
    }
}

/// Cross entropy of probabilities `x` against the bound labels.
#[derive(Debug, Clone)]
pub struct CrossEntropy {
    sig: Signature,
    axis: usize,
    target: Target,
}

/// `max(x, ε)` by real part.
fn floored<T: Element>(x: &ArrayD<T>) -> ArrayD<T> {
    x.mapv(|v| if v.real() < ZERO_REF { T::from_real(ZERO_REF) } else { v })
}

impl CrossEntropy {
    pub fn new(input_shape: Shape, dtype: DType, axis: isize) -> Result<Self> {
        let (sig, axis) = reduced("CrossEntropy", input_shape, dtype, axis)?;
        Ok(Self {
            sig,
            axis,
            target: Target::default(),
        })
    }

    fn forward_array<T: Element>(&self, x: &ArrayD<T>) -> Result<ArrayD<T>> {
        let t = self.target.get(&self.sig, x)?;
        let logq = floored(x).mapv(|v| v.ln());
        Ok((t * &logq).sum_axis(Axis(self.axis)).mapv(|v| -v))
    }

    fn backward_array<T: Element>(&self, x: &ArrayD<T>, dy: &Tensor) -> Result<ArrayD<T>> {
        let t = self.target.get(&self.sig, x)?;
        let dy = expand::<T>(dy, self.axis)?;
        Ok((&dy * &(t / &floored(x))).mapv(|v| -v))
    }
}

impl Layer for CrossEntropy {
    fn signature(&self) -> &Signature {
        &self.sig
    }

    fn set_runtime_vars(&mut self, vars: &RuntimeVars) -> Result<()> {
        self.target.bind(&self.sig, vars)
    }

    fn forward(&mut self, x: &Tensor) -> Result<Tensor> {
        self.sig.check_input(x)?;
        Ok(dispatch!(x, a => Tensor::from(self.forward_array(a)?)))
    }

    fn backward(&mut self, x: &Tensor, y: &Tensor, dy: &Tensor) -> Result<Gradient> {
        self.sig.check_backward(x, y, dy)?;
        let dx = dispatch!(x, a => Tensor::from(self.backward_array(a, dy)?));
        Ok(Gradient::input_only(dx))
    }
}

/// Softmax followed by cross entropy, computed from the logits directly.
#[derive(Debug, Clone)]
pub struct SoftMaxCrossEntropy {
    sig: Signature,
    axis: usize,
    target: Target,
}

impl SoftMaxCrossEntropy {
    pub fn new(input_shape: Shape, dtype: DType, axis: isize) -> Result<Self> {
        let (sig, axis) = reduced("SoftMaxCrossEntropy", input_shape, dtype, axis)?;
        Ok(Self {
            sig,
            axis,
            target: Target::default(),
        })
    }

    fn forward_array<T: Element>(&self, x: &ArrayD<T>) -> Result<ArrayD<T>> {
        let t = self.target.get(&self.sig, x)?;
        let (shifted, _, z) = partition(x, self.axis);
        let nll = z.mapv(|v| v.ln()) - &shifted;
        Ok((nll * t).sum_axis(Axis(self.axis)))
    }

    fn backward_array<T: Element>(&self, x: &ArrayD<T>, dy: &Tensor) -> Result<ArrayD<T>> {
        let t = self.target.get(&self.sig, x)?;
        let dy = expand::<T>(dy, self.axis)?;
        Ok(&dy * &(softmax(x, self.axis) - t))
    }
}

impl Layer for SoftMaxCrossEntropy {
    fn signature(&self) -> &Signature {
        &self.sig
    }

    fn set_runtime_vars(&mut self, vars: &RuntimeVars) -> Result<()> {
        self.target.bind(&self.sig, vars)
    }

    fn forward(&mut self, x: &Tensor) -> Result<Tensor> {
        self.sig.check_input(x)?;
        Ok(dispatch!(x, a => Tensor::from(self.forward_array(a)?)))
    }

    fn backward(&mut self, x: &Tensor, y: &Tensor, dy: &Tensor) -> Result<Gradient> {
        self.sig.check_backward(x, y, dy)?;
        let dx = dispatch!(x, a => Tensor::from(self.backward_array(a, dy)?));
        Ok(Gradient::input_only(dx))
    }
}

/// Elementwise squared distance to the bound labels.
///
/// For complex inputs the backward map is the derivative with respect to
/// `x` holding `conj(x)` fixed, hence the missing factor two.
#[derive(Debug, Clone)]
pub struct SquareLoss {
    sig: Signature,
    target: Target,
}

impl SquareLoss {
    pub fn new(input_shape: Shape, dtype: DType) -> Self {
        let sig = Signature::pointwise("SquareLoss", input_shape, dtype)
            .with_tags(Tags::default().runtimes(&["y_true"]).analytical(2));
        Self {
            sig,
            target: Target::default(),
        }
    }

    fn forward_array<T: Element>(&self, x: &ArrayD<T>) -> Result<ArrayD<T>> {
        let diff = x - self.target.get(&self.sig, x)?;
        Ok(diff.mapv(|d| d.conj() * d))
    }

    fn backward_array<T: Element>(&self, x: &ArrayD<T>, dy: &Tensor) -> Result<ArrayD<T>> {
        let diff = x - self.target.get(&self.sig, x)?;
        let factor = if T::DTYPE.is_complex() { 1.0 } else { 2.0 };
        Ok(diff * dy.view::<T>()? * T::from_real(factor))
    }
}

impl Layer for SquareLoss {
    fn signature(&self) -> &Signature {
        &self.sig
    }

    fn set_runtime_vars(&mut self, vars: &RuntimeVars) -> Result<()> {
        self.target.bind(&self.sig, vars)
    }

    fn forward(&mut self, x: &Tensor) -> Result<Tensor> {
        self.sig.check_input(x)?;
        Ok(dispatch!(x, a => Tensor::from(self.forward_array(a)?)))
    }

    fn backward(&mut self, x: &Tensor, y: &Tensor, dy: &Tensor) -> Result<Gradient> {
        self.sig.check_backward(x, y, dy)?;
        let dx = dispatch!(x, a => Tensor::from(self.backward_array(a, dy)?));
        Ok(Gradient::input_only(dx))
    }
}
