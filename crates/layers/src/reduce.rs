//! Reductions along a single axis.

use handgrad_core::{
    dispatch, DType, Element, Gradient, Layer, LayerError, Result, Shape, Signature, Tensor,
};
use ndarray::{ArrayD, Axis};

fn reduced_signature(name: &str, input_shape: Shape, dtype: DType, axis: isize) -> Result<(Signature, usize)> {
    let axis = input_shape.axis(axis)?;
    let output_shape = input_shape.remove_axis(axis);
    Ok((Signature::new(name, input_shape, output_shape, dtype), axis))
}

/// Broadcast `dy` back over the reduced axis of `x`, scaled by `scale`.
fn spread<T: Element>(x: &ArrayD<T>, dy: &Tensor, axis: usize, scale: T) -> Result<ArrayD<T>> {
    let dy = dy.view::<T>()?.view().insert_axis(Axis(axis));
    let dx = dy.broadcast(x.raw_dim()).ok_or_else(|| LayerError::ShapeMismatch {
        expected: Shape::fixed(x.shape()),
        got: dy.shape().to_vec(),
    })?;
    Ok(dx.mapv(|g| g * scale))
}

/// Sum over one axis; the axis is removed from the output.
#[derive(Debug, Clone)]
pub struct Sum {
    sig: Signature,
    axis: usize,
}

impl Sum {
    pub fn new(input_shape: Shape, dtype: DType, axis: isize) -> Result<Self> {
        let (sig, axis) = reduced_signature("Sum", input_shape, dtype, axis)?;
        Ok(Self { sig, axis })
    }

    pub fn axis(&self) -> usize {
        self.axis
    }

    fn backward_array<T: Element>(&self, a: &ArrayD<T>, dy: &Tensor) -> Result<ArrayD<T>> {
        spread(a, dy, self.axis, T::one())
    }
}

impl Layer for Sum {
    fn signature(&self) -> &Signature {
        &self.sig
    }

    fn forward(&mut self, x: &Tensor) -> Result<Tensor> {
        self.sig.check_input(x)?;
        Ok(dispatch!(x, a => Tensor::from(a.sum_axis(Axis(self.axis)))))
    }

    fn backward(&mut self, x: &Tensor, y: &Tensor, dy: &Tensor) -> Result<Gradient> {
        self.sig.check_backward(x, y, dy)?;
        let dx = dispatch!(x, a => Tensor::from(self.backward_array(a, dy)?));
        Ok(Gradient::input_only(dx))
    }
}

/// Mean over one axis; the axis is removed from the output.
#[derive(Debug, Clone)]
pub struct Mean {
    sig: Signature,
    axis: usize,
}

impl Mean {
    pub fn new(input_shape: Shape, dtype: DType, axis: isize) -> Result<Self> {
        let (sig, axis) = reduced_signature("Mean", input_shape, dtype, axis)?;
        Ok(Self { sig, axis })
    }

    pub fn axis(&self) -> usize {
        self.axis
    }

    fn forward_array<T: Element>(&self, a: &ArrayD<T>) -> ArrayD<T> {
        let n = T::from_real(a.shape()[self.axis] as f64);
        a.sum_axis(Axis(self.axis)).mapv(|v| v / n)
    }

    fn backward_array<T: Element>(&self, a: &ArrayD<T>, dy: &Tensor) -> Result<ArrayD<T>> {
        let n = a.shape()[self.axis] as f64;
        spread(a, dy, self.axis, T::from_real(1.0 / n))
    }
}

impl Layer for Mean {
    fn signature(&self) -> &Signature {
        &self.sig
    }

    fn forward(&mut self, x: &Tensor) -> Result<Tensor> {
        self.sig.check_input(x)?;
        Ok(dispatch!(x, a => Tensor::from(self.forward_array(a))))
    }

    fn backward(&mut self, x: &Tensor, y: &Tensor, dy: &Tensor) -> Result<Gradient> {
        self.sig.check_backward(x, y, dy)?;
        let dx = dispatch!(x, a => Tensor::from(self.backward_array(a, dy)?));
        Ok(Gradient::input_only(dx))
    }
}
