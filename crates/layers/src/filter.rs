//! Momentum filter.
//!
//! Projects selected axes onto plane waves: axis `a` with extent `n` and
//! momentum `m` is contracted with `exp(−i·m·k) / n`, `k = 0..n`. When
//! every momentum is a multiple of π the basis is real (a cosine) and
//! the output keeps the input dtype; otherwise the output is complex.

use std::f64::consts::PI;

use handgrad_core::{
    dispatch, DType, Element, Gradient, Layer, LayerError, Result, Shape, Signature, Tensor,
};
use ndarray::{ArrayD, Axis, IxDyn};
use num_complex::Complex64;

#[derive(Debug, Clone)]
pub struct Filter {
    sig: Signature,
    axes: Vec<usize>,
    momentum: Vec<f64>,
    bases: Vec<Vec<Complex64>>,
}

impl Filter {
    /// `momentum[i]` belongs to `axes[i]`; both are sorted by axis.
    pub fn new(input_shape: Shape, dtype: DType, momentum: &[f64], axes: &[isize]) -> Result<Self> {
        if momentum.len() != axes.len() {
            return Err(LayerError::InvalidAttribute {
                name: "momentum".to_string(),
                reason: format!("{} momenta for {} axes", momentum.len(), axes.len()),
            });
        }
        let mut pairs = axes
            .iter()
            .zip(momentum)
            .map(|(&a, &m)| Ok((input_shape.axis(a)?, m)))
            .collect::<Result<Vec<_>>>()?;
        pairs.sort_by_key(|&(a, _)| a);
        if pairs.windows(2).any(|w| w[0].0 == w[1].0) {
            return Err(LayerError::InvalidAttribute {
                name: "axes".to_string(),
                reason: "repeated axis".to_string(),
            });
        }
        let (axes, momentum): (Vec<usize>, Vec<f64>) = pairs.into_iter().unzip();

        let bases = axes
            .iter()
            .zip(&momentum)
            .map(|(&axis, &m)| {
                let n = input_shape.extent(axis, "Filter")?;
                Ok((0..n)
                    .map(|k| Complex64::new(0.0, -m * k as f64).exp() / n as f64)
                    .collect())
            })
            .collect::<Result<Vec<Vec<Complex64>>>>()?;

        let real_basis = momentum.iter().all(|m| m % PI == 0.0);
        let output_dtype = if real_basis { dtype } else { dtype.to_complex() };
        let output_shape = Shape::new(
            input_shape
                .dims
                .iter()
                .enumerate()
                .filter(|(axis, _)| !axes.contains(axis))
                .map(|(_, d)| *d)
                .collect(),
        );
        let sig = Signature::converting("Filter", input_shape, output_shape, dtype, output_dtype);
        Ok(Self {
            sig,
            axes,
            momentum,
            bases,
        })
    }

    pub fn axes(&self) -> &[usize] {
        &self.axes
    }

    pub fn momentum(&self) -> &[f64] {
        &self.momentum
    }

    /// Basis of the `i`-th filtered axis, shaped to broadcast against a
    /// rank `rank` array along `axis`.
    fn basis<T: Element>(&self, i: usize, axis: usize, rank: usize) -> Result<ArrayD<T>> {
        let basis = &self.bases[i];
        let mut shape = vec![1; rank];
        shape[axis] = basis.len();
        ArrayD::from_shape_vec(IxDyn(&shape), basis.iter().map(|&c| T::from_complex(c)).collect())
            .map_err(|e| LayerError::InvalidShape {
                reason: e.to_string(),
            })
    }

    fn forward_array<T: Element>(&self, x: ArrayD<T>) -> Result<ArrayD<T>> {
        let mut y = x;
        for (i, &axis) in self.axes.iter().enumerate().rev() {
            let basis = self.basis::<T>(i, axis, y.ndim())?;
            y = (y * &basis).sum_axis(Axis(axis));
        }
        Ok(y)
    }

    fn backward_array<T: Element>(&self, dy: &ArrayD<T>) -> Result<ArrayD<T>> {
        let mut dx = dy.clone();
        for (i, &axis) in self.axes.iter().enumerate() {
            let basis = self.basis::<T>(i, axis, dx.ndim() + 1)?;
            let expanded = &dx.view().insert_axis(Axis(axis)) * &basis;
            dx = expanded;
        }
        Ok(dx)
    }
}

impl Layer for Filter {
    fn signature(&self) -> &Signature {
        &self.sig
    }

    fn forward(&mut self, x: &Tensor) -> Result<Tensor> {
        self.sig.check_input(x)?;
        Ok(match x.cast(self.sig.output_dtype) {
            Tensor::F32(a) => Tensor::from(self.forward_array(a)?),
            Tensor::F64(a) => Tensor::from(self.forward_array(a)?),
            Tensor::C64(a) => Tensor::from(self.forward_array(a)?),
            Tensor::C128(a) => Tensor::from(self.forward_array(a)?),
        })
    }

    fn backward(&mut self, x: &Tensor, y: &Tensor, dy: &Tensor) -> Result<Gradient> {
        self.sig.check_backward(x, y, dy)?;
        let dx = dispatch!(dy, g => Tensor::from(self.backward_array(g)?));
        Ok(Gradient::input_only(dx.cast(self.sig.input_dtype)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_zero_momentum_is_mean() {
        let mut layer = Filter::new(Shape::batched(&[4]), DType::Float64, &[0.0], &[-1]).unwrap();
        assert_eq!(layer.output_dtype(), DType::Float64);
        assert_eq!(layer.output_shape(), &Shape::batched(&[]));
        let y = layer
            .forward(&Tensor::from(array![[1.0, 2.0, 3.0, 6.0]].into_dyn()))
            .unwrap();
        assert_abs_diff_eq!(y.to_real_vec()[0], 3.0, epsilon = 1e-12);
    }

    #[test]
    fn test_pi_momentum_alternates() {
        let mut layer = Filter::new(Shape::fixed(&[2]), DType::Float32, &[PI], &[0]).unwrap();
        assert_eq!(layer.output_dtype(), DType::Float32);
        let y = layer.forward(&Tensor::from(array![3.0f32, 1.0].into_dyn())).unwrap();
        assert_abs_diff_eq!(y.to_real_vec()[0], 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_generic_momentum_promotes() {
        let layer = Filter::new(Shape::fixed(&[3, 4]), DType::Float32, &[0.5, 0.0], &[1, 0]).unwrap();
        assert_eq!(layer.output_dtype(), DType::Complex64);
        assert_eq!(layer.axes(), &[0, 1]);
        assert_eq!(layer.momentum(), &[0.0, 0.5]);
        assert_eq!(layer.output_shape(), &Shape::fixed(&[]));
    }

    #[test]
    fn test_backward_shape_and_dtype() {
        let mut layer = Filter::new(Shape::fixed(&[2, 3]), DType::Float64, &[1.0], &[1]).unwrap();
        let x = Tensor::zeros(DType::Float64, &[2, 3]);
        let y = layer.forward(&x).unwrap();
        assert_eq!(y.shape(), &[2]);
        let dy = Tensor::zeros(DType::Complex128, &[2]);
        let g = layer.backward(&x, &y, &dy).unwrap();
        assert_eq!(g.input.dtype(), DType::Float64);
        assert_eq!(g.input.shape(), &[2, 3]);
    }
}
