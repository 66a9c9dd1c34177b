//! Batch normalization.
//!
//! With a batch axis, mean and variance are taken over that axis on every
//! call. Without one, they are runtime variables (`mean`, `variance`)
//! that must broadcast against the input.
//!
//! The backward map treats the statistics as constants: `dx = dy / sqrt(var + eps)`.

use handgrad_core::{
    dispatch, DType, Element, Gradient, Layer, LayerError, Result, RuntimeVars, Shape, Signature,
    Tags, Tensor,
};
use ndarray::{ArrayD, ArrayViewD, Axis};

/// Default variance offset.
pub const EPS: f64 = 1e-8;

#[derive(Debug, Clone)]
pub struct BatchNorm {
    sig: Signature,
    axis: Option<usize>,
    eps: f64,
    mean: Option<Tensor>,
    variance: Option<Tensor>,
}

/// Statistics of one call, either computed or borrowed from the bindings.
struct Stats<T> {
    mean: ArrayD<T>,
    variance: ArrayD<T>,
}

impl BatchNorm {
    pub fn new(input_shape: Shape, dtype: DType, axis: Option<isize>) -> Result<Self> {
        let axis = axis.map(|a| input_shape.axis(a)).transpose()?;
        let tags = match axis {
            Some(_) => Tags::default(),
            None => Tags::default().runtimes(&["mean", "variance"]),
        };
        Ok(Self {
            sig: Signature::pointwise("BatchNorm", input_shape, dtype).with_tags(tags),
            axis,
            eps: EPS,
            mean: None,
            variance: None,
        })
    }

    pub fn with_eps(mut self, eps: f64) -> Self {
        self.eps = eps;
        self
    }

    pub fn axis(&self) -> Option<usize> {
        self.axis
    }

    pub fn eps(&self) -> f64 {
        self.eps
    }

    fn bound<'a, T: Element>(
        &self,
        name: &str,
        value: &'a Option<Tensor>,
        x: &ArrayD<T>,
    ) -> Result<ArrayViewD<'a, T>> {
        let t = value.as_ref().ok_or_else(|| LayerError::MissingRuntimeVar {
            layer: self.sig.name.clone(),
            name: name.to_string(),
        })?;
        t.view::<T>()?
            .broadcast(x.raw_dim())
            .ok_or_else(|| LayerError::InvalidRuntimeVar {
                name: name.to_string(),
                reason: format!("shape {:?} does not broadcast to {:?}", t.shape(), x.shape()),
            })
    }

    fn stats<T: Element>(&self, x: &ArrayD<T>) -> Result<Stats<T>> {
        match self.axis {
            Some(axis) => {
                let n = T::from_real(x.shape()[axis] as f64);
                let mean = x.sum_axis(Axis(axis)).insert_axis(Axis(axis)).mapv(|v| v / n);
                let d = x - &mean;
                let variance = d
                    .mapv(|v| v.conj() * v)
                    .sum_axis(Axis(axis))
                    .insert_axis(Axis(axis))
                    .mapv(|v| v / n);
                Ok(Stats { mean, variance })
            }
            None => Ok(Stats {
                mean: self.bound("mean", &self.mean, x)?.to_owned(),
                variance: self.bound("variance", &self.variance, x)?.to_owned(),
            }),
        }
    }

    fn scale<T: Element>(&self, variance: &ArrayD<T>) -> ArrayD<T> {
        let eps = T::from_real(self.eps);
        variance.mapv(|v| (v + eps).sqrt())
    }

    fn forward_array<T: Element>(&self, x: &ArrayD<T>) -> Result<ArrayD<T>> {
        let stats = self.stats(x)?;
        Ok((x - &stats.mean) / &self.scale(&stats.variance))
    }

    fn backward_array<T: Element>(&self, x: &ArrayD<T>, dy: &Tensor) -> Result<ArrayD<T>> {
        let stats = self.stats(x)?;
        Ok(dy.view::<T>()? / &self.scale(&stats.variance))
    }
}

impl Layer for BatchNorm {
    fn signature(&self) -> &Signature {
        &self.sig
    }

    fn set_runtime_vars(&mut self, vars: &RuntimeVars) -> Result<()> {
        vars.require(&self.sig.name, &self.sig.tags.runtimes)?;
        if self.axis.is_none() {
            let dtype = self.sig.input_dtype;
            self.mean = Some(vars.tensor("mean")?.cast(dtype));
            self.variance = Some(vars.tensor("variance")?.cast(dtype));
            tracing::debug!(layer = %self.sig.name, "batch statistics bound");
        }
        Ok(())
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

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_batch_axis_normalizes() {
        let mut layer = BatchNorm::new(Shape::batched(&[2]), DType::Float64, Some(0)).unwrap();
        assert!(layer.tags().runtimes.is_empty());
        let x = Tensor::from(array![[1.0, 10.0], [3.0, 10.0]].into_dyn());
        let y = layer.forward(&x).unwrap();
        let y = y.view::<f64>().unwrap();
        assert_abs_diff_eq!(y[[0, 0]], -1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(y[[1, 0]], 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(y[[0, 1]], 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_bound_statistics() {
        let mut layer = BatchNorm::new(Shape::batched(&[2]), DType::Float32, None).unwrap();
        assert_eq!(layer.tags().runtimes, vec!["mean", "variance"]);
        let x = Tensor::from(array![[2.0f32, 4.0]].into_dyn());
        assert!(matches!(layer.forward(&x), Err(LayerError::MissingRuntimeVar { .. })));

        let vars = RuntimeVars::new()
            .with_tensor("mean", Tensor::from(array![1.0, 2.0].into_dyn()))
            .with_tensor("variance", Tensor::from(array![4.0, 1.0].into_dyn()));
        layer.set_runtime_vars(&vars).unwrap();
        let y = layer.forward(&x).unwrap();
        let y = y.view::<f32>().unwrap();
        assert_abs_diff_eq!(y[[0, 0]], 0.5, epsilon = 1e-5);
        assert_abs_diff_eq!(y[[0, 1]], 2.0, epsilon = 1e-5);
    }

    #[test]
    fn test_bound_statistics_must_broadcast() {
        let mut layer = BatchNorm::new(Shape::batched(&[2]), DType::Float64, None).unwrap();
        let vars = RuntimeVars::new()
            .with_tensor("mean", Tensor::zeros(DType::Float64, &[3]))
            .with_tensor("variance", Tensor::zeros(DType::Float64, &[3]));
        layer.set_runtime_vars(&vars).unwrap();
        let err = layer.forward(&Tensor::zeros(DType::Float64, &[1, 2])).unwrap_err();
        assert!(matches!(err, LayerError::InvalidRuntimeVar { .. }));
    }
}
