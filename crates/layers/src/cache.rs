//! Identity layer that records what flows through it.

use handgrad_core::{DType, Gradient, Layer, Result, Shape, Signature, Tensor};

/// Appends every forward input and every backward gradient to its
/// history. Useful for inspecting intermediate values of a pipeline.
#[derive(Debug, Clone)]
pub struct Cache {
    sig: Signature,
    forward_history: Vec<Tensor>,
    backward_history: Vec<Tensor>,
}

impl Cache {
    pub fn new(input_shape: Shape, dtype: DType) -> Self {
        Self {
            sig: Signature::pointwise("Cache", input_shape, dtype),
            forward_history: Vec::new(),
            backward_history: Vec::new(),
        }
    }

    pub fn forward_history(&self) -> &[Tensor] {
        &self.forward_history
    }

    pub fn backward_history(&self) -> &[Tensor] {
        &self.backward_history
    }

    pub fn clear(&mut self) {
        self.forward_history.clear();
        self.backward_history.clear();
    }
}

impl Layer for Cache {
    fn signature(&self) -> &Signature {
        &self.sig
    }

    fn forward(&mut self, x: &Tensor) -> Result<Tensor> {
        self.sig.check_input(x)?;
        self.forward_history.push(x.clone());
        tracing::trace!(entries = self.forward_history.len(), "cache forward");
        Ok(x.clone())
    }

    fn backward(&mut self, x: &Tensor, y: &Tensor, dy: &Tensor) -> Result<Gradient> {
        self.sig.check_backward(x, y, dy)?;
        self.backward_history.push(dy.clone());
        tracing::trace!(entries = self.backward_history.len(), "cache backward");
        Ok(Gradient::input_only(dy.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_and_clear() {
        let mut cache = Cache::new(Shape::batched(&[2]), DType::Float64);
        let x = Tensor::zeros(DType::Float64, &[3, 2]);
        let y = cache.forward(&x).unwrap();
        assert_eq!(y, x);
        cache.forward(&x).unwrap();
        cache.backward(&x, &y, &y).unwrap();
        assert_eq!(cache.forward_history().len(), 2);
        assert_eq!(cache.backward_history().len(), 1);
        cache.clear();
        assert!(cache.forward_history().is_empty());
        assert!(cache.backward_history().is_empty());
    }
}
