//! Seeded dropout along one axis.
//!
//! Binding the runtime variable `seed` draws a keep-mask over the chosen
//! axis from a ChaCha generator seeded with it: slice `k` is kept with
//! probability `keep_rate`. Kept slices are scaled by `1 / keep_rate` so
//! the expected output equals the input; dropped slices become zero.
//! Binding the same seed again reproduces the mask.

use handgrad_core::{
    dispatch, DType, Element, Gradient, Layer, LayerError, Result, RuntimeVars, Shape, Signature,
    Tags, Tensor,
};
use ndarray::{ArrayD, Axis};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

#[derive(Debug, Clone)]
pub struct DropOut {
    sig: Signature,
    axis: usize,
    keep_rate: f64,
    mask: Option<Vec<bool>>,
}

impl DropOut {
    pub fn new(input_shape: Shape, dtype: DType, keep_rate: f64, axis: isize) -> Result<Self> {
        if !(keep_rate > 0.0 && keep_rate <= 1.0) {
            return Err(LayerError::InvalidAttribute {
                name: "keep_rate".to_string(),
                reason: format!("must lie in (0, 1], got {keep_rate}"),
            });
        }
        let axis = input_shape.axis(axis)?;
        input_shape.extent(axis, "DropOut")?;
        let sig = Signature::pointwise("DropOut", input_shape, dtype)
            .with_tags(Tags::default().runtimes(&["seed"]));
        Ok(Self {
            sig,
            axis,
            keep_rate,
            mask: None,
        })
    }

    /// Allow the forward pass to overwrite its input.
    pub fn inplace(mut self, inplace: bool) -> Self {
        self.sig.tags.inplace = inplace;
        self
    }

    pub fn axis(&self) -> usize {
        self.axis
    }

    pub fn keep_rate(&self) -> f64 {
        self.keep_rate
    }

    /// The current keep-mask, once a seed has been bound.
    pub fn mask(&self) -> Option<&[bool]> {
        self.mask.as_deref()
    }

    fn bound_mask(&self) -> Result<&[bool]> {
        self.mask.as_deref().ok_or_else(|| LayerError::MissingRuntimeVar {
            layer: self.sig.name.clone(),
            name: "seed".to_string(),
        })
    }

    /// Scale kept lanes by `1 / keep_rate` and zero the rest.
    fn apply<T: Element>(&self, a: &mut ArrayD<T>, mask: &[bool]) {
        let scale = T::from_real(1.0 / self.keep_rate);
        for (mut lane, &keep) in a.axis_iter_mut(Axis(self.axis)).zip(mask) {
            if keep {
                lane.mapv_inplace(|v| v * scale);
            } else {
                lane.fill(T::zero());
            }
        }
    }

    fn masked(&self, t: Tensor) -> Result<Tensor> {
        let mask = self.bound_mask()?;
        let mut t = t;
        dispatch!(&mut t, a => self.apply(a, mask));
        Ok(t)
    }
}

impl Layer for DropOut {
    fn signature(&self) -> &Signature {
        &self.sig
    }

    fn set_runtime_vars(&mut self, vars: &RuntimeVars) -> Result<()> {
        vars.require(&self.sig.name, &self.sig.tags.runtimes)?;
        let seed = vars.seed("seed")?;
        let n = self.sig.input_shape.extent(self.axis, "DropOut")?;
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mask: Vec<bool> = (0..n).map(|_| rng.gen::<f64>() < self.keep_rate).collect();
        tracing::debug!(
            layer = %self.sig.name,
            seed,
            kept = mask.iter().filter(|&&k| k).count(),
            total = n,
            "dropout mask drawn"
        );
        self.mask = Some(mask);
        Ok(())
    }

    fn forward(&mut self, x: &Tensor) -> Result<Tensor> {
        self.sig.check_input(x)?;
        self.masked(x.clone())
    }

    fn forward_inplace(&mut self, x: Tensor) -> Result<Tensor> {
        if !self.sig.tags.inplace {
            return self.forward(&x);
        }
        self.sig.check_input(&x)?;
        self.masked(x)
    }

    fn backward(&mut self, x: &Tensor, y: &Tensor, dy: &Tensor) -> Result<Gradient> {
        self.sig.check_backward(x, y, dy)?;
        Ok(Gradient::input_only(self.masked(dy.clone())?))
    }
}
