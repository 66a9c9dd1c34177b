//! # Activations
//!
//! `Sigmoid` and `Log2cosh` are factory-generated pointwise layers; both
//! switch to their asymptotes once `|Re x|` passes [`OVERFLOW_THRESHOLD`]
//! so that large inputs never overflow `exp`.
//!
//! `ReLU` is written by hand on top of the native kernel so that it can
//! rectify its input buffer in place.

use handgrad_core::tensor::{from_fortran_vec, to_fortran_vec};
use handgrad_core::{
    dispatch, DType, Element, Gradient, Layer, LayerError, Result, Shape, Signature, Tags, Tensor,
};
use ndarray::ArrayD;

use crate::factory::{Pointwise, Wrapped};
use crate::kernels::relu;

/// Beyond this real part, exponentials are replaced by their limits.
pub const OVERFLOW_THRESHOLD: f64 = 12.0;

/// `1 / (1 + exp(-x))`, clamped to 0 or 1 past the threshold.
pub(crate) fn sigmoid<T: Element>(x: T) -> T {
    let r = x.real();
    if r > OVERFLOW_THRESHOLD {
        T::one()
    } else if r < -OVERFLOW_THRESHOLD {
        T::zero()
    } else {
        T::one() / (T::one() + (-x).exp())
    }
}

pub mod func {
    use super::*;

    /// Logistic function.
    #[derive(Debug)]
    pub struct Sigmoid;

    impl Pointwise for Sigmoid {
        const NAME: &'static str = "Sigmoid";

        fn forward<T: Element>(x: T, _attrs: &[f64]) -> T {
            sigmoid(x)
        }

        fn backward<T: Element>(_x: T, y: T, dy: T, _attrs: &[f64]) -> T {
            y * (T::one() - y) * dy
        }
    }

    /// `log(2 cosh x)`, the smooth absolute value.
    #[derive(Debug)]
    pub struct Log2cosh;

    impl Pointwise for Log2cosh {
        const NAME: &'static str = "Log2cosh";

        fn forward<T: Element>(x: T, _attrs: &[f64]) -> T {
            let r = x.real();
            if r > OVERFLOW_THRESHOLD {
                x
            } else if r < -OVERFLOW_THRESHOLD {
                -x
            } else {
                (T::from_real(2.0) * x.cosh()).ln()
            }
        }

        fn backward<T: Element>(x: T, _y: T, dy: T, _attrs: &[f64]) -> T {
            x.tanh() * dy
        }
    }
}

pub type Sigmoid = Wrapped<func::Sigmoid>;
pub type Log2cosh = Wrapped<func::Log2cosh>;

/// Leaky rectifier, `x` where `Re x > 0` and `leak · x` elsewhere.
#[derive(Debug, Clone)]
pub struct ReLU {
    sig: Signature,
    leak: f64,
}

impl ReLU {
    /// `leak` must lie in `[0, 1]`; `0` gives the plain rectifier.
    pub fn new(input_shape: Shape, dtype: DType, leak: f64) -> Result<Self> {
        if !(0.0..=1.0).contains(&leak) {
            return Err(LayerError::InvalidAttribute {
                name: "leak".to_string(),
                reason: format!("must lie in [0, 1], got {leak}"),
            });
        }
        let sig = Signature::pointwise("ReLU", input_shape, dtype)
            .with_tags(Tags::default().inplace(true));
        Ok(Self { sig, leak })
    }

    pub fn leak(&self) -> f64 {
        self.leak
    }

    fn rectify<T: Element>(&self, a: ArrayD<T>) -> ArrayD<T> {
        let mut a = if a.as_slice_memory_order().is_some() {
            a
        } else {
            a.as_standard_layout().into_owned()
        };
        if let Some(buf) = a.as_slice_memory_order_mut() {
            relu::forward(buf, self.leak);
        }
        a
    }

    fn backward_array<T: Element>(&self, x: &ArrayD<T>, dy: &Tensor) -> Result<Tensor> {
        let dy = to_fortran_vec(dy.view::<T>()?);
        let dx = relu::backward(&to_fortran_vec(x), &dy, self.leak);
        Ok(Tensor::from(from_fortran_vec(x.shape(), dx)?))
    }
}

impl Layer for ReLU {
    fn signature(&self) -> &Signature {
        &self.sig
    }

    fn forward(&mut self, x: &Tensor) -> Result<Tensor> {
        self.forward_inplace(x.clone())
    }

    fn forward_inplace(&mut self, x: Tensor) -> Result<Tensor> {
        self.sig.check_input(&x)?;
        Ok(match x {
            Tensor::F32(a) => Tensor::from(self.rectify(a)),
            Tensor::F64(a) => Tensor::from(self.rectify(a)),
            Tensor::C64(a) => Tensor::from(self.rectify(a)),
            Tensor::C128(a) => Tensor::from(self.rectify(a)),
        })
    }

    fn backward(&mut self, x: &Tensor, y: &Tensor, dy: &Tensor) -> Result<Gradient> {
        self.sig.check_backward(x, y, dy)?;
        let dx = dispatch!(x, a => self.backward_array(a, dy)?);
        Ok(Gradient::input_only(dx))
    }
}
