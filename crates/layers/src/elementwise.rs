//! # Elementwise Functions
//!
//! Transcendental, scale, modulo and power layers, all generated by the
//! [`factory`](crate::factory). Shapes pass through unchanged.
//!
//! | Layer | Forward | Backward |
//! |-------|---------|----------|
//! | Sin | sin x | cos x · dy |
//! | Cos | cos x | −sin x · dy |
//! | Sinh | sinh x | cosh x · dy |
//! | Cosh | cosh x | sinh x · dy |
//! | Tan | tan x | dy / cos² x |
//! | Tanh | tanh x | dy / cosh² x |
//! | ArcTan | arctan x | dy / (1 + x²) |
//! | Exp | exp x | y · dy |
//! | Log | log x | dy / x |
//! | SoftPlus | log(1 + exp x) | sigmoid(x) · dy |
//! | Mul | α x | α dy |
//! | Mod | x mod n | dy |
//! | Power | x^p | p x^(p−1) dy |

use handgrad_core::Element;

use crate::activation::sigmoid;
use crate::factory::{AttrDecl, Pointwise, Wrapped};

macro_rules! pointwise {
    (
        $(#[$doc:meta])*
        $name:ident,
        forward: |$x:ident| $fwd:expr,
        backward: |$bx:ident, $by:ident, $dy:ident| $bwd:expr $(,)?
    ) => {
        $(#[$doc])*
        #[derive(Debug)]
        pub struct $name;

        impl Pointwise for $name {
            const NAME: &'static str = stringify!($name);

            fn forward<T: Element>($x: T, _attrs: &[f64]) -> T {
                $fwd
            }

            fn backward<T: Element>($bx: T, $by: T, $dy: T, _attrs: &[f64]) -> T {
                $bwd
            }
        }
    };
}

/// Pointwise descriptions consumed by [`Wrapped`].
pub mod func {
    use super::*;

    pointwise!(
        /// sin(x)
        Sin,
        forward: |x| x.sin(),
        backward: |x, _y, dy| x.cos() * dy,
    );

    pointwise!(
        /// cos(x)
        Cos,
        forward: |x| x.cos(),
        backward: |x, _y, dy| -x.sin() * dy,
    );

    pointwise!(
        /// sinh(x)
        Sinh,
        forward: |x| x.sinh(),
        backward: |x, _y, dy| x.cosh() * dy,
    );

    pointwise!(
        /// cosh(x)
        Cosh,
        forward: |x| x.cosh(),
        backward: |x, _y, dy| x.sinh() * dy,
    );

    pointwise!(
        /// tan(x)
        Tan,
        forward: |x| x.tan(),
        backward: |x, _y, dy| dy / (x.cos() * x.cos()),
    );

    pointwise!(
        /// tanh(x)
        Tanh,
        forward: |x| x.tanh(),
        backward: |x, _y, dy| dy / (x.cosh() * x.cosh()),
    );

    pointwise!(
        /// arctan(x)
        ArcTan,
        forward: |x| x.atan(),
        backward: |x, _y, dy| dy / (T::one() + x * x),
    );

    pointwise!(
        /// exp(x)
        Exp,
        forward: |x| x.exp(),
        backward: |_x, y, dy| y * dy,
    );

    pointwise!(
        /// log(x)
        Log,
        forward: |x| x.ln(),
        backward: |x, _y, dy| dy / x,
    );

    pointwise!(
        /// log(1 + exp(x))
        SoftPlus,
        forward: |x| (T::one() + x.exp()).ln(),
        backward: |x, _y, dy| dy * sigmoid(x),
    );

    /// x * alpha
    #[derive(Debug)]
    pub struct Mul;

    impl Pointwise for Mul {
        const NAME: &'static str = "Mul";
        const ATTRS: &'static [AttrDecl] = &[AttrDecl::required("alpha")];

        fn forward<T: Element>(x: T, attrs: &[f64]) -> T {
            x * T::from_real(attrs[0])
        }

        fn backward<T: Element>(_x: T, _y: T, dy: T, attrs: &[f64]) -> T {
            dy * T::from_real(attrs[0])
        }
    }

    /// x mod n. The gradient is the identity almost everywhere.
    #[derive(Debug)]
    pub struct Mod;

    impl Pointwise for Mod {
        const NAME: &'static str = "Mod";
        const ATTRS: &'static [AttrDecl] = &[AttrDecl::required("n")];

        fn forward<T: Element>(x: T, attrs: &[f64]) -> T {
            x.floor_mod(attrs[0])
        }

        fn backward<T: Element>(_x: T, _y: T, dy: T, _attrs: &[f64]) -> T {
            dy
        }
    }

    /// x ** order
    #[derive(Debug)]
    pub struct Power;

    impl Pointwise for Power {
        const NAME: &'static str = "Power";
        const ATTRS: &'static [AttrDecl] = &[AttrDecl::required("order")];

        fn forward<T: Element>(x: T, attrs: &[f64]) -> T {
            x.powf64(attrs[0])
        }

        fn backward<T: Element>(x: T, _y: T, dy: T, attrs: &[f64]) -> T {
            let p = attrs[0];
            T::from_real(p) * x.powf64(p - 1.0) * dy
        }
    }
}

pub type Sin = Wrapped<func::Sin>;
pub type Cos = Wrapped<func::Cos>;
pub type Sinh = Wrapped<func::Sinh>;
pub type Cosh = Wrapped<func::Cosh>;
pub type Tan = Wrapped<func::Tan>;
pub type Tanh = Wrapped<func::Tanh>;
pub type ArcTan = Wrapped<func::ArcTan>;
pub type Exp = Wrapped<func::Exp>;
pub type Log = Wrapped<func::Log>;
pub type SoftPlus = Wrapped<func::SoftPlus>;
pub type Mul = Wrapped<func::Mul>;
pub type Mod = Wrapped<func::Mod>;
pub type Power = Wrapped<func::Power>;

#[cfg(test)]
mod tests {
    use super::*;
    use handgrad_core::{DType, Layer, LayerError, Shape, Tensor};
    use ndarray::array;

    #[test]
    fn test_mul_requires_alpha() {
        let err = Mul::new(Shape::fixed(&[2]), DType::Float64, &[]).unwrap_err();
        assert!(matches!(err, LayerError::MissingAttribute { ref name, .. } if name == "alpha"));
    }

    #[test]
    fn test_mul_forward_backward() {
        let mut layer = Mul::new(Shape::fixed(&[2]), DType::Float32, &[("alpha", 3.0)]).unwrap();
        assert_eq!(layer.attr("alpha"), Some(3.0));
        let x = Tensor::from(array![1.0f32, -2.0].into_dyn());
        let y = layer.forward(&x).unwrap();
        assert_eq!(y, Tensor::from(array![3.0f32, -6.0].into_dyn()));
        let dy = Tensor::from(array![1.0f32, 1.0].into_dyn());
        let g = layer.backward(&x, &y, &dy).unwrap();
        assert_eq!(g.input, Tensor::from(array![3.0f32, 3.0].into_dyn()));
        assert!(g.params.is_empty());
    }

    #[test]
    fn test_mod_wraps() {
        let mut layer = Mod::new(Shape::fixed(&[3]), DType::Float64, &[("n", 2.0)]).unwrap();
        let y = layer
            .forward(&Tensor::from(array![3.5, -0.5, 1.0].into_dyn()))
            .unwrap();
        assert_eq!(y, Tensor::from(array![1.5, 1.5, 1.0].into_dyn()));
    }

    #[test]
    fn test_names_follow_types() {
        let layer = Exp::new(Shape::fixed(&[1]), DType::Complex64, &[]).unwrap();
        assert_eq!(layer.name(), "Exp");
        assert_eq!(layer.output_dtype(), DType::Complex64);
    }
}
