//! # Tensors
//!
//! A `Tensor` is an `ndarray::ArrayD` tagged with one of the four supported
//! element types. Layers are written once, generically over [`Element`],
//! and [`dispatch!`](crate::dispatch) picks the monomorphised body from the
//! runtime tag.
//!
//! Reshapes follow column-major (Fortran) order: the first index varies
//! fastest. This is also the layout used at the kernel boundary, see
//! [`to_fortran_vec`] and [`from_fortran_vec`].

use std::fmt;
use std::iter::Sum;

use ndarray::{ArrayD, IxDyn, LinalgScalar, ScalarOperand, ShapeBuilder};
use num_complex::{Complex32, Complex64, ComplexFloat};

use crate::dtype::DType;
use crate::error::{LayerError, Result};

/// Scalar types a tensor can hold.
///
/// Transcendental functions come from [`ComplexFloat`], so the same
/// expression serves real and complex data. Derivatives are holomorphic
/// (no conjugation): the backward of `f` is `f'(x)·dy`.
pub trait Element:
    ComplexFloat
    + ScalarOperand
    + LinalgScalar
    + Sum
    + fmt::Debug
    + fmt::Display
    + Send
    + Sync
    + 'static
{
    const DTYPE: DType;

    fn from_real(v: f64) -> Self;
    fn from_complex(v: Complex64) -> Self;
    fn to_complex(self) -> Complex64;

    /// `self ** p` for a real exponent.
    fn powf64(self, p: f64) -> Self;

    fn wrap(a: ArrayD<Self>) -> Tensor;
    fn peek(t: &Tensor) -> Option<&ArrayD<Self>>;
    fn peek_mut(t: &mut Tensor) -> Option<&mut ArrayD<Self>>;
    fn unwrap_owned(t: Tensor) -> std::result::Result<ArrayD<Self>, Tensor>;

    fn real(self) -> f64 {
        self.to_complex().re
    }

    fn modulus(self) -> f64 {
        self.to_complex().norm()
    }

    /// Floor-modulo, component-wise for complex values.
    fn floor_mod(self, n: f64) -> Self {
        let c = self.to_complex();
        Self::from_complex(Complex64::new(c.re.rem_euclid(n), c.im.rem_euclid(n)))
    }
}

macro_rules! impl_real_element {
    ($ty:ty, $variant:ident, $dtype:expr) => {
        impl Element for $ty {
            const DTYPE: DType = $dtype;

            fn from_real(v: f64) -> Self {
                v as $ty
            }

            fn from_complex(v: Complex64) -> Self {
                v.re as $ty
            }

            fn to_complex(self) -> Complex64 {
                Complex64::new(self as f64, 0.0)
            }

            fn powf64(self, p: f64) -> Self {
                <$ty>::powf(self, p as $ty)
            }

            fn wrap(a: ArrayD<Self>) -> Tensor {
                Tensor::$variant(a)
            }

            fn peek(t: &Tensor) -> Option<&ArrayD<Self>> {
                match t {
                    Tensor::$variant(a) => Some(a),
                    _ => None,
                }
            }

            fn peek_mut(t: &mut Tensor) -> Option<&mut ArrayD<Self>> {
                match t {
                    Tensor::$variant(a) => Some(a),
                    _ => None,
                }
            }

            fn unwrap_owned(t: Tensor) -> std::result::Result<ArrayD<Self>, Tensor> {
                match t {
                    Tensor::$variant(a) => Ok(a),
                    other => Err(other),
                }
            }
        }
    };
}

macro_rules! impl_complex_element {
    ($ty:ty, $re:ty, $variant:ident, $dtype:expr) => {
        impl Element for $ty {
            const DTYPE: DType = $dtype;

            fn from_real(v: f64) -> Self {
                <$ty>::new(v as $re, 0.0)
            }

            fn from_complex(v: Complex64) -> Self {
                <$ty>::new(v.re as $re, v.im as $re)
            }

            fn to_complex(self) -> Complex64 {
                Complex64::new(self.re as f64, self.im as f64)
            }

            fn powf64(self, p: f64) -> Self {
                <$ty>::powf(self, p as $re)
            }

            fn wrap(a: ArrayD<Self>) -> Tensor {
                Tensor::$variant(a)
            }

            fn peek(t: &Tensor) -> Option<&ArrayD<Self>> {
                match t {
                    Tensor::$variant(a) => Some(a),
                    _ => None,
                }
            }

            fn peek_mut(t: &mut Tensor) -> Option<&mut ArrayD<Self>> {
                match t {
                    Tensor::$variant(a) => Some(a),
                    _ => None,
                }
            }

            fn unwrap_owned(t: Tensor) -> std::result::Result<ArrayD<Self>, Tensor> {
                match t {
                    Tensor::$variant(a) => Ok(a),
                    other => Err(other),
                }
            }
        }
    };
}

impl_real_element!(f32, F32, DType::Float32);
impl_real_element!(f64, F64, DType::Float64);
impl_complex_element!(Complex32, f32, C64, DType::Complex64);
impl_complex_element!(Complex64, f64, C128, DType::Complex128);

/// A dynamically typed n-dimensional array.
#[derive(Clone, PartialEq)]
pub enum Tensor {
    F32(ArrayD<f32>),
    F64(ArrayD<f64>),
    C64(ArrayD<Complex32>),
    C128(ArrayD<Complex64>),
}

/// Run a generic body against the concrete array inside a [`Tensor`].
///
/// ```rust
/// use handgrad_core::{dispatch, Tensor};
/// use ndarray::{ArrayD, IxDyn};
///
/// let t = Tensor::from(ArrayD::<f64>::zeros(IxDyn(&[2, 3])));
/// let n = dispatch!(&t, a => a.len());
/// assert_eq!(n, 6);
/// ```
#[macro_export]
macro_rules! dispatch {
    ($tensor:expr, $arr:ident => $body:expr) => {
        match $tensor {
            $crate::Tensor::F32($arr) => $body,
            $crate::Tensor::F64($arr) => $body,
            $crate::Tensor::C64($arr) => $body,
            $crate::Tensor::C128($arr) => $body,
        }
    };
}

impl Tensor {
    /// Zero-length placeholder, returned as the parameter gradient of
    /// parameter-free layers.
    pub fn empty(dtype: DType) -> Tensor {
        Tensor::zeros(dtype, &[0])
    }

    pub fn zeros(dtype: DType, shape: &[usize]) -> Tensor {
        match dtype {
            DType::Float32 => Tensor::F32(ArrayD::zeros(IxDyn(shape))),
            DType::Float64 => Tensor::F64(ArrayD::zeros(IxDyn(shape))),
            DType::Complex64 => Tensor::C64(ArrayD::zeros(IxDyn(shape))),
            DType::Complex128 => Tensor::C128(ArrayD::zeros(IxDyn(shape))),
        }
    }

    /// Build a tensor from values listed in column-major order.
    pub fn from_fortran<T: Element>(shape: &[usize], data: Vec<T>) -> Result<Tensor> {
        from_fortran_vec(shape, data).map(T::wrap)
    }

    pub fn dtype(&self) -> DType {
        match self {
            Tensor::F32(_) => DType::Float32,
            Tensor::F64(_) => DType::Float64,
            Tensor::C64(_) => DType::Complex64,
            Tensor::C128(_) => DType::Complex128,
        }
    }

    pub fn shape(&self) -> &[usize] {
        dispatch!(self, a => a.shape())
    }

    pub fn len(&self) -> usize {
        dispatch!(self, a => a.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Borrow the inner array as `T`, failing on a dtype mismatch.
    pub fn view<T: Element>(&self) -> Result<&ArrayD<T>> {
        T::peek(self).ok_or(LayerError::DTypeMismatch {
            expected: T::DTYPE,
            got: self.dtype(),
        })
    }

    pub fn view_mut<T: Element>(&mut self) -> Result<&mut ArrayD<T>> {
        let got = self.dtype();
        T::peek_mut(self).ok_or(LayerError::DTypeMismatch {
            expected: T::DTYPE,
            got,
        })
    }

    /// Take the inner array as `T`, casting when the dtype differs.
    pub fn into_array<T: Element>(self) -> ArrayD<T> {
        match T::unwrap_owned(self) {
            Ok(a) => a,
            Err(other) => dispatch!(&other, a => cast_array(a)),
        }
    }

    /// Convert to another dtype. Casting complex to real drops the
    /// imaginary part.
    pub fn cast(&self, dtype: DType) -> Tensor {
        if self.dtype() == dtype {
            return self.clone();
        }
        match dtype {
            DType::Float32 => Tensor::F32(dispatch!(self, a => cast_array(a))),
            DType::Float64 => Tensor::F64(dispatch!(self, a => cast_array(a))),
            DType::Complex64 => Tensor::C64(dispatch!(self, a => cast_array(a))),
            DType::Complex128 => Tensor::C128(dispatch!(self, a => cast_array(a))),
        }
    }

    /// Reshape in column-major order.
    pub fn reshape_fortran(&self, shape: &[usize]) -> Result<Tensor> {
        Ok(dispatch!(self, a => Element::wrap(reshape_fortran(a, shape)?)))
    }

    /// Elements in column-major order, widened to `Complex64`.
    pub fn to_complex_vec(&self) -> Vec<Complex64> {
        dispatch!(self, a => to_fortran_vec(a).into_iter().map(Element::to_complex).collect())
    }

    /// Elements in column-major order, real parts only.
    pub fn to_real_vec(&self) -> Vec<f64> {
        dispatch!(self, a => to_fortran_vec(a).into_iter().map(Element::real).collect())
    }
}

impl<T: Element> From<ArrayD<T>> for Tensor {
    fn from(a: ArrayD<T>) -> Self {
        T::wrap(a)
    }
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        dispatch!(self, a => write!(f, "Tensor<{}>(shape={:?}, data={})", self.dtype(), a.shape(), a))
    }
}

/// Element-wise dtype conversion.
pub fn cast_array<S: Element, D: Element>(a: &ArrayD<S>) -> ArrayD<D> {
    a.mapv(|v| D::from_complex(v.to_complex()))
}

/// Flatten in column-major order (first index fastest).
pub fn to_fortran_vec<T: Element>(a: &ArrayD<T>) -> Vec<T> {
    a.t().iter().copied().collect()
}

/// Inverse of [`to_fortran_vec`].
pub fn from_fortran_vec<T: Element>(shape: &[usize], data: Vec<T>) -> Result<ArrayD<T>> {
    let n = data.len();
    ArrayD::from_shape_vec(IxDyn(shape).f(), data).map_err(|_| LayerError::InvalidShape {
        reason: format!("{n} elements cannot fill shape {shape:?}"),
    })
}

/// Reshape in column-major order.
pub fn reshape_fortran<T: Element>(a: &ArrayD<T>, shape: &[usize]) -> Result<ArrayD<T>> {
    from_fortran_vec(shape, to_fortran_vec(a))
}
