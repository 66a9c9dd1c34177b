//! # Operator Factory
//!
//! Pointwise layers are described by a type implementing [`Pointwise`]:
//! a name, a list of scalar attributes, the forward function and its
//! derivative. [`Wrapped`] turns such a description into a [`Layer`] with
//! the identity shape rule.
//!
//! ```rust
//! use handgrad_core::{DType, Element, Layer, Shape, Tensor};
//! use handgrad_layers::factory::{AttrDecl, Pointwise, Wrapped};
//! use ndarray::array;
//!
//! /// x * x + c
//! #[derive(Debug)]
//! struct SquarePlus;
//!
//! impl Pointwise for SquarePlus {
//!     const NAME: &'static str = "SquarePlus";
//!     const ATTRS: &'static [AttrDecl] = &[AttrDecl::required("c")];
//!
//!     fn forward<T: Element>(x: T, attrs: &[f64]) -> T {
//!         x * x + T::from_real(attrs[0])
//!     }
//!
//!     fn backward<T: Element>(x: T, _y: T, dy: T, _attrs: &[f64]) -> T {
//!         T::from_real(2.0) * x * dy
//!     }
//! }
//!
//! let mut layer = Wrapped::<SquarePlus>::new(Shape::fixed(&[2]), DType::Float64, &[("c", 1.0)]).unwrap();
//! let y = layer.forward(&Tensor::from(array![1.0, 2.0].into_dyn())).unwrap();
//! assert_eq!(y, Tensor::from(array![2.0, 5.0].into_dyn()));
//! ```

use std::collections::HashSet;
use std::fmt;
use std::marker::PhantomData;

use handgrad_core::{
    dispatch, DType, Element, Gradient, Layer, LayerError, Result, Shape, Signature, Tags, Tensor,
};
use ndarray::{ArrayD, Zip};

/// Declaration of a scalar attribute.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AttrDecl {
    pub name: &'static str,
    /// Value used when the caller supplies none.
    pub default: Option<f64>,
}

impl AttrDecl {
    pub const fn required(name: &'static str) -> Self {
        Self {
            name,
            default: None,
        }
    }

    pub const fn with_default(name: &'static str, value: f64) -> Self {
        Self {
            name,
            default: Some(value),
        }
    }
}

/// A pointwise function together with its hand-written derivative.
///
/// Attributes arrive positionally, in the order of [`Pointwise::ATTRS`].
pub trait Pointwise: Send + 'static {
    const NAME: &'static str;
    const ATTRS: &'static [AttrDecl] = &[];

    fn forward<T: Element>(x: T, attrs: &[f64]) -> T;

    /// `dx` from the cached `(x, y)` and the upstream `dy`.
    fn backward<T: Element>(x: T, y: T, dy: T, attrs: &[f64]) -> T;

    /// Order of the highest analytic derivative.
    fn analytical() -> u8 {
        1
    }
}

fn invalid(name: &str, reason: &str) -> LayerError {
    LayerError::InvalidName {
        name: name.to_string(),
        reason: reason.to_string(),
    }
}

/// Check a type name and its attribute names.
///
/// All names must be non-empty, alphanumeric-or-underscore and must not
/// start with a digit. Attribute names must not start with an underscore
/// and must be pairwise distinct.
pub fn validate_names(type_name: &str, attrs: &[&str]) -> Result<()> {
    for name in std::iter::once(&type_name).chain(attrs) {
        if name.is_empty() {
            return Err(invalid(name, "names cannot be empty"));
        }
        if !name.chars().all(|c| c.is_alphanumeric() || c == '_') {
            return Err(invalid(
                name,
                "type names and attribute names can only contain alphanumeric characters and underscores",
            ));
        }
        if name.starts_with(|c: char| c.is_ascii_digit()) {
            return Err(invalid(name, "names cannot start with a number"));
        }
    }
    let mut seen = HashSet::new();
    for name in attrs {
        if name.starts_with('_') {
            return Err(invalid(name, "attribute names cannot start with an underscore"));
        }
        if !seen.insert(*name) {
            return Err(invalid(name, "duplicate attribute name"));
        }
    }
    Ok(())
}

/// Resolve supplied attribute values against the declarations.
pub fn resolve_attrs(layer: &str, decls: &[AttrDecl], given: &[(&str, f64)]) -> Result<Vec<f64>> {
    if let Some((unknown, _)) = given
        .iter()
        .find(|(n, _)| !decls.iter().any(|d| d.name == *n))
    {
        return Err(LayerError::UnknownAttribute {
            layer: layer.to_string(),
            name: unknown.to_string(),
        });
    }
    decls
        .iter()
        .map(|d| {
            given
                .iter()
                .rev()
                .find(|(n, _)| *n == d.name)
                .map(|(_, v)| *v)
                .or(d.default)
                .ok_or_else(|| LayerError::MissingAttribute {
                    layer: layer.to_string(),
                    name: d.name.to_string(),
                })
        })
        .collect()
}

/// A [`Layer`] generated from a [`Pointwise`] description.
pub struct Wrapped<F: Pointwise> {
    sig: Signature,
    attrs: Vec<f64>,
    _func: PhantomData<fn() -> F>,
}

impl<F: Pointwise> Wrapped<F> {
    pub fn new(input_shape: Shape, dtype: DType, attrs: &[(&str, f64)]) -> Result<Self> {
        let names: Vec<&str> = F::ATTRS.iter().map(|d| d.name).collect();
        validate_names(F::NAME, &names)?;
        let attrs = resolve_attrs(F::NAME, F::ATTRS, attrs)?;
        let sig = Signature::pointwise(F::NAME, input_shape, dtype)
            .with_tags(Tags::default().analytical(F::analytical()));
        Ok(Self {
            sig,
            attrs,
            _func: PhantomData,
        })
    }

    /// Value of a declared attribute.
    pub fn attr(&self, name: &str) -> Option<f64> {
        F::ATTRS
            .iter()
            .position(|d| d.name == name)
            .map(|i| self.attrs[i])
    }

    fn forward_array<T: Element>(&self, x: &ArrayD<T>) -> ArrayD<T> {
        x.mapv(|v| F::forward(v, &self.attrs))
    }

    fn backward_array<T: Element>(
        &self,
        x: &ArrayD<T>,
        y: &Tensor,
        dy: &Tensor,
    ) -> Result<ArrayD<T>> {
        let y = y.view::<T>()?;
        let dy = dy.view::<T>()?;
        Ok(Zip::from(x)
            .and(y)
            .and(dy)
            .map_collect(|&xi, &yi, &gi| F::backward(xi, yi, gi, &self.attrs)))
    }
}

impl<F: Pointwise> fmt::Debug for Wrapped<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct(F::NAME);
        for (d, v) in F::ATTRS.iter().zip(&self.attrs) {
            s.field(d.name, v);
        }
        s.field("shape", &self.sig.input_shape)
            .field("dtype", &self.sig.input_dtype)
            .finish()
    }
}

impl<F: Pointwise> Layer for Wrapped<F> {
    fn signature(&self) -> &Signature {
        &self.sig
    }

    fn forward(&mut self, x: &Tensor) -> Result<Tensor> {
        self.sig.check_input(x)?;
        Ok(dispatch!(x, a => Tensor::from(self.forward_array(a))))
    }

    fn backward(&mut self, x: &Tensor, y: &Tensor, dy: &Tensor) -> Result<Gradient> {
        self.sig.check_backward(x, y, dy)?;
        let dx = dispatch!(x, a => Tensor::from(self.backward_array(a, y, dy)?));
        Ok(Gradient::input_only(dx))
    }
}
