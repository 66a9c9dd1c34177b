//! # Numeric Kernels
//!
//! Dense inner loops behind the pooling, convolution-product, ReLU and
//! affine layers. Every kernel is a pure function over caller-owned
//! buffers, generic over [`Element`](handgrad_core::Element) and
//! instantiated once per dtype; the layer resolves the dtype at
//! construction and [`dispatch!`](handgrad_core::dispatch) selects the
//! instance.
//!
//! All buffers are column-major. A tensor of shape `(lead.., img..)` is
//! viewed as an `nb × n_pix` matrix with element `(b, p)` at `b + nb * p`,
//! where `nb` is the product of the leading extents.

pub mod affine;
pub mod convprod;
pub mod pooling;
pub mod relu;

/// Column-major `nb × n` matrix index.
#[inline]
pub(crate) fn at(nb: usize, b: usize, p: usize) -> usize {
    b + nb * p
}
