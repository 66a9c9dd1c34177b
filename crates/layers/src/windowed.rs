//! # Windowed Layers
//!
//! `Pooling` and `ConvProd` act on the trailing "image" axes of their
//! input; every leading axis is treated as batch. The window adjacency is
//! computed once at construction by
//! [`compute_windows`](handgrad_core::compute_windows), so the image axes
//! must be fixed. Leading axes may be wildcards.
//!
//! At call time the input is flattened column-major into an `nb × n_pix`
//! buffer, handed to the native kernel, and the result is folded back into
//! `(lead.., img_out..)`.

use handgrad_core::tensor::{from_fortran_vec, to_fortran_vec};
use handgrad_core::{
    compute_windows, dispatch, Boundary, DType, Dim, Element, Gradient, Layer, LayerError, Result,
    Shape, Signature, Tensor, Windows,
};
use ndarray::ArrayD;

use crate::kernels::{convprod, pooling};

pub use crate::kernels::pooling::PoolMode;

/// Window geometry shared by the windowed layers.
#[derive(Debug, Clone)]
struct Geometry {
    windows: Windows,
    kernel_shape: Vec<usize>,
    strides: Vec<usize>,
    boundary: Boundary,
}

impl Geometry {
    fn new(
        input_shape: &Shape,
        kernel_shape: &[usize],
        strides: Vec<usize>,
        boundary: Boundary,
    ) -> Result<(Self, Shape)> {
        let img_nd = kernel_shape.len();
        if img_nd > input_shape.rank() {
            return Err(LayerError::InvalidKernel {
                reason: format!("rank {img_nd} kernel on input {input_shape}"),
            });
        }
        let lead = input_shape.rank() - img_nd;
        let image = (lead..input_shape.rank())
            .map(|axis| input_shape.extent(axis, "windowed layer image"))
            .collect::<Result<Vec<_>>>()?;
        let windows = compute_windows(kernel_shape, &image, &strides, boundary)?;
        let mut dims: Vec<Dim> = input_shape.head(lead).to_vec();
        dims.extend(windows.output_shape.iter().map(|&n| Dim::Fixed(n)));
        let geometry = Self {
            windows,
            kernel_shape: kernel_shape.to_vec(),
            strides,
            boundary,
        };
        Ok((geometry, Shape::new(dims)))
    }

    fn img_nd(&self) -> usize {
        self.kernel_shape.len()
    }

    /// Leading extents of a concrete tensor shape.
    fn lead<'a>(&self, shape: &'a [usize]) -> &'a [usize] {
        &shape[..shape.len() - self.img_nd()]
    }

    /// Fold a flat kernel result back into `(lead.., img_out..)`.
    fn unflatten<T: Element>(&self, lead: &[usize], data: Vec<T>) -> Result<ArrayD<T>> {
        let mut shape = lead.to_vec();
        shape.extend(&self.windows.output_shape);
        from_fortran_vec(&shape, data)
    }
}

/// Windowed reduction: max, min (by real part or modulus) or mean.
///
/// Strides default to the kernel shape, so windows tile the image.
#[derive(Debug, Clone)]
pub struct Pooling {
    sig: Signature,
    mode: PoolMode,
    geometry: Geometry,
}

impl Pooling {
    pub fn new(
        input_shape: Shape,
        dtype: DType,
        kernel_shape: &[usize],
        mode: PoolMode,
        strides: Option<Vec<usize>>,
        boundary: Boundary,
    ) -> Result<Self> {
        let strides = strides.unwrap_or_else(|| kernel_shape.to_vec());
        let (geometry, output_shape) = Geometry::new(&input_shape, kernel_shape, strides, boundary)?;
        Ok(Self {
            sig: Signature::new("Pooling", input_shape, output_shape, dtype),
            mode,
            geometry,
        })
    }

    pub fn mode(&self) -> PoolMode {
        self.mode
    }

    pub fn kernel_shape(&self) -> &[usize] {
        &self.geometry.kernel_shape
    }

    pub fn strides(&self) -> &[usize] {
        &self.geometry.strides
    }

    pub fn boundary(&self) -> Boundary {
        self.geometry.boundary
    }

    pub fn windows(&self) -> &Windows {
        &self.geometry.windows
    }

    fn forward_array<T: Element>(&self, x: &ArrayD<T>) -> Result<ArrayD<T>> {
        let lead = self.geometry.lead(x.shape());
        let nb = lead.iter().product();
        let y = pooling::forward(&to_fortran_vec(x), nb, &self.geometry.windows, self.mode);
        self.geometry.unflatten(lead, y)
    }

    fn backward_array<T: Element>(&self, x: &ArrayD<T>, dy: &Tensor) -> Result<ArrayD<T>> {
        let nb = self.geometry.lead(x.shape()).iter().product();
        let dx = pooling::backward(
            &to_fortran_vec(x),
            &to_fortran_vec(dy.view::<T>()?),
            nb,
            &self.geometry.windows,
            self.mode,
        );
        from_fortran_vec(x.shape(), dx)
    }
}

impl Layer for Pooling {
    fn signature(&self) -> &Signature {
        &self.sig
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

/// Windowed product `Π_k x_k ^ p_k`.
///
/// `powers` has the kernel's shape. Each window member takes the power at
/// the kernel offset it was reached through. Strides default to one.
#[derive(Debug, Clone)]
pub struct ConvProd {
    sig: Signature,
    powers: ArrayD<i32>,
    flat_powers: Vec<i32>,
    geometry: Geometry,
}

impl ConvProd {
    pub fn new(
        input_shape: Shape,
        dtype: DType,
        powers: ArrayD<i32>,
        strides: Option<Vec<usize>>,
        boundary: Boundary,
    ) -> Result<Self> {
        let kernel_shape = powers.shape().to_vec();
        let strides = strides.unwrap_or_else(|| vec![1; kernel_shape.len()]);
        let (geometry, output_shape) =
            Geometry::new(&input_shape, &kernel_shape, strides, boundary)?;
        let flat_powers = powers.iter().copied().collect();
        Ok(Self {
            sig: Signature::new("ConvProd", input_shape, output_shape, dtype),
            powers,
            flat_powers,
            geometry,
        })
    }

    pub fn powers(&self) -> &ArrayD<i32> {
        &self.powers
    }

    pub fn strides(&self) -> &[usize] {
        &self.geometry.strides
    }

    pub fn boundary(&self) -> Boundary {
        self.geometry.boundary
    }

    pub fn windows(&self) -> &Windows {
        &self.geometry.windows
    }

    fn forward_array<T: Element>(&self, x: &ArrayD<T>) -> Result<ArrayD<T>> {
        let lead = self.geometry.lead(x.shape());
        let nb = lead.iter().product();
        let y = convprod::forward(&to_fortran_vec(x), nb, &self.geometry.windows, &self.flat_powers);
        self.geometry.unflatten(lead, y)
    }

    fn backward_array<T: Element>(&self, x: &ArrayD<T>, dy: &Tensor) -> Result<ArrayD<T>> {
        let nb = self.geometry.lead(x.shape()).iter().product();
        let dx = convprod::backward(
            &to_fortran_vec(x),
            &to_fortran_vec(dy.view::<T>()?),
            nb,
            &self.geometry.windows,
            &self.flat_powers,
        );
        from_fortran_vec(x.shape(), dx)
    }
}

impl Layer for ConvProd {
    fn signature(&self) -> &Signature {
        &self.sig
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
    use ndarray::{array, Array};

    #[test]
    fn test_pooling_output_shape() {
        let layer = Pooling::new(
            Shape::batched(&[3, 6, 4]),
            DType::Float32,
            &[2, 2],
            PoolMode::Max,
            None,
            Boundary::Open,
        )
        .unwrap();
        assert_eq!(layer.output_shape(), &Shape::batched(&[3, 3, 2]));
        assert_eq!(layer.strides(), &[2, 2]);
    }

    #[test]
    fn test_image_axes_must_be_fixed() {
        let err = Pooling::new(
            Shape::signed(&[2, -1]).unwrap(),
            DType::Float64,
            &[2],
            PoolMode::Mean,
            None,
            Boundary::Open,
        )
        .unwrap_err();
        assert!(matches!(err, LayerError::InvalidShape { .. }));
    }

    #[test]
    fn test_max_pooling_routes_gradient() {
        let mut layer = Pooling::new(
            Shape::fixed(&[4]),
            DType::Float64,
            &[2],
            PoolMode::Max,
            None,
            Boundary::Open,
        )
        .unwrap();
        let x = Tensor::from(array![1.0, 3.0, 5.0, 2.0].into_dyn());
        let y = layer.forward(&x).unwrap();
        assert_eq!(y, Tensor::from(array![3.0, 5.0].into_dyn()));
        let dy = Tensor::from(array![1.0, 2.0].into_dyn());
        let g = layer.backward(&x, &y, &dy).unwrap();
        assert_eq!(g.input, Tensor::from(array![0.0, 1.0, 2.0, 0.0].into_dyn()));
    }

    #[test]
    fn test_convprod_periodic() {
        let powers = Array::from_vec(vec![1, 2]).into_dyn();
        let mut layer = ConvProd::new(
            Shape::batched(&[3]),
            DType::Float64,
            powers,
            None,
            Boundary::Periodic,
        )
        .unwrap();
        assert_eq!(layer.output_shape(), &Shape::batched(&[3]));
        let x = Tensor::from(array![[1.0, 2.0, 3.0]].into_dyn());
        let y = layer.forward(&x).unwrap();
        // x0 x1², x1 x2², x2 x0²
        assert_eq!(y, Tensor::from(array![[4.0, 18.0, 3.0]].into_dyn()));
    }
}
