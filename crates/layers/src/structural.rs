//! # Structural Layers
//!
//! Layers that move data around without arithmetic: column-major
//! `Reshape`, axis `Transpose` and dtype `TypeCast`. Their backward maps
//! are the inverse rearrangements.

use handgrad_core::{
    dispatch, DType, Dim, Gradient, Layer, LayerError, Result, Shape, Signature, Tensor,
};

/// Column-major reshape.
///
/// At most one output dimension may be the wildcard; its extent is
/// inferred from the element count, at construction when the input is
/// fully fixed, otherwise on every call.
#[derive(Debug, Clone)]
pub struct Reshape {
    sig: Signature,
}

impl Reshape {
    pub fn new(input_shape: Shape, dtype: DType, output_shape: Shape) -> Result<Self> {
        let wildcards = output_shape.dims.iter().filter(|d| **d == Dim::Any).count();
        if wildcards > 1 {
            return Err(LayerError::InvalidShape {
                reason: format!("reshape target {output_shape} has more than one wildcard"),
            });
        }
        let known: usize = output_shape.dims.iter().filter_map(|d| d.fixed()).product();
        let output_shape = match input_shape.numel() {
            Some(total) if wildcards == 0 && total != known => {
                return Err(LayerError::InvalidShape {
                    reason: format!("cannot reshape {input_shape} into {output_shape}"),
                });
            }
            Some(total) if wildcards == 1 => {
                if known == 0 || total % known != 0 {
                    return Err(LayerError::InvalidShape {
                        reason: format!("cannot reshape {input_shape} into {output_shape}"),
                    });
                }
                Shape::new(
                    output_shape
                        .dims
                        .iter()
                        .map(|d| match d {
                            Dim::Any => Dim::Fixed(total / known),
                            fixed => *fixed,
                        })
                        .collect(),
                )
            }
            _ => output_shape,
        };
        Ok(Self {
            sig: Signature::new("Reshape", input_shape, output_shape, dtype),
        })
    }

    /// Concrete target shape for an input of `len` elements.
    fn target(&self, len: usize) -> Result<Vec<usize>> {
        let out = &self.sig.output_shape;
        let known: usize = out.dims.iter().filter_map(|d| d.fixed()).product();
        let fits = if out.dims.contains(&Dim::Any) {
            known != 0 && len % known == 0
        } else {
            len == known
        };
        if !fits {
            return Err(LayerError::InvalidShape {
                reason: format!("{len} elements cannot be reshaped into {out}"),
            });
        }
        Ok(out
            .dims
            .iter()
            .map(|d| d.fixed().unwrap_or(len / known))
            .collect())
    }
}

impl Layer for Reshape {
    fn signature(&self) -> &Signature {
        &self.sig
    }

    fn forward(&mut self, x: &Tensor) -> Result<Tensor> {
        self.sig.check_input(x)?;
        x.reshape_fortran(&self.target(x.len())?)
    }

    fn backward(&mut self, x: &Tensor, y: &Tensor, dy: &Tensor) -> Result<Gradient> {
        self.sig.check_backward(x, y, dy)?;
        Ok(Gradient::input_only(dy.reshape_fortran(x.shape())?))
    }
}

/// Axis permutation: output axis `k` is input axis `axes[k]`.
#[derive(Debug, Clone)]
pub struct Transpose {
    sig: Signature,
    axes: Vec<usize>,
    inverse: Vec<usize>,
}

impl Transpose {
    pub fn new(input_shape: Shape, dtype: DType, axes: &[isize]) -> Result<Self> {
        let rank = input_shape.rank();
        if axes.len() != rank {
            return Err(LayerError::InvalidAttribute {
                name: "axes".to_string(),
                reason: format!("expected {rank} axes, got {}", axes.len()),
            });
        }
        let axes = axes
            .iter()
            .map(|&a| input_shape.axis(a))
            .collect::<Result<Vec<_>>>()?;
        let mut inverse = vec![usize::MAX; rank];
        for (k, &a) in axes.iter().enumerate() {
            if inverse[a] != usize::MAX {
                return Err(LayerError::InvalidAttribute {
                    name: "axes".to_string(),
                    reason: format!("{axes:?} is not a permutation"),
                });
            }
            inverse[a] = k;
        }
        let output_shape = Shape::new(axes.iter().map(|&a| input_shape.dims[a]).collect());
        Ok(Self {
            sig: Signature::new("Transpose", input_shape, output_shape, dtype),
            axes,
            inverse,
        })
    }

    pub fn axes(&self) -> &[usize] {
        &self.axes
    }
}

fn permute(t: &Tensor, axes: &[usize]) -> Tensor {
    dispatch!(t, a => Tensor::from(
        a.view()
            .permuted_axes(axes.to_vec())
            .as_standard_layout()
            .into_owned()
    ))
}

impl Layer for Transpose {
    fn signature(&self) -> &Signature {
        &self.sig
    }

    fn forward(&mut self, x: &Tensor) -> Result<Tensor> {
        self.sig.check_input(x)?;
        Ok(permute(x, &self.axes))
    }

    fn backward(&mut self, x: &Tensor, y: &Tensor, dy: &Tensor) -> Result<Gradient> {
        self.sig.check_backward(x, y, dy)?;
        Ok(Gradient::input_only(permute(dy, &self.inverse)))
    }
}

/// Element type conversion. Casting complex to real keeps the real part.
#[derive(Debug, Clone)]
pub struct TypeCast {
    sig: Signature,
}

impl TypeCast {
    pub fn new(input_shape: Shape, dtype: DType, output_dtype: DType) -> Self {
        Self {
            sig: Signature::converting(
                "TypeCast",
                input_shape.clone(),
                input_shape,
                dtype,
                output_dtype,
            ),
        }
    }
}

impl Layer for TypeCast {
    fn signature(&self) -> &Signature {
        &self.sig
    }

    fn forward(&mut self, x: &Tensor) -> Result<Tensor> {
        self.sig.check_input(x)?;
        Ok(x.cast(self.sig.output_dtype))
    }

    fn backward(&mut self, x: &Tensor, y: &Tensor, dy: &Tensor) -> Result<Gradient> {
        self.sig.check_backward(x, y, dy)?;
        Ok(Gradient::input_only(dy.cast(self.sig.input_dtype)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_reshape_infers_wildcard() {
        let layer = Reshape::new(Shape::fixed(&[2, 6]), DType::Float64, Shape::signed(&[3, -1]).unwrap())
            .unwrap();
        assert_eq!(layer.output_shape(), &Shape::fixed(&[3, 4]));
        assert!(Reshape::new(Shape::fixed(&[5]), DType::Float64, Shape::fixed(&[2, 2])).is_err());
        assert!(Reshape::new(Shape::fixed(&[4]), DType::Float64, Shape::signed(&[-1, -1]).unwrap()).is_err());
    }

    #[test]
    fn test_reshape_empty_tensor() {
        let mut layer =
            Reshape::new(Shape::fixed(&[0, 3]), DType::Float64, Shape::fixed(&[3, 0])).unwrap();
        let x = Tensor::zeros(DType::Float64, &[0, 3]);
        let y = layer.forward(&x).unwrap();
        assert_eq!(y.shape(), &[3, 0]);
        let g = layer.backward(&x, &y, &y).unwrap();
        assert_eq!(g.input.shape(), &[0, 3]);
    }

    #[test]
    fn test_reshape_batched() {
        let mut layer = Reshape::new(
            Shape::batched(&[2, 2]),
            DType::Float64,
            Shape::signed(&[-1, 2]).unwrap(),
        )
        .unwrap();
        let x = Tensor::zeros(DType::Float64, &[3, 2, 2]);
        assert_eq!(layer.forward(&x).unwrap().shape(), &[6, 2]);
    }

    #[test]
    fn test_transpose_roundtrip() {
        let mut layer = Transpose::new(Shape::fixed(&[2, 3]), DType::Float64, &[1, 0]).unwrap();
        assert_eq!(layer.output_shape(), &Shape::fixed(&[3, 2]));
        let x = Tensor::from(array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]].into_dyn());
        let y = layer.forward(&x).unwrap();
        assert_eq!(y, Tensor::from(array![[1.0, 4.0], [2.0, 5.0], [3.0, 6.0]].into_dyn()));
        let g = layer.backward(&x, &y, &y).unwrap();
        assert_eq!(g.input, x);
    }

    #[test]
    fn test_transpose_rejects_repeats() {
        assert!(Transpose::new(Shape::fixed(&[2, 3]), DType::Float64, &[0, 0]).is_err());
        assert!(Transpose::new(Shape::fixed(&[2, 3]), DType::Float64, &[0]).is_err());
    }

    #[test]
    fn test_typecast_backward_restores_dtype() {
        let mut layer = TypeCast::new(Shape::fixed(&[2]), DType::Float32, DType::Complex128);
        let x = Tensor::from(array![1.0f32, 2.0].into_dyn());
        let y = layer.forward(&x).unwrap();
        assert_eq!(y.dtype(), DType::Complex128);
        let g = layer.backward(&x, &y, &y).unwrap();
        assert_eq!(g.input, x);
    }
}
