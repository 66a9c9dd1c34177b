//! # Trainable Layers
//!
//! Both layers own a weight matrix `W` of shape `(out, in)` and a bias of
//! shape `(out,)`, and act on inputs of shape `(in,)` or `(batch, in)`.
//!
//! | Layer | Forward |
//! |-------|---------|
//! | Linear | `y = W·x + b` |
//! | Apdot | `y = b · Π_k (W[:, k] + x[k])` |
//!
//! Parameters flatten to `[W in column-major order; b]`. The parameter
//! gradient returned by `backward` uses the same layout, so it can be fed
//! straight back through [`Trainable::set_variables`].
//!
//! A [`GradMask`] chooses which gradients `backward` computes; the parts
//! switched off come back as empty placeholder tensors.

use handgrad_core::tensor::{from_fortran_vec, to_fortran_vec};
use handgrad_core::{
    dispatch, DType, Dim, Element, Gradient, Layer, LayerError, Result, SetMode, Shape, Signature,
    Tensor, Trainable,
};
use ndarray::{Array1, Array2, ArrayD, ArrayView1, ArrayView2, Axis, Ix1, Ix2};

use crate::kernels::affine;

pub use crate::kernels::affine::GradMask;

/// Weight and bias of a trainable layer, stored in the layer dtype.
#[derive(Debug, Clone)]
struct Params {
    weight: Tensor,
    bias: Tensor,
}

impl Params {
    /// Validate the parameters against each other and the input shape,
    /// and derive the output shape.
    fn new(input_shape: &Shape, weight: Tensor, bias: Tensor) -> Result<(Self, Shape)> {
        if weight.dtype() != bias.dtype() {
            return Err(LayerError::DTypeMismatch {
                expected: weight.dtype(),
                got: bias.dtype(),
            });
        }
        let (fout, fin) = match *weight.shape() {
            [fout, fin] => (fout, fin),
            _ => {
                return Err(LayerError::InvalidShape {
                    reason: format!("weight must be (out, in), got {:?}", weight.shape()),
                })
            }
        };
        if bias.shape() != [fout] {
            return Err(LayerError::ShapeMismatch {
                expected: Shape::fixed(&[fout]),
                got: bias.shape().to_vec(),
            });
        }
        let rank = input_shape.rank();
        if !(rank == 1 || rank == 2) || input_shape.dims[rank - 1] != Dim::Fixed(fin) {
            return Err(LayerError::ShapeMismatch {
                expected: Shape::batched(&[fin]),
                got: input_shape.dims.iter().map(|d| d.fixed().unwrap_or(0)).collect(),
            });
        }
        let mut dims = input_shape.head(rank - 1).to_vec();
        dims.push(Dim::Fixed(fout));
        Ok((Self { weight, bias }, Shape::new(dims)))
    }

    fn dtype(&self) -> DType {
        self.weight.dtype()
    }

    fn fout(&self) -> usize {
        self.weight.shape()[0]
    }

    fn fin(&self) -> usize {
        self.weight.shape()[1]
    }

    fn len(&self) -> usize {
        self.weight.len() + self.bias.len()
    }

    fn flatten(&self) -> Tensor {
        dispatch!(&self.weight, w => flatten_array(w, &self.bias))
    }

    fn assign(&mut self, variables: &Tensor, mode: SetMode) -> Result<()> {
        if variables.shape() != [self.len()] {
            return Err(LayerError::ShapeMismatch {
                expected: Shape::fixed(&[self.len()]),
                got: variables.shape().to_vec(),
            });
        }
        match (&mut self.weight, &mut self.bias) {
            (Tensor::F32(w), Tensor::F32(b)) => assign_array(w, b, variables, mode),
            (Tensor::F64(w), Tensor::F64(b)) => assign_array(w, b, variables, mode),
            (Tensor::C64(w), Tensor::C64(b)) => assign_array(w, b, variables, mode),
            (Tensor::C128(w), Tensor::C128(b)) => assign_array(w, b, variables, mode),
            (w, b) => Err(LayerError::DTypeMismatch {
                expected: w.dtype(),
                got: b.dtype(),
            }),
        }
    }

    /// Concatenate weight and bias gradients, or an empty placeholder.
    fn gradient<T: Element>(&self, dweight: Option<Vec<T>>, dbias: Option<Vec<T>>) -> Tensor {
        match (dweight, dbias) {
            (Some(mut dw), Some(db)) => {
                dw.extend(db);
                Tensor::from(Array1::from(dw).into_dyn())
            }
            _ => Tensor::empty(self.dtype()),
        }
    }
}

fn flatten_array<T: Element>(weight: &ArrayD<T>, bias: &Tensor) -> Tensor {
    let mut v = to_fortran_vec(weight);
    v.extend(bias.clone().into_array::<T>().iter().copied());
    Tensor::from(Array1::from(v).into_dyn())
}

fn assign_array<T: Element>(
    weight: &mut ArrayD<T>,
    bias: &mut ArrayD<T>,
    variables: &Tensor,
    mode: SetMode,
) -> Result<()> {
    let v: Vec<T> = variables.clone().into_array::<T>().iter().copied().collect();
    let nw = weight.len();
    let new_weight = from_fortran_vec(weight.shape(), v[..nw].to_vec())?;
    let new_bias = from_fortran_vec(bias.shape(), v[nw..].to_vec())?;
    match mode {
        SetMode::Overwrite => {
            *weight = new_weight;
            *bias = new_bias;
        }
        SetMode::Accumulate => {
            let w = &*weight + &new_weight;
            let b = &*bias + &new_bias;
            *weight = w;
            *bias = b;
        }
    }
    Ok(())
}

/// View `(in,)` or `(batch, in)` as a `(batch, in)` matrix.
fn as_matrix<T: Element>(a: &ArrayD<T>) -> Result<ArrayView2<'_, T>> {
    let v = if a.ndim() == 1 {
        a.view().insert_axis(Axis(0))
    } else {
        a.view()
    };
    v.into_dimensionality::<Ix2>()
        .map_err(|e| LayerError::InvalidShape {
            reason: e.to_string(),
        })
}

/// Leading batch extent of an `(in,)` or `(batch, in)` tensor.
fn batch_size(shape: &[usize]) -> usize {
    if shape.len() == 1 {
        1
    } else {
        shape[0]
    }
}

/// Shape of the output for a concrete input shape.
fn output_dims(shape: &[usize], fout: usize) -> Vec<usize> {
    let mut dims = shape[..shape.len() - 1].to_vec();
    dims.push(fout);
    dims
}

macro_rules! impl_trainable {
    ($layer:ty) => {
        impl $layer {
            pub fn weight(&self) -> &Tensor {
                &self.params.weight
            }

            pub fn bias(&self) -> &Tensor {
                &self.params.bias
            }

            pub fn grad_mask(&self) -> GradMask {
                self.mask
            }

            /// Choose which gradients `backward` computes.
            pub fn set_grad_mask(&mut self, mask: GradMask) {
                self.mask = mask;
            }

            pub fn with_grad_mask(mut self, mask: GradMask) -> Self {
                self.mask = mask;
                self
            }
        }

        impl Trainable for $layer {
            fn num_variables(&self) -> usize {
                self.params.len()
            }

            fn get_variables(&self) -> Tensor {
                self.params.flatten()
            }

            fn set_variables(&mut self, variables: &Tensor, mode: SetMode) -> Result<()> {
                self.params.assign(variables, mode)
            }
        }
    };
}

/// Dense affine layer `y = W·x + b`.
#[derive(Debug, Clone)]
pub struct Linear {
    sig: Signature,
    params: Params,
    mask: GradMask,
}

impl Linear {
    /// The layer dtype is the dtype of `weight`.
    pub fn new(input_shape: Shape, weight: Tensor, bias: Tensor) -> Result<Self> {
        let dtype = weight.dtype();
        let (params, output_shape) = Params::new(&input_shape, weight, bias)?;
        Ok(Self {
            sig: Signature::new("Linear", input_shape, output_shape, dtype),
            params,
            mask: GradMask::default(),
        })
    }

    fn forward_array<T: Element>(&self, x: &ArrayD<T>) -> Result<ArrayD<T>> {
        let (fout, fin) = (self.params.fout(), self.params.fin());
        let w = to_fortran_vec(self.params.weight.view::<T>()?);
        let b: Vec<T> = self.params.bias.view::<T>()?.iter().copied().collect();
        let y = affine::forward(&to_fortran_vec(x), batch_size(x.shape()), &w, &b, fout, fin)?;
        from_fortran_vec(&output_dims(x.shape(), fout), y)
    }

    fn backward_array<T: Element>(&self, x: &ArrayD<T>, dy: &Tensor) -> Result<Gradient> {
        let (fout, fin) = (self.params.fout(), self.params.fin());
        let w = to_fortran_vec(self.params.weight.view::<T>()?);
        let grads = affine::backward(
            &to_fortran_vec(dy.view::<T>()?),
            &to_fortran_vec(x),
            batch_size(x.shape()),
            &w,
            fout,
            fin,
            self.mask,
        )?;
        let input = match grads.dx {
            Some(dx) => Tensor::from(from_fortran_vec(x.shape(), dx)?),
            None => Tensor::empty(self.sig.input_dtype),
        };
        Ok(Gradient {
            params: self.params.gradient(grads.dweight, grads.dbias),
            input,
        })
    }
}

impl_trainable!(Linear);

impl Layer for Linear {
    fn signature(&self) -> &Signature {
        &self.sig
    }

    fn forward(&mut self, x: &Tensor) -> Result<Tensor> {
        self.sig.check_input(x)?;
        Ok(dispatch!(x, a => Tensor::from(self.forward_array(a)?)))
    }

    fn backward(&mut self, x: &Tensor, y: &Tensor, dy: &Tensor) -> Result<Gradient> {
        self.sig.check_backward(x, y, dy)?;
        dispatch!(x, a => self.backward_array(a, dy))
    }

    fn as_trainable(&self) -> Option<&dyn Trainable> {
        Some(self)
    }

    fn as_trainable_mut(&mut self) -> Option<&mut dyn Trainable> {
        Some(self)
    }
}

/// Product layer `y[o] = b[o] · Π_k (W[o, k] + x[k])`.
///
/// The backward map divides by `W[o, k] + x[k]` and by `b[o]`; zeros there
/// yield non-finite gradients.
#[derive(Debug, Clone)]
pub struct Apdot {
    sig: Signature,
    params: Params,
    mask: GradMask,
}

impl Apdot {
    /// The layer dtype is the dtype of `weight`.
    pub fn new(input_shape: Shape, weight: Tensor, bias: Tensor) -> Result<Self> {
        let dtype = weight.dtype();
        let (params, output_shape) = Params::new(&input_shape, weight, bias)?;
        Ok(Self {
            sig: Signature::new("Apdot", input_shape, output_shape, dtype),
            params,
            mask: GradMask::default(),
        })
    }

    fn matrices<T: Element>(&self) -> Result<(ArrayView2<'_, T>, ArrayView1<'_, T>)> {
        let weight = as_matrix(self.params.weight.view::<T>()?)?;
        let bias = self
            .params
            .bias
            .view::<T>()?
            .view()
            .into_dimensionality::<Ix1>()
            .map_err(|e| LayerError::InvalidShape {
                reason: e.to_string(),
            })?;
        Ok((weight, bias))
    }

    fn forward_array<T: Element>(&self, x: &ArrayD<T>) -> Result<ArrayD<T>> {
        let (w, bias) = self.matrices::<T>()?;
        let xm = as_matrix(x)?;
        let y = Array2::from_shape_fn((xm.nrows(), w.nrows()), |(b, o)| {
            w.row(o)
                .iter()
                .zip(xm.row(b))
                .fold(bias[o], |acc, (&wk, &xk)| acc * (wk + xk))
        });
        y.into_dyn()
            .into_shape(output_dims(x.shape(), w.nrows()))
            .map_err(|e| LayerError::InvalidShape {
                reason: e.to_string(),
            })
    }

    fn backward_array<T: Element>(&self, x: &ArrayD<T>, y: &Tensor, dy: &Tensor) -> Result<Gradient> {
        let (w, bias) = self.matrices::<T>()?;
        let xm = as_matrix(x)?;
        let dyy = &as_matrix(dy.view::<T>()?)? * &as_matrix(y.view::<T>()?)?;
        let (nb, fout, fin) = (xm.nrows(), w.nrows(), w.ncols());

        let quotient = |b: usize, o: usize, k: usize| dyy[[b, o]] / (w[[o, k]] + xm[[b, k]]);

        let params = if self.mask.params {
            let dweight = Array2::from_shape_fn((fout, fin), |(o, k)| {
                (0..nb).map(|b| quotient(b, o, k)).sum::<T>()
            });
            let dbias: Vec<T> = (0..fout)
                .map(|o| dyy.column(o).iter().map(|&v| v / bias[o]).sum())
                .collect();
            self.params
                .gradient(Some(to_fortran_vec(&dweight.into_dyn())), Some(dbias))
        } else {
            Tensor::empty(self.sig.input_dtype)
        };
        let input = if self.mask.input {
            let dx = Array2::from_shape_fn((nb, fin), |(b, k)| {
                (0..fout).map(|o| quotient(b, o, k)).sum::<T>()
            });
            Tensor::from(dx.into_dyn().into_shape(x.shape()).map_err(|e| {
                LayerError::InvalidShape {
                    reason: e.to_string(),
                }
            })?)
        } else {
            Tensor::empty(self.sig.input_dtype)
        };
        Ok(Gradient { params, input })
    }
}

impl_trainable!(Apdot);

impl Layer for Apdot {
    fn signature(&self) -> &Signature {
        &self.sig
    }

    fn forward(&mut self, x: &Tensor) -> Result<Tensor> {
        self.sig.check_input(x)?;
        Ok(dispatch!(x, a => Tensor::from(self.forward_array(a)?)))
    }

    fn backward(&mut self, x: &Tensor, y: &Tensor, dy: &Tensor) -> Result<Gradient> {
        self.sig.check_backward(x, y, dy)?;
        dispatch!(x, a => self.backward_array(a, y, dy))
    }

    fn as_trainable(&self) -> Option<&dyn Trainable> {
        Some(self)
    }

    fn as_trainable_mut(&mut self) -> Option<&mut dyn Trainable> {
        Some(self)
    }
}
