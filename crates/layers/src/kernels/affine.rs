//! Dense affine map `y = x · Wᵀ + b` on column-major buffers.

use handgrad_core::{Element, LayerError, Result};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis, ShapeBuilder};

fn view2<'a, T: Element>(data: &'a [T], rows: usize, cols: usize) -> Result<ArrayView2<'a, T>> {
    ArrayView2::from_shape((rows, cols).f(), data).map_err(|_| LayerError::InvalidShape {
        reason: format!("buffer of {} cannot be viewed as {rows}x{cols}", data.len()),
    })
}

fn fortran<T: Element>(a: Array2<T>) -> Vec<T> {
    a.t().iter().copied().collect()
}

/// `x` is `nb × fin`, `weight` is `fout × fin`; returns `nb × fout`.
pub fn forward<T: Element>(
    x: &[T],
    nb: usize,
    weight: &[T],
    bias: &[T],
    fout: usize,
    fin: usize,
) -> Result<Vec<T>> {
    let x = view2(x, nb, fin)?;
    let w = view2(weight, fout, fin)?;
    let b = ArrayView1::from(bias);
    let y = x.dot(&w.t()) + &b;
    Ok(fortran(y))
}

/// Which gradients to compute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GradMask {
    pub params: bool,
    pub input: bool,
}

impl Default for GradMask {
    fn default() -> Self {
        Self {
            params: true,
            input: true,
        }
    }
}

/// Gradients of the affine map, each column-major and `None` when masked.
pub struct AffineGrads<T> {
    pub dx: Option<Vec<T>>,
    pub dweight: Option<Vec<T>>,
    pub dbias: Option<Vec<T>>,
}

pub fn backward<T: Element>(
    dy: &[T],
    x: &[T],
    nb: usize,
    weight: &[T],
    fout: usize,
    fin: usize,
    mask: GradMask,
) -> Result<AffineGrads<T>> {
    let dy = view2(dy, nb, fout)?;
    let x = view2(x, nb, fin)?;
    let w = view2(weight, fout, fin)?;

    let dx = mask.input.then(|| fortran(dy.dot(&w)));
    let (dweight, dbias) = if mask.params {
        let dw: Array2<T> = dy.t().dot(&x);
        let db: Array1<T> = dy.sum_axis(Axis(0));
        (Some(fortran(dw)), Some(db.to_vec()))
    } else {
        (None, None)
    };
    Ok(AffineGrads { dx, dweight, dbias })
}
