//! # Gradient Checking
//!
//! Compares a layer's analytic backward map with central differences.
//!
//! For an upstream gradient `dy`, the quantity being differentiated is
//! `⟨dy, y(x)⟩ = Σ_j dy_j · y_j(x)` (no conjugation), so element `i` of the
//! numerical gradient is
//!
//! ```text
//! Σ_j dy_j · (y_j(x + h e_i) − y_j(x − h e_i)) / 2h
//! ```
//!
//! For real layers this is the ordinary vector-Jacobian product; for
//! complex layers it matches the holomorphic convention used throughout
//! the crate. When `x` is real but `y` is complex only the real part is
//! kept, matching a backward map that casts `dx` to the input dtype.
//! Non-holomorphic layers (such as `SquareLoss` on complex data) are not
//! expected to pass.

use handgrad_core::{Layer, LayerError, SetMode, Tensor};
use num_complex::Complex64;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum GradCheckError {
    #[error("layer failed during gradient check: {0}")]
    Layer(#[from] LayerError),

    #[error("{layer} is not trainable")]
    NotTrainable { layer: String },

    #[error(
        "gradient mismatch at element {index}: analytic {analytic}, numerical {numerical} (diff {diff:.3e})"
    )]
    Mismatch {
        index: usize,
        analytic: Complex64,
        numerical: Complex64,
        diff: f64,
    },
}

/// `Σ dy · y` over all elements.
fn contract(dy: &[Complex64], y: &Tensor) -> Complex64 {
    dy.iter().zip(y.to_complex_vec()).map(|(g, v)| g * v).sum()
}

/// `v` with element `index` (column-major) shifted by `delta`.
fn perturbed(v: &Tensor, index: usize, delta: f64) -> Result<Tensor, LayerError> {
    let mut data = v.to_complex_vec();
    data[index] += delta;
    Ok(Tensor::from_fortran(v.shape(), data)?.cast(v.dtype()))
}

fn compare(analytic: &[Complex64], numerical: &[Complex64], tolerance: f64) -> Result<(), GradCheckError> {
    for (index, (&a, &n)) in analytic.iter().zip(numerical).enumerate() {
        let diff = (a - n).norm();
        let scale = a.norm().max(n.norm()).max(1.0);
        if diff > tolerance * scale {
            return Err(GradCheckError::Mismatch {
                index,
                analytic: a,
                numerical: n,
                diff,
            });
        }
    }
    Ok(())
}

/// Numerical gradient of `⟨dy, y(x)⟩` with respect to element `index` of `x`.
pub fn numerical_gradient<L: Layer + ?Sized>(
    layer: &mut L,
    x: &Tensor,
    dy: &Tensor,
    index: usize,
    step: f64,
) -> Result<Complex64, LayerError> {
    let dy = dy.to_complex_vec();
    let plus = layer.forward(&perturbed(x, index, step)?)?;
    let minus = layer.forward(&perturbed(x, index, -step)?)?;
    let g = (contract(&dy, &plus) - contract(&dy, &minus)) / (2.0 * step);
    Ok(restrict(g, x))
}

/// Real inputs only see the real part of a complex derivative.
fn restrict(g: Complex64, v: &Tensor) -> Complex64 {
    if v.dtype().is_complex() {
        g
    } else {
        Complex64::new(g.re, 0.0)
    }
}

/// Check the input gradient of `layer` at `x` against central differences.
///
/// Runtime variables must already be bound. Elements are compared with a
/// mixed absolute/relative `tolerance`.
pub fn check_numdiff<L: Layer + ?Sized>(
    layer: &mut L,
    x: &Tensor,
    dy: &Tensor,
    step: f64,
    tolerance: f64,
) -> Result<(), GradCheckError> {
    let y = layer.forward(x)?;
    let analytic = layer.backward(x, &y, dy)?.input.to_complex_vec();
    let numerical = (0..x.len())
        .map(|i| numerical_gradient(layer, x, dy, i, step))
        .collect::<Result<Vec<_>, _>>()?;
    tracing::debug!(layer = layer.name(), elements = x.len(), "checking input gradient");
    compare(&analytic, &numerical, tolerance)
}

/// Check the parameter gradient of a trainable `layer` at `x`.
///
/// The parameters are restored before returning.
pub fn check_numdiff_variables<L: Layer + ?Sized>(
    layer: &mut L,
    x: &Tensor,
    dy: &Tensor,
    step: f64,
    tolerance: f64,
) -> Result<(), GradCheckError> {
    let original = match layer.as_trainable() {
        Some(t) => t.get_variables(),
        None => {
            return Err(GradCheckError::NotTrainable {
                layer: layer.name().to_string(),
            })
        }
    };
    let y = layer.forward(x)?;
    let analytic = layer.backward(x, &y, dy)?.params.to_complex_vec();
    let g = dy.to_complex_vec();
    let numerical = (0..original.len())
        .map(|i| variable_derivative(layer, &original, x, &g, i, step))
        .collect::<Result<Vec<_>, _>>();
    if let Some(t) = layer.as_trainable_mut() {
        t.set_variables(&original, SetMode::Overwrite)?;
    }
    compare(&analytic, &numerical?, tolerance)
}

/// Central difference of `⟨g, y⟩` with respect to parameter `index`.
fn variable_derivative<L: Layer + ?Sized>(
    layer: &mut L,
    original: &Tensor,
    x: &Tensor,
    g: &[Complex64],
    index: usize,
    step: f64,
) -> Result<Complex64, LayerError> {
    let mut eval = |delta: f64| -> Result<Complex64, LayerError> {
        let shifted = perturbed(original, index, delta)?;
        if let Some(t) = layer.as_trainable_mut() {
            t.set_variables(&shifted, SetMode::Overwrite)?;
        }
        Ok(contract(g, &layer.forward(x)?))
    };
    let plus = eval(step)?;
    let minus = eval(-step)?;
    Ok(restrict((plus - minus) / (2.0 * step), original))
}
