//! # Gradient Tests
//!
//! Every analytic backward map against central differences:
//! - Pointwise functions and activations, real and complex
//! - Reductions, structural layers and losses
//! - Windowed layers, the filter and batch normalization
//! - Input and parameter gradients of the trainable layers

use std::f64::consts::PI;

use handgrad_core::{Boundary, DType, Layer, RuntimeVars, Shape, Tensor};
use handgrad_layers::activation::{Log2cosh, ReLU, Sigmoid};
use handgrad_layers::cache::Cache;
use handgrad_layers::check::{check_numdiff, check_numdiff_variables};
use handgrad_layers::dropout::DropOut;
use handgrad_layers::elementwise::{
    ArcTan, Cos, Cosh, Exp, Log, Mod, Mul, Power, Sin, Sinh, SoftPlus, Tan, Tanh,
};
use handgrad_layers::filter::Filter;
use handgrad_layers::linear::{Apdot, Linear};
use handgrad_layers::loss::{CrossEntropy, SoftMax, SoftMaxCrossEntropy, SquareLoss};
use handgrad_layers::norm::BatchNorm;
use handgrad_layers::reduce::{Mean, Sum};
use handgrad_layers::structural::{Reshape, Transpose, TypeCast};
use handgrad_layers::windowed::{ConvProd, PoolMode, Pooling};
use ndarray::ArrayD;
use num_complex::Complex64;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

const REAL: [DType; 2] = [DType::Float32, DType::Float64];
const ALL: [DType; 4] = [
    DType::Float32,
    DType::Float64,
    DType::Complex64,
    DType::Complex128,
];

/// Uniform real parts in `[lo, hi)`, small imaginary parts for complex dtypes.
fn random(dtype: DType, shape: &[usize], lo: f64, hi: f64, seed: u64) -> Tensor {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let n: usize = shape.iter().product();
    let data: Vec<Complex64> = (0..n)
        .map(|_| {
            let re = rng.gen_range(lo..hi);
            let im = if dtype.is_complex() {
                rng.gen_range(-0.3..0.3)
            } else {
                0.0
            };
            Complex64::new(re, im)
        })
        .collect();
    Tensor::from_fortran(shape, data).unwrap().cast(dtype)
}

/// Shuffled values at least 0.02 apart in real part and modulus, none near
/// zero, so that no selection flips under a finite-difference step.
fn distinct(dtype: DType, shape: &[usize], seed: u64) -> Tensor {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let n: usize = shape.iter().product();
    let im = if dtype.is_complex() { 0.1 } else { 0.0 };
    let mut data: Vec<Complex64> = (0..n)
        .map(|k| Complex64::new(0.05 * k as f64 - 1.187, im))
        .collect();
    data.shuffle(&mut rng);
    Tensor::from_fortran(shape, data).unwrap().cast(dtype)
}

fn step_and_tolerance(dtype: DType) -> (f64, f64) {
    if dtype.is_double() {
        (1e-6, 1e-6)
    } else {
        (1e-3, 1e-2)
    }
}

/// Input gradient of `layer` at `x` against an upstream gradient drawn
/// from the output shape.
fn assert_grad(layer: &mut dyn Layer, x: &Tensor, seed: u64) {
    let y = layer.forward(x).unwrap();
    let dy = random(y.dtype(), y.shape(), -1.0, 1.0, seed + 1000);
    let (step, tolerance) = step_and_tolerance(x.dtype());
    if let Err(e) = check_numdiff(layer, x, &dy, step, tolerance) {
        panic!("{} ({}): {e}", layer.name(), x.dtype());
    }
}

fn assert_variable_grad(layer: &mut dyn Layer, x: &Tensor, seed: u64) {
    let y = layer.forward(x).unwrap();
    let dy = random(y.dtype(), y.shape(), -1.0, 1.0, seed + 1000);
    let (step, tolerance) = step_and_tolerance(x.dtype());
    if let Err(e) = check_numdiff_variables(layer, x, &dy, step, tolerance) {
        panic!("{} variables ({}): {e}", layer.name(), x.dtype());
    }
}

/// Probability rows along the last axis.
fn one_hot(dtype: DType, rows: usize, classes: usize) -> Tensor {
    let mut t = ArrayD::<f64>::zeros(ndarray::IxDyn(&[rows, classes]));
    for r in 0..rows {
        t[[r, r % classes]] = 1.0;
    }
    Tensor::from(t).cast(dtype)
}

// ============================================================================
// Pointwise
// ============================================================================

#[test]
fn test_transcendental_gradients() {
    let shape = Shape::batched(&[3]);
    for (seed, dtype) in ALL.into_iter().enumerate() {
        let x = random(dtype, &[2, 3], -1.0, 1.0, seed as u64);
        let layers: Vec<Box<dyn Layer>> = vec![
            Box::new(Sin::new(shape.clone(), dtype, &[]).unwrap()),
            Box::new(Cos::new(shape.clone(), dtype, &[]).unwrap()),
            Box::new(Sinh::new(shape.clone(), dtype, &[]).unwrap()),
            Box::new(Cosh::new(shape.clone(), dtype, &[]).unwrap()),
            Box::new(Tan::new(shape.clone(), dtype, &[]).unwrap()),
            Box::new(Tanh::new(shape.clone(), dtype, &[]).unwrap()),
            Box::new(ArcTan::new(shape.clone(), dtype, &[]).unwrap()),
            Box::new(Exp::new(shape.clone(), dtype, &[]).unwrap()),
            Box::new(SoftPlus::new(shape.clone(), dtype, &[]).unwrap()),
            Box::new(Sigmoid::new(shape.clone(), dtype, &[]).unwrap()),
            Box::new(Log2cosh::new(shape.clone(), dtype, &[]).unwrap()),
            Box::new(Mul::new(shape.clone(), dtype, &[("alpha", -1.5)]).unwrap()),
            Box::new(Power::new(shape.clone(), dtype, &[("order", 3.0)]).unwrap()),
        ];
        for mut layer in layers {
            assert_grad(layer.as_mut(), &x, seed as u64);
        }
    }
}

#[test]
fn test_log_and_fractional_power_gradients() {
    let shape = Shape::fixed(&[4]);
    for (seed, dtype) in ALL.into_iter().enumerate() {
        let x = random(dtype, &[4], 0.5, 2.0, 10 + seed as u64);
        assert_grad(&mut Log::new(shape.clone(), dtype, &[]).unwrap(), &x, 1);
        assert_grad(
            &mut Power::new(shape.clone(), dtype, &[("order", 2.5)]).unwrap(),
            &x,
            2,
        );
    }
}

#[test]
fn test_mod_gradient() {
    for dtype in REAL {
        let x = random(dtype, &[5], 1.1, 1.9, 3);
        let mut layer = Mod::new(Shape::fixed(&[5]), dtype, &[("n", 1.0)]).unwrap();
        assert_grad(&mut layer, &x, 3);
    }
}

#[test]
fn test_complex_mod_gradient() {
    for (seed, dtype) in [DType::Complex64, DType::Complex128].into_iter().enumerate() {
        let x = random(dtype, &[5], 1.1, 1.9, 4 + seed as u64);
        let mut layer = Mod::new(Shape::fixed(&[5]), dtype, &[("n", 1.0)]).unwrap();
        assert_grad(&mut layer, &x, 4);
    }
}

#[test]
fn test_relu_gradient() {
    for (seed, dtype) in ALL.into_iter().enumerate() {
        let x = distinct(dtype, &[3, 4], 20 + seed as u64);
        for leak in [0.0, 0.1] {
            let mut layer = ReLU::new(Shape::batched(&[4]), dtype, leak).unwrap();
            assert_grad(&mut layer, &x, seed as u64);
        }
    }
}

// ============================================================================
// Reductions and structure
// ============================================================================

#[test]
fn test_reduction_gradients() {
    let shape = Shape::batched(&[3, 2]);
    for (seed, dtype) in ALL.into_iter().enumerate() {
        let x = random(dtype, &[2, 3, 2], -1.0, 1.0, 30 + seed as u64);
        for axis in [0, 1, -1] {
            assert_grad(&mut Sum::new(shape.clone(), dtype, axis).unwrap(), &x, 1);
            assert_grad(&mut Mean::new(shape.clone(), dtype, axis).unwrap(), &x, 2);
        }
    }
}

#[test]
fn test_structural_gradients() {
    for (seed, dtype) in ALL.into_iter().enumerate() {
        let x = random(dtype, &[2, 3, 4], -1.0, 1.0, 40 + seed as u64);
        let mut reshape =
            Reshape::new(Shape::fixed(&[2, 3, 4]), dtype, Shape::signed(&[4, -1]).unwrap())
                .unwrap();
        assert_grad(&mut reshape, &x, 1);
        let mut transpose = Transpose::new(Shape::fixed(&[2, 3, 4]), dtype, &[2, 0, 1]).unwrap();
        assert_grad(&mut transpose, &x, 2);
        let mut cache = Cache::new(Shape::fixed(&[2, 3, 4]), dtype);
        assert_grad(&mut cache, &x, 3);
    }
}

#[test]
fn test_typecast_gradient() {
    let x = random(DType::Float32, &[3], -1.0, 1.0, 50);
    let mut layer = TypeCast::new(Shape::fixed(&[3]), DType::Float32, DType::Float64);
    assert_grad(&mut layer, &x, 50);
    let x = random(DType::Float64, &[3], -1.0, 1.0, 53);
    let mut layer = TypeCast::new(Shape::fixed(&[3]), DType::Float64, DType::Complex128);
    assert_grad(&mut layer, &x, 53);
    let x = random(DType::Complex128, &[3], -1.0, 1.0, 51);
    let mut layer = TypeCast::new(Shape::fixed(&[3]), DType::Complex128, DType::Complex64);
    let y = layer.forward(&x).unwrap();
    let dy = random(DType::Complex64, y.shape(), -1.0, 1.0, 52);
    check_numdiff(&mut layer, &x, &dy, 1e-3, 1e-2).unwrap();
}

#[test]
fn test_dropout_gradient() {
    for (seed, dtype) in ALL.into_iter().enumerate() {
        let x = random(dtype, &[3, 6], -1.0, 1.0, 60 + seed as u64);
        let mut layer = DropOut::new(Shape::batched(&[6]), dtype, 0.6, 1).unwrap();
        layer
            .set_runtime_vars(&RuntimeVars::new().with_seed("seed", seed as u64))
            .unwrap();
        assert_grad(&mut layer, &x, seed as u64);
    }
}

// ============================================================================
// Losses
// ============================================================================

#[test]
fn test_softmax_gradient() {
    for (seed, dtype) in ALL.into_iter().enumerate() {
        let x = random(dtype, &[2, 4], -2.0, 2.0, 70 + seed as u64);
        for axis in [0, 1] {
            let mut layer = SoftMax::new(Shape::fixed(&[2, 4]), dtype, axis).unwrap();
            assert_grad(&mut layer, &x, seed as u64);
        }
    }
}

#[test]
fn test_cross_entropy_gradients() {
    for (seed, dtype) in REAL.into_iter().enumerate() {
        let labels = RuntimeVars::new().with_tensor("y_true", one_hot(dtype, 3, 4));

        let x = random(dtype, &[3, 4], 0.2, 1.0, 80 + seed as u64);
        let mut ce = CrossEntropy::new(Shape::batched(&[4]), dtype, 1).unwrap();
        ce.set_runtime_vars(&labels).unwrap();
        assert_grad(&mut ce, &x, 1);

        let x = random(dtype, &[3, 4], -2.0, 2.0, 85 + seed as u64);
        let mut smce = SoftMaxCrossEntropy::new(Shape::batched(&[4]), dtype, -1).unwrap();
        smce.set_runtime_vars(&labels).unwrap();
        assert_grad(&mut smce, &x, 2);
    }
}

#[test]
fn test_complex_cross_entropy_gradient() {
    for (seed, dtype) in [DType::Complex64, DType::Complex128].into_iter().enumerate() {
        let mut layer = CrossEntropy::new(Shape::batched(&[4]), dtype, 1).unwrap();
        layer
            .set_runtime_vars(&RuntimeVars::new().with_tensor("y_true", one_hot(dtype, 3, 4)))
            .unwrap();
        let x = random(dtype, &[3, 4], 0.4, 1.0, 95 + seed as u64);
        assert_grad(&mut layer, &x, 95);
    }
}

#[test]
fn test_complex_softmax_cross_entropy_gradient() {
    let dtype = DType::Complex128;
    let mut layer = SoftMaxCrossEntropy::new(Shape::batched(&[3]), dtype, 1).unwrap();
    layer
        .set_runtime_vars(&RuntimeVars::new().with_tensor("y_true", one_hot(dtype, 2, 3)))
        .unwrap();
    let x = random(dtype, &[2, 3], -1.0, 1.0, 90);
    assert_grad(&mut layer, &x, 90);
}

#[test]
fn test_square_loss_gradient() {
    for dtype in REAL {
        let mut layer = SquareLoss::new(Shape::batched(&[3]), dtype);
        let target = random(dtype, &[2, 3], -1.0, 1.0, 95);
        layer
            .set_runtime_vars(&RuntimeVars::new().with_tensor("y_true", target))
            .unwrap();
        let x = random(dtype, &[2, 3], -1.0, 1.0, 96);
        assert_grad(&mut layer, &x, 96);
    }
}

// ============================================================================
// Windowed layers, filter, normalization
// ============================================================================

#[test]
fn test_pooling_gradients() {
    for (seed, dtype) in ALL.into_iter().enumerate() {
        let x = distinct(dtype, &[2, 4, 6], 100 + seed as u64);
        for mode in PoolMode::ALL {
            for boundary in [Boundary::Open, Boundary::Periodic] {
                let mut layer = Pooling::new(
                    Shape::batched(&[4, 6]),
                    dtype,
                    &[2, 3],
                    mode,
                    Some(vec![1, 2]),
                    boundary,
                )
                .unwrap();
                assert_grad(&mut layer, &x, seed as u64);
            }
        }
    }
}

#[test]
fn test_conv_prod_gradients() {
    let powers = ndarray::array![[1, 0], [-1, 2]].into_dyn();
    for (seed, dtype) in ALL.into_iter().enumerate() {
        let x = random(dtype, &[3, 4, 4], 0.5, 1.5, 110 + seed as u64);
        for boundary in [Boundary::Open, Boundary::Periodic] {
            let mut layer = ConvProd::new(
                Shape::batched(&[4, 4]),
                dtype,
                powers.clone(),
                None,
                boundary,
            )
            .unwrap();
            assert_grad(&mut layer, &x, seed as u64);
        }
    }
}

#[test]
fn test_filter_gradients() {
    let x = random(DType::Complex128, &[2, 3, 4], -1.0, 1.0, 120);
    let mut layer =
        Filter::new(Shape::batched(&[3, 4]), DType::Complex128, &[0.7, -1.3], &[1, 2]).unwrap();
    assert_grad(&mut layer, &x, 120);

    // A real basis keeps real inputs real.
    let x = random(DType::Float64, &[2, 3, 4], -1.0, 1.0, 121);
    let mut layer = Filter::new(Shape::batched(&[3, 4]), DType::Float64, &[PI], &[-1]).unwrap();
    assert_eq!(layer.output_dtype(), DType::Float64);
    assert_grad(&mut layer, &x, 121);

    let mut layer = Filter::new(Shape::batched(&[3, 4]), DType::Float64, &[0.7], &[1]).unwrap();
    assert_eq!(layer.output_dtype(), DType::Complex128);
    assert_grad(&mut layer, &x, 122);
}

#[test]
fn test_batch_norm_gradient_with_bound_statistics() {
    for (seed, dtype) in ALL.into_iter().enumerate() {
        let mut layer = BatchNorm::new(Shape::batched(&[3]), dtype, None).unwrap();
        let vars = RuntimeVars::new()
            .with_tensor("mean", random(dtype, &[3], -0.5, 0.5, 130))
            .with_tensor("variance", random(DType::Float64, &[3], 0.5, 2.0, 131));
        layer.set_runtime_vars(&vars).unwrap();
        let x = random(dtype, &[4, 3], -1.0, 1.0, 132 + seed as u64);
        assert_grad(&mut layer, &x, seed as u64);
    }
}

// ============================================================================
// Trainable layers
// ============================================================================

#[test]
fn test_linear_gradients() {
    for (seed, dtype) in ALL.into_iter().enumerate() {
        let seed = seed as u64;
        let mut layer = Linear::new(
            Shape::batched(&[3]),
            random(dtype, &[2, 3], -1.0, 1.0, 140 + seed),
            random(dtype, &[2], -1.0, 1.0, 145 + seed),
        )
        .unwrap();
        let x = random(dtype, &[4, 3], -1.0, 1.0, 150 + seed);
        assert_grad(&mut layer, &x, seed);
        assert_variable_grad(&mut layer, &x, seed);
    }
}

#[test]
fn test_linear_unbatched_gradients() {
    let dtype = DType::Float64;
    let mut layer = Linear::new(
        Shape::fixed(&[3]),
        random(dtype, &[4, 3], -1.0, 1.0, 160),
        random(dtype, &[4], -1.0, 1.0, 161),
    )
    .unwrap();
    let x = random(dtype, &[3], -1.0, 1.0, 162);
    assert_grad(&mut layer, &x, 162);
    assert_variable_grad(&mut layer, &x, 162);
}

#[test]
fn test_apdot_gradients() {
    for (seed, dtype) in ALL.into_iter().enumerate() {
        let seed = seed as u64;
        let mut layer = Apdot::new(
            Shape::batched(&[3]),
            random(dtype, &[2, 3], 0.5, 1.5, 170 + seed),
            random(dtype, &[2], 0.5, 1.5, 175 + seed),
        )
        .unwrap();
        let x = random(dtype, &[2, 3], 0.5, 1.5, 180 + seed);
        assert_grad(&mut layer, &x, seed);
        assert_variable_grad(&mut layer, &x, seed);
    }
}
