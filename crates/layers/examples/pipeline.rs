//! Fit a two-layer classifier with plain gradient descent.
//!
//! Run with `cargo run -p handgrad-layers --example pipeline`.

use handgrad_core::{DType, Result, RuntimeVars, SetMode, Shape, Tensor};
use handgrad_layers::config::PipelineConfig;
use handgrad_layers::linear::Linear;
use handgrad_layers::pipeline::Pipeline;
use ndarray::{array, Array1};

fn main() -> Result<()> {
    println!("=== Hand-differentiated pipeline ===\n");

    // Two points per class on either side of the diagonal.
    let x = Tensor::from(array![[1.0, 0.2], [0.8, -0.1], [-0.3, 0.9], [0.1, 1.2]].into_dyn());
    let y_true = Tensor::from(array![[1.0, 0.0], [1.0, 0.0], [0.0, 1.0], [0.0, 1.0]].into_dyn());

    let head = PipelineConfig::from_json(
        r#"{
            "input_shape": [-1, 2],
            "dtype": "float64",
            "layers": [
                {"type": "tanh"},
                {"type": "softmax_cross_entropy", "axis": 1},
                {"type": "mean", "axis": 0}
            ]
        }"#,
    )?;

    let mut net = Pipeline::new();
    net.push(Box::new(Linear::new(
        Shape::batched(&[2]),
        Tensor::from(array![[0.1, -0.2], [0.3, 0.1], [-0.1, 0.2], [0.05, 0.05]].into_dyn()),
        Tensor::zeros(DType::Float64, &[4]),
    )?))?;
    net.push(Box::new(Linear::new(
        Shape::batched(&[4]),
        Tensor::from(array![[0.2, -0.1, 0.1, 0.3], [-0.2, 0.1, 0.2, -0.1]].into_dyn()),
        Tensor::zeros(DType::Float64, &[2]),
    )?))?;
    // The configured head continues from the last linear stage.
    for config in &head.layers {
        let shape = net.output_shape().cloned().unwrap_or_else(|| head.input_shape.clone());
        let dtype = net.output_dtype().unwrap_or(head.dtype);
        net.push(config.build(shape, dtype)?)?;
    }
    println!("Stages: {}", net.len());
    println!("Trainable variables: {}\n", net.num_variables());

    net.set_runtime_vars(&RuntimeVars::new().with_tensor("y_true", y_true))?;

    let one = Tensor::from(ndarray::arr0(1.0).into_dyn());
    let rate = 0.5;
    for epoch in 0..=200 {
        let loss = net.forward(&x)?.to_real_vec()[0];
        let grads = net.backward(&one)?;
        let flat: Array1<f64> = grads
            .params
            .iter()
            .flat_map(|p| p.to_real_vec())
            .map(|g| -rate * g)
            .collect();
        net.set_variables(&Tensor::from(flat.into_dyn()), SetMode::Accumulate)?;
        if epoch % 50 == 0 {
            println!("epoch {epoch:>3}: loss {loss:.5}");
        }
    }

    println!("\n=== Done ===");
    Ok(())
}
