//! # Windowing Algebra
//!
//! Turns a kernel shape, an input image shape, per-axis strides and a
//! boundary policy into a compressed sparse column (CSC) adjacency: for
//! each output pixel, the ordered list of input pixels that feed it.
//! Pooling and convolution-product layers are expressed on top of it
//! without ever materialising a sliding-window tensor.
//!
//! Pixels are flattened in column-major order (first axis fastest), both
//! for the input image and the output image. Within a window, members are
//! listed in row-major order over the kernel offsets.
//!
//! ```rust
//! use handgrad_core::windows::{compute_windows, Boundary};
//!
//! // 1D, kernel 2, stride 2 over 4 pixels: [0,1] and [2,3]
//! let w = compute_windows(&[2], &[4], &[2], Boundary::Open).unwrap();
//! assert_eq!(w.output_shape, vec![2]);
//! assert_eq!(w.indptr, vec![0, 2, 4]);
//! assert_eq!(w.indices, vec![0, 1, 2, 3]);
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{LayerError, Result};

/// What happens to windows that reach past the image edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Boundary {
    /// Windows are truncated at the edge.
    #[default]
    Open,
    /// Coordinates wrap modulo the axis extent.
    Periodic,
}

/// CSC adjacency between output and input pixels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Windows {
    /// Column pointers, length `n_out + 1`.
    pub indptr: Vec<usize>,
    /// Input pixel indices of every window, concatenated.
    pub indices: Vec<usize>,
    /// Row-major kernel offset of each entry in `indices`.
    pub kernel_offsets: Vec<usize>,
    /// Spatial shape of the output image.
    pub output_shape: Vec<usize>,
    /// Spatial shape of the input image.
    pub input_shape: Vec<usize>,
}

impl Windows {
    /// Number of output pixels.
    pub fn n_out(&self) -> usize {
        self.indptr.len().saturating_sub(1)
    }

    /// Number of input pixels.
    pub fn n_in(&self) -> usize {
        self.input_shape.iter().product()
    }

    /// Input pixels feeding output pixel `j`.
    pub fn window(&self, j: usize) -> &[usize] {
        &self.indices[self.indptr[j]..self.indptr[j + 1]]
    }

    /// Kernel offsets of the members of window `j`, parallel to
    /// [`Windows::window`]. A window cut short at an open edge skips the
    /// offsets that fell outside.
    pub fn window_offsets(&self, j: usize) -> &[usize] {
        &self.kernel_offsets[self.indptr[j]..self.indptr[j + 1]]
    }

    /// How many windows each input pixel belongs to.
    pub fn counts(&self) -> Vec<usize> {
        let mut counts = vec![0; self.n_in()];
        for &i in &self.indices {
            counts[i] += 1;
        }
        counts
    }
}

/// Build the window adjacency.
///
/// When the kernel has fewer axes than the image, it is aligned with the
/// trailing image axes; leading axes get extent 1 and stride 1.
pub fn compute_windows(
    kernel_shape: &[usize],
    input_shape: &[usize],
    strides: &[usize],
    boundary: Boundary,
) -> Result<Windows> {
    if kernel_shape.len() > input_shape.len() {
        return Err(LayerError::InvalidKernel {
            reason: format!(
                "kernel rank {} exceeds image rank {}",
                kernel_shape.len(),
                input_shape.len()
            ),
        });
    }
    if strides.len() != kernel_shape.len() {
        return Err(LayerError::InvalidKernel {
            reason: format!(
                "{} strides given for a rank {} kernel",
                strides.len(),
                kernel_shape.len()
            ),
        });
    }
    if let Some(s) = strides.iter().position(|&s| s == 0) {
        return Err(LayerError::InvalidKernel {
            reason: format!("stride on axis {s} must be positive"),
        });
    }
    if let Some(k) = kernel_shape.iter().position(|&k| k == 0) {
        return Err(LayerError::InvalidKernel {
            reason: format!("kernel extent on axis {k} must be positive"),
        });
    }

    let pad = input_shape.len() - kernel_shape.len();
    let kernel: Vec<usize> = std::iter::repeat(1)
        .take(pad)
        .chain(kernel_shape.iter().copied())
        .collect();
    let strides: Vec<usize> = std::iter::repeat(1)
        .take(pad)
        .chain(strides.iter().copied())
        .collect();

    let output_shape: Vec<usize> = input_shape
        .iter()
        .zip(&kernel)
        .zip(&strides)
        .map(|((&n, &k), &s)| match boundary {
            Boundary::Open if k > n => 0,
            Boundary::Open => (n - k) / s + 1,
            Boundary::Periodic => n.div_ceil(s),
        })
        .collect();

    let n_out: usize = output_shape.iter().product();
    let offsets = row_major_offsets(&kernel);
    let mut indptr = Vec::with_capacity(n_out + 1);
    let mut indices = Vec::with_capacity(n_out * offsets.len());
    let mut kernel_offsets = Vec::with_capacity(n_out * offsets.len());
    indptr.push(0);

    for j in 0..n_out {
        let anchor: Vec<usize> = unravel_fortran(j, &output_shape)
            .iter()
            .zip(&strides)
            .map(|(&o, &s)| o * s)
            .collect();
        'offsets: for (position, offset) in offsets.iter().enumerate() {
            let mut flat = 0;
            let mut step = 1;
            for axis in 0..input_shape.len() {
                let n = input_shape[axis];
                let mut c = anchor[axis] + offset[axis];
                if c >= n {
                    match boundary {
                        Boundary::Periodic => c %= n,
                        Boundary::Open => continue 'offsets,
                    }
                }
                flat += c * step;
                step *= n;
            }
            indices.push(flat);
            kernel_offsets.push(position);
        }
        indptr.push(indices.len());
    }

    Ok(Windows {
        indptr,
        indices,
        kernel_offsets,
        output_shape,
        input_shape: input_shape.to_vec(),
    })
}

/// All multi-indices below `shape`, last axis fastest.
fn row_major_offsets(shape: &[usize]) -> Vec<Vec<usize>> {
    let total: usize = shape.iter().product();
    (0..total)
        .map(|mut flat| {
            let mut idx = vec![0; shape.len()];
            for axis in (0..shape.len()).rev() {
                idx[axis] = flat % shape[axis];
                flat /= shape[axis];
            }
            idx
        })
        .collect()
}

/// Multi-index of a column-major flat position.
pub fn unravel_fortran(mut flat: usize, shape: &[usize]) -> Vec<usize> {
    shape
        .iter()
        .map(|&n| {
            let i = flat % n;
            flat /= n;
            i
        })
        .collect()
}
