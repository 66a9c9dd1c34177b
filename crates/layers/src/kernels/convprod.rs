//! Windowed products with an integer power per kernel offset.

use handgrad_core::{Element, Windows};

use super::at;

/// Input pixel and power of every member of window `j`.
fn weighted_members(windows: &Windows, powers: &[i32], j: usize) -> Vec<(usize, i32)> {
    windows
        .window(j)
        .iter()
        .zip(windows.window_offsets(j))
        .map(|(&p, &k)| (p, powers[k]))
        .collect()
}

/// `y[b, j] = Π_k x[b, window(j)[k]] ^ powers[k]`.
///
/// `powers` is indexed by the row-major kernel offset each member was
/// reached through.
pub fn forward<T: Element>(x: &[T], nb: usize, windows: &Windows, powers: &[i32]) -> Vec<T> {
    let n_out = windows.n_out();
    let mut y = vec![T::one(); nb * n_out];
    for j in 0..n_out {
        let members = weighted_members(windows, powers, j);
        for b in 0..nb {
            y[at(nb, b, j)] = members
                .iter()
                .fold(T::one(), |acc, &(p, e)| acc * x[at(nb, b, p)].powi(e));
        }
    }
    y
}

/// Product rule: each member receives `dy · e_k x_k^(e_k - 1) · Π_{m≠k} x_m^e_m`.
///
/// The partial products are formed explicitly so zero-valued members do
/// not divide by zero.
pub fn backward<T: Element>(
    x: &[T],
    dy: &[T],
    nb: usize,
    windows: &Windows,
    powers: &[i32],
) -> Vec<T> {
    let mut dx = vec![T::zero(); x.len()];
    for j in 0..windows.n_out() {
        let members = weighted_members(windows, powers, j);
        for b in 0..nb {
            let g = dy[at(nb, b, j)];
            for (k, &(pk, ek)) in members.iter().enumerate() {
                if ek == 0 {
                    continue;
                }
                let xk = x[at(nb, b, pk)];
                let mut partial = T::from_real(ek as f64) * xk.powi(ek - 1);
                for (m, &(pm, em)) in members.iter().enumerate() {
                    if m != k {
                        partial = partial * x[at(nb, b, pm)].powi(em);
                    }
                }
                let i = at(nb, b, pk);
                dx[i] = dx[i] + g * partial;
            }
        }
    }
    dx
}

#[cfg(test)]
mod tests {
    use super::*;
    use handgrad_core::{compute_windows, Boundary};

    #[test]
    fn test_product_with_powers() {
        let w = compute_windows(&[2], &[3], &[1], Boundary::Open).unwrap();
        let x = [2.0f64, 3.0, 4.0];
        // windows [0,1] and [1,2], powers [1,2]
        let y = forward(&x, 1, &w, &[1, 2]);
        assert_eq!(y, vec![2.0 * 9.0, 3.0 * 16.0]);
    }

    #[test]
    fn test_product_rule() {
        let w = compute_windows(&[2], &[2], &[1], Boundary::Open).unwrap();
        let x = [2.0f64, 3.0];
        let dx = backward(&x, &[1.0], 1, &w, &[1, 2]);
        // y = a * b^2: dy/da = b^2, dy/db = 2ab
        assert_eq!(dx, vec![9.0, 12.0]);
    }

    #[test]
    fn test_truncated_window_keeps_offset_powers() {
        // One window of a width-3 kernel whose first offset fell off the edge.
        let w = Windows {
            indptr: vec![0, 2],
            indices: vec![0, 1],
            kernel_offsets: vec![1, 2],
            output_shape: vec![1],
            input_shape: vec![2],
        };
        let x = [2.0f64, 3.0];
        let y = forward(&x, 1, &w, &[5, 1, 2]);
        assert_eq!(y, vec![2.0 * 9.0]);
        let dx = backward(&x, &[1.0], 1, &w, &[5, 1, 2]);
        assert_eq!(dx, vec![9.0, 12.0]);
    }

    #[test]
    fn test_zero_member_has_finite_gradient() {
        let w = compute_windows(&[2], &[2], &[1], Boundary::Open).unwrap();
        let dx = backward(&[0.0f64, 5.0], &[1.0], 1, &w, &[1, 1]);
        assert_eq!(dx, vec![5.0, 0.0]);
    }
}
