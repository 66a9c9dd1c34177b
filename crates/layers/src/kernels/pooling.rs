//! Windowed reductions over a CSC adjacency.

use handgrad_core::{Element, Windows};
use serde::{Deserialize, Serialize};

use super::at;

/// Reduction applied to each window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PoolMode {
    /// Largest real part.
    #[serde(rename = "max")]
    Max,
    /// Largest modulus.
    #[serde(rename = "max-abs")]
    MaxAbs,
    /// Smallest real part.
    #[serde(rename = "min")]
    Min,
    /// Smallest modulus.
    #[serde(rename = "min-abs")]
    MinAbs,
    /// Arithmetic mean.
    #[serde(rename = "mean")]
    Mean,
}

impl PoolMode {
    pub const ALL: [PoolMode; 5] = [
        PoolMode::Max,
        PoolMode::MaxAbs,
        PoolMode::Min,
        PoolMode::MinAbs,
        PoolMode::Mean,
    ];

    /// Position of the selected member within `window`, for the
    /// selecting modes. Ties resolve to the first member.
    fn select<T: Element>(self, x: &[T], nb: usize, b: usize, window: &[usize]) -> Option<usize> {
        let key = |v: T| -> f64 {
            match self {
                PoolMode::Max | PoolMode::Min => v.real(),
                PoolMode::MaxAbs | PoolMode::MinAbs => v.modulus(),
                PoolMode::Mean => 0.0,
            }
        };
        let larger = matches!(self, PoolMode::Max | PoolMode::MaxAbs);
        let mut best: Option<(usize, f64)> = None;
        for (k, &p) in window.iter().enumerate() {
            let v = key(x[at(nb, b, p)]);
            best = match best {
                Some((_, bv)) if (larger && v > bv) || (!larger && v < bv) => Some((k, v)),
                None => Some((k, v)),
                keep => keep,
            };
        }
        best.map(|(k, _)| k)
    }
}

/// `y[b, j] = reduce_{p in window(j)} x[b, p]`.
pub fn forward<T: Element>(x: &[T], nb: usize, windows: &Windows, mode: PoolMode) -> Vec<T> {
    let n_out = windows.n_out();
    let mut y = vec![T::zero(); nb * n_out];
    for j in 0..n_out {
        let window = windows.window(j);
        if window.is_empty() {
            continue;
        }
        for b in 0..nb {
            y[at(nb, b, j)] = match mode {
                PoolMode::Mean => {
                    let s: T = window.iter().map(|&p| x[at(nb, b, p)]).sum();
                    s / T::from_real(window.len() as f64)
                }
                _ => match mode.select(x, nb, b, window) {
                    Some(k) => x[at(nb, b, window[k])],
                    None => T::zero(),
                },
            };
        }
    }
    y
}

/// Scatter `dy` back onto the selected (or all, for mean) members.
pub fn backward<T: Element>(
    x: &[T],
    dy: &[T],
    nb: usize,
    windows: &Windows,
    mode: PoolMode,
) -> Vec<T> {
    let mut dx = vec![T::zero(); x.len()];
    for j in 0..windows.n_out() {
        let window = windows.window(j);
        if window.is_empty() {
            continue;
        }
        for b in 0..nb {
            let g = dy[at(nb, b, j)];
            match mode {
                PoolMode::Mean => {
                    let share = g / T::from_real(window.len() as f64);
                    for &p in window {
                        dx[at(nb, b, p)] = dx[at(nb, b, p)] + share;
                    }
                }
                _ => {
                    if let Some(k) = mode.select(x, nb, b, window) {
                        let i = at(nb, b, window[k]);
                        dx[i] = dx[i] + g;
                    }
                }
            }
        }
    }
    dx
}
