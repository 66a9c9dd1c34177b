//! # Windowing Tests
//!
//! Coverage properties of the CSC adjacency:
//! - Periodic boundary covers every pixel equally often
//! - Open boundary never references a pixel outside the image
//! - Column pointers are consistent with the member lists

use handgrad_core::windows::{compute_windows, unravel_fortran, Boundary};

// ============================================================================
// Coverage
// ============================================================================

#[test]
fn test_periodic_uniform_coverage() {
    // kernel 3x2, stride 1x2 over a 6x4 image: each pixel is covered
    // (3/1) * (2/2) = 3 times.
    let w = compute_windows(&[3, 2], &[6, 4], &[1, 2], Boundary::Periodic).unwrap();
    assert_eq!(w.output_shape, vec![6, 2]);
    let counts = w.counts();
    assert!(counts.iter().all(|&c| c == 3), "counts = {counts:?}");
}

#[test]
fn test_periodic_non_overlapping_covers_once() {
    let w = compute_windows(&[2, 2], &[4, 6], &[2, 2], Boundary::Periodic).unwrap();
    assert!(w.counts().iter().all(|&c| c == 1));
}

#[test]
fn test_open_indices_in_range() {
    for (k, n, s) in [(3, 7, 2), (2, 5, 1), (4, 4, 3), (1, 3, 1)] {
        let w = compute_windows(&[k, 2], &[n, 5], &[s, 2], Boundary::Open).unwrap();
        let n_in = n * 5;
        assert!(w.indices.iter().all(|&i| i < n_in));
        for j in 0..w.n_out() {
            assert_eq!(w.window(j).len(), 2 * k);
        }
    }
}

#[test]
fn test_open_window_contents() {
    let w = compute_windows(&[2], &[5], &[2], Boundary::Open).unwrap();
    assert_eq!(w.output_shape, vec![2]);
    assert_eq!(w.window(0), &[0, 1]);
    assert_eq!(w.window(1), &[2, 3]);
    // pixel 4 is never reached with stride 2
    assert_eq!(w.counts()[4], 0);
}

// ============================================================================
// Structure
// ============================================================================

#[test]
fn test_indptr_is_monotone() {
    let w = compute_windows(&[2, 3], &[5, 7], &[1, 2], Boundary::Periodic).unwrap();
    assert_eq!(w.indptr.len(), w.n_out() + 1);
    assert!(w.indptr.windows(2).all(|p| p[1] - p[0] == 6));
    assert_eq!(*w.indptr.last().unwrap(), w.indices.len());
}

#[test]
fn test_window_anchor_is_first_member() {
    let shape = [6, 4];
    let w = compute_windows(&[2, 2], &shape, &[2, 1], Boundary::Open).unwrap();
    for j in 0..w.n_out() {
        let o = unravel_fortran(j, &w.output_shape);
        let anchor = o[0] * 2 + shape[0] * o[1];
        assert_eq!(w.window(j)[0], anchor);
    }
}
