//! Leaky rectifier on the real part.

use handgrad_core::Element;

fn slope<T: Element>(x: T, leak: f64) -> T {
    if x.real() > 0.0 {
        T::one()
    } else {
        T::from_real(leak)
    }
}

/// Rectify `x` in place.
pub fn forward<T: Element>(x: &mut [T], leak: f64) {
    for v in x.iter_mut() {
        *v = *v * slope(*v, leak);
    }
}

/// `dx = dy` where `Re x > 0`, `leak · dy` elsewhere.
pub fn backward<T: Element>(x: &[T], dy: &[T], leak: f64) -> Vec<T> {
    x.iter()
        .zip(dy)
        .map(|(&xi, &gi)| gi * slope(xi, leak))
        .collect()
}
