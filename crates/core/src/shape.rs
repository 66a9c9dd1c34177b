//! # Shapes
//!
//! A shape is fixed at construction time and describes every tensor a
//! layer will ever see. One or more dimensions may be the batch wildcard
//! `*`, whose extent is only known when data arrives. Output shapes are
//! computed from input shapes and attributes, never from call-time data.
//!
//! ## Design Choices
//!
//! We use runtime shape checking (`Vec<Dim>`) rather than const generics
//! because pipelines are assembled from configuration.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{LayerError, Result};

/// A single dimension of a declared shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "isize", try_from = "isize")]
pub enum Dim {
    /// Extent determined at call time (batch size).
    Any,
    /// A fixed extent.
    Fixed(usize),
}

impl Dim {
    pub fn fixed(self) -> Option<usize> {
        match self {
            Dim::Any => None,
            Dim::Fixed(n) => Some(n),
        }
    }

    pub fn matches(self, n: usize) -> bool {
        match self {
            Dim::Any => true,
            Dim::Fixed(m) => m == n,
        }
    }
}

impl From<Dim> for isize {
    fn from(d: Dim) -> isize {
        match d {
            Dim::Any => -1,
            Dim::Fixed(n) => n as isize,
        }
    }
}

impl TryFrom<isize> for Dim {
    type Error = String;

    fn try_from(v: isize) -> std::result::Result<Self, Self::Error> {
        match v {
            -1 => Ok(Dim::Any),
            n if n >= 0 => Ok(Dim::Fixed(n as usize)),
            n => Err(format!("dimension {n} is neither -1 nor non-negative")),
        }
    }
}

impl From<usize> for Dim {
    fn from(n: usize) -> Self {
        Dim::Fixed(n)
    }
}

impl fmt::Display for Dim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dim::Any => f.write_str("*"),
            Dim::Fixed(n) => write!(f, "{n}"),
        }
    }
}

/// The declared shape of a layer's input or output.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Shape {
    pub dims: Vec<Dim>,
}

impl Shape {
    pub fn new(dims: Vec<Dim>) -> Self {
        Self { dims }
    }

    /// A shape with every extent fixed.
    pub fn fixed(dims: &[usize]) -> Self {
        Self {
            dims: dims.iter().map(|&n| Dim::Fixed(n)).collect(),
        }
    }

    /// A shape from signed extents, `-1` standing for the wildcard.
    pub fn signed(dims: &[isize]) -> Result<Self> {
        dims.iter()
            .map(|&d| {
                Dim::try_from(d).map_err(|reason| LayerError::InvalidShape { reason })
            })
            .collect::<Result<Vec<_>>>()
            .map(Self::new)
    }

    /// Prepend a batch wildcard.
    pub fn batched(dims: &[usize]) -> Self {
        let mut out = vec![Dim::Any];
        out.extend(dims.iter().map(|&n| Dim::Fixed(n)));
        Self { dims: out }
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// Total number of elements, if every extent is fixed.
    pub fn numel(&self) -> Option<usize> {
        self.dims.iter().map(|d| d.fixed()).product()
    }

    pub fn is_fixed(&self) -> bool {
        self.dims.iter().all(|d| matches!(d, Dim::Fixed(_)))
    }

    /// Check whether a concrete runtime shape fits this declaration.
    pub fn matches(&self, concrete: &[usize]) -> bool {
        self.dims.len() == concrete.len()
            && self.dims.iter().zip(concrete).all(|(d, &n)| d.matches(n))
    }

    /// Fail with a shape mismatch unless `concrete` fits.
    pub fn check(&self, concrete: &[usize]) -> Result<()> {
        if self.matches(concrete) {
            Ok(())
        } else {
            Err(LayerError::ShapeMismatch {
                expected: self.clone(),
                got: concrete.to_vec(),
            })
        }
    }

    /// Check if this shape can feed a layer declared with `other`.
    pub fn is_compatible(&self, other: &Shape) -> bool {
        self.rank() == other.rank()
            && self.dims.iter().zip(&other.dims).all(|(a, b)| match (a, b) {
                (Dim::Fixed(m), Dim::Fixed(n)) => m == n,
                _ => true,
            })
    }

    /// Fixed extent of `axis`, or an error naming what needed it.
    pub fn extent(&self, axis: usize, what: &str) -> Result<usize> {
        self.dims
            .get(axis)
            .and_then(|d| d.fixed())
            .ok_or_else(|| LayerError::InvalidShape {
                reason: format!("{what} needs a fixed extent on axis {axis} of {self}"),
            })
    }

    /// Normalise a possibly negative axis against this shape's rank.
    pub fn axis(&self, axis: isize) -> Result<usize> {
        normalize_axis(axis, self.rank())
    }

    /// This shape with `axis` removed.
    pub fn remove_axis(&self, axis: usize) -> Shape {
        let mut dims = self.dims.clone();
        if axis < dims.len() {
            dims.remove(axis);
        }
        Shape { dims }
    }

    /// Leading `n` dimensions.
    pub fn head(&self, n: usize) -> &[Dim] {
        &self.dims[..n.min(self.dims.len())]
    }

    /// Trailing `n` dimensions.
    pub fn tail(&self, n: usize) -> &[Dim] {
        &self.dims[self.dims.len().saturating_sub(n)..]
    }
}

impl From<&[usize]> for Shape {
    fn from(dims: &[usize]) -> Self {
        Shape::fixed(dims)
    }
}

impl<const N: usize> From<[usize; N]> for Shape {
    fn from(dims: [usize; N]) -> Self {
        Shape::fixed(&dims)
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}]",
            self.dims
                .iter()
                .map(|d| d.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        )
    }
}

/// Map an axis in `[-rank, rank)` to `[0, rank)`.
pub fn normalize_axis(axis: isize, rank: usize) -> Result<usize> {
    let r = rank as isize;
    if axis >= r || axis < -r {
        return Err(LayerError::InvalidAxis { axis, rank });
    }
    Ok(axis.rem_euclid(r.max(1)) as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_shape() {
        let s = Shape::fixed(&[3, 4]);
        assert_eq!(s.rank(), 2);
        assert_eq!(s.numel(), Some(12));
        assert_eq!(s.to_string(), "[3, 4]");
    }

    #[test]
    fn test_batched_shape() {
        let s = Shape::batched(&[4]);
        assert_eq!(s.to_string(), "[*, 4]");
        assert_eq!(s.numel(), None);
        assert!(s.matches(&[7, 4]));
        assert!(!s.matches(&[7, 5]));
        assert!(!s.matches(&[4]));
    }

    #[test]
    fn test_signed() {
        let s = Shape::signed(&[-1, 2]).unwrap();
        assert_eq!(s, Shape::batched(&[2]));
        assert!(Shape::signed(&[-2]).is_err());
    }

    #[test]
    fn test_normalize_axis() {
        assert_eq!(normalize_axis(-1, 3).unwrap(), 2);
        assert_eq!(normalize_axis(0, 3).unwrap(), 0);
        assert!(normalize_axis(3, 3).is_err());
        assert!(normalize_axis(-4, 3).is_err());
    }

    #[test]
    fn test_compatibility() {
        let a = Shape::batched(&[10]);
        let b = Shape::fixed(&[5, 10]);
        let c = Shape::fixed(&[5, 11]);
        assert!(a.is_compatible(&b));
        assert!(!b.is_compatible(&c));
    }
}
