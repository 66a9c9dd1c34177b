//! # Data Types
//!
//! Every layer declares the numeric type it consumes and the one it
//! produces. The set is closed: single/double precision, real/complex.
//!
//! Promotion follows the common-type rule: complex beats real and
//! double width beats single width, so `float64 ⊔ complex64 = complex128`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::LayerError;

/// The closed set of element types a tensor may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    Float32,
    Float64,
    Complex64,
    Complex128,
}

impl DType {
    /// All supported types, in promotion order.
    pub const ALL: [DType; 4] = [
        DType::Float32,
        DType::Float64,
        DType::Complex64,
        DType::Complex128,
    ];

    /// Kernel token used to pick the dtype-specialised entry point.
    pub fn token(self) -> char {
        match self {
            DType::Float32 => 's',
            DType::Float64 => 'd',
            DType::Complex64 => 'c',
            DType::Complex128 => 'z',
        }
    }

    pub fn is_complex(self) -> bool {
        matches!(self, DType::Complex64 | DType::Complex128)
    }

    pub fn is_double(self) -> bool {
        matches!(self, DType::Float64 | DType::Complex128)
    }

    /// The complex type with the same precision.
    pub fn to_complex(self) -> DType {
        if self.is_double() {
            DType::Complex128
        } else {
            DType::Complex64
        }
    }

    /// The real type with the same precision.
    pub fn to_real(self) -> DType {
        if self.is_double() {
            DType::Float64
        } else {
            DType::Float32
        }
    }

    /// Common type of two dtypes.
    pub fn promote(self, other: DType) -> DType {
        let double = self.is_double() || other.is_double();
        match (self.is_complex() || other.is_complex(), double) {
            (false, false) => DType::Float32,
            (false, true) => DType::Float64,
            (true, false) => DType::Complex64,
            (true, true) => DType::Complex128,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            DType::Float32 => "float32",
            DType::Float64 => "float64",
            DType::Complex64 => "complex64",
            DType::Complex128 => "complex128",
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DType {
    type Err = LayerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DType::ALL
            .iter()
            .copied()
            .find(|d| d.name() == s)
            .ok_or_else(|| LayerError::UnsupportedDType {
                name: s.to_string(),
            })
    }
}
