//! # Shape Tests
//!
//! Tests for declared shapes:
//! - Constructors (fixed, batched, signed)
//! - Matching concrete shapes against declarations
//! - Axis normalisation and mismatch errors

use handgrad_core::{normalize_axis, Dim, LayerError, Shape};

// ============================================================================
// Constructor Tests
// ============================================================================

#[test]
fn test_fixed_constructor() {
    let s = Shape::fixed(&[2, 3, 4]);
    assert_eq!(s.rank(), 3);
    assert_eq!(s.numel(), Some(24));
    assert!(s.is_fixed());
}

#[test]
fn test_batched_constructor() {
    let s = Shape::batched(&[3, 4]);
    assert_eq!(s.dims[0], Dim::Any);
    assert_eq!(s.rank(), 3);
    assert_eq!(s.numel(), None);
    assert!(!s.is_fixed());
}

#[test]
fn test_signed_constructor() {
    let s = Shape::signed(&[-1, 4]).unwrap();
    assert_eq!(s, Shape::batched(&[4]));

    let err = Shape::signed(&[3, -7]).unwrap_err();
    assert!(matches!(err, LayerError::InvalidShape { .. }));
}

#[test]
fn test_array_conversion() {
    let s: Shape = [2, 2].into();
    assert_eq!(s, Shape::fixed(&[2, 2]));
}

// ============================================================================
// Display Tests
// ============================================================================

#[test]
fn test_shape_display() {
    assert_eq!(Shape::fixed(&[]).to_string(), "[]");
    assert_eq!(Shape::fixed(&[10]).to_string(), "[10]");
    assert_eq!(Shape::batched(&[3, 4]).to_string(), "[*, 3, 4]");
}

// ============================================================================
// Matching / Mismatch Tests
// ============================================================================

#[test]
fn test_wildcard_matches_any_extent() {
    let s = Shape::batched(&[3]);
    assert!(s.matches(&[1, 3]));
    assert!(s.matches(&[100, 3]));
    assert!(!s.matches(&[100, 4]));
}

#[test]
fn test_rank_must_agree() {
    let scalar = Shape::fixed(&[]);
    let vector = Shape::fixed(&[1]);

    // Same element count, different ranks
    assert!(!scalar.matches(&[1]));
    assert!(!vector.matches(&[]));
    assert!(!scalar.is_compatible(&vector));
}

#[test]
fn test_shape_mismatch_error() {
    let expected = Shape::fixed(&[128]);
    let error = expected.check(&[256]).unwrap_err();

    let msg = error.to_string();
    assert!(msg.contains("128"));
    assert!(msg.contains("256"));
}

#[test]
fn test_extent_requires_fixed() {
    let s = Shape::batched(&[5]);
    assert_eq!(s.extent(1, "pooling").unwrap(), 5);
    assert!(s.extent(0, "pooling").is_err());
    assert!(s.extent(2, "pooling").is_err());
}

#[test]
fn test_remove_axis() {
    let s = Shape::batched(&[3, 4]);
    assert_eq!(s.remove_axis(1), Shape::batched(&[4]));
    assert_eq!(s.remove_axis(0), Shape::fixed(&[3, 4]));
}

// ============================================================================
// Axis Tests
// ============================================================================

#[test]
fn test_negative_axes() {
    let s = Shape::fixed(&[2, 3, 4]);
    assert_eq!(s.axis(-1).unwrap(), 2);
    assert_eq!(s.axis(-3).unwrap(), 0);
    assert!(s.axis(-4).is_err());
    assert!(s.axis(3).is_err());
}

#[test]
fn test_invalid_axis_message() {
    let err = normalize_axis(5, 2).unwrap_err();
    assert_eq!(err, LayerError::InvalidAxis { axis: 5, rank: 2 });
    assert!(err.to_string().contains('5'));
}

// ============================================================================
// Serialization
// ============================================================================

#[test]
fn test_shape_serde_uses_signed_form() {
    let s = Shape::batched(&[3]);
    let json = serde_json::to_string(&s).unwrap();
    assert_eq!(json, "[-1,3]");
    let back: Shape = serde_json::from_str(&json).unwrap();
    assert_eq!(back, s);
}

#[test]
fn test_shape_hash() {
    use std::collections::HashSet;

    let mut set = HashSet::new();
    set.insert(Shape::fixed(&[10]));
    set.insert(Shape::fixed(&[10]));
    set.insert(Shape::batched(&[10]));

    assert_eq!(set.len(), 2);
}
