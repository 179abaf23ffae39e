#![forbid(unsafe_code)]

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DType {
    Bool,
    Int32,
    Int64,
    Float64,
}

impl DType {
    /// Name used by the host-facing layer when describing a type.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::Float64 => "double",
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single typed value. Nulls keep the type they were declared with, so a
/// reduction over an empty `int64` input still reports `int64`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Scalar {
    Null(DType),
    Bool(bool),
    Int32(i32),
    Int64(i64),
    Float64(f64),
}

impl Scalar {
    #[must_use]
    pub fn dtype(&self) -> DType {
        match self {
            Self::Null(dtype) => *dtype,
            Self::Bool(_) => DType::Bool,
            Self::Int32(_) => DType::Int32,
            Self::Int64(_) => DType::Int64,
            Self::Float64(_) => DType::Float64,
        }
    }

    #[must_use]
    pub fn null(dtype: DType) -> Self {
        Self::Null(dtype)
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null(_))
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.is_null()
    }

    /// NaN is a regular float value here; only `Null` is missing.
    #[must_use]
    pub fn is_nan(&self) -> bool {
        matches!(self, Self::Float64(v) if v.is_nan())
    }

    /// Equality that treats NaN as equal to NaN and compares nulls by type.
    #[must_use]
    pub fn semantic_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Float64(a), Self::Float64(b)) => (a.is_nan() && b.is_nan()) || (a == b),
            _ => self == other,
        }
    }

    /// Total order between two valid scalars of the same type.
    ///
    /// Booleans order `false < true`; floats use IEEE 754 total ordering, so
    /// NaN is a comparable value. Returns `None` for nulls or mixed types.
    #[must_use]
    pub fn total_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Self::Bool(a), Self::Bool(b)) => Some(a.cmp(b)),
            (Self::Int32(a), Self::Int32(b)) => Some(a.cmp(b)),
            (Self::Int64(a), Self::Int64(b)) => Some(a.cmp(b)),
            (Self::Float64(a), Self::Float64(b)) => Some(a.total_cmp(b)),
            _ => None,
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null(dtype) => write!(f, "null<{dtype}>"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int32(v) => write!(f, "{v}"),
            Self::Int64(v) => write!(f, "{v}"),
            Self::Float64(v) => write!(f, "{v}"),
        }
    }
}

impl From<bool> for Scalar {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i32> for Scalar {
    fn from(value: i32) -> Self {
        Self::Int32(value)
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Self::Int64(value)
    }
}

impl From<f64> for Scalar {
    fn from(value: f64) -> Self {
        Self::Float64(value)
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TypeError {
    #[error("dtype {left} and dtype {right} have no compatible common type")]
    IncompatibleDtypes { left: DType, right: DType },
    #[error("expected a scalar of dtype {expected} but found {found}")]
    ScalarTypeMismatch { expected: DType, found: DType },
}

/// Types must match exactly; this engine does no implicit widening between
/// operands.
pub fn common_dtype(left: DType, right: DType) -> Result<DType, TypeError> {
    if left == right {
        Ok(left)
    } else {
        Err(TypeError::IncompatibleDtypes { left, right })
    }
}

/// Result type of `sum`: booleans count into int64, integers widen to int64.
#[must_use]
pub fn sum_dtype(input: DType) -> DType {
    match input {
        DType::Bool | DType::Int32 | DType::Int64 => DType::Int64,
        DType::Float64 => DType::Float64,
    }
}

/// Result type of `min`/`max` when no valid value contributed.
///
/// A boolean input that held only nulls reports an int32 null. This matches
/// the established behaviour of the bindings built on this engine and is kept
/// as-is.
#[must_use]
pub fn min_max_null_dtype(input: DType, saw_only_nulls: bool) -> DType {
    if input == DType::Bool && saw_only_nulls {
        DType::Int32
    } else {
        input
    }
}

#[cfg(test)]
mod tests {
    use std::cmp::Ordering;

    use super::{DType, Scalar, TypeError, common_dtype, min_max_null_dtype, sum_dtype};

    #[test]
    fn null_keeps_declared_dtype() {
        let missing = Scalar::null(DType::Int64);
        assert_eq!(missing.dtype(), DType::Int64);
        assert!(missing.is_null());
        assert!(!missing.is_valid());
    }

    #[test]
    fn nan_is_valid_not_null() {
        let nan = Scalar::Float64(f64::NAN);
        assert!(nan.is_valid());
        assert!(nan.is_nan());
    }

    #[test]
    fn semantic_eq_treats_nan_as_equal() {
        let left = Scalar::Float64(f64::NAN);
        let right = Scalar::Float64(f64::NAN);
        assert_ne!(left, right);
        assert!(left.semantic_eq(&right));
    }

    #[test]
    fn semantic_eq_distinguishes_null_types() {
        assert!(!Scalar::null(DType::Int32).semantic_eq(&Scalar::null(DType::Bool)));
        assert!(Scalar::null(DType::Bool).semantic_eq(&Scalar::null(DType::Bool)));
    }

    #[test]
    fn common_dtype_rejects_mixed_types() {
        let err = common_dtype(DType::Int32, DType::Bool).expect_err("must fail");
        assert_eq!(
            err,
            TypeError::IncompatibleDtypes {
                left: DType::Int32,
                right: DType::Bool,
            }
        );
        assert_eq!(
            err.to_string(),
            "dtype int32 and dtype bool have no compatible common type"
        );
        assert_eq!(common_dtype(DType::Float64, DType::Float64), Ok(DType::Float64));
    }

    #[test]
    fn total_cmp_orders_bool_false_first() {
        assert_eq!(
            Scalar::Bool(false).total_cmp(&Scalar::Bool(true)),
            Some(Ordering::Less)
        );
    }

    #[test]
    fn total_cmp_places_nan_above_infinity() {
        let nan = Scalar::Float64(f64::NAN);
        let inf = Scalar::Float64(f64::INFINITY);
        assert_eq!(nan.total_cmp(&inf), Some(Ordering::Greater));
    }

    #[test]
    fn total_cmp_rejects_null_and_mixed() {
        assert_eq!(Scalar::Int32(1).total_cmp(&Scalar::Int64(1)), None);
        assert_eq!(Scalar::null(DType::Int32).total_cmp(&Scalar::Int32(1)), None);
    }

    #[test]
    fn sum_dtype_widens_counts_and_integers() {
        assert_eq!(sum_dtype(DType::Bool), DType::Int64);
        assert_eq!(sum_dtype(DType::Int32), DType::Int64);
        assert_eq!(sum_dtype(DType::Float64), DType::Float64);
    }

    #[test]
    fn all_null_bool_min_max_reports_int32() {
        assert_eq!(min_max_null_dtype(DType::Bool, true), DType::Int32);
        assert_eq!(min_max_null_dtype(DType::Bool, false), DType::Bool);
        assert_eq!(min_max_null_dtype(DType::Float64, true), DType::Float64);
    }

    #[test]
    fn scalar_serde_round_trip() {
        let values = vec![
            Scalar::Int32(7),
            Scalar::null(DType::Bool),
            Scalar::Float64(2.5),
        ];
        let json = serde_json::to_string(&values).expect("serialize");
        let back: Vec<Scalar> = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(values, back);
    }
}
