#![forbid(unsafe_code)]

//! Aggregation and set-membership kernels over [`TypedArray`] and
//! [`ChunkedArray`] inputs.
//!
//! Kernels are plain functions over [`Datum`]s. The [`FunctionRegistry`]
//! adds name-based dispatch and validates arguments coming from a host
//! binding layer.

use std::borrow::Cow;

use fa_columnar::{ChunkedArray, ColumnError, TypedArray};
use fa_types::{DType, Scalar};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod aggregate;
pub mod options;
pub mod registry;
pub mod set_ops;

pub use aggregate::{Accumulator, count, max, mean, min, sum};
pub use options::{CountMode, CountOptions, FunctionOptions, ScalarAggregateOptions};
pub use registry::{Arity, FunctionKind, FunctionRegistry, call_function};
pub use set_ops::{ValueCounts, index_in, is_in, unique, value_counts};

/// Allowed argument kinds, as reported to host callers.
pub const ALLOWED_INPUT_CLASSES: &str =
    "\"Array\", \"ChunkedArray\", \"RecordBatch\", \"Table\", or \"Scalar\"";

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ComputeError {
    #[error("type mismatch: {left} and {right} cannot be combined in one call")]
    TypeMismatch { left: DType, right: DType },
    #[error(
        "Argument {position} is of class {class} but it must be one of {allowed}",
        allowed = ALLOWED_INPUT_CLASSES
    )]
    UnsupportedInputType { position: usize, class: String },
    #[error("function {function} expects {expected} argument(s) but received {actual}")]
    InvalidArity {
        function: String,
        expected: Arity,
        actual: usize,
    },
    #[error("no compute function named {0:?}")]
    UnknownFunction(String),
    #[error("function {function} does not accept {options} options")]
    InvalidOptions {
        function: String,
        options: &'static str,
    },
    #[error("lookup table of length {len} exceeds the int32 index range")]
    TableTooLarge { len: usize },
    #[error(transparent)]
    Column(#[from] ColumnError),
}

/// An engine value: a scalar, a flat array, or a chunked array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Datum {
    Scalar(Scalar),
    Array(TypedArray),
    ChunkedArray(ChunkedArray),
}

impl Datum {
    #[must_use]
    pub fn dtype(&self) -> DType {
        match self {
            Self::Scalar(value) => value.dtype(),
            Self::Array(array) => array.dtype(),
            Self::ChunkedArray(chunked) => chunked.dtype(),
        }
    }

    /// Logical length; a scalar counts as one element.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Scalar(_) => 1,
            Self::Array(array) => array.len(),
            Self::ChunkedArray(chunked) => chunked.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn class_name(&self) -> &'static str {
        match self {
            Self::Scalar(_) => "Scalar",
            Self::Array(_) => "Array",
            Self::ChunkedArray(_) => "ChunkedArray",
        }
    }

    #[must_use]
    pub fn as_array(&self) -> Option<&TypedArray> {
        match self {
            Self::Array(array) => Some(array),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_chunked(&self) -> Option<&ChunkedArray> {
        match self {
            Self::ChunkedArray(chunked) => Some(chunked),
            _ => None,
        }
    }

    /// The datum's storage segments in logical order.
    #[must_use]
    pub fn segments(&self) -> Vec<Cow<'_, TypedArray>> {
        match self {
            Self::Scalar(value) => vec![Cow::Owned(scalar_array(*value))],
            Self::Array(array) => vec![Cow::Borrowed(array)],
            Self::ChunkedArray(chunked) => chunked.chunks().iter().map(Cow::Borrowed).collect(),
        }
    }

    /// Flatten into one array, copying chunks if needed.
    pub fn to_array(&self) -> Result<Cow<'_, TypedArray>, ComputeError> {
        Ok(match self {
            Self::Scalar(value) => Cow::Owned(scalar_array(*value)),
            Self::Array(array) => Cow::Borrowed(array),
            Self::ChunkedArray(chunked) => Cow::Owned(chunked.concatenate()?),
        })
    }
}

impl From<Scalar> for Datum {
    fn from(value: Scalar) -> Self {
        Self::Scalar(value)
    }
}

impl From<TypedArray> for Datum {
    fn from(value: TypedArray) -> Self {
        Self::Array(value)
    }
}

impl From<ChunkedArray> for Datum {
    fn from(value: ChunkedArray) -> Self {
        Self::ChunkedArray(value)
    }
}

/// A call argument as handed over by a host binding layer.
///
/// `Host` carries a value the binding could not map onto an engine type;
/// it is rejected with its position when the call is validated.
#[derive(Debug, Clone, PartialEq)]
pub enum Argument {
    Datum(Datum),
    Host { class: String },
}

impl Argument {
    pub fn host(class: impl Into<String>) -> Self {
        Self::Host {
            class: class.into(),
        }
    }

    #[must_use]
    pub fn class_name(&self) -> &str {
        match self {
            Self::Datum(datum) => datum.class_name(),
            Self::Host { class } => class.as_str(),
        }
    }
}

impl From<Datum> for Argument {
    fn from(value: Datum) -> Self {
        Self::Datum(value)
    }
}

impl From<Scalar> for Argument {
    fn from(value: Scalar) -> Self {
        Self::Datum(Datum::Scalar(value))
    }
}

impl From<TypedArray> for Argument {
    fn from(value: TypedArray) -> Self {
        Self::Datum(Datum::Array(value))
    }
}

impl From<ChunkedArray> for Argument {
    fn from(value: ChunkedArray) -> Self {
        Self::Datum(Datum::ChunkedArray(value))
    }
}

fn scalar_array(value: Scalar) -> TypedArray {
    match value {
        Scalar::Null(dtype) => TypedArray::new_null(dtype, 1),
        Scalar::Bool(v) => TypedArray::from_values(vec![v]),
        Scalar::Int32(v) => TypedArray::from_values(vec![v]),
        Scalar::Int64(v) => TypedArray::from_values(vec![v]),
        Scalar::Float64(v) => TypedArray::from_values(vec![v]),
    }
}
