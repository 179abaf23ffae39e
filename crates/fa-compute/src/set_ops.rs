//! Hash-based set operations: `unique`, `index_in` (`match`), `is_in` and
//! `value_counts`.
//!
//! Floats hash by canonical bit pattern: every NaN lands in one bucket and
//! `-0.0` shares the bucket of `0.0`.

use std::collections::{HashMap, HashSet};

use fa_columnar::{ChunkedArray, TypedArray};
use fa_types::{DType, Scalar};

use crate::{ComputeError, Datum};

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
enum HashKey {
    Bool(bool),
    Int(i64),
    FloatBits(u64),
}

impl HashKey {
    /// `None` for nulls, which never take part in lookups.
    fn from_scalar(value: &Scalar) -> Option<Self> {
        match value {
            Scalar::Null(_) => None,
            Scalar::Bool(v) => Some(Self::Bool(*v)),
            Scalar::Int32(v) => Some(Self::Int(i64::from(*v))),
            Scalar::Int64(v) => Some(Self::Int(*v)),
            Scalar::Float64(v) => Some(Self::FloatBits(canonical_float_bits(*v))),
        }
    }
}

fn canonical_float_bits(value: f64) -> u64 {
    if value.is_nan() {
        f64::NAN.to_bits()
    } else if value == 0.0 {
        0.0_f64.to_bits()
    } else {
        value.to_bits()
    }
}

/// Distinct values in order of first logical occurrence.
///
/// The result is always a flat array; a null appears at most once, at the
/// position where the first null was seen.
pub fn unique(operand: &Datum) -> Result<TypedArray, ComputeError> {
    let mut seen = HashSet::new();
    let mut seen_null = false;
    let mut out = Vec::new();

    for segment in operand.segments() {
        for value in segment.iter() {
            match HashKey::from_scalar(&value) {
                Some(key) => {
                    if seen.insert(key) {
                        out.push(value);
                    }
                }
                None => {
                    if !seen_null {
                        seen_null = true;
                        out.push(value);
                    }
                }
            }
        }
    }

    Ok(TypedArray::from_scalars(operand.dtype(), &out)?)
}

/// Distinct values and how often each occurs, in first-occurrence order.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueCounts {
    pub values: TypedArray,
    pub counts: TypedArray,
}

pub fn value_counts(operand: &Datum) -> Result<ValueCounts, ComputeError> {
    let mut slot = HashMap::<Option<HashKey>, usize>::new();
    let mut values = Vec::new();
    let mut counts = Vec::<i64>::new();

    for segment in operand.segments() {
        for value in segment.iter() {
            let idx = *slot.entry(HashKey::from_scalar(&value)).or_insert_with(|| {
                values.push(value);
                counts.push(0);
                values.len() - 1
            });
            counts[idx] += 1;
        }
    }

    Ok(ValueCounts {
        values: TypedArray::from_scalars(operand.dtype(), &values)?,
        counts: TypedArray::from_values(counts),
    })
}

/// First position of every valid value in `table`.
fn build_lookup(table: &TypedArray) -> Result<HashMap<HashKey, i32>, ComputeError> {
    if i32::try_from(table.len()).is_err() {
        return Err(ComputeError::TableTooLarge { len: table.len() });
    }
    let mut lookup = HashMap::with_capacity(table.len());
    for (pos, value) in table.iter().enumerate() {
        if let Some(key) = HashKey::from_scalar(&value) {
            lookup.entry(key).or_insert(pos as i32);
        }
    }
    Ok(lookup)
}

fn check_table(needles: &Datum, table: &TypedArray) -> Result<(), ComputeError> {
    if needles.dtype() != table.dtype() {
        return Err(ComputeError::TypeMismatch {
            left: needles.dtype(),
            right: table.dtype(),
        });
    }
    Ok(())
}

/// Apply `kernel` segment by segment, giving the output the shape of `input`.
fn map_segments(
    input: &Datum,
    out_dtype: DType,
    kernel: impl Fn(&TypedArray) -> TypedArray,
) -> Result<Datum, ComputeError> {
    Ok(match input {
        Datum::Array(array) => Datum::Array(kernel(array)),
        Datum::ChunkedArray(chunked) => Datum::ChunkedArray(ChunkedArray::new(
            out_dtype,
            chunked.chunks().iter().map(&kernel).collect(),
        )?),
        Datum::Scalar(_) => {
            let mapped = input
                .segments()
                .first()
                .and_then(|segment| kernel(segment).value(0))
                .unwrap_or(Scalar::Null(out_dtype));
            Datum::Scalar(mapped)
        }
    })
}

/// Zero-based index of each needle's first occurrence in `table`.
///
/// Values absent from `table`, and null needles, map to null. The result has
/// the needles' shape: a chunked input keeps its chunk lengths.
pub fn index_in(needles: &Datum, table: &TypedArray) -> Result<Datum, ComputeError> {
    check_table(needles, table)?;
    let lookup = build_lookup(table)?;
    map_segments(needles, DType::Int32, |segment| {
        TypedArray::from_options(
            segment
                .iter()
                .map(|value| HashKey::from_scalar(&value).and_then(|key| lookup.get(&key).copied()))
                .collect(),
        )
    })
}

/// Whether each needle occurs in `table`. Null needles give `false`.
pub fn is_in(needles: &Datum, table: &TypedArray) -> Result<Datum, ComputeError> {
    check_table(needles, table)?;
    let lookup = build_lookup(table)?;
    map_segments(needles, DType::Bool, |segment| {
        TypedArray::from_values(
            segment
                .iter()
                .map(|value| HashKey::from_scalar(&value).is_some_and(|key| lookup.contains_key(&key)))
                .collect(),
        )
    })
}
