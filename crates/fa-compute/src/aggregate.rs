//! Scalar reductions: `sum`, `mean`, `min`, `max` and `count`.
//!
//! Every reduction runs through one driver: operands are checked for a
//! common type, then their segments are fed to an [`Accumulator`] in logical
//! order. Feeding in order (rather than merging per-chunk partials) keeps
//! float results identical for any chunking of the same sequence.

use std::cmp::Ordering;

use fa_columnar::{ArrayData, NativeType, TypedArray};
use fa_types::{DType, Scalar, common_dtype, min_max_null_dtype, sum_dtype};
use tracing::trace;

use crate::options::{CountMode, CountOptions, ScalarAggregateOptions};
use crate::registry::Arity;
use crate::{ComputeError, Datum};

/// Running state of one reduction.
pub trait Accumulator {
    /// Fold the next segment of the logical input into the state.
    fn consume(&mut self, array: &TypedArray);

    fn finalize(self, options: &ScalarAggregateOptions) -> Scalar;
}

#[derive(Debug, Clone, Copy, Default)]
struct NullTally {
    valid: usize,
    nulls: usize,
}

impl NullTally {
    fn observe(&mut self, array: &TypedArray) {
        let nulls = array.null_count();
        self.nulls += nulls;
        self.valid += array.len() - nulls;
    }

    /// Whether null propagation or `min_count` forces a null result.
    fn forces_null(&self, options: &ScalarAggregateOptions) -> bool {
        (!options.skip_nulls && self.nulls > 0) || self.valid < options.min_count as usize
    }

    fn only_nulls(&self) -> bool {
        self.valid == 0 && self.nulls > 0
    }
}

fn valid_values<T: NativeType>(array: &TypedArray) -> impl Iterator<Item = T> + '_ {
    array
        .values::<T>()
        .unwrap_or(&[])
        .iter()
        .zip(array.validity().bits())
        .filter_map(|(value, valid)| valid.then_some(*value))
}

/// Sum state. Integers accumulate in 128 bits; the final int64 result wraps.
#[derive(Debug, Clone)]
pub struct SumAccumulator {
    input: DType,
    int_sum: i128,
    float_sum: f64,
    tally: NullTally,
}

impl SumAccumulator {
    #[must_use]
    pub fn new(input: DType) -> Self {
        Self {
            input,
            int_sum: 0,
            float_sum: 0.0,
            tally: NullTally::default(),
        }
    }
}

impl Accumulator for SumAccumulator {
    fn consume(&mut self, array: &TypedArray) {
        self.tally.observe(array);
        match array.data() {
            ArrayData::Bool(_) => {
                self.int_sum += valid_values::<bool>(array).filter(|v| *v).count() as i128;
            }
            ArrayData::Int32(_) => {
                self.int_sum += valid_values::<i32>(array).map(i128::from).sum::<i128>();
            }
            ArrayData::Int64(_) => {
                self.int_sum += valid_values::<i64>(array).map(i128::from).sum::<i128>();
            }
            ArrayData::Float64(_) => {
                for value in valid_values::<f64>(array) {
                    self.float_sum += value;
                }
            }
        }
    }

    fn finalize(self, options: &ScalarAggregateOptions) -> Scalar {
        let out = sum_dtype(self.input);
        if self.tally.forces_null(options) {
            return Scalar::Null(out);
        }
        match out {
            DType::Float64 => Scalar::Float64(self.float_sum),
            _ => Scalar::Int64(self.int_sum as i64),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MeanAccumulator {
    sum: SumAccumulator,
}

impl MeanAccumulator {
    #[must_use]
    pub fn new(input: DType) -> Self {
        Self {
            sum: SumAccumulator::new(input),
        }
    }
}

impl Accumulator for MeanAccumulator {
    fn consume(&mut self, array: &TypedArray) {
        self.sum.consume(array);
    }

    fn finalize(self, options: &ScalarAggregateOptions) -> Scalar {
        let SumAccumulator {
            input,
            int_sum,
            float_sum,
            tally,
        } = self.sum;
        if tally.forces_null(options) || tally.valid == 0 {
            return Scalar::Null(DType::Float64);
        }
        let total = match input {
            DType::Float64 => float_sum,
            _ => int_sum as f64,
        };
        Scalar::Float64(total / tally.valid as f64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extremum {
    Min,
    Max,
}

#[derive(Debug, Clone)]
pub struct MinMaxAccumulator {
    input: DType,
    extremum: Extremum,
    best: Option<Scalar>,
    tally: NullTally,
}

impl MinMaxAccumulator {
    #[must_use]
    pub fn new(input: DType, extremum: Extremum) -> Self {
        Self {
            input,
            extremum,
            best: None,
            tally: NullTally::default(),
        }
    }

    fn offer(&mut self, candidate: Scalar) {
        let replace = match &self.best {
            None => true,
            Some(current) => matches!(
                (self.extremum, candidate.total_cmp(current)),
                (Extremum::Min, Some(Ordering::Less)) | (Extremum::Max, Some(Ordering::Greater))
            ),
        };
        if replace {
            self.best = Some(candidate);
        }
    }
}

impl Accumulator for MinMaxAccumulator {
    fn consume(&mut self, array: &TypedArray) {
        self.tally.observe(array);
        for value in array.iter().filter(Scalar::is_valid) {
            self.offer(value);
        }
    }

    fn finalize(self, options: &ScalarAggregateOptions) -> Scalar {
        match self.best {
            Some(best) if !self.tally.forces_null(options) => best,
            _ => Scalar::Null(min_max_null_dtype(self.input, self.tally.only_nulls())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CountAccumulator {
    mode: CountMode,
    tally: NullTally,
}

impl CountAccumulator {
    #[must_use]
    pub fn new(mode: CountMode) -> Self {
        Self {
            mode,
            tally: NullTally::default(),
        }
    }
}

impl Accumulator for CountAccumulator {
    fn consume(&mut self, array: &TypedArray) {
        self.tally.observe(array);
    }

    /// Counts are never null; aggregate options do not apply.
    fn finalize(self, _options: &ScalarAggregateOptions) -> Scalar {
        let count = match self.mode {
            CountMode::OnlyValid => self.tally.valid,
            CountMode::OnlyNull => self.tally.nulls,
            CountMode::All => self.tally.valid + self.tally.nulls,
        };
        Scalar::Int64(count as i64)
    }
}

/// The single type shared by every operand of one call.
pub(crate) fn operand_dtype(function: &str, operands: &[&Datum]) -> Result<DType, ComputeError> {
    let (first, rest) = operands
        .split_first()
        .ok_or_else(|| ComputeError::InvalidArity {
            function: function.to_owned(),
            expected: Arity::AtLeast(1),
            actual: 0,
        })?;
    let mut dtype = first.dtype();
    for operand in rest {
        dtype = common_dtype(dtype, operand.dtype()).map_err(|_| ComputeError::TypeMismatch {
            left: dtype,
            right: operand.dtype(),
        })?;
    }
    Ok(dtype)
}

pub(crate) fn reduce<A: Accumulator>(
    function: &str,
    operands: &[&Datum],
    options: &ScalarAggregateOptions,
    make: impl FnOnce(DType) -> A,
) -> Result<Scalar, ComputeError> {
    let dtype = operand_dtype(function, operands)?;
    trace!(function, %dtype, operands = operands.len(), "reducing");
    let mut accumulator = make(dtype);
    for operand in operands {
        for segment in operand.segments() {
            accumulator.consume(&segment);
        }
    }
    Ok(accumulator.finalize(options))
}

pub(crate) fn sum_refs(
    operands: &[&Datum],
    options: &ScalarAggregateOptions,
) -> Result<Scalar, ComputeError> {
    reduce("sum", operands, options, SumAccumulator::new)
}

pub(crate) fn mean_refs(
    operands: &[&Datum],
    options: &ScalarAggregateOptions,
) -> Result<Scalar, ComputeError> {
    reduce("mean", operands, options, MeanAccumulator::new)
}

pub(crate) fn min_refs(
    operands: &[&Datum],
    options: &ScalarAggregateOptions,
) -> Result<Scalar, ComputeError> {
    reduce("min", operands, options, |dtype| {
        MinMaxAccumulator::new(dtype, Extremum::Min)
    })
}

pub(crate) fn max_refs(
    operands: &[&Datum],
    options: &ScalarAggregateOptions,
) -> Result<Scalar, ComputeError> {
    reduce("max", operands, options, |dtype| {
        MinMaxAccumulator::new(dtype, Extremum::Max)
    })
}

pub(crate) fn count_refs(
    operands: &[&Datum],
    options: &CountOptions,
) -> Result<Scalar, ComputeError> {
    reduce(
        "count",
        operands,
        &ScalarAggregateOptions::default(),
        |_| CountAccumulator::new(options.mode),
    )
}

/// Sum of the logical concatenation of `operands`.
///
/// Booleans count `true` values and integers widen to int64; float64 stays
/// float64.
pub fn sum(operands: &[Datum], options: &ScalarAggregateOptions) -> Result<Scalar, ComputeError> {
    sum_refs(&operands.iter().collect::<Vec<_>>(), options)
}

/// Arithmetic mean as float64. Zero valid values give a null.
pub fn mean(operands: &[Datum], options: &ScalarAggregateOptions) -> Result<Scalar, ComputeError> {
    mean_refs(&operands.iter().collect::<Vec<_>>(), options)
}

pub fn min(operands: &[Datum], options: &ScalarAggregateOptions) -> Result<Scalar, ComputeError> {
    min_refs(&operands.iter().collect::<Vec<_>>(), options)
}

pub fn max(operands: &[Datum], options: &ScalarAggregateOptions) -> Result<Scalar, ComputeError> {
    max_refs(&operands.iter().collect::<Vec<_>>(), options)
}

pub fn count(operands: &[Datum], options: &CountOptions) -> Result<Scalar, ComputeError> {
    count_refs(&operands.iter().collect::<Vec<_>>(), options)
}
