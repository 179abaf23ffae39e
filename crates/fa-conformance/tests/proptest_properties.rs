#![forbid(unsafe_code)]

//! Property-based checks for the compute kernels.
//!
//! Inputs are random nullable columns cut into random chunk layouts; the
//! properties must hold for every layout, not just hand-picked fixtures.

use proptest::prelude::*;

use fa_columnar::{ChunkedArray, TypedArray};
use fa_compute::{
    CountMode, CountOptions, Datum, ScalarAggregateOptions, count, index_in, max, mean, min, sum,
    unique,
};
use fa_types::Scalar;

// ---------------------------------------------------------------------------
// Strategy generators
// ---------------------------------------------------------------------------

fn arb_ints(max_len: usize) -> impl Strategy<Value = Vec<Option<i32>>> {
    proptest::collection::vec(proptest::option::weighted(0.8, -1_000i32..1_000), 0..max_len)
}

/// Small value space so lookups and duplicates actually happen.
fn arb_keys(max_len: usize) -> impl Strategy<Value = Vec<Option<i32>>> {
    proptest::collection::vec(proptest::option::weighted(0.9, 0i32..8), 0..max_len)
}

fn arb_floats(max_len: usize) -> impl Strategy<Value = Vec<Option<f64>>> {
    proptest::collection::vec(proptest::option::weighted(0.8, -1e6_f64..1e6), 0..max_len)
}

fn arb_bools(max_len: usize) -> impl Strategy<Value = Vec<Option<bool>>> {
    proptest::collection::vec(proptest::option::weighted(0.8, any::<bool>()), 0..max_len)
}

fn arb_cuts() -> impl Strategy<Value = Vec<usize>> {
    proptest::collection::vec(0usize..64, 0..5)
}

/// Chunk lengths summing to `len`; empty chunks are allowed.
fn split_lengths(len: usize, cuts: &[usize]) -> Vec<usize> {
    let mut points: Vec<usize> = cuts.iter().map(|cut| cut % (len + 1)).collect();
    points.sort_unstable();
    let mut lengths = Vec::with_capacity(points.len() + 1);
    let mut prev = 0;
    for point in points {
        lengths.push(point - prev);
        prev = point;
    }
    lengths.push(len - prev);
    lengths
}

fn flat_and_chunked(array: TypedArray, cuts: &[usize]) -> (Datum, Datum) {
    let lengths = split_lengths(array.len(), cuts);
    let chunked = ChunkedArray::from_array(array.clone())
        .rechunk(&lengths)
        .expect("rechunk must accept lengths summing to len");
    (Datum::from(array), Datum::from(chunked))
}

fn keep() -> ScalarAggregateOptions {
    ScalarAggregateOptions::default()
}

fn skip() -> ScalarAggregateOptions {
    ScalarAggregateOptions::skipping_nulls()
}

// ---------------------------------------------------------------------------
// Property: chunk layout is invisible to reductions
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(300))]

    #[test]
    fn prop_int_aggregates_ignore_chunking(values in arb_ints(40), cuts in arb_cuts()) {
        let (flat, chunked) = flat_and_chunked(TypedArray::from_options(values), &cuts);
        for options in [keep(), skip()] {
            prop_assert_eq!(sum(&[flat.clone()], &options), sum(&[chunked.clone()], &options));
            prop_assert_eq!(mean(&[flat.clone()], &options), mean(&[chunked.clone()], &options));
            prop_assert_eq!(min(&[flat.clone()], &options), min(&[chunked.clone()], &options));
            prop_assert_eq!(max(&[flat.clone()], &options), max(&[chunked.clone()], &options));
        }
        for mode in [CountMode::OnlyValid, CountMode::OnlyNull, CountMode::All] {
            let options = CountOptions { mode };
            prop_assert_eq!(count(&[flat.clone()], &options), count(&[chunked.clone()], &options));
        }
    }

    #[test]
    fn prop_float_sum_ignores_chunking(values in arb_floats(40), cuts in arb_cuts()) {
        let (flat, chunked) = flat_and_chunked(TypedArray::from_options(values), &cuts);
        prop_assert_eq!(sum(&[flat.clone()], &skip()), sum(&[chunked.clone()], &skip()));
        prop_assert_eq!(mean(&[flat], &skip()), mean(&[chunked], &skip()));
    }

    #[test]
    fn prop_float_min_max_ignore_chunking(values in arb_floats(40), cuts in arb_cuts()) {
        let (flat, chunked) = flat_and_chunked(TypedArray::from_options(values), &cuts);
        for options in [keep(), skip()] {
            prop_assert_eq!(min(&[flat.clone()], &options), min(&[chunked.clone()], &options));
            prop_assert_eq!(max(&[flat.clone()], &options), max(&[chunked.clone()], &options));
        }
    }

    #[test]
    fn prop_bool_min_max_ignore_chunking(values in arb_bools(40), cuts in arb_cuts()) {
        let (flat, chunked) = flat_and_chunked(TypedArray::from_options(values), &cuts);
        for options in [keep(), skip()] {
            prop_assert_eq!(min(&[flat.clone()], &options), min(&[chunked.clone()], &options));
            prop_assert_eq!(max(&[flat.clone()], &options), max(&[chunked.clone()], &options));
        }
    }

    #[test]
    fn prop_operand_list_equals_concatenation(
        left in arb_ints(20),
        right in arb_ints(20),
    ) {
        let mut joined = left.clone();
        joined.extend(right.iter().copied());
        let parts = [
            Datum::from(TypedArray::from_options(left)),
            Datum::from(TypedArray::from_options(right)),
        ];
        let whole = [Datum::from(TypedArray::from_options(joined))];
        for options in [keep(), skip()] {
            prop_assert_eq!(sum(&parts, &options), sum(&whole, &options));
            prop_assert_eq!(max(&parts, &options), max(&whole, &options));
        }
    }
}

// ---------------------------------------------------------------------------
// Property: null handling of reductions
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(300))]

    #[test]
    fn prop_skip_null_sum_matches_valid_values(values in arb_ints(40)) {
        let valid: Vec<i64> = values.iter().flatten().map(|v| i64::from(*v)).collect();
        let expected = if valid.is_empty() {
            Scalar::Null(fa_types::DType::Int64)
        } else {
            Scalar::Int64(valid.iter().sum())
        };
        let input = [Datum::from(TypedArray::from_options(values))];
        prop_assert_eq!(sum(&input, &skip()), Ok(expected));
    }

    #[test]
    fn prop_any_null_nulls_the_default_sum(values in arb_ints(40)) {
        let has_null = values.iter().any(Option::is_none);
        let input = [Datum::from(TypedArray::from_options(values))];
        let out = sum(&input, &keep()).expect("sum");
        if has_null {
            prop_assert!(out.is_null());
        }
    }

    #[test]
    fn prop_mean_times_count_is_sum(values in arb_ints(40), cuts in arb_cuts()) {
        let (_, chunked) = flat_and_chunked(TypedArray::from_options(values), &cuts);
        let input = [chunked];
        let n = count(&input, &CountOptions::default()).expect("count");
        let total = sum(&input, &skip()).expect("sum");
        let avg = mean(&input, &skip()).expect("mean");
        match (n, total, avg) {
            (Scalar::Int64(0), total, avg) => {
                prop_assert!(total.is_null());
                prop_assert!(avg.is_null());
            }
            (Scalar::Int64(n), Scalar::Int64(total), Scalar::Float64(avg)) => {
                let diff = (avg * n as f64 - total as f64).abs();
                prop_assert!(diff <= 1e-9 * (total as f64).abs().max(1.0), "mean*count={} sum={}", avg * n as f64, total);
            }
            other => prop_assert!(false, "unexpected result kinds: {:?}", other),
        }
    }

    #[test]
    fn prop_min_never_exceeds_max(values in arb_ints(40)) {
        let input = [Datum::from(TypedArray::from_options(values))];
        let lo = min(&input, &skip()).expect("min");
        let hi = max(&input, &skip()).expect("max");
        if let (Scalar::Int32(lo), Scalar::Int32(hi)) = (lo, hi) {
            prop_assert!(lo <= hi);
        } else {
            prop_assert!(lo.is_null() && hi.is_null());
        }
    }
}

// ---------------------------------------------------------------------------
// Property: unique and match
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(300))]

    #[test]
    fn prop_unique_is_idempotent_and_complete(values in arb_keys(40), cuts in arb_cuts()) {
        let (_, chunked) = flat_and_chunked(TypedArray::from_options(values.clone()), &cuts);
        let once = unique(&chunked).expect("unique");
        let twice = unique(&Datum::from(once.clone())).expect("unique twice");
        prop_assert_eq!(&once, &twice);

        let distinct = once.to_scalars();
        prop_assert!(distinct.iter().filter(|v| v.is_null()).count() <= 1);
        for value in &values {
            let scalar = value.map_or(Scalar::Null(fa_types::DType::Int32), Scalar::Int32);
            prop_assert!(distinct.contains(&scalar), "{:?} missing from unique output", scalar);
        }
    }

    #[test]
    fn prop_unique_ignores_chunking(values in arb_keys(40), cuts in arb_cuts()) {
        let (flat, chunked) = flat_and_chunked(TypedArray::from_options(values), &cuts);
        let flat_out = unique(&flat).expect("flat unique");
        let chunked_out = unique(&chunked).expect("chunked unique");
        prop_assert_eq!(flat_out.to_scalars(), chunked_out.to_scalars());
    }

    #[test]
    fn prop_index_in_returns_first_position(needles in arb_keys(30), table in arb_keys(12)) {
        let out = index_in(
            &Datum::from(TypedArray::from_options(needles.clone())),
            &TypedArray::from_options(table.clone()),
        )
        .expect("match");
        let out = out.as_array().expect("flat needles give a flat result").to_scalars();
        prop_assert_eq!(out.len(), needles.len());
        for (needle, got) in needles.iter().zip(out) {
            let expected = needle.and_then(|n| table.iter().position(|t| *t == Some(n)));
            let expected = expected.map_or(Scalar::Null(fa_types::DType::Int32), |pos| {
                Scalar::Int32(i32::try_from(pos).expect("small table"))
            });
            prop_assert_eq!(got, expected);
        }
    }

    #[test]
    fn prop_index_in_keeps_chunk_lengths(needles in arb_keys(30), table in arb_keys(12), cuts in arb_cuts()) {
        let (flat, chunked) = flat_and_chunked(TypedArray::from_options(needles), &cuts);
        let table = TypedArray::from_options(table);
        let flat_out = index_in(&flat, &table).expect("flat match");
        let chunked_out = index_in(&chunked, &table).expect("chunked match");
        let (Some(flat_out), Some(chunked_out), Some(input)) =
            (flat_out.as_array(), chunked_out.as_chunked(), chunked.as_chunked())
        else {
            return Err(TestCaseError::fail("match must preserve the input shape"));
        };
        prop_assert_eq!(chunked_out.chunk_lengths(), input.chunk_lengths());
        prop_assert_eq!(&chunked_out.concatenate().expect("concat"), flat_out);
    }
}
