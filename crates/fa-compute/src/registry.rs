//! Name-based dispatch for host bindings.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;

use tracing::debug;

use crate::aggregate::{count_refs, max_refs, mean_refs, min_refs, sum_refs};
use crate::options::{CountOptions, FunctionOptions, ScalarAggregateOptions};
use crate::set_ops::{index_in, is_in, unique};
use crate::{Argument, ComputeError, Datum};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    AtLeast(usize),
}

impl Arity {
    #[must_use]
    pub fn accepts(self, actual: usize) -> bool {
        match self {
            Self::Exact(n) => actual == n,
            Self::AtLeast(n) => actual >= n,
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(n) => write!(f, "exactly {n}"),
            Self::AtLeast(n) => write!(f, "at least {n}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionKind {
    Sum,
    Mean,
    Min,
    Max,
    Count,
    Unique,
    IndexIn,
    IsIn,
}

impl FunctionKind {
    #[must_use]
    pub fn arity(self) -> Arity {
        match self {
            Self::Sum | Self::Mean | Self::Min | Self::Max | Self::Count => Arity::AtLeast(1),
            Self::Unique => Arity::Exact(1),
            Self::IndexIn | Self::IsIn => Arity::Exact(2),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FunctionRegistry {
    functions: BTreeMap<String, FunctionKind>,
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl FunctionRegistry {
    #[must_use]
    pub fn empty() -> Self {
        Self {
            functions: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        for (name, kind) in [
            ("sum", FunctionKind::Sum),
            ("mean", FunctionKind::Mean),
            ("min", FunctionKind::Min),
            ("max", FunctionKind::Max),
            ("count", FunctionKind::Count),
            ("unique", FunctionKind::Unique),
            ("match", FunctionKind::IndexIn),
            ("index_in", FunctionKind::IndexIn),
            ("is_in", FunctionKind::IsIn),
        ] {
            registry.register(name, kind);
        }
        registry
    }

    /// Bind `name` to `kind`, replacing any earlier binding.
    pub fn register(&mut self, name: impl Into<String>, kind: FunctionKind) {
        self.functions.insert(name.into(), kind);
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<FunctionKind> {
        self.functions.get(name).copied()
    }

    pub fn function_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.functions.keys().map(String::as_str)
    }

    /// Validate `args` and run the function bound to `name`.
    ///
    /// Checks run in order: the name, then every argument's class, then the
    /// argument count, then the options kind.
    pub fn call(
        &self,
        name: &str,
        args: &[Argument],
        options: Option<&FunctionOptions>,
    ) -> Result<Datum, ComputeError> {
        let kind = self
            .get(name)
            .ok_or_else(|| ComputeError::UnknownFunction(name.to_owned()))?;
        let operands = engine_operands(args)?;

        let arity = kind.arity();
        if !arity.accepts(operands.len()) {
            return Err(ComputeError::InvalidArity {
                function: name.to_owned(),
                expected: arity,
                actual: operands.len(),
            });
        }

        debug!(function = name, ?kind, args = operands.len(), "dispatching compute call");

        match kind {
            FunctionKind::Sum => {
                let opts = aggregate_options(name, options)?;
                sum_refs(&operands, &opts).map(Datum::Scalar)
            }
            FunctionKind::Mean => {
                let opts = aggregate_options(name, options)?;
                mean_refs(&operands, &opts).map(Datum::Scalar)
            }
            FunctionKind::Min => {
                let opts = aggregate_options(name, options)?;
                min_refs(&operands, &opts).map(Datum::Scalar)
            }
            FunctionKind::Max => {
                let opts = aggregate_options(name, options)?;
                max_refs(&operands, &opts).map(Datum::Scalar)
            }
            FunctionKind::Count => {
                let opts = count_options(name, options)?;
                count_refs(&operands, &opts).map(Datum::Scalar)
            }
            FunctionKind::Unique => {
                no_options(name, options)?;
                unique(operands[0]).map(Datum::Array)
            }
            FunctionKind::IndexIn => {
                no_options(name, options)?;
                let table = operands[1].to_array()?;
                index_in(operands[0], &table)
            }
            FunctionKind::IsIn => {
                no_options(name, options)?;
                let table = operands[1].to_array()?;
                is_in(operands[0], &table)
            }
        }
    }
}

/// Run `name` on the process-wide builtin registry.
pub fn call_function(
    name: &str,
    args: &[Argument],
    options: Option<&FunctionOptions>,
) -> Result<Datum, ComputeError> {
    static BUILTINS: OnceLock<FunctionRegistry> = OnceLock::new();
    BUILTINS
        .get_or_init(FunctionRegistry::with_builtins)
        .call(name, args, options)
}

/// Positions in errors are 1-based, counted over all arguments.
fn engine_operands(args: &[Argument]) -> Result<Vec<&Datum>, ComputeError> {
    args.iter()
        .enumerate()
        .map(|(idx, arg)| match arg {
            Argument::Datum(datum) => Ok(datum),
            Argument::Host { class } => Err(ComputeError::UnsupportedInputType {
                position: idx + 1,
                class: class.clone(),
            }),
        })
        .collect()
}

fn aggregate_options(
    name: &str,
    options: Option<&FunctionOptions>,
) -> Result<ScalarAggregateOptions, ComputeError> {
    match options {
        None => Ok(ScalarAggregateOptions::default()),
        Some(FunctionOptions::ScalarAggregate(opts)) => Ok(*opts),
        Some(other) => Err(invalid_options(name, other)),
    }
}

fn count_options(
    name: &str,
    options: Option<&FunctionOptions>,
) -> Result<CountOptions, ComputeError> {
    match options {
        None => Ok(CountOptions::default()),
        Some(FunctionOptions::Count(opts)) => Ok(*opts),
        Some(other) => Err(invalid_options(name, other)),
    }
}

fn no_options(name: &str, options: Option<&FunctionOptions>) -> Result<(), ComputeError> {
    match options {
        None => Ok(()),
        Some(other) => Err(invalid_options(name, other)),
    }
}

fn invalid_options(name: &str, options: &FunctionOptions) -> ComputeError {
    ComputeError::InvalidOptions {
        function: name.to_owned(),
        options: options.kind_name(),
    }
}

#[cfg(test)]
mod tests {
    use fa_columnar::{ChunkedArray, TypedArray};
    use fa_types::{DType, Scalar};

    use super::{Arity, FunctionKind, FunctionRegistry, call_function};
    use crate::options::{CountMode, CountOptions, FunctionOptions, ScalarAggregateOptions};
    use crate::{Argument, ComputeError, Datum};

    fn ints(values: &[i32]) -> Argument {
        Argument::from(TypedArray::from_values(values.to_vec()))
    }

    #[test]
    fn builtins_include_match_alias() {
        let registry = FunctionRegistry::default();
        assert_eq!(registry.get("match"), Some(FunctionKind::IndexIn));
        assert_eq!(registry.get("index_in"), Some(FunctionKind::IndexIn));
        let names: Vec<&str> = registry.function_names().collect();
        assert_eq!(
            names,
            vec!["count", "index_in", "is_in", "match", "max", "mean", "min", "sum", "unique"]
        );
    }

    #[test]
    fn sum_by_name_with_skip_nulls() {
        let chunked = ChunkedArray::from_chunks(vec![
            TypedArray::from_options(vec![Some(1), Some(2), Some(3)]),
            TypedArray::from_options(vec![Some(4), None, Some(6), Some(7), Some(8), Some(9)]),
        ])
        .expect("chunked");
        let options = FunctionOptions::from(ScalarAggregateOptions::skipping_nulls());
        let out = call_function("sum", &[Argument::from(chunked)], Some(&options)).expect("sum");
        assert_eq!(out, Datum::Scalar(Scalar::Int64(40)));
    }

    #[test]
    fn default_options_propagate_nulls() {
        let arg = Argument::from(TypedArray::from_options(vec![Some(1.0), None]));
        let out = call_function("mean", &[arg], None).expect("mean");
        assert_eq!(out, Datum::Scalar(Scalar::Null(DType::Float64)));
    }

    #[test]
    fn host_argument_reports_its_position() {
        let err = call_function(
            "sum",
            &[ints(&[1]), Argument::host("character")],
            None,
        )
        .expect_err("host value");
        assert_eq!(
            err,
            ComputeError::UnsupportedInputType {
                position: 2,
                class: "character".to_owned(),
            }
        );
        assert!(err.to_string().starts_with("Argument 2 is of class character"));
    }

    #[test]
    fn match_takes_needles_then_table() {
        let out = call_function("match", &[ints(&[1, 4, 3]), ints(&[4, 3, 2, 1])], None)
            .expect("match");
        assert_eq!(out, Datum::Array(TypedArray::from_values(vec![3, 0, 1])));
    }

    #[test]
    fn chunked_table_is_flattened() {
        let table = ChunkedArray::from_chunks(vec![
            TypedArray::from_values(vec![4, 3]),
            TypedArray::from_values(vec![2, 1]),
        ])
        .expect("chunked");
        let out = call_function("is_in", &[ints(&[1, 5]), Argument::from(table)], None)
            .expect("is_in");
        assert_eq!(out, Datum::Array(TypedArray::from_values(vec![true, false])));
    }

    #[test]
    fn unknown_name_and_bad_arity() {
        assert_eq!(
            call_function("median", &[ints(&[1])], None),
            Err(ComputeError::UnknownFunction("median".to_owned()))
        );
        let err = call_function("unique", &[ints(&[1]), ints(&[2])], None).expect_err("arity");
        assert_eq!(
            err,
            ComputeError::InvalidArity {
                function: "unique".to_owned(),
                expected: Arity::Exact(1),
                actual: 2,
            }
        );
        assert_eq!(
            err.to_string(),
            "function unique expects exactly 1 argument(s) but received 2"
        );
    }

    #[test]
    fn options_of_wrong_kind_are_rejected() {
        let count = FunctionOptions::from(CountOptions {
            mode: CountMode::All,
        });
        assert_eq!(
            call_function("max", &[ints(&[1])], Some(&count)),
            Err(ComputeError::InvalidOptions {
                function: "max".to_owned(),
                options: "count",
            })
        );
        assert_eq!(
            call_function("count", &[ints(&[1, 2])], Some(&count)),
            Ok(Datum::Scalar(Scalar::Int64(2)))
        );
    }

    #[test]
    fn empty_registry_knows_only_registered_names() {
        let mut registry = FunctionRegistry::empty();
        registry.register("total", FunctionKind::Sum);
        assert_eq!(
            registry.call("total", &[ints(&[2, 3])], None),
            Ok(Datum::Scalar(Scalar::Int64(5)))
        );
        assert!(registry.call("sum", &[ints(&[2, 3])], None).is_err());
    }
}
