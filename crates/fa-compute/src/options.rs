use serde::{Deserialize, Serialize};

/// Options shared by `sum`, `mean`, `min` and `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScalarAggregateOptions {
    /// Exclude nulls instead of letting them null the result.
    pub skip_nulls: bool,
    /// Fewer valid contributing values than this yields a null result.
    pub min_count: u32,
}

impl Default for ScalarAggregateOptions {
    fn default() -> Self {
        Self {
            skip_nulls: false,
            min_count: 1,
        }
    }
}

impl ScalarAggregateOptions {
    #[must_use]
    pub fn skipping_nulls() -> Self {
        Self {
            skip_nulls: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_skip_nulls(mut self, skip_nulls: bool) -> Self {
        self.skip_nulls = skip_nulls;
        self
    }

    #[must_use]
    pub fn with_min_count(mut self, min_count: u32) -> Self {
        self.min_count = min_count;
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CountMode {
    #[default]
    OnlyValid,
    OnlyNull,
    All,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CountOptions {
    pub mode: CountMode,
}

/// Options accepted by [`crate::FunctionRegistry::call`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FunctionOptions {
    ScalarAggregate(ScalarAggregateOptions),
    Count(CountOptions),
}

impl FunctionOptions {
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::ScalarAggregate(_) => "scalar_aggregate",
            Self::Count(_) => "count",
        }
    }
}

impl From<ScalarAggregateOptions> for FunctionOptions {
    fn from(value: ScalarAggregateOptions) -> Self {
        Self::ScalarAggregate(value)
    }
}

impl From<CountOptions> for FunctionOptions {
    fn from(value: CountOptions) -> Self {
        Self::Count(value)
    }
}
