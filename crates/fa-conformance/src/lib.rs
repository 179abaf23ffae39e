#![forbid(unsafe_code)]

//! Fixture-driven conformance harness for the compute kernels.
//!
//! Packets are JSON files under `fixtures/packets/`, each holding a list of
//! cases. Every case is dispatched through [`fa_compute::call_function`] and
//! its result compared against the recorded expectation.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use fa_columnar::{ChunkedArray, TypedArray};
use fa_compute::{Argument, Datum, FunctionOptions, call_function};
use fa_types::{DType, Scalar};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

/// Relative tolerance applied when comparing float results.
pub const FLOAT_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone)]
pub struct HarnessConfig {
    pub fixture_root: PathBuf,
}

impl HarnessConfig {
    #[must_use]
    pub fn default_paths() -> Self {
        Self {
            fixture_root: PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures"),
        }
    }

    #[must_use]
    pub fn with_fixture_root(fixture_root: impl Into<PathBuf>) -> Self {
        Self {
            fixture_root: fixture_root.into(),
        }
    }

    #[must_use]
    pub fn packet_fixture_root(&self) -> PathBuf {
        self.fixture_root.join("packets")
    }
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self::default_paths()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SuiteOptions {
    pub packet_filter: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixtureOperation {
    Sum,
    Mean,
    Min,
    Max,
    Count,
    Unique,
    Match,
    IndexIn,
    IsIn,
}

impl FixtureOperation {
    /// Registry name the case is dispatched under.
    #[must_use]
    pub fn function_name(self) -> &'static str {
        match self {
            Self::Sum => "sum",
            Self::Mean => "mean",
            Self::Min => "min",
            Self::Max => "max",
            Self::Count => "count",
            Self::Unique => "unique",
            Self::Match => "match",
            Self::IndexIn => "index_in",
            Self::IsIn => "is_in",
        }
    }
}

/// One cell of a fixture array. Floats that JSON cannot carry are spelled
/// `"NaN"`, `"inf"` and `"-inf"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FixtureValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl FixtureValue {
    fn to_scalar(&self, dtype: DType) -> Result<Scalar, HarnessError> {
        let mismatch = || {
            HarnessError::FixtureFormat(format!("value {self:?} does not fit dtype {dtype}"))
        };
        match (dtype, self) {
            (DType::Bool, Self::Bool(v)) => Ok(Scalar::Bool(*v)),
            (DType::Int32, Self::Int(v)) => i32::try_from(*v).map(Scalar::Int32).map_err(|_| mismatch()),
            (DType::Int64, Self::Int(v)) => Ok(Scalar::Int64(*v)),
            (DType::Float64, Self::Int(v)) => Ok(Scalar::Float64(*v as f64)),
            (DType::Float64, Self::Float(v)) => Ok(Scalar::Float64(*v)),
            (DType::Float64, Self::Text(text)) => match text.as_str() {
                "NaN" | "nan" => Ok(Scalar::Float64(f64::NAN)),
                "inf" | "Infinity" => Ok(Scalar::Float64(f64::INFINITY)),
                "-inf" | "-Infinity" => Ok(Scalar::Float64(f64::NEG_INFINITY)),
                _ => Err(mismatch()),
            },
            _ => Err(mismatch()),
        }
    }
}

fn fixture_scalars(dtype: DType, values: &[Option<FixtureValue>]) -> Result<Vec<Scalar>, HarnessError> {
    values
        .iter()
        .map(|value| match value {
            Some(value) => value.to_scalar(dtype),
            None => Ok(Scalar::Null(dtype)),
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FixtureScalar {
    pub dtype: DType,
    #[serde(default)]
    pub value: Option<FixtureValue>,
}

impl FixtureScalar {
    pub fn to_scalar(&self) -> Result<Scalar, HarnessError> {
        match &self.value {
            Some(value) => value.to_scalar(self.dtype),
            None => Ok(Scalar::Null(self.dtype)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FixtureArray {
    pub dtype: DType,
    pub values: Vec<Option<FixtureValue>>,
}

impl FixtureArray {
    pub fn to_array(&self) -> Result<TypedArray, HarnessError> {
        let scalars = fixture_scalars(self.dtype, &self.values)?;
        TypedArray::from_scalars(self.dtype, &scalars)
            .map_err(|err| HarnessError::FixtureFormat(err.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FixtureChunked {
    pub dtype: DType,
    pub chunks: Vec<Vec<Option<FixtureValue>>>,
}

impl FixtureChunked {
    pub fn to_chunked(&self) -> Result<ChunkedArray, HarnessError> {
        let chunks = self
            .chunks
            .iter()
            .map(|values| {
                FixtureArray {
                    dtype: self.dtype,
                    values: values.clone(),
                }
                .to_array()
            })
            .collect::<Result<Vec<_>, _>>()?;
        ChunkedArray::new(self.dtype, chunks)
            .map_err(|err| HarnessError::FixtureFormat(err.to_string()))
    }
}

/// A call argument as written in a fixture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FixtureDatum {
    Chunked { chunked: FixtureChunked },
    Host { host: String },
    Array(FixtureArray),
    Scalar(FixtureScalar),
}

impl FixtureDatum {
    pub fn to_argument(&self) -> Result<Argument, HarnessError> {
        Ok(match self {
            Self::Chunked { chunked } => Argument::from(chunked.to_chunked()?),
            Self::Host { host } => Argument::host(host.clone()),
            Self::Array(array) => Argument::from(array.to_array()?),
            Self::Scalar(scalar) => Argument::from(scalar.to_scalar()?),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PacketFixture {
    pub packet_id: String,
    pub case_id: String,
    pub operation: FixtureOperation,
    pub operands: Vec<FixtureDatum>,
    #[serde(default)]
    pub table: Option<FixtureDatum>,
    #[serde(default)]
    pub options: Option<FunctionOptions>,
    #[serde(default)]
    pub expected_scalar: Option<FixtureScalar>,
    #[serde(default)]
    pub expected_array: Option<FixtureArray>,
    #[serde(default)]
    pub expected_chunks: Option<FixtureChunked>,
    #[serde(default)]
    pub expected_error_contains: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseStatus {
    Pass,
    Fail,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseResult {
    pub packet_id: String,
    pub case_id: String,
    pub operation: FixtureOperation,
    pub status: CaseStatus,
    pub mismatch: Option<String>,
    #[serde(default)]
    pub elapsed_us: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PacketParityReport {
    pub suite: String,
    pub packet_id: Option<String>,
    pub fixture_count: usize,
    pub passed: usize,
    pub failed: usize,
    pub results: Vec<CaseResult>,
}

impl PacketParityReport {
    #[must_use]
    pub fn is_green(&self) -> bool {
        self.failed == 0 && self.fixture_count > 0
    }
}

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("fixture format error: {0}")]
    FixtureFormat(String),
    #[error("conformance gate failed: {0}")]
    GateFailed(String),
}

pub fn run_packet_suite(config: &HarnessConfig) -> Result<PacketParityReport, HarnessError> {
    run_packet_suite_with_options(config, &SuiteOptions::default())
}

pub fn run_packet_suite_with_options(
    config: &HarnessConfig,
    options: &SuiteOptions,
) -> Result<PacketParityReport, HarnessError> {
    let fixtures = load_fixtures(config, options.packet_filter.as_deref())?;
    build_report("compute_packets".to_owned(), None, &fixtures)
}

pub fn run_packet_by_id(
    config: &HarnessConfig,
    packet_id: &str,
) -> Result<PacketParityReport, HarnessError> {
    let fixtures = load_fixtures(config, Some(packet_id))?;
    build_report(
        format!("compute_packets:{packet_id}"),
        Some(packet_id.to_owned()),
        &fixtures,
    )
}

pub fn run_packets_grouped(
    config: &HarnessConfig,
    options: &SuiteOptions,
) -> Result<Vec<PacketParityReport>, HarnessError> {
    let fixtures = load_fixtures(config, options.packet_filter.as_deref())?;
    let mut grouped = BTreeMap::<String, Vec<PacketFixture>>::new();
    for fixture in fixtures {
        grouped
            .entry(fixture.packet_id.clone())
            .or_default()
            .push(fixture);
    }

    grouped
        .into_iter()
        .map(|(packet_id, packet_fixtures)| {
            build_report(
                format!("compute_packets:{packet_id}"),
                Some(packet_id),
                &packet_fixtures,
            )
        })
        .collect()
}

/// Fail unless every report is green.
pub fn enforce_green(reports: &[PacketParityReport]) -> Result<(), HarnessError> {
    if reports.is_empty() {
        return Err(HarnessError::GateFailed("no packets were run".to_owned()));
    }

    let failures: Vec<String> = reports
        .iter()
        .filter(|report| !report.is_green())
        .map(|report| {
            let packet_id = report.packet_id.as_deref().unwrap_or("<all>");
            let cases: Vec<&str> = report
                .results
                .iter()
                .filter(|result| result.status == CaseStatus::Fail)
                .map(|result| result.case_id.as_str())
                .collect();
            format!(
                "{packet_id}: fixtures={} failed={} [{}]",
                report.fixture_count,
                report.failed,
                cases.join(", ")
            )
        })
        .collect();

    if failures.is_empty() {
        Ok(())
    } else {
        Err(HarnessError::GateFailed(failures.join(" | ")))
    }
}

/// All fixtures under the packet root, sorted by case id.
pub fn load_fixtures(
    config: &HarnessConfig,
    packet_filter: Option<&str>,
) -> Result<Vec<PacketFixture>, HarnessError> {
    let mut fixtures = Vec::new();
    for path in list_fixture_files(&config.packet_fixture_root())? {
        for fixture in load_fixture_file(&path)? {
            if packet_filter.is_none_or(|packet| fixture.packet_id == packet) {
                fixtures.push(fixture);
            }
        }
    }
    fixtures.sort_by(|a, b| a.case_id.cmp(&b.case_id));
    Ok(fixtures)
}

fn load_fixture_file(path: &Path) -> Result<Vec<PacketFixture>, HarnessError> {
    let body = fs::read_to_string(path)?;
    serde_json::from_str(&body).map_err(|err| {
        HarnessError::FixtureFormat(format!("{}: {err}", path.display()))
    })
}

fn list_fixture_files(root: &Path) -> Result<Vec<PathBuf>, HarnessError> {
    if !root.exists() {
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    let mut stack = vec![root.to_path_buf()];

    while let Some(current) = stack.pop() {
        for entry in fs::read_dir(current)? {
            let path = entry?.path();
            if path.is_dir() {
                stack.push(path);
            } else if path.extension().is_some_and(|ext| ext == "json") {
                files.push(path);
            }
        }
    }

    files.sort();
    Ok(files)
}

fn build_report(
    suite: String,
    packet_id: Option<String>,
    fixtures: &[PacketFixture],
) -> Result<PacketParityReport, HarnessError> {
    let results = fixtures
        .iter()
        .map(run_fixture)
        .collect::<Result<Vec<_>, _>>()?;

    let failed = results
        .iter()
        .filter(|result| result.status == CaseStatus::Fail)
        .count();
    let passed = results.len().saturating_sub(failed);
    debug!(%suite, fixtures = results.len(), passed, failed, "packet report built");

    Ok(PacketParityReport {
        suite,
        packet_id,
        fixture_count: results.len(),
        passed,
        failed,
        results,
    })
}

/// Fixture encoding errors abort the run; result mismatches become failed cases.
fn run_fixture(fixture: &PacketFixture) -> Result<CaseResult, HarnessError> {
    let mut args = fixture
        .operands
        .iter()
        .map(FixtureDatum::to_argument)
        .collect::<Result<Vec<_>, _>>()?;
    if let Some(table) = &fixture.table {
        args.push(table.to_argument()?);
    }
    let expected = Expected::from_fixture(fixture)?;

    let started = Instant::now();
    let outcome = call_function(
        fixture.operation.function_name(),
        &args,
        fixture.options.as_ref(),
    );
    let elapsed_us = u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX).max(1);

    let mismatch = match (&expected, outcome) {
        (Expected::ErrorContains(needle), Err(err)) => {
            let message = err.to_string();
            (!message.contains(needle.as_str()))
                .then(|| format!("error mismatch: actual={message:?}, expected to contain {needle:?}"))
        }
        (Expected::ErrorContains(needle), Ok(actual)) => Some(format!(
            "expected error containing {needle:?}, got {actual:?}"
        )),
        (_, Err(err)) => Some(format!("unexpected error: {err}")),
        (expected, Ok(actual)) => compare_datum(&actual, expected).err(),
    };

    let status = if mismatch.is_none() {
        debug!(packet = %fixture.packet_id, case = %fixture.case_id, elapsed_us, "case passed");
        CaseStatus::Pass
    } else {
        warn!(
            packet = %fixture.packet_id,
            case = %fixture.case_id,
            mismatch = mismatch.as_deref().unwrap_or_default(),
            "case failed"
        );
        CaseStatus::Fail
    };

    Ok(CaseResult {
        packet_id: fixture.packet_id.clone(),
        case_id: fixture.case_id.clone(),
        operation: fixture.operation,
        status,
        mismatch,
        elapsed_us,
    })
}

#[derive(Debug, Clone, PartialEq)]
enum Expected {
    Scalar(Scalar),
    Array(TypedArray),
    Chunks(ChunkedArray),
    ErrorContains(String),
}

impl Expected {
    fn from_fixture(fixture: &PacketFixture) -> Result<Self, HarnessError> {
        if let Some(needle) = &fixture.expected_error_contains {
            return Ok(Self::ErrorContains(needle.clone()));
        }
        if let Some(scalar) = &fixture.expected_scalar {
            return Ok(Self::Scalar(scalar.to_scalar()?));
        }
        if let Some(array) = &fixture.expected_array {
            return Ok(Self::Array(array.to_array()?));
        }
        if let Some(chunks) = &fixture.expected_chunks {
            return Ok(Self::Chunks(chunks.to_chunked()?));
        }
        Err(HarnessError::FixtureFormat(format!(
            "case {} declares no expectation",
            fixture.case_id
        )))
    }
}

/// Float equality with relative tolerance; NaN equals NaN.
#[must_use]
pub fn floats_match(actual: f64, expected: f64) -> bool {
    if actual.is_nan() || expected.is_nan() {
        return actual.is_nan() && expected.is_nan();
    }
    actual == expected
        || (actual - expected).abs() <= FLOAT_TOLERANCE * actual.abs().max(expected.abs())
}

#[must_use]
pub fn scalars_match(actual: &Scalar, expected: &Scalar) -> bool {
    match (actual, expected) {
        (Scalar::Float64(a), Scalar::Float64(b)) => floats_match(*a, *b),
        _ => actual == expected,
    }
}

fn compare_values(label: &str, actual: &TypedArray, expected: &TypedArray) -> Result<(), String> {
    if actual.dtype() != expected.dtype() {
        return Err(format!(
            "{label} dtype mismatch: actual={}, expected={}",
            actual.dtype(),
            expected.dtype()
        ));
    }
    if actual.len() != expected.len() {
        return Err(format!(
            "{label} length mismatch: actual={}, expected={}",
            actual.len(),
            expected.len()
        ));
    }
    for (idx, (a, e)) in actual.iter().zip(expected.iter()).enumerate() {
        if !scalars_match(&a, &e) {
            return Err(format!("{label} mismatch at {idx}: actual={a}, expected={e}"));
        }
    }
    Ok(())
}

fn compare_datum(actual: &Datum, expected: &Expected) -> Result<(), String> {
    match (actual, expected) {
        (Datum::Scalar(a), Expected::Scalar(e)) => {
            if a.dtype() != e.dtype() {
                return Err(format!(
                    "scalar dtype mismatch: actual={}, expected={}",
                    a.dtype(),
                    e.dtype()
                ));
            }
            if scalars_match(a, e) {
                Ok(())
            } else {
                Err(format!("scalar mismatch: actual={a}, expected={e}"))
            }
        }
        (Datum::Array(a), Expected::Array(e)) => compare_values("array", a, e),
        (Datum::ChunkedArray(a), Expected::Chunks(e)) => {
            if a.chunk_lengths() != e.chunk_lengths() {
                return Err(format!(
                    "chunk layout mismatch: actual={:?}, expected={:?}",
                    a.chunk_lengths(),
                    e.chunk_lengths()
                ));
            }
            for (idx, (ac, ec)) in a.chunks().iter().zip(e.chunks()).enumerate() {
                compare_values(&format!("chunk {idx}"), ac, ec)?;
            }
            Ok(())
        }
        (actual, expected) => Err(format!(
            "result shape mismatch: actual {} {actual:?}, expected {expected:?}",
            actual.class_name()
        )),
    }
}
