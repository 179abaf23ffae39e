#![forbid(unsafe_code)]

use fa_types::{DType, Scalar, TypeError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Eq)]
pub struct ValidityMask {
    words: Vec<u64>,
    len: usize,
}

impl ValidityMask {
    #[must_use]
    pub fn from_flags(flags: &[bool]) -> Self {
        flags.iter().copied().collect()
    }

    #[must_use]
    pub fn all_valid(len: usize) -> Self {
        let word_count = len.div_ceil(64);
        let mut words = vec![u64::MAX; word_count];
        let remainder = len % 64;
        if remainder > 0 && !words.is_empty() {
            let last = words.len() - 1;
            words[last] = (1_u64 << remainder) - 1;
        }
        Self { words, len }
    }

    #[must_use]
    pub fn all_invalid(len: usize) -> Self {
        let word_count = len.div_ceil(64);
        Self {
            words: vec![0_u64; word_count],
            len,
        }
    }

    #[must_use]
    pub fn get(&self, idx: usize) -> bool {
        if idx >= self.len {
            return false;
        }
        (self.words[idx / 64] >> (idx % 64)) & 1 == 1
    }

    pub fn set(&mut self, idx: usize, value: bool) {
        if idx >= self.len {
            return;
        }
        if value {
            self.words[idx / 64] |= 1_u64 << (idx % 64);
        } else {
            self.words[idx / 64] &= !(1_u64 << (idx % 64));
        }
    }

    #[must_use]
    pub fn count_valid(&self) -> usize {
        let full_words = self.len / 64;
        let mut count: u32 = self.words[..full_words]
            .iter()
            .map(|w| w.count_ones())
            .sum();
        let remainder = self.len % 64;
        if remainder > 0 && full_words < self.words.len() {
            let mask = (1_u64 << remainder) - 1;
            count += (self.words[full_words] & mask).count_ones();
        }
        count as usize
    }

    #[must_use]
    pub fn count_invalid(&self) -> usize {
        self.len - self.count_valid()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bits `offset..offset + len`, re-packed from bit zero.
    #[must_use]
    pub fn slice(&self, offset: usize, len: usize) -> Self {
        (offset..offset + len).map(|idx| self.get(idx)).collect()
    }

    pub fn bits(&self) -> impl Iterator<Item = bool> + '_ {
        (0..self.len).map(|idx| self.get(idx))
    }
}

impl FromIterator<bool> for ValidityMask {
    fn from_iter<I: IntoIterator<Item = bool>>(iter: I) -> Self {
        let mut words = Vec::new();
        let mut len = 0_usize;
        for valid in iter {
            if len % 64 == 0 {
                words.push(0_u64);
            }
            if valid {
                words[len / 64] |= 1_u64 << (len % 64);
            }
            len += 1;
        }
        Self { words, len }
    }
}

impl PartialEq for ValidityMask {
    fn eq(&self, other: &Self) -> bool {
        self.len == other.len && self.bits().eq(other.bits())
    }
}

impl Serialize for ValidityMask {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;
        let bits: Vec<bool> = self.bits().collect();
        let mut state = serializer.serialize_struct("ValidityMask", 1)?;
        state.serialize_field("bits", &bits)?;
        state.end()
    }
}

impl<'de> Deserialize<'de> for ValidityMask {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Raw {
            bits: Vec<bool>,
        }
        let raw = Raw::deserialize(deserializer)?;
        Ok(Self::from_flags(&raw.bits))
    }
}

/// Contiguous typed storage behind a [`TypedArray`].
///
/// Positions marked invalid by the paired `ValidityMask` hold a default
/// filler value (`false` / `0` / `0.0`) and must not be read as data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "dtype", content = "values", rename_all = "snake_case")]
pub enum ArrayData {
    Bool(Vec<bool>),
    Int32(Vec<i32>),
    Int64(Vec<i64>),
    Float64(Vec<f64>),
}

impl ArrayData {
    #[must_use]
    pub fn dtype(&self) -> DType {
        match self {
            Self::Bool(_) => DType::Bool,
            Self::Int32(_) => DType::Int32,
            Self::Int64(_) => DType::Int64,
            Self::Float64(_) => DType::Float64,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Bool(d) => d.len(),
            Self::Int32(d) => d.len(),
            Self::Int64(d) => d.len(),
            Self::Float64(d) => d.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn filled(dtype: DType, len: usize) -> Self {
        match dtype {
            DType::Bool => Self::Bool(vec![false; len]),
            DType::Int32 => Self::Int32(vec![0; len]),
            DType::Int64 => Self::Int64(vec![0; len]),
            DType::Float64 => Self::Float64(vec![0.0; len]),
        }
    }

    fn slice(&self, offset: usize, len: usize) -> Self {
        let range = offset..offset + len;
        match self {
            Self::Bool(d) => Self::Bool(d[range].to_vec()),
            Self::Int32(d) => Self::Int32(d[range].to_vec()),
            Self::Int64(d) => Self::Int64(d[range].to_vec()),
            Self::Float64(d) => Self::Float64(d[range].to_vec()),
        }
    }
}

/// Rust primitive that can back a [`TypedArray`].
pub trait NativeType: Copy + Default + PartialEq + std::fmt::Debug + Send + Sync + 'static {
    const DTYPE: DType;

    fn into_data(values: Vec<Self>) -> ArrayData;

    fn slice_of(data: &ArrayData) -> Option<&[Self]>;

    fn into_scalar(self) -> Scalar;

    fn from_scalar(value: &Scalar) -> Option<Self>;
}

macro_rules! impl_native_type {
    ($native:ty, $variant:ident) => {
        impl NativeType for $native {
            const DTYPE: DType = DType::$variant;

            fn into_data(values: Vec<Self>) -> ArrayData {
                ArrayData::$variant(values)
            }

            fn slice_of(data: &ArrayData) -> Option<&[Self]> {
                match data {
                    ArrayData::$variant(values) => Some(values),
                    _ => None,
                }
            }

            fn into_scalar(self) -> Scalar {
                Scalar::$variant(self)
            }

            fn from_scalar(value: &Scalar) -> Option<Self> {
                match value {
                    Scalar::$variant(v) => Some(*v),
                    _ => None,
                }
            }
        }
    };
}

impl_native_type!(bool, Bool);
impl_native_type!(i32, Int32);
impl_native_type!(i64, Int64);
impl_native_type!(f64, Float64);

/// Run `$body` with `$native` bound to the Rust type behind `$dtype`.
///
/// ```ignore
/// let data = with_native_type!(dtype, T => gather::<T>(array));
/// ```
#[macro_export]
macro_rules! with_native_type {
    ($dtype:expr, $native:ident => $body:expr) => {
        match $dtype {
            ::fa_types::DType::Bool => {
                type $native = bool;
                $body
            }
            ::fa_types::DType::Int32 => {
                type $native = i32;
                $body
            }
            ::fa_types::DType::Int64 => {
                type $native = i64;
                $body
            }
            ::fa_types::DType::Float64 => {
                type $native = f64;
                $body
            }
        }
    };
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ColumnError {
    #[error("column length mismatch: left={left}, right={right}")]
    LengthMismatch { left: usize, right: usize },
    #[error("chunk {index} has dtype {found} but the chunked array holds {expected}")]
    ChunkTypeMismatch {
        index: usize,
        expected: DType,
        found: DType,
    },
    #[error("cannot infer the dtype of a chunked array with no chunks")]
    EmptyChunkList,
    #[error("rechunk lengths sum to {actual} but the array holds {expected} values")]
    RechunkLength { expected: usize, actual: usize },
    #[error("slice {offset}..{end} is out of bounds for length {len}")]
    OutOfBounds {
        offset: usize,
        end: usize,
        len: usize,
    },
    #[error(transparent)]
    Type(#[from] TypeError),
}

/// Flat, fixed-length sequence of one primitive type with a validity bitmap.
///
/// Immutable once built: every operation returns a new array.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "RawTypedArray")]
pub struct TypedArray {
    data: ArrayData,
    validity: ValidityMask,
}

#[derive(Deserialize)]
struct RawTypedArray {
    data: ArrayData,
    validity: ValidityMask,
}

impl TryFrom<RawTypedArray> for TypedArray {
    type Error = ColumnError;

    fn try_from(raw: RawTypedArray) -> Result<Self, Self::Error> {
        Self::new(raw.data, raw.validity)
    }
}

impl TypedArray {
    pub fn new(data: ArrayData, validity: ValidityMask) -> Result<Self, ColumnError> {
        if data.len() != validity.len() {
            return Err(ColumnError::LengthMismatch {
                left: data.len(),
                right: validity.len(),
            });
        }
        Ok(Self { data, validity })
    }

    #[must_use]
    pub fn from_values<T: NativeType>(values: Vec<T>) -> Self {
        let validity = ValidityMask::all_valid(values.len());
        Self {
            data: T::into_data(values),
            validity,
        }
    }

    /// `None` entries become nulls.
    #[must_use]
    pub fn from_options<T: NativeType>(values: Vec<Option<T>>) -> Self {
        let validity = values.iter().map(Option::is_some).collect();
        let data = values.into_iter().map(Option::unwrap_or_default).collect();
        Self {
            data: T::into_data(data),
            validity,
        }
    }

    /// Build from scalars. `Scalar::Null` of any declared type is accepted as
    /// a null slot; valid scalars must already be of `dtype`.
    pub fn from_scalars(dtype: DType, values: &[Scalar]) -> Result<Self, ColumnError> {
        with_native_type!(dtype, T => {
            let natives = values
                .iter()
                .map(|value| match value {
                    Scalar::Null(_) => Ok(None),
                    other => T::from_scalar(other).map(Some).ok_or(
                        TypeError::ScalarTypeMismatch {
                            expected: dtype,
                            found: other.dtype(),
                        },
                    ),
                })
                .collect::<Result<Vec<Option<T>>, TypeError>>()?;
            Ok(Self::from_options(natives))
        })
    }

    #[must_use]
    pub fn new_null(dtype: DType, len: usize) -> Self {
        Self {
            data: ArrayData::filled(dtype, len),
            validity: ValidityMask::all_invalid(len),
        }
    }

    #[must_use]
    pub fn empty(dtype: DType) -> Self {
        Self::new_null(dtype, 0)
    }

    #[must_use]
    pub fn dtype(&self) -> DType {
        self.data.dtype()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[must_use]
    pub fn data(&self) -> &ArrayData {
        &self.data
    }

    #[must_use]
    pub fn validity(&self) -> &ValidityMask {
        &self.validity
    }

    #[must_use]
    pub fn null_count(&self) -> usize {
        self.validity.count_invalid()
    }

    #[must_use]
    pub fn is_valid(&self, idx: usize) -> bool {
        self.validity.get(idx)
    }

    /// Typed view of the raw storage, including filler at null slots.
    #[must_use]
    pub fn values<T: NativeType>(&self) -> Option<&[T]> {
        T::slice_of(&self.data)
    }

    #[must_use]
    pub fn value(&self, idx: usize) -> Option<Scalar> {
        if idx >= self.len() {
            return None;
        }
        if !self.validity.get(idx) {
            return Some(Scalar::Null(self.dtype()));
        }
        Some(match &self.data {
            ArrayData::Bool(d) => Scalar::Bool(d[idx]),
            ArrayData::Int32(d) => Scalar::Int32(d[idx]),
            ArrayData::Int64(d) => Scalar::Int64(d[idx]),
            ArrayData::Float64(d) => Scalar::Float64(d[idx]),
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = Scalar> + '_ {
        (0..self.len()).filter_map(|idx| self.value(idx))
    }

    #[must_use]
    pub fn to_scalars(&self) -> Vec<Scalar> {
        self.iter().collect()
    }

    pub fn slice(&self, offset: usize, len: usize) -> Result<Self, ColumnError> {
        let end = offset.saturating_add(len);
        if end > self.len() {
            return Err(ColumnError::OutOfBounds {
                offset,
                end,
                len: self.len(),
            });
        }
        Ok(Self {
            data: self.data.slice(offset, len),
            validity: self.validity.slice(offset, len),
        })
    }

    /// Concatenate arrays of `dtype` into one array.
    pub fn concat(dtype: DType, arrays: &[Self]) -> Result<Self, ColumnError> {
        for (index, array) in arrays.iter().enumerate() {
            if array.dtype() != dtype {
                return Err(ColumnError::ChunkTypeMismatch {
                    index,
                    expected: dtype,
                    found: array.dtype(),
                });
            }
        }

        let total: usize = arrays.iter().map(Self::len).sum();
        let validity = arrays.iter().flat_map(|a| a.validity.bits()).collect();
        let data = with_native_type!(dtype, T => {
            let mut out: Vec<T> = Vec::with_capacity(total);
            for array in arrays {
                if let Some(values) = array.values::<T>() {
                    out.extend_from_slice(values);
                }
            }
            T::into_data(out)
        });

        Self::new(data, validity)
    }

    /// Equality that also treats NaN as equal to NaN.
    #[must_use]
    pub fn semantic_eq(&self, other: &Self) -> bool {
        self.dtype() == other.dtype()
            && self.len() == other.len()
            && self.iter().zip(other.iter()).all(|(l, r)| l.semantic_eq(&r))
    }
}

/// Logical equality: filler values behind null slots are ignored.
impl PartialEq for TypedArray {
    fn eq(&self, other: &Self) -> bool {
        self.dtype() == other.dtype() && self.len() == other.len() && self.iter().eq(other.iter())
    }
}

/// One logical sequence stored as an ordered list of same-typed chunks.
///
/// Logical index `i` maps to `(chunk, offset)` through the prefix sums of
/// the chunk lengths kept in `offsets` (`offsets.len() == chunks.len() + 1`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "RawChunkedArray", try_from = "RawChunkedArray")]
pub struct ChunkedArray {
    dtype: DType,
    chunks: Vec<TypedArray>,
    offsets: Vec<usize>,
}

#[derive(Clone, Serialize, Deserialize)]
struct RawChunkedArray {
    dtype: DType,
    chunks: Vec<TypedArray>,
}

impl From<ChunkedArray> for RawChunkedArray {
    fn from(value: ChunkedArray) -> Self {
        Self {
            dtype: value.dtype,
            chunks: value.chunks,
        }
    }
}

impl TryFrom<RawChunkedArray> for ChunkedArray {
    type Error = ColumnError;

    fn try_from(raw: RawChunkedArray) -> Result<Self, Self::Error> {
        Self::new(raw.dtype, raw.chunks)
    }
}

impl ChunkedArray {
    pub fn new(dtype: DType, chunks: Vec<TypedArray>) -> Result<Self, ColumnError> {
        let mut offsets = Vec::with_capacity(chunks.len() + 1);
        let mut running = 0_usize;
        offsets.push(running);
        for (index, chunk) in chunks.iter().enumerate() {
            if chunk.dtype() != dtype {
                return Err(ColumnError::ChunkTypeMismatch {
                    index,
                    expected: dtype,
                    found: chunk.dtype(),
                });
            }
            running += chunk.len();
            offsets.push(running);
        }
        Ok(Self {
            dtype,
            chunks,
            offsets,
        })
    }

    /// Infer the dtype from the first chunk.
    pub fn from_chunks(chunks: Vec<TypedArray>) -> Result<Self, ColumnError> {
        let dtype = chunks
            .first()
            .map(TypedArray::dtype)
            .ok_or(ColumnError::EmptyChunkList)?;
        Self::new(dtype, chunks)
    }

    #[must_use]
    pub fn from_array(array: TypedArray) -> Self {
        let len = array.len();
        Self {
            dtype: array.dtype(),
            chunks: vec![array],
            offsets: vec![0, len],
        }
    }

    #[must_use]
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.offsets.last().copied().unwrap_or(0)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn num_chunks(&self) -> usize {
        self.chunks.len()
    }

    #[must_use]
    pub fn chunks(&self) -> &[TypedArray] {
        &self.chunks
    }

    #[must_use]
    pub fn chunk(&self, idx: usize) -> Option<&TypedArray> {
        self.chunks.get(idx)
    }

    #[must_use]
    pub fn chunk_lengths(&self) -> Vec<usize> {
        self.chunks.iter().map(TypedArray::len).collect()
    }

    #[must_use]
    pub fn null_count(&self) -> usize {
        self.chunks.iter().map(TypedArray::null_count).sum()
    }

    /// Map a logical index to `(chunk_index, offset_within_chunk)`.
    ///
    /// Empty chunks are skipped: the returned chunk always contains the slot.
    #[must_use]
    pub fn locate(&self, index: usize) -> Option<(usize, usize)> {
        if index >= self.len() {
            return None;
        }
        let chunk = self.offsets.partition_point(|&start| start <= index) - 1;
        Some((chunk, index - self.offsets[chunk]))
    }

    #[must_use]
    pub fn value(&self, index: usize) -> Option<Scalar> {
        let (chunk, offset) = self.locate(index)?;
        self.chunks[chunk].value(offset)
    }

    pub fn iter(&self) -> impl Iterator<Item = Scalar> + '_ {
        self.chunks.iter().flat_map(TypedArray::iter)
    }

    pub fn concatenate(&self) -> Result<TypedArray, ColumnError> {
        TypedArray::concat(self.dtype, &self.chunks)
    }

    /// Repack the same logical sequence into chunks of the given lengths.
    pub fn rechunk(&self, lengths: &[usize]) -> Result<Self, ColumnError> {
        let actual: usize = lengths.iter().sum();
        if actual != self.len() {
            return Err(ColumnError::RechunkLength {
                expected: self.len(),
                actual,
            });
        }
        let flat = self.concatenate()?;
        let mut chunks = Vec::with_capacity(lengths.len());
        let mut offset = 0;
        for &len in lengths {
            chunks.push(flat.slice(offset, len)?);
            offset += len;
        }
        Self::new(self.dtype, chunks)
    }

    /// Same type and element sequence, regardless of chunk boundaries.
    #[must_use]
    pub fn logical_eq(&self, other: &Self) -> bool {
        self.dtype == other.dtype && self.len() == other.len() && self.iter().eq(other.iter())
    }
}
