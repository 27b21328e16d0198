//! Utility types and traits shared by the backends, the timing loops and the campaign generator.

use anyhow::{anyhow, bail, Context};
use clap::ValueEnum;
use half::f16;
use rand::{
    distributions::{Distribution, Uniform},
    rngs::SmallRng,
};

use std::{fmt, mem::size_of, str::FromStr};

/// Element type of a benchmarked array.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, ValueEnum)]
pub enum DType {
    #[value(name = "float16")]
    Float16,
    #[value(name = "float32")]
    Float32,
    #[value(name = "float64")]
    Float64,
    #[value(name = "int32")]
    Int32,
    #[value(name = "int64")]
    Int64,
    #[value(name = "complex64")]
    Complex64,
    #[value(name = "complex128")]
    Complex128,
}

impl DType {
    /// Name of the type, as accepted on the command-line.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Float16 => "float16",
            Self::Float32 => "float32",
            Self::Float64 => "float64",
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::Complex64 => "complex64",
            Self::Complex128 => "complex128",
        }
    }

    /// Size in bytes of a single element.
    pub fn size_of(&self) -> usize {
        match self {
            Self::Float16 => size_of::<f16>(),
            Self::Float32 | Self::Int32 => size_of::<f32>(),
            Self::Float64 | Self::Int64 | Self::Complex64 => size_of::<f64>(),
            Self::Complex128 => 2 * size_of::<f64>(),
        }
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, Self::Int32 | Self::Int64)
    }

    /// Complex type the forward transform promotes this type to.
    pub fn promoted(&self) -> DType {
        match self {
            Self::Float16 | Self::Float32 | Self::Complex64 => Self::Complex64,
            _ => Self::Complex128,
        }
    }

    /// Whether handling this type requires double-precision arithmetic.
    pub fn is_double(&self) -> bool {
        self.promoted() == Self::Complex128
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Shape of an N-dimensional, row-major array.
///
/// Parsed from a comma-separated list of positive integers, e.g. `1000,1000`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Shape(Vec<usize>);

impl Shape {
    pub fn new(dims: Vec<usize>) -> anyhow::Result<Self> {
        if dims.is_empty() {
            bail!("shape must have at least one dimension");
        }
        if dims.contains(&0) {
            bail!("shape dimensions must be positive, got {dims:?}");
        }
        // Room for the widest element type, so byte sizes cannot overflow either
        let max_elems = isize::MAX as usize / DType::Complex128.size_of();
        match dims.iter().try_fold(1_usize, |n, &d| n.checked_mul(d)) {
            Some(n) if n <= max_elems => Ok(Self(dims)),
            _ => bail!("shape {dims:?} holds too many elements"),
        }
    }

    pub fn dims(&self) -> &[usize] {
        &self.0
    }

    pub fn ndim(&self) -> usize {
        self.0.len()
    }

    /// Total number of elements.
    pub fn nb_elems(&self) -> usize {
        self.0.iter().product()
    }

    /// Shape spelled for file names: `1000,1000` becomes `1000x1000`.
    pub fn file_stem(&self) -> String {
        self.to_string().replace(',', "x")
    }

    /// Splits the array around `axis` into `(outer, len, inner)` so that element `(o, k, i)` lives
    /// at `o * len * inner + k * inner + i`.
    pub fn split_at_axis(&self, axis: usize) -> (usize, usize, usize) {
        let outer = self.0[..axis].iter().product();
        let inner = self.0[axis + 1..].iter().product();
        (outer, self.0[axis], inner)
    }
}

impl FromStr for Shape {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let dims = s
            .split(',')
            .map(|d| {
                d.trim()
                    .parse::<usize>()
                    .with_context(|| format!("invalid dimension `{d}` in shape `{s}`"))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        Self::new(dims)
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dims: Vec<String> = self.0.iter().map(usize::to_string).collect();
        write!(f, "{}", dims.join(","))
    }
}

/// Utility trait that generalizes the real element types of the benchmarked arrays.
///
/// Provides a generic way of generating random vectors in the wanted type.
pub trait Element: num::NumCast + num::ToPrimitive + Copy + Default + Send + Sync + 'static {
    const DTYPE: DType;

    /// Produces a random vector of length `n`, filled with values in the range [0.0, 1.0), or
    /// [0, 1e9) for integer types.
    fn rand_vector(n: usize, rng: &mut SmallRng) -> anyhow::Result<Vec<Self>> {
        let scale = if Self::DTYPE.is_integer() { 1e9 } else { 1.0 };
        let between = Uniform::new(0.0_f64, 1.0_f64);
        (0..n)
            .map(|_| <Self as num::NumCast>::from(between.sample(rng) * scale))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| anyhow!("random value out of range for {}", Self::DTYPE))
    }
}

impl Element for f16 {
    const DTYPE: DType = DType::Float16;
}

impl Element for f32 {
    const DTYPE: DType = DType::Float32;
}

impl Element for f64 {
    const DTYPE: DType = DType::Float64;
}

impl Element for i32 {
    const DTYPE: DType = DType::Int32;
}

impl Element for i64 {
    const DTYPE: DType = DType::Int64;
}
