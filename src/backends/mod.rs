//! Accelerator backends.
//!
//! A backend exposes the capability set the timing loops are written against: random array
//! generation, transfers between host and device memory, and forward and inverse N-dimensional
//! FFTs. Two implementations exist:
//! - [`host::CpuOnly`], which keeps everything in host memory and stands in a copy for every
//!   transfer;
//! - `device::OpenCl` (behind the `opencl` feature), which keeps arrays resident in the memory of
//!   an OpenCL device.
//!
//! The backend is picked once at start-up from the closed set of [`BackendKind`] and the timing
//! loops are monomorphized over it.

pub mod host;

#[cfg(feature = "opencl")]
pub mod device;

use crate::utils::{DType, Element, Shape};

use anyhow::ensure;
use clap::ValueEnum;
use half::f16;
use rand::rngs::SmallRng;
use rustfft::num_complex::Complex;

use std::fmt;

/// List of available backends.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum BackendKind {
    /// Host memory only, transfers are plain copies.
    #[value(name = "cpu-only")]
    CpuOnly,
    /// OpenCL device memory and kernels.
    #[cfg(feature = "opencl")]
    #[value(name = "opencl")]
    OpenCl,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CpuOnly => "cpu-only",
            #[cfg(feature = "opencl")]
            Self::OpenCl => "opencl",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Common view over host and device arrays.
pub trait Array {
    fn shape(&self) -> &Shape;

    fn dtype(&self) -> DType;

    /// Size in bytes of the array's payload.
    fn byte_size(&self) -> usize {
        self.shape().nb_elems() * self.dtype().size_of()
    }
}

/// Capability set of an accelerator backend.
pub trait Backend {
    /// Array resident in the memory the backend computes on.
    type DeviceArray: Array;

    fn name(&self) -> &'static str;

    /// Generates an array of uniformly distributed random values, directly in device memory.
    fn random(&mut self, shape: &Shape, dtype: DType) -> anyhow::Result<Self::DeviceArray>;

    /// Transfers a host array to the device.
    fn to_device(&mut self, array: &HostArray) -> anyhow::Result<Self::DeviceArray>;

    /// Transfers a device array back to the host.
    fn to_host(&mut self, array: &Self::DeviceArray) -> anyhow::Result<HostArray>;

    /// Forward N-dimensional FFT. Real inputs are promoted to complex values.
    fn fft(&mut self, array: Self::DeviceArray) -> anyhow::Result<Self::DeviceArray>;

    /// Inverse N-dimensional FFT, normalized by the number of elements.
    fn ifft(&mut self, array: Self::DeviceArray) -> anyhow::Result<Self::DeviceArray>;
}

/// Typed storage of a host array.
#[derive(Clone, Debug, PartialEq)]
pub enum HostData {
    F16(Vec<f16>),
    F32(Vec<f32>),
    F64(Vec<f64>),
    I32(Vec<i32>),
    I64(Vec<i64>),
    C64(Vec<Complex<f32>>),
    C128(Vec<Complex<f64>>),
}

impl HostData {
    pub fn dtype(&self) -> DType {
        match self {
            Self::F16(_) => DType::Float16,
            Self::F32(_) => DType::Float32,
            Self::F64(_) => DType::Float64,
            Self::I32(_) => DType::Int32,
            Self::I64(_) => DType::Int64,
            Self::C64(_) => DType::Complex64,
            Self::C128(_) => DType::Complex128,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::F16(x) => x.len(),
            Self::F32(x) => x.len(),
            Self::F64(x) => x.len(),
            Self::I32(x) => x.len(),
            Self::I64(x) => x.len(),
            Self::C64(x) => x.len(),
            Self::C128(x) => x.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// N-dimensional, row-major array living in host memory.
#[derive(Clone, Debug, PartialEq)]
pub struct HostArray {
    shape: Shape,
    data: HostData,
}

impl HostArray {
    pub fn new(shape: Shape, data: HostData) -> anyhow::Result<Self> {
        ensure!(
            shape.nb_elems() == data.len(),
            "shape {shape} holds {} elements, got {}",
            shape.nb_elems(),
            data.len()
        );
        Ok(Self { shape, data })
    }

    /// Generates an array of random values, in [0.0, 1.0) for floating-point types and
    /// [0, 1e9) for integer types. Complex arrays get a null imaginary part.
    pub fn random(shape: &Shape, dtype: DType, rng: &mut SmallRng) -> anyhow::Result<Self> {
        let n = shape.nb_elems();
        let data = match dtype {
            DType::Float16 => HostData::F16(f16::rand_vector(n, rng)?),
            DType::Float32 => HostData::F32(f32::rand_vector(n, rng)?),
            DType::Float64 => HostData::F64(f64::rand_vector(n, rng)?),
            DType::Int32 => HostData::I32(i32::rand_vector(n, rng)?),
            DType::Int64 => HostData::I64(i64::rand_vector(n, rng)?),
            DType::Complex64 => HostData::C64(
                f32::rand_vector(n, rng)?
                    .into_iter()
                    .map(|re| Complex::new(re, 0.0))
                    .collect(),
            ),
            DType::Complex128 => HostData::C128(
                f64::rand_vector(n, rng)?
                    .into_iter()
                    .map(|re| Complex::new(re, 0.0))
                    .collect(),
            ),
        };
        Self::new(shape.clone(), data)
    }

    pub fn data(&self) -> &HostData {
        &self.data
    }

    pub fn into_parts(self) -> (Shape, HostData) {
        (self.shape, self.data)
    }
}

impl Array for HostArray {
    fn shape(&self) -> &Shape {
        &self.shape
    }

    fn dtype(&self) -> DType {
        self.data.dtype()
    }
}
