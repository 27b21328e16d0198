//! OpenCL backend.
//!
//! Arrays live in the memory of the first device of the first OpenCL platform. Random
//! generation, promotion to complex values and transforms all run as device kernels (see
//! [`crate::kernels::device`]); only the transfers move data across the bus.
//!
//! The transform is a naive per-axis DFT, ping-ponging between two device buffers.
//!
//! # Crates used for calling kernels on a device
//! - [`ocl`][1] for an idiomatic Rust implementation of OpenCL bindings.
//!
//! [1]: https://crates.io/crates/ocl

use super::{Array, Backend, HostArray, HostData};
use crate::{
    consts::BLOCK_SIZE_1D,
    kernels::device::*,
    utils::{DType, Shape},
};

use anyhow::anyhow;
use half::{f16, slice::HalfFloatSliceExt};
use ocl::{
    prm::{Double2, Float2},
    Buffer, Context, Device, Kernel, OclPrm, Platform, Program, Queue, SpatialDims,
};
use rustfft::num_complex::Complex;
use tracing::{debug, info};

/// Converts an OpenCL error, which does not implement `std::error::Error`.
fn cl_error(err: ocl::Error) -> anyhow::Error {
    anyhow!("OpenCL error: {err}")
}

/// Scalar type of the DFT kernel arguments.
trait DftScalar: OclPrm {
    fn from_f64(x: f64) -> Self;
}

impl DftScalar for f32 {
    fn from_f64(x: f64) -> Self {
        x as f32
    }
}

impl DftScalar for f64 {
    fn from_f64(x: f64) -> Self {
        x
    }
}

/// Typed storage of a device array.
///
/// Half-precision values are stored as their raw bits and complex values as OpenCL vectors.
pub enum DeviceData {
    F16(Buffer<u16>),
    F32(Buffer<f32>),
    F64(Buffer<f64>),
    I32(Buffer<i32>),
    I64(Buffer<i64>),
    C64(Buffer<Float2>),
    C128(Buffer<Double2>),
}

/// N-dimensional, row-major array living in device memory.
pub struct DeviceArray {
    shape: Shape,
    data: DeviceData,
}

impl Array for DeviceArray {
    fn shape(&self) -> &Shape {
        &self.shape
    }

    fn dtype(&self) -> DType {
        match self.data {
            DeviceData::F16(_) => DType::Float16,
            DeviceData::F32(_) => DType::Float32,
            DeviceData::F64(_) => DType::Float64,
            DeviceData::I32(_) => DType::Int32,
            DeviceData::I64(_) => DType::Int64,
            DeviceData::C64(_) => DType::Complex64,
            DeviceData::C128(_) => DType::Complex128,
        }
    }
}

/// Backend keeping arrays resident on an OpenCL device.
pub struct OpenCl {
    context: Context,
    device: Device,
    queue: Queue,
    single: Program,
    double: Option<Program>,
    seed: u64,
}

impl OpenCl {
    pub fn new(seed: u64) -> anyhow::Result<Self> {
        let platform = Platform::list()
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("no OpenCL platform available"))?;
        let device = Device::first(platform).map_err(cl_error)?;
        let context = Context::builder()
            .platform(platform)
            .devices(device)
            .build()
            .map_err(cl_error)?;
        let queue = Queue::new(&context, device, None).map_err(cl_error)?;
        let single = build_program(&CL_SINGLE, &context, device)?;
        info!(?device, "OpenCL backend ready");

        Ok(Self {
            context,
            device,
            queue,
            single,
            double: None,
            seed: seed.wrapping_mul(0x9E37_79B9_7F4A_7C15),
        })
    }

    /// Builds the double-precision program on first use.
    fn ensure_double(&mut self, needed: bool) -> anyhow::Result<()> {
        if needed && self.double.is_none() {
            self.double = Some(build_program(&CL_DOUBLE, &self.context, self.device)?);
        }
        Ok(())
    }

    fn program(&self, double: bool) -> &Program {
        match (double, &self.double) {
            (true, Some(program)) => program,
            _ => &self.single,
        }
    }

    /// Returns the seed of the next random array, so that successive arrays differ.
    fn next_seed(&mut self, n: usize) -> u64 {
        let seed = self.seed;
        self.seed = self.seed.wrapping_add(n as u64);
        seed
    }

    fn alloc<T: OclPrm>(&self, len: usize) -> ocl::Result<Buffer<T>> {
        Buffer::<T>::builder()
            .queue(self.queue.clone())
            .len(len)
            .build()
    }

    fn upload<T: OclPrm>(&self, h_x: &[T]) -> ocl::Result<Buffer<T>> {
        Buffer::<T>::builder()
            .queue(self.queue.clone())
            .len(h_x.len())
            .copy_host_slice(h_x)
            .build()
    }

    fn download<T: OclPrm>(&self, d_x: &Buffer<T>) -> ocl::Result<Vec<T>> {
        let mut h_x = vec![T::default(); d_x.len()];
        d_x.read(&mut h_x).enq()?;
        Ok(h_x)
    }

    /// Enqueues `kernel` over `len` work-items and waits for its completion.
    fn enqueue(&self, mut kernel: Kernel, len: usize) -> ocl::Result<()> {
        if len >= BLOCK_SIZE_1D && len % BLOCK_SIZE_1D == 0 {
            kernel.set_default_local_work_size(SpatialDims::One(BLOCK_SIZE_1D));
        }
        unsafe {
            kernel.enq()?;
        }
        self.queue.finish()
    }

    fn fill<T: OclPrm>(
        &self,
        program: &Program,
        name: &str,
        len: usize,
        seed: u64,
    ) -> ocl::Result<Buffer<T>> {
        let d_out = self.alloc::<T>(len)?;
        let kernel = Kernel::builder()
            .program(program)
            .name(name)
            .queue(self.queue.clone())
            .global_work_size(len)
            .arg(&d_out)
            .arg(seed)
            .build()?;
        self.enqueue(kernel, len)?;
        Ok(d_out)
    }

    /// Converts a real buffer into a complex one with a null imaginary part.
    fn promote<T: OclPrm, C: OclPrm>(
        &self,
        program: &Program,
        name: &str,
        d_in: &Buffer<T>,
    ) -> ocl::Result<Buffer<C>> {
        let len = d_in.len();
        let d_out = self.alloc::<C>(len)?;
        let kernel = Kernel::builder()
            .program(program)
            .name(name)
            .queue(self.queue.clone())
            .global_work_size(len)
            .arg(d_in)
            .arg(&d_out)
            .build()?;
        self.enqueue(kernel, len)?;
        Ok(d_out)
    }

    /// N-dimensional DFT: one kernel launch per axis, alternating between two buffers.
    fn dftn<C: OclPrm, S: DftScalar>(
        &self,
        program: &Program,
        name: &str,
        d_data: Buffer<C>,
        shape: &Shape,
        inverse: bool,
    ) -> ocl::Result<Buffer<C>> {
        let n = shape.nb_elems();
        let mut d_src = d_data;
        let mut d_dst = self.alloc::<C>(n)?;
        let sign = S::from_f64(if inverse { 1.0 } else { -1.0 });

        for axis in 0..shape.ndim() {
            let (_, len, inner) = shape.split_at_axis(axis);
            let scale = S::from_f64(if inverse { 1.0 / len as f64 } else { 1.0 });
            let kernel = Kernel::builder()
                .program(program)
                .name(name)
                .queue(self.queue.clone())
                .global_work_size(n)
                .arg(&d_src)
                .arg(&d_dst)
                .arg(len as u64)
                .arg(inner as u64)
                .arg(sign)
                .arg(scale)
                .build()?;
            self.enqueue(kernel, n)?;
            std::mem::swap(&mut d_src, &mut d_dst);
        }
        Ok(d_src)
    }

    fn transform(&self, array: DeviceArray, inverse: bool) -> ocl::Result<DeviceArray> {
        let single = self.program(false);
        let double = self.program(true);
        let name = dft_kernel(array.dtype());
        let shape = array.shape;

        let data = match array.data {
            DeviceData::F16(x) => {
                let x = self.promote(single, "f16_to_c64", &x)?;
                DeviceData::C64(self.dftn::<_, f32>(single, name, x, &shape, inverse)?)
            }
            DeviceData::F32(x) => {
                let x = self.promote(single, "f32_to_c64", &x)?;
                DeviceData::C64(self.dftn::<_, f32>(single, name, x, &shape, inverse)?)
            }
            DeviceData::C64(x) => {
                DeviceData::C64(self.dftn::<_, f32>(single, name, x, &shape, inverse)?)
            }
            DeviceData::F64(x) => {
                let x = self.promote(double, "f64_to_c128", &x)?;
                DeviceData::C128(self.dftn::<_, f64>(double, name, x, &shape, inverse)?)
            }
            DeviceData::I32(x) => {
                let x = self.promote(double, "i32_to_c128", &x)?;
                DeviceData::C128(self.dftn::<_, f64>(double, name, x, &shape, inverse)?)
            }
            DeviceData::I64(x) => {
                let x = self.promote(double, "i64_to_c128", &x)?;
                DeviceData::C128(self.dftn::<_, f64>(double, name, x, &shape, inverse)?)
            }
            DeviceData::C128(x) => {
                DeviceData::C128(self.dftn::<_, f64>(double, name, x, &shape, inverse)?)
            }
        };

        Ok(DeviceArray { shape, data })
    }

    fn random_data(&self, dtype: DType, len: usize, seed: u64) -> ocl::Result<DeviceData> {
        let program = self.program(needs_double(dtype));
        let name = rand_kernel(dtype);
        Ok(match dtype {
            DType::Float16 => DeviceData::F16(self.fill(program, name, len, seed)?),
            DType::Float32 => DeviceData::F32(self.fill(program, name, len, seed)?),
            DType::Float64 => DeviceData::F64(self.fill(program, name, len, seed)?),
            DType::Int32 => DeviceData::I32(self.fill(program, name, len, seed)?),
            DType::Int64 => DeviceData::I64(self.fill(program, name, len, seed)?),
            DType::Complex64 => DeviceData::C64(self.fill(program, name, len, seed)?),
            DType::Complex128 => DeviceData::C128(self.fill(program, name, len, seed)?),
        })
    }

    fn upload_data(&self, data: &HostData) -> ocl::Result<DeviceData> {
        Ok(match data {
            HostData::F16(x) => DeviceData::F16(self.upload(x.reinterpret_cast())?),
            HostData::F32(x) => DeviceData::F32(self.upload(x)?),
            HostData::F64(x) => DeviceData::F64(self.upload(x)?),
            HostData::I32(x) => DeviceData::I32(self.upload(x)?),
            HostData::I64(x) => DeviceData::I64(self.upload(x)?),
            HostData::C64(x) => {
                let x: Vec<Float2> = x.iter().map(|c| Float2::new(c.re, c.im)).collect();
                DeviceData::C64(self.upload(&x)?)
            }
            HostData::C128(x) => {
                let x: Vec<Double2> = x.iter().map(|c| Double2::new(c.re, c.im)).collect();
                DeviceData::C128(self.upload(&x)?)
            }
        })
    }

    fn download_data(&self, data: &DeviceData) -> ocl::Result<HostData> {
        Ok(match data {
            DeviceData::F16(x) => {
                HostData::F16(self.download(x)?.into_iter().map(f16::from_bits).collect())
            }
            DeviceData::F32(x) => HostData::F32(self.download(x)?),
            DeviceData::F64(x) => HostData::F64(self.download(x)?),
            DeviceData::I32(x) => HostData::I32(self.download(x)?),
            DeviceData::I64(x) => HostData::I64(self.download(x)?),
            DeviceData::C64(x) => HostData::C64(
                self.download(x)?
                    .into_iter()
                    .map(|v| Complex::new(v[0], v[1]))
                    .collect(),
            ),
            DeviceData::C128(x) => HostData::C128(
                self.download(x)?
                    .into_iter()
                    .map(|v| Complex::new(v[0], v[1]))
                    .collect(),
            ),
        })
    }
}

fn build_program(
    program: &DeviceProgram,
    context: &Context,
    device: Device,
) -> anyhow::Result<Program> {
    debug!(program = program.name(), "building OpenCL program");
    Program::builder()
        .devices(device)
        .src(program.source())
        .build(context)
        .map_err(|err| anyhow!("failed to build the {} program: {err}", program.name()))
}

impl Backend for OpenCl {
    type DeviceArray = DeviceArray;

    fn name(&self) -> &'static str {
        "opencl"
    }

    fn random(&mut self, shape: &Shape, dtype: DType) -> anyhow::Result<DeviceArray> {
        self.ensure_double(needs_double(dtype))?;
        let seed = self.next_seed(shape.nb_elems());
        let data = self
            .random_data(dtype, shape.nb_elems(), seed)
            .map_err(cl_error)?;
        Ok(DeviceArray {
            shape: shape.clone(),
            data,
        })
    }

    fn to_device(&mut self, array: &HostArray) -> anyhow::Result<DeviceArray> {
        let data = self.upload_data(array.data()).map_err(cl_error)?;
        Ok(DeviceArray {
            shape: array.shape().clone(),
            data,
        })
    }

    fn to_host(&mut self, array: &DeviceArray) -> anyhow::Result<HostArray> {
        let data = self.download_data(&array.data).map_err(cl_error)?;
        HostArray::new(array.shape().clone(), data)
    }

    fn fft(&mut self, array: DeviceArray) -> anyhow::Result<DeviceArray> {
        self.ensure_double(array.dtype().is_double())?;
        self.transform(array, false).map_err(cl_error)
    }

    fn ifft(&mut self, array: DeviceArray) -> anyhow::Result<DeviceArray> {
        self.ensure_double(array.dtype().is_double())?;
        self.transform(array, true).map_err(cl_error)
    }
}
