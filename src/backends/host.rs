//! Host-only backend.
//!
//! Arrays never leave host memory: "transfers" are full copies, which is the cost a real
//! device transfer is compared against.

use super::{Backend, HostArray, HostData};
use crate::{kernels::host, utils::*};

use rand::{rngs::SmallRng, SeedableRng};
use rustfft::{num_complex::Complex, FftDirection, FftPlanner};

/// Backend running every operation on the host.
pub struct CpuOnly {
    rng: SmallRng,
    planner32: FftPlanner<f32>,
    planner64: FftPlanner<f64>,
}

impl CpuOnly {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: SmallRng::seed_from_u64(seed),
            planner32: FftPlanner::new(),
            planner64: FftPlanner::new(),
        }
    }

    fn transform(&mut self, array: HostArray, dir: FftDirection) -> anyhow::Result<HostArray> {
        let (shape, data) = array.into_parts();
        let data = match data {
            HostData::F16(x) => self.fft32(host::to_complex(&x), &shape, dir),
            HostData::F32(x) => self.fft32(host::to_complex(&x), &shape, dir),
            HostData::C64(x) => self.fft32(x, &shape, dir),
            HostData::F64(x) => self.fft64(host::to_complex(&x), &shape, dir),
            HostData::I32(x) => self.fft64(host::to_complex(&x), &shape, dir),
            HostData::I64(x) => self.fft64(host::to_complex(&x), &shape, dir),
            HostData::C128(x) => self.fft64(x, &shape, dir),
        };
        HostArray::new(shape, data)
    }

    fn fft32(&mut self, mut x: Vec<Complex<f32>>, shape: &Shape, dir: FftDirection) -> HostData {
        host::fftn(&mut self.planner32, &mut x, shape, dir);
        HostData::C64(x)
    }

    fn fft64(&mut self, mut x: Vec<Complex<f64>>, shape: &Shape, dir: FftDirection) -> HostData {
        host::fftn(&mut self.planner64, &mut x, shape, dir);
        HostData::C128(x)
    }
}

impl Backend for CpuOnly {
    type DeviceArray = HostArray;

    fn name(&self) -> &'static str {
        "cpu-only"
    }

    fn random(&mut self, shape: &Shape, dtype: DType) -> anyhow::Result<HostArray> {
        HostArray::random(shape, dtype, &mut self.rng)
    }

    fn to_device(&mut self, array: &HostArray) -> anyhow::Result<HostArray> {
        Ok(array.clone())
    }

    fn to_host(&mut self, array: &HostArray) -> anyhow::Result<HostArray> {
        Ok(array.clone())
    }

    fn fft(&mut self, array: HostArray) -> anyhow::Result<HostArray> {
        self.transform(array, FftDirection::Forward)
    }

    fn ifft(&mut self, array: HostArray) -> anyhow::Result<HostArray> {
        self.transform(array, FftDirection::Inverse)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::Array;

    #[test]
    fn transfers_are_copies() {
        let mut backend = CpuOnly::new(0);
        let shape: Shape = "3,4".parse().unwrap();
        let array = backend.random(&shape, DType::Float32).unwrap();
        let host = backend.to_host(&array).unwrap();
        let device = backend.to_device(&host).unwrap();
        assert_eq!(device, array);
    }

    #[test]
    fn seeds_make_random_arrays_reproducible() {
        let shape: Shape = "8".parse().unwrap();
        let a = CpuOnly::new(42).random(&shape, DType::Float64).unwrap();
        let b = CpuOnly::new(42).random(&shape, DType::Float64).unwrap();
        let c = CpuOnly::new(43).random(&shape, DType::Float64).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn transforms_promote_to_complex() {
        let mut backend = CpuOnly::new(0);
        let shape: Shape = "4,4".parse().unwrap();
        for (dtype, promoted) in [
            (DType::Float16, DType::Complex64),
            (DType::Float32, DType::Complex64),
            (DType::Float64, DType::Complex128),
            (DType::Int32, DType::Complex128),
            (DType::Complex64, DType::Complex64),
        ] {
            let array = backend.random(&shape, dtype).unwrap();
            let spectrum = backend.fft(array).unwrap();
            assert_eq!(spectrum.dtype(), promoted);
            assert_eq!(spectrum.shape(), &shape);
            assert_eq!(spectrum.byte_size(), 16 * promoted.size_of());
        }
    }

    #[test]
    fn round_trip_restores_values() {
        let mut backend = CpuOnly::new(1);
        let shape: Shape = "10,6".parse().unwrap();
        let array = backend.random(&shape, DType::Float32).unwrap();
        let input = match array.data() {
            HostData::F32(x) => x.clone(),
            _ => unreachable!(),
        };

        let spectrum = backend.fft(array).unwrap();
        let output = backend.ifft(spectrum).unwrap();
        match output.data() {
            HostData::C64(y) => {
                for (x, y) in input.iter().zip(y) {
                    assert!((y.re - x).abs() < 1e-5 && y.im.abs() < 1e-5);
                }
            }
            other => panic!("unexpected output type {}", other.dtype()),
        }
    }
}
