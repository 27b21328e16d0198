//! Kernel implementations.
//!
//! This modules contains the actual implementation of the host and device kernels the backends
//! delegate to.

#[cfg(feature = "opencl")]
pub mod device {
    //! Device kernel sources.

    use crate::utils::DType;

    /// Represents an OpenCL program.
    ///
    /// Device code cannot be expressed in Rust itself, so the kernels are written in OpenCL C and
    /// the program source code is imported as raw text, then compiled for the selected device at
    /// runtime.
    pub struct DeviceProgram {
        program_name: &'static str,
        program_source: &'static str,
    }

    impl DeviceProgram {
        /// Creates a `DeviceProgram` from a human-readable name and its source code.
        pub const fn new(program_name: &'static str, program_source: &'static str) -> Self {
            Self {
                program_name,
                program_source,
            }
        }

        pub fn name(&self) -> &'static str {
            self.program_name
        }

        pub fn source(&self) -> &'static str {
            self.program_source
        }
    }

    /// Random generation, promotion and DFT kernels working on 32-bit floats.
    pub static CL_SINGLE: DeviceProgram = DeviceProgram::new(
        "single precision",
        include_str!("../kernels/opencl/single.cl"),
    );

    /// Random generation, promotion and DFT kernels working on 64-bit floats.
    pub static CL_DOUBLE: DeviceProgram = DeviceProgram::new(
        "double precision",
        include_str!("../kernels/opencl/double.cl"),
    );

    /// Name of the kernel filling a buffer of type `dtype` with random values.
    pub fn rand_kernel(dtype: DType) -> &'static str {
        match dtype {
            DType::Float16 => "rand_f16",
            DType::Float32 => "rand_f32",
            DType::Float64 => "rand_f64",
            DType::Int32 => "rand_i32",
            DType::Int64 => "rand_i64",
            DType::Complex64 => "rand_c64",
            DType::Complex128 => "rand_c128",
        }
    }

    /// Name of the single-axis DFT kernel for the complex type `dtype`.
    pub fn dft_kernel(dtype: DType) -> &'static str {
        match dtype.promoted() {
            DType::Complex64 => "dft_axis_c64",
            _ => "dft_axis_c128",
        }
    }

    /// Whether the kernels handling `dtype` live in the double-precision program.
    pub fn needs_double(dtype: DType) -> bool {
        matches!(dtype, DType::Float64 | DType::Complex128)
    }
}

pub mod host {
    //! Host kernel implementations.
    //!
    //! The transforms rely on the [`rustfft`][1] crate for the 1-D FFTs and on [`rayon`][2] to
    //! process independent lanes in parallel.
    //!
    //! [1]: https://crates.io/crates/rustfft
    //! [2]: https://crates.io/crates/rayon

    use rayon::prelude::*;
    use rustfft::{
        num_complex::Complex,
        num_traits::{FromPrimitive, Zero},
        FftDirection, FftNum, FftPlanner,
    };

    use crate::utils::Shape;

    /// Promotes a real vector to complex values with a null imaginary part.
    pub fn to_complex<T, U>(x: &[T]) -> Vec<Complex<U>>
    where
        T: num::ToPrimitive + Sync,
        U: FftNum,
    {
        x.par_iter()
            .map(|v| {
                let re = v.to_f64().and_then(U::from_f64).unwrap_or_else(U::zero);
                Complex::new(re, U::zero())
            })
            .collect()
    }

    /// N-dimensional FFT of a row-major array: a 1-D transform along every axis in turn.
    ///
    /// The inverse transform is normalized by the number of elements, so that a forward
    /// transform followed by an inverse one gives back the input.
    pub fn fftn<T: FftNum>(
        planner: &mut FftPlanner<T>,
        data: &mut [Complex<T>],
        shape: &Shape,
        direction: FftDirection,
    ) {
        assert_eq!(data.len(), shape.nb_elems());

        for axis in 0..shape.ndim() {
            let (_, len, inner) = shape.split_at_axis(axis);
            let fft = planner.plan_fft(len, direction);
            let scratch_len = fft.get_inplace_scratch_len();

            if inner == 1 {
                // Lanes are contiguous rows
                data.par_chunks_exact_mut(len).for_each_init(
                    || vec![Complex::zero(); scratch_len],
                    |scratch, lane| fft.process_with_scratch(lane, scratch),
                );
                continue;
            }

            // Strided lanes: transpose each `len x inner` block so lanes become contiguous
            let mut lanes = vec![Complex::zero(); len * inner];
            for block in data.chunks_exact_mut(len * inner) {
                let src = &*block;
                lanes
                    .par_chunks_exact_mut(len)
                    .enumerate()
                    .for_each(|(i, lane)| {
                        lane.iter_mut()
                            .enumerate()
                            .for_each(|(k, x)| *x = src[k * inner + i]);
                    });

                lanes.par_chunks_exact_mut(len).for_each_init(
                    || vec![Complex::zero(); scratch_len],
                    |scratch, lane| fft.process_with_scratch(lane, scratch),
                );

                block
                    .par_chunks_exact_mut(inner)
                    .enumerate()
                    .for_each(|(k, row)| {
                        row.iter_mut()
                            .enumerate()
                            .for_each(|(i, x)| *x = lanes[i * len + k]);
                    });
            }
        }

        if direction == FftDirection::Inverse {
            let scale = T::from_f64(1.0 / shape.nb_elems() as f64).unwrap_or_else(T::zero);
            data.par_iter_mut().for_each(|x| *x = *x * scale);
        }
    }

}
