//! Benchmark drivers.
//!
//! This module provides the timing loops of the benchmark commands, written once against the
//! [`Backend`] capability set, as well as the selection of the backend and the output of the
//! resulting summaries.
//!
//! # High-level approach
//! ## 1. Data initialization
//! A random array of the requested shape and type is generated by the backend, then brought back
//! to the host. This host copy is the payload of every transfer and its size the one used to
//! compute the throughput.
//!
//! ## 2. Performance evaluation
//! The wall-clock time of the whole timing loop is measured, `count` iterations of the benchmarked
//! operation. Only the work of the loop itself is timed, the initialization is not.
//!
//! ## 3. Post-processing
//! The elapsed time is turned into a [`PerfReport`], which is outputted to `stdout`, or appended
//! to a file if specified (see [`crate::cli`] for specifying an output file from the
//! command-line).

use crate::{
    backends::{host::CpuOnly, Array, Backend, BackendKind, HostArray},
    cli::{ArrayArgs, BenchCmd, CliArgs},
    perf_report::{KernelKind, PerfReport},
    profile::Profiled,
};

use anyhow::{bail, Context};
use tracing::info;

use std::{
    fs::OpenOptions,
    hint::black_box,
    io::{stdout, Write},
    path::Path,
    time::Instant,
};

/// Runs the benchmark command of `args` on the selected backend and outputs its summary.
pub fn bench(args: &CliArgs) -> anyhow::Result<()> {
    match args.module {
        BackendKind::CpuOnly => bench_on(CpuOnly::new(args.seed), args),
        #[cfg(feature = "opencl")]
        BackendKind::OpenCl => bench_on(crate::backends::device::OpenCl::new(args.seed)?, args),
    }
}

fn bench_on<B: Backend>(mut backend: B, args: &CliArgs) -> anyhow::Result<()> {
    info!(backend = backend.name(), command = args.command.name(), "starting benchmark");

    let report = match args.profile {
        Some(ref path) => {
            let mut profiled = Profiled::new(backend);
            let start = Instant::now();
            let report = run(&mut profiled, &args.command)?;
            profiled
                .into_log(args.command.name(), start.elapsed())
                .save(path)?;
            report
        }
        None => run(&mut backend, &args.command)?,
    };

    let mut output = open_output(args.output_file.as_deref())?;
    writeln!(output, "{report}").context("failed to write report")?;
    Ok(())
}

fn open_output(path: Option<&Path>) -> anyhow::Result<Box<dyn Write>> {
    Ok(match path {
        Some(name) => Box::new(
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(name)
                .with_context(|| format!("failed to open {}", name.display()))?,
        ),
        None => Box::new(stdout()),
    })
}

/// Runs the timing loop of a benchmark command.
pub fn run<B: Backend>(backend: &mut B, cmd: &BenchCmd) -> anyhow::Result<PerfReport> {
    match cmd {
        BenchCmd::Fft { no_copy, array, .. } => fft(backend, array, !no_copy),
        BenchCmd::Copy { array } => copy(backend, array),
        BenchCmd::Rand { array } => rand(backend, array),
        BenchCmd::Proflog { .. } | BenchCmd::Campaign { .. } => {
            bail!("`{}` is not a benchmark command", cmd.name())
        }
    }
}

/// Generates a random array and brings it back to the host, outside of any timing loop.
fn host_payload<B: Backend>(backend: &mut B, array: &ArrayArgs) -> anyhow::Result<HostArray> {
    let d_x = backend.random(&array.shape, array.dtype)?;
    backend.to_host(&d_x)
}

/// Times `count` round-trips of an array between host and device memory.
pub fn copy<B: Backend>(backend: &mut B, array: &ArrayArgs) -> anyhow::Result<PerfReport> {
    let h_x = host_payload(backend, array)?;

    let start = Instant::now();
    for _ in 0..array.count {
        let d_x = backend.to_device(&h_x)?;
        black_box(backend.to_host(&d_x)?);
    }
    let elapsed = start.elapsed().as_secs_f64();

    Ok(PerfReport::new(
        KernelKind::Copy,
        array.count,
        h_x.byte_size(),
        elapsed,
    ))
}

/// Times `count` random array generations on the device.
pub fn rand<B: Backend>(backend: &mut B, array: &ArrayArgs) -> anyhow::Result<PerfReport> {
    let h_x = host_payload(backend, array)?;

    let start = Instant::now();
    for _ in 0..array.count {
        black_box(backend.random(&array.shape, array.dtype)?);
    }
    let elapsed = start.elapsed().as_secs_f64();

    Ok(PerfReport::new(
        KernelKind::Rand,
        array.count,
        h_x.byte_size(),
        elapsed,
    ))
}

/// Times `count` forward then inverse FFTs.
///
/// With `copy`, every iteration uploads the host array, transforms it and downloads the result.
/// Otherwise the array is uploaded once and stays resident on the device.
pub fn fft<B: Backend>(
    backend: &mut B,
    array: &ArrayArgs,
    copy: bool,
) -> anyhow::Result<PerfReport> {
    let h_x = host_payload(backend, array)?;

    let start = Instant::now();
    if copy {
        for _ in 0..array.count {
            let d_x = backend.to_device(&h_x)?;
            let d_y = backend.fft(d_x)?;
            let d_z = backend.ifft(d_y)?;
            black_box(backend.to_host(&d_z)?);
        }
    } else {
        let mut d_x = backend.to_device(&h_x)?;
        for _ in 0..array.count {
            let d_y = backend.fft(d_x)?;
            d_x = backend.ifft(d_y)?;
        }
        black_box(d_x);
    }
    let elapsed = start.elapsed().as_secs_f64();

    Ok(PerfReport::new(KernelKind::Fft, array.count, h_x.byte_size(), elapsed).with_copy(copy))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::DType;

    fn array(shape: &str, count: u32, dtype: DType) -> ArrayArgs {
        ArrayArgs {
            shape: shape.parse().unwrap(),
            count,
            dtype,
        }
    }

    #[test]
    fn copy_round_trips_count_times() {
        let mut backend = Profiled::new(CpuOnly::new(0));
        let report = copy(&mut backend, &array("10,10", 7, DType::Float32)).unwrap();

        assert_eq!(report.kernel(), KernelKind::Copy);
        assert_eq!(backend.ncalls("to_device"), 7);
        assert_eq!(backend.ncalls("to_host"), 8);
        assert!(report.hz() > 0.0);
    }

    #[test]
    fn rand_generates_count_arrays() {
        let mut backend = Profiled::new(CpuOnly::new(0));
        rand(&mut backend, &array("10,10", 4, DType::Int64)).unwrap();

        // One extra generation for the payload
        assert_eq!(backend.ncalls("random"), 5);
        assert_eq!(backend.ncalls("to_device"), 0);
    }

    #[test]
    fn resident_fft_uploads_once() {
        let mut backend = Profiled::new(CpuOnly::new(0));
        let report = fft(&mut backend, &array("10,10", 5, DType::Float32), false).unwrap();

        assert_eq!(backend.ncalls("to_device"), 1);
        assert_eq!(backend.ncalls("fft"), 5);
        assert_eq!(backend.ncalls("ifft"), 5);
        assert!(report.to_string().ends_with(" copy:false"));
    }

    #[test]
    fn copying_fft_transfers_every_iteration() {
        let mut backend = Profiled::new(CpuOnly::new(0));
        let report = fft(&mut backend, &array("6,4", 3, DType::Float16), true).unwrap();

        assert_eq!(backend.ncalls("to_device"), 3);
        assert_eq!(backend.ncalls("to_host"), 4);
        assert_eq!(backend.ncalls("fft"), 3);
        assert!(report.to_string().ends_with(" copy:true"));
    }

    #[test]
    fn throughput_uses_the_payload_size() {
        let mut backend = CpuOnly::new(0);
        let report = copy(&mut backend, &array("100,100", 2, DType::Float64)).unwrap();
        let expected = 1e-6 * 2.0 * 80_000.0 / report.elapsed();
        assert!((report.mbps() - expected).abs() <= 1e-6 * expected);
    }

    #[test]
    fn rejects_non_benchmark_commands() {
        let cmd = BenchCmd::Campaign {
            outdir: "out".into(),
        };
        assert!(run(&mut CpuOnly::new(0), &cmd).is_err());
    }

    #[test]
    fn appends_to_output_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.txt");
        for _ in 0..2 {
            let mut output = open_output(Some(&path)).unwrap();
            writeln!(output, "line").unwrap();
        }
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "line\nline\n");
    }
}
