//! Command-Line Interface related code.
//!
//! This module handles the parsing of CLI arguments using the [`clap`][1] crate.
//! It defines the availables runtime options and subcommands.
//!
//! [1]: https://crates.io/crates/clap

use crate::{
    backends::BackendKind,
    consts,
    utils::{DType, Shape},
};

use clap::{Args, Parser, Subcommand};

use std::path::PathBuf;

/// Fast Fourier Spin: stress test accelerators with FFTs and other things.
///
/// Measures the throughput of memory transfers, random array generation and FFT round-trips on
/// a selected backend, and generates benchmark campaigns sweeping over array shapes, element types
/// and numbers of concurrent jobs.
#[derive(Clone, Debug, Parser)]
#[command(name = "ffs", version)]
pub struct CliArgs {
    /// Backend module running the benchmarked operations.
    #[arg(short, long, value_enum, default_value_t = BackendKind::CpuOnly)]
    pub module: BackendKind,

    /// Seed for the random number generator (RNG).
    #[arg(short, long, value_name = "SEED", default_value_t = consts::DEFAULT_SEED)]
    pub seed: u64,

    /// Output file for the benchmark summaries, appended to. Defaults to `stdout`.
    #[arg(short, long)]
    pub output_file: Option<PathBuf>,

    /// Record a profile of the backend calls into this file (see `proflog`).
    #[arg(long, value_name = "PATH")]
    pub profile: Option<PathBuf>,

    /// Command to run.
    #[command(subcommand)]
    pub command: BenchCmd,
}

/// Shape, length and type of the benchmarked array.
#[derive(Args, Clone, Debug, PartialEq)]
pub struct ArrayArgs {
    /// Array shape, as comma-separated dimensions.
    #[arg(short, long, default_value = consts::DEFAULT_SHAPE)]
    pub shape: Shape,

    /// Number of cycles.
    #[arg(
        short,
        long,
        default_value_t = consts::DEFAULT_COUNT,
        value_parser = clap::value_parser!(u32).range(1..),
    )]
    pub count: u32,

    /// The array element type.
    #[arg(short, long, value_enum, default_value_t = DType::Float32)]
    pub dtype: DType,
}

/// List of available commands.
#[derive(Debug, Clone, PartialEq, Subcommand)]
pub enum BenchCmd {
    /// Run FFTs on the device, transferring back and forth.
    Fft {
        // Never read: only pairs with `no_copy` through `overrides_with`, so the last flag wins.
        // The effective mode is `!no_copy`.
        /// Round-trip the array between host and device at every cycle (default).
        #[arg(long, overrides_with = "no_copy")]
        copy: bool,

        /// Keep the array resident on the device and only re-run the transforms.
        #[arg(long, overrides_with = "copy")]
        no_copy: bool,

        #[command(flatten)]
        array: ArrayArgs,
    },
    /// Transfer an array back and forth between host and device memory.
    Copy {
        #[command(flatten)]
        array: ArrayArgs,
    },
    /// Generate random arrays on the device.
    Rand {
        #[command(flatten)]
        array: ArrayArgs,
    },
    /// Dump a profile log, sorted by cumulative time.
    ///
    /// The log is recorded with the global `--profile` option:
    /// `ffs --profile fft.bin -m opencl fft` then `ffs proflog fft.bin`.
    Proflog {
        /// Profile log to read.
        plog: PathBuf,
    },
    /// Generate the scripts of a benchmark campaign into a directory.
    Campaign {
        /// Output directory, created if missing.
        outdir: PathBuf,
    },
}

impl BenchCmd {
    /// Name of the command, as typed on the command-line.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Fft { .. } => "fft",
            Self::Copy { .. } => "copy",
            Self::Rand { .. } => "rand",
            Self::Proflog { .. } => "proflog",
            Self::Campaign { .. } => "campaign",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let args = CliArgs::try_parse_from(["ffs", "copy"]).unwrap();
        assert_eq!(args.module, BackendKind::CpuOnly);
        assert_eq!(args.seed, consts::DEFAULT_SEED);
        assert_eq!(
            args.command,
            BenchCmd::Copy {
                array: ArrayArgs {
                    shape: "1000,1000".parse().unwrap(),
                    count: 100,
                    dtype: DType::Float32,
                }
            }
        );
    }

    #[test]
    fn parses_procfile_command_lines() {
        let args = CliArgs::try_parse_from([
            "ffs", "-m", "cpu-only", "rand", "--shape", "10000,1000", "--count", "100", "--dtype",
            "float16",
        ])
        .unwrap();
        let BenchCmd::Rand { array } = args.command else {
            panic!("expected the rand command");
        };
        assert_eq!(array.shape.dims(), &[10000, 1000]);
        assert_eq!(array.count, 100);
        assert_eq!(array.dtype, DType::Float16);
    }

    #[test]
    fn copy_flag_defaults_to_on_and_last_one_wins() {
        let copy_of = |argv: &[&str]| match CliArgs::try_parse_from(argv).unwrap().command {
            BenchCmd::Fft { no_copy, .. } => !no_copy,
            _ => unreachable!(),
        };
        assert!(copy_of(&["ffs", "fft"]));
        assert!(!copy_of(&["ffs", "fft", "--no-copy"]));
        assert!(copy_of(&["ffs", "fft", "--no-copy", "--copy"]));
        assert!(!copy_of(&["ffs", "fft", "--copy", "--no-copy"]));
    }

    #[test]
    fn rejects_invalid_arguments() {
        for argv in [
            &["ffs", "fft", "--count", "0"][..],
            &["ffs", "fft", "--shape", "10,x"],
            &["ffs", "fft", "--dtype", "float8"],
            &["ffs", "-m", "torch", "fft"],
        ] {
            assert!(CliArgs::try_parse_from(argv).is_err(), "{argv:?}");
        }
    }
}
