//! FFS - Fast Fourier Spin
//!
//! # About
//! FFS is a small stress-test harness for accelerators. It measures the throughput of a handful
//! of operations on a selected backend and reports a one-line summary per run:
//! - `copy`: host to device then device to host transfers of an array;
//! - `rand`: random array generation on the device;
//! - `fft`: forward then inverse N-dimensional FFTs, with or without transfers at every cycle.
//!
//! It can also generate a benchmark campaign: a directory of scripts sweeping over array shapes,
//! element types, commands and numbers of concurrent jobs, run under a process supervisor while
//! device and host activity is recorded.
//!
//! # Quickstart
//! ## Pre-requisites
//! The `cpu-only` backend has no requirement. The `opencl` backend needs an [OpenCL 1.2+][1]
//! library installed on your system and the `opencl` feature enabled at build time.
//!
//! ## Build
//! As any Rust-based project, FFS is built and run with `cargo`:
//! ```sh
//! cargo build --release --features opencl
//! ```
//!
//! ## Help
//! To see the help usage:
//! ```sh
//! cargo run -- help
//!
//! Fast Fourier Spin: stress test accelerators with FFTs and other things
//!
//! Usage: ffs [OPTIONS] <COMMAND>
//!
//! Commands:
//!   fft       Run FFTs on the device, transferring back and forth
//!   copy      Transfer an array back and forth between host and device memory
//!   rand      Generate random arrays on the device
//!   proflog   Dump a profile log, sorted by cumulative time
//!   campaign  Generate the scripts of a benchmark campaign into a directory
//!   help      Print this message or the help of the given subcommand(s)
//!
//! Options:
//!   -m, --module <MODULE>            Backend module running the benchmarked operations
//!   -s, --seed <SEED>                Seed for the random number generator (RNG)
//!   -o, --output-file <OUTPUT_FILE>  Output file for the benchmark summaries, appended to
//!       --profile <PATH>             Record a profile of the backend calls into this file
//!   -h, --help                       Print help (see more with '--help')
//!   -V, --version                    Print version
//! ```
//!
//! ## Example run
//! To run 100 FFT round-trips of a 1000x1000 single-precision array kept resident on the device:
//! ```sh
//! cargo run --release --features opencl -- -m opencl fft --no-copy --shape 1000,1000 --count 100
//!
//! 0.734 s, 136.2 Hz, 544.9 MByte/sec copy:false
//! ```
//!
//! To generate and run a campaign:
//! ```sh
//! cargo run --release -- -m cpu-only campaign /tmp/out
//!
//! cd /tmp/out && ./cpu-only-campaign.sh
//! ```
//!
//! Diagnostics are written to `stderr` and filtered with the `RUST_LOG` environment variable
//! (e.g. `RUST_LOG=ffs=debug`).
//!
//! ## Documentation
//! The crate's documentation is available using `cargo`:
//! ```sh
//! cargo doc --open
//! ```
//!
//! [1]: https://www.khronos.org/opencl/

pub mod backends;
pub mod campaign;
pub mod cli;
pub mod consts;
pub mod drivers;
pub mod kernels;
pub mod perf_report;
pub mod profile;
pub mod utils;

use crate::cli::{BenchCmd, CliArgs};

use clap::Parser;
use tracing::debug;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    init_tracing();

    // Parse command-line arguments
    let args = CliArgs::parse();
    debug!(?args, "parsed command-line arguments");

    match args.command {
        BenchCmd::Proflog { ref plog } => profile::dump(plog),
        BenchCmd::Campaign { ref outdir } => campaign::generate(outdir, args.module),
        _ => drivers::bench(&args),
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(consts::DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
