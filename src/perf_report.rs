//! Performance report related structures.
//!
//! This module defines the summary produced by a timing loop out of its elapsed wall-clock time,
//! the number of iterations and the size of the benchmarked array.

use std::fmt;

/// List of benchmarked operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KernelKind {
    /// Host to device then device to host transfer.
    Copy,
    /// Random array generation.
    Rand,
    /// Forward then inverse FFT.
    Fft,
}

impl KernelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Copy => "copy",
            Self::Rand => "rand",
            Self::Fft => "fft",
        }
    }
}

impl fmt::Display for KernelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Performance information of a timing loop.
#[derive(Clone, Debug, PartialEq)]
pub struct PerfReport {
    /// Benchmarked operation.
    kernel: KernelKind,
    /// Number of iterations of the timing loop.
    count: u32,
    /// Size in bytes of a single array.
    nb_bytes: usize,
    /// Elapsed wall-clock time in seconds.
    elapsed: f64,
    /// Whether every FFT iteration transferred the array back and forth.
    copy: Option<bool>,
}

impl PerfReport {
    /// Creates a new `PerfReport` given the operation, the number of iterations, the size of the
    /// array and the elapsed time of the whole loop.
    pub fn new(kernel: KernelKind, count: u32, nb_bytes: usize, elapsed: f64) -> Self {
        Self {
            kernel,
            count,
            nb_bytes,
            // Clamped to the timer resolution (1 ns)
            elapsed: elapsed.max(1e-9),
            copy: None,
        }
    }

    /// Records the transfer mode of an FFT loop, which is then part of the summary.
    pub fn with_copy(mut self, copy: bool) -> Self {
        self.copy = Some(copy);
        self
    }

    pub fn kernel(&self) -> KernelKind {
        self.kernel
    }

    pub fn elapsed(&self) -> f64 {
        self.elapsed
    }

    /// Iterations per second.
    pub fn hz(&self) -> f64 {
        self.count as f64 / self.elapsed
    }

    /// Throughput in MByte/s, where a megabyte is 10^6 bytes.
    pub fn mbps(&self) -> f64 {
        1e-6 * self.count as f64 * self.nb_bytes as f64 / self.elapsed
    }
}

impl fmt::Display for PerfReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:.3} s, {:.1} Hz, {:.1} MByte/sec",
            self.elapsed,
            self.hz(),
            self.mbps()
        )?;
        if let Some(copy) = self.copy {
            write!(f, " copy:{copy}")?;
        }
        Ok(())
    }
}
