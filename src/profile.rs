//! Execution profiles of the benchmark commands.
//!
//! [`Profiled`] wraps a backend and records the duration of every capability call. At the end
//! of a command, the recorded durations are turned into a [`ProfileLog`], serialized with
//! [`bincode`][1] so that `ffs proflog` can later print it sorted by cumulative time.
//!
//! [1]: https://crates.io/crates/bincode

use crate::{
    backends::{Backend, HostArray},
    utils::{DType, Shape},
};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use statistical::{mean, standard_deviation};
use tracing::info;

use std::{
    collections::BTreeMap,
    fs,
    io::{self, Write},
    path::Path,
    time::{Duration, Instant},
};

/// Recorded calls of a single function.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProfileEntry {
    /// Qualified name of the function.
    pub function: String,
    /// Duration of every call, in seconds.
    pub durations: Vec<f64>,
    /// Time spent in the function itself, excluding the profiled callees, in seconds.
    pub internal: f64,
}

impl ProfileEntry {
    pub fn ncalls(&self) -> usize {
        self.durations.len()
    }

    /// Total time spent in the function, including its callees.
    pub fn cumulative(&self) -> f64 {
        self.durations.iter().sum()
    }

    /// Standard deviation of the call durations.
    pub fn stddev(&self) -> f64 {
        if self.durations.len() < 2 {
            return 0.0;
        }
        standard_deviation(&self.durations, Some(mean(&self.durations)))
    }
}

/// Profile of one benchmark command.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProfileLog {
    /// Profiled command, e.g. `fft`.
    pub command: String,
    /// Profiled functions, in no particular order.
    pub entries: Vec<ProfileEntry>,
}

impl ProfileLog {
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let bytes = bincode::serialize(self).context("failed to serialize profile")?;
        fs::write(path, bytes)
            .with_context(|| format!("failed to write profile to {}", path.display()))?;
        info!(path = %path.display(), "profile saved");
        Ok(())
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let bytes = fs::read(path)
            .with_context(|| format!("failed to read profile from {}", path.display()))?;
        bincode::deserialize(&bytes)
            .with_context(|| format!("{} is not a profile log", path.display()))
    }

    /// Entries sorted by decreasing cumulative time.
    pub fn sorted_entries(&self) -> Vec<&ProfileEntry> {
        let mut entries: Vec<_> = self.entries.iter().collect();
        entries.sort_by(|a, b| b.cumulative().total_cmp(&a.cumulative()));
        entries
    }

    /// Writes a human-readable report, sorted by cumulative time.
    pub fn write_report(&self, output: &mut dyn Write) -> io::Result<()> {
        let ncalls: usize = self.entries.iter().map(ProfileEntry::ncalls).sum();
        let total = self
            .entries
            .iter()
            .map(ProfileEntry::cumulative)
            .fold(0.0, f64::max);

        writeln!(output, "{ncalls} function calls in {total:.3} seconds ({})", self.command)?;
        writeln!(output)?;
        writeln!(output, "   Ordered by: cumulative time")?;
        writeln!(output)?;
        writeln!(
            output,
            "{:>9} {:>9} {:>9} {:>9} {:>9} {:>9} function",
            "ncalls", "tottime", "percall", "cumtime", "percall", "stddev"
        )?;
        for entry in self.sorted_entries() {
            let n = entry.ncalls().max(1) as f64;
            writeln!(
                output,
                "{:>9} {:>9.6} {:>9.6} {:>9.6} {:>9.6} {:>9.6} {}",
                entry.ncalls(),
                entry.internal,
                entry.internal / n,
                entry.cumulative(),
                entry.cumulative() / n,
                entry.stddev(),
                entry.function,
            )?;
        }
        Ok(())
    }
}

/// Loads the profile log at `path` and prints its report on `stdout`.
pub fn dump(path: &Path) -> anyhow::Result<()> {
    let log = ProfileLog::load(path)?;
    log.write_report(&mut io::stdout().lock())?;
    Ok(())
}

/// Backend adapter timing every call of the wrapped backend.
pub struct Profiled<B> {
    inner: B,
    calls: BTreeMap<&'static str, Vec<f64>>,
}

impl<B: Backend> Profiled<B> {
    pub fn new(inner: B) -> Self {
        Self {
            inner,
            calls: BTreeMap::new(),
        }
    }

    /// Number of recorded calls of the capability `op` (e.g. `fft`).
    pub fn ncalls(&self, op: &str) -> usize {
        self.calls.get(op).map_or(0, Vec::len)
    }

    fn timed<T>(&mut self, op: &'static str, call: impl FnOnce(&mut B) -> T) -> T {
        let start = Instant::now();
        let out = call(&mut self.inner);
        self.calls
            .entry(op)
            .or_default()
            .push(start.elapsed().as_secs_f64());
        out
    }

    /// Builds the profile of `command`, which ran for `elapsed` in total.
    pub fn into_log(self, command: &str, elapsed: Duration) -> ProfileLog {
        let backend = self.inner.name();
        let total = elapsed.as_secs_f64();
        let in_callees: f64 = self.calls.values().flatten().sum();

        let mut entries = vec![ProfileEntry {
            function: command.to_string(),
            durations: vec![total],
            internal: (total - in_callees).max(0.0),
        }];
        entries.extend(self.calls.into_iter().map(|(op, durations)| ProfileEntry {
            function: format!("{backend}.{op}"),
            internal: durations.iter().sum(),
            durations,
        }));

        ProfileLog {
            command: command.to_string(),
            entries,
        }
    }
}

impl<B: Backend> Backend for Profiled<B> {
    type DeviceArray = B::DeviceArray;

    fn name(&self) -> &'static str {
        self.inner.name()
    }

    fn random(&mut self, shape: &Shape, dtype: DType) -> anyhow::Result<Self::DeviceArray> {
        self.timed("random", |b| b.random(shape, dtype))
    }

    fn to_device(&mut self, array: &HostArray) -> anyhow::Result<Self::DeviceArray> {
        self.timed("to_device", |b| b.to_device(array))
    }

    fn to_host(&mut self, array: &Self::DeviceArray) -> anyhow::Result<HostArray> {
        self.timed("to_host", |b| b.to_host(array))
    }

    fn fft(&mut self, array: Self::DeviceArray) -> anyhow::Result<Self::DeviceArray> {
        self.timed("fft", |b| b.fft(array))
    }

    fn ifft(&mut self, array: Self::DeviceArray) -> anyhow::Result<Self::DeviceArray> {
        self.timed("ifft", |b| b.ifft(array))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::host::CpuOnly;

    fn entry(function: &str, durations: Vec<f64>) -> ProfileEntry {
        ProfileEntry {
            function: function.to_string(),
            internal: durations.iter().sum(),
            durations,
        }
    }

    #[test]
    fn records_every_call() {
        let mut backend = Profiled::new(CpuOnly::new(0));
        let shape: Shape = "8,8".parse().unwrap();
        let d_x = backend.random(&shape, DType::Float32).unwrap();
        let d_y = backend.fft(d_x).unwrap();
        let d_z = backend.ifft(d_y).unwrap();
        backend.to_host(&d_z).unwrap();

        assert_eq!(backend.ncalls("random"), 1);
        assert_eq!(backend.ncalls("fft"), 1);
        assert_eq!(backend.ncalls("ifft"), 1);
        assert_eq!(backend.ncalls("to_host"), 1);
        assert_eq!(backend.ncalls("to_device"), 0);

        let log = backend.into_log("fft", Duration::from_secs(1));
        assert_eq!(log.entries.len(), 5);
        assert_eq!(log.entries[0].function, "fft");
        assert!(log.entries[0].internal <= 1.0);
        assert!(log.entries.iter().any(|e| e.function == "cpu-only.ifft"));
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fft.bin");
        let log = ProfileLog {
            command: "copy".to_string(),
            entries: vec![entry("copy", vec![2.0]), entry("cpu-only.to_host", vec![0.5, 0.7])],
        };
        log.save(&path).unwrap();
        assert_eq!(ProfileLog::load(&path).unwrap(), log);
    }

    #[test]
    fn rejects_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("garbage.bin");
        fs::write(&path, b"\x01\x02").unwrap();
        assert!(ProfileLog::load(&path).is_err());
        assert!(ProfileLog::load(&dir.path().join("missing.bin")).is_err());
    }

    #[test]
    fn report_is_sorted_by_cumulative_time() {
        let log = ProfileLog {
            command: "fft".to_string(),
            entries: vec![
                entry("cpu-only.to_device", vec![0.1]),
                entry("fft", vec![3.0]),
                entry("cpu-only.fft", vec![0.5, 0.5, 0.6]),
                entry("cpu-only.ifft", vec![0.4, 0.4, 0.4]),
            ],
        };
        let functions: Vec<_> = log
            .sorted_entries()
            .iter()
            .map(|e| e.function.as_str())
            .collect();
        assert_eq!(
            functions,
            ["fft", "cpu-only.fft", "cpu-only.ifft", "cpu-only.to_device"]
        );

        let mut report = Vec::new();
        log.write_report(&mut report).unwrap();
        let report = String::from_utf8(report).unwrap();
        assert!(report.starts_with("8 function calls in 3.000 seconds"));
        let rows: Vec<_> = report.lines().skip(5).collect();
        assert_eq!(rows.len(), 4);
        assert!(rows[0].ends_with(" fft"));
        assert!(rows[3].ends_with(" cpu-only.to_device"));
    }
}
