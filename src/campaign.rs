//! Benchmark campaign generation.
//!
//! A campaign is a directory of shell-level job descriptions sweeping over replication factors,
//! element types, array shapes and benchmark commands:
//! - one procfile per `(command, shape, dtype)` job, listing the concurrent `ffs` invocations to
//!   run under the process supervisor;
//! - one driver script, running every job in turn while recording device and host activity.
//!
//! Nothing is executed at generation time: the user runs the driver script afterwards.

use crate::{
    backends::BackendKind,
    consts,
    perf_report::KernelKind,
    utils::{DType, Shape},
};

use anyhow::{ensure, Context};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use std::{
    fs::{self, File, OpenOptions},
    io::{self, BufWriter, Read, Write},
    path::{Path, PathBuf},
};

/// Axes of a campaign sweep.
#[derive(Clone, Debug, PartialEq)]
pub struct Sweep {
    /// Numbers of identical jobs running concurrently.
    pub multis: Vec<usize>,
    pub dtypes: Vec<DType>,
    /// Array shapes, each with its number of iterations.
    pub shape_counts: Vec<(Shape, u32)>,
    pub kernels: Vec<KernelKind>,
}

impl Default for Sweep {
    fn default() -> Self {
        Self {
            multis: consts::CAMPAIGN_MULTIS.to_vec(),
            dtypes: vec![DType::Float16, DType::Float32, DType::Float64],
            shape_counts: consts::CAMPAIGN_SHAPE_COUNTS
                .iter()
                .map(|(shape, count)| {
                    let shape = shape.parse().expect("invalid campaign shape in `consts`");
                    (shape, *count)
                })
                .collect(),
            kernels: vec![KernelKind::Copy, KernelKind::Rand, KernelKind::Fft],
        }
    }
}

impl Sweep {
    /// Every job of the sweep, replication factor outermost and command innermost.
    pub fn jobs(&self, module: BackendKind) -> Vec<Job> {
        let mut jobs = Vec::new();
        for &multis in &self.multis {
            for &dtype in &self.dtypes {
                for (shape, count) in &self.shape_counts {
                    for &kernel in &self.kernels {
                        jobs.push(Job {
                            module,
                            multis,
                            kernel,
                            shape: shape.clone(),
                            count: *count,
                            dtype,
                        });
                    }
                }
            }
        }
        jobs
    }
}

/// A single point of the sweep.
#[derive(Clone, Debug, PartialEq)]
pub struct Job {
    pub module: BackendKind,
    pub multis: usize,
    pub kernel: KernelKind,
    pub shape: Shape,
    pub count: u32,
    pub dtype: DType,
}

impl Job {
    /// Base name of the files of the job, shared by all its replication factors.
    pub fn name(&self) -> String {
        format!(
            "{}-{}-{}-{}",
            self.module,
            self.kernel,
            self.shape.file_stem(),
            self.dtype
        )
    }

    pub fn procfile(&self) -> String {
        format!("{}{}", self.name(), consts::PROCFILE_SUFFIX)
    }

    /// `ffs` command line of the job.
    pub fn command(&self) -> String {
        format!(
            "{} -m {} {} --shape {} --count {} --dtype {}",
            consts::BIN_NAME,
            self.module,
            self.kernel,
            self.shape,
            self.count,
            self.dtype
        )
    }

    /// Procfile entries, one per concurrent job.
    pub fn procfile_lines(&self) -> impl Iterator<Item = String> + '_ {
        let name = self.name();
        let command = self.command();
        (0..self.multis).map(move |num| format!("{name}-{num}: {command}"))
    }

    /// Driver script line running the job under the supervisor.
    pub fn driver_line(&self) -> String {
        let name = self.name();
        format!(
            "run_job {name}{} {name}{} {name}{} {name}{}",
            consts::PROCFILE_SUFFIX,
            consts::DEVICE_LOG_SUFFIX,
            consts::HOST_LOG_SUFFIX,
            consts::JOB_LOG_SUFFIX,
        )
    }
}

/// Preamble of the driver script. `{module}` is replaced by the backend name.
const DRIVER_HEADER: &str = r#"#!/usr/bin/env bash
# Benchmark campaign of the `{module}` backend.
cd "$(dirname "$0")" || exit 1

log={module}-campaign.log

{
    echo "=== $(date)"
    hostname
    lscpu 2>/dev/null || cat /proc/cpuinfo
    nvidia-smi 2>/dev/null || clinfo -l 2>/dev/null
} >> "$log" 2>&1

# run_job PROCFILE DEVICE_LOG HOST_LOG JOB_LOG
run_job() {
    echo "$(date) start $1" >> "$log"
    nvidia-smi dmon > "$2" 2>&1 &
    local device_monitor=$!
    vmstat -t 1 > "$3" 2>&1 &
    local host_monitor=$!
    ./shoreman.sh "$1" > "$4" 2>&1
    kill "$device_monitor" "$host_monitor" 2>/dev/null
    wait "$device_monitor" "$host_monitor" 2>/dev/null
    echo "$(date) done $1" >> "$log"
}

"#;

/// Generator of the campaign scripts of a backend.
pub struct Campaign {
    outdir: PathBuf,
    module: BackendKind,
    sweep: Sweep,
}

impl Campaign {
    pub fn new(outdir: impl Into<PathBuf>, module: BackendKind, sweep: Sweep) -> Self {
        Self {
            outdir: outdir.into(),
            module,
            sweep,
        }
    }

    pub fn driver_path(&self) -> PathBuf {
        self.outdir.join(format!("{}-campaign.sh", self.module))
    }

    /// Shell command running the campaign.
    pub fn command(&self) -> String {
        format!(
            "cd {} && ./{}-campaign.sh",
            self.outdir.display(),
            self.module
        )
    }

    /// Creates the output directory and downloads the supervisor script if missing.
    ///
    /// Returns whether the script was downloaded.
    pub fn prepare(&self) -> anyhow::Result<bool> {
        fs::create_dir_all(&self.outdir)
            .with_context(|| format!("failed to create {}", self.outdir.display()))?;

        let dest = self.outdir.join(consts::SUPERVISOR_SCRIPT);
        if dest.exists() {
            debug!(path = %dest.display(), "supervisor already present");
            return Ok(false);
        }
        fetch(consts::SUPERVISOR_URL, &dest)?;
        Ok(true)
    }

    /// Writes the driver script and appends the entries of every job to its procfile.
    ///
    /// Procfiles are opened in append mode: all the replication factors of a job accumulate
    /// into the same file, and so does a second generation into the same directory.
    pub fn write(&self) -> anyhow::Result<PathBuf> {
        let driver_path = self.driver_path();
        let mut driver = BufWriter::new(
            File::create(&driver_path)
                .with_context(|| format!("failed to create {}", driver_path.display()))?,
        );
        driver.write_all(
            DRIVER_HEADER
                .replace("{module}", self.module.as_str())
                .as_bytes(),
        )?;

        let jobs = self.sweep.jobs(self.module);
        for job in &jobs {
            let path = self.outdir.join(job.procfile());
            let mut procfile = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("failed to open {}", path.display()))?;
            for line in job.procfile_lines() {
                writeln!(procfile, "{line}")?;
            }
            writeln!(driver, "{}", job.driver_line())?;
        }

        driver.flush()?;
        drop(driver);
        make_executable(&driver_path)?;
        info!(jobs = jobs.len(), path = %driver_path.display(), "campaign written");
        Ok(driver_path)
    }
}

/// Generates the default campaign of `module` into `outdir` and prints how to run it.
pub fn generate(outdir: &Path, module: BackendKind) -> anyhow::Result<()> {
    let campaign = Campaign::new(outdir, module, Sweep::default());
    campaign.prepare()?;
    campaign.write()?;
    println!("{}", campaign.command());
    Ok(())
}

/// Downloads `url` into the executable file `dest`.
fn fetch(url: &str, dest: &Path) -> anyhow::Result<()> {
    info!(url, "downloading");
    let response = ureq::get(url)
        .call()
        .with_context(|| format!("failed to download {url}"))?;
    ensure!(
        response.status() == 200,
        "failed to download {url}: HTTP {}",
        response.status()
    );
    install(response.into_reader(), dest).with_context(|| format!("failed to download {url}"))
}

/// Copies `reader` into the executable file `dest`.
///
/// The content goes through a temporary file of the same directory, renamed onto `dest` once
/// complete: on error, `dest` is left untouched.
fn install(mut reader: impl Read, dest: &Path) -> anyhow::Result<()> {
    let dir = dest.parent().unwrap_or_else(|| Path::new("."));
    let mut file = NamedTempFile::new_in(dir)
        .with_context(|| format!("failed to create a temporary file in {}", dir.display()))?;
    io::copy(&mut reader, &mut file)
        .with_context(|| format!("failed to write {}", file.path().display()))?;
    make_executable(file.path())?;
    file.persist(dest)
        .map_err(|err| err.error)
        .with_context(|| format!("failed to create {}", dest.display()))?;
    Ok(())
}

#[cfg(unix)]
fn make_executable(path: &Path) -> anyhow::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    fs::set_permissions(path, fs::Permissions::from_mode(0o755))
        .with_context(|| format!("failed to make {} executable", path.display()))
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> anyhow::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Output directory with a supervisor already in place, so nothing gets downloaded.
    fn outdir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(consts::SUPERVISOR_SCRIPT), "#!/bin/sh\n").unwrap();
        dir
    }

    fn lines(path: &Path) -> Vec<String> {
        fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(String::from)
            .collect()
    }

    fn procfiles(dir: &Path) -> Vec<PathBuf> {
        let mut files: Vec<_> = fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .filter(|path| path.to_string_lossy().ends_with(consts::PROCFILE_SUFFIX))
            .collect();
        files.sort();
        files
    }

    fn run_lines(driver: &Path) -> Vec<String> {
        lines(driver)
            .into_iter()
            .filter(|line| line.starts_with("run_job "))
            .collect()
    }

    #[test]
    fn default_sweep() {
        let sweep = Sweep::default();
        assert_eq!(sweep.shape_counts.len(), consts::CAMPAIGN_SHAPE_COUNTS.len());
        let jobs = sweep.jobs(BackendKind::CpuOnly);
        assert_eq!(jobs.len(), 4 * 3 * 3 * 3);
        assert_eq!(
            jobs[0].command(),
            "ffs -m cpu-only copy --shape 100,100 --count 10000 --dtype float16"
        );
        assert_eq!(jobs[0].name(), "cpu-only-copy-100x100-float16");
        assert_eq!(jobs[1].kernel, KernelKind::Rand);
        assert_eq!(jobs[107].multis, 10);
        assert_eq!(jobs[107].name(), "cpu-only-fft-10000x1000-float64");
    }

    #[test]
    fn job_files() {
        let job = Job {
            module: BackendKind::CpuOnly,
            multis: 3,
            kernel: KernelKind::Fft,
            shape: "1000,1000".parse().unwrap(),
            count: 1000,
            dtype: DType::Float32,
        };
        assert_eq!(job.procfile(), "cpu-only-fft-1000x1000-float32.procfile");
        assert_eq!(
            job.procfile_lines().collect::<Vec<_>>(),
            [0, 1, 2].map(|num| format!(
                "cpu-only-fft-1000x1000-float32-{num}: \
                 ffs -m cpu-only fft --shape 1000,1000 --count 1000 --dtype float32"
            ))
        );
        assert_eq!(
            job.driver_line(),
            "run_job cpu-only-fft-1000x1000-float32.procfile cpu-only-fft-1000x1000-float32-gpu.log \
             cpu-only-fft-1000x1000-float32-cpu.log cpu-only-fft-1000x1000-float32-job.log"
        );
    }

    #[test]
    fn single_replication_factor() {
        let dir = outdir();
        let sweep = Sweep {
            multis: vec![3],
            ..Sweep::default()
        };
        let campaign = Campaign::new(dir.path(), BackendKind::CpuOnly, sweep.clone());
        assert!(!campaign.prepare().unwrap());
        let driver = campaign.write().unwrap();

        let files = procfiles(dir.path());
        assert_eq!(files.len(), 27);
        for file in &files {
            let entries = lines(file);
            assert_eq!(entries.len(), 3);
            for (num, entry) in entries.iter().enumerate() {
                let (name, command) = entry.split_once(": ").unwrap();
                assert!(name.ends_with(&format!("-{num}")));
                assert!(command.starts_with("ffs -m cpu-only "));
            }
        }

        let expected: Vec<_> = sweep
            .jobs(BackendKind::CpuOnly)
            .iter()
            .map(Job::driver_line)
            .collect();
        assert_eq!(run_lines(&driver), expected);
        assert!(lines(&driver)[0].starts_with("#!"));
    }

    #[test]
    fn replication_factors_accumulate() {
        let dir = outdir();
        let campaign = Campaign::new(dir.path(), BackendKind::CpuOnly, Sweep::default());
        let driver = campaign.write().unwrap();

        let files = procfiles(dir.path());
        assert_eq!(files.len(), 27);
        assert!(files.iter().all(|file| lines(file).len() == 1 + 2 + 3 + 10));
        assert_eq!(run_lines(&driver).len(), 108);
    }

    #[test]
    fn regeneration_appends_to_procfiles() {
        let dir = outdir();
        let sweep = Sweep {
            multis: vec![2],
            ..Sweep::default()
        };
        let campaign = Campaign::new(dir.path(), BackendKind::CpuOnly, sweep);
        let driver = campaign.write().unwrap();
        campaign.write().unwrap();

        assert!(procfiles(dir.path()).iter().all(|file| lines(file).len() == 4));
        assert_eq!(run_lines(&driver).len(), 27);
    }

    #[test]
    fn keeps_existing_supervisor() {
        let dir = outdir();
        let campaign = Campaign::new(dir.path(), BackendKind::CpuOnly, Sweep::default());
        assert!(!campaign.prepare().unwrap());
        assert_eq!(
            fs::read_to_string(dir.path().join(consts::SUPERVISOR_SCRIPT)).unwrap(),
            "#!/bin/sh\n"
        );
    }

    /// Reader failing after a few bytes, like a connection reset mid-body.
    struct BrokenStream(usize);

    impl Read for BrokenStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.0 == 0 {
                return Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset"));
            }
            let n = self.0.min(buf.len());
            buf[..n].fill(b'#');
            self.0 -= n;
            Ok(n)
        }
    }

    #[test]
    fn interrupted_download_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join(consts::SUPERVISOR_SCRIPT);
        assert!(install(BrokenStream(64), &dest).is_err());
        assert!(!dest.exists());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn unreachable_supervisor_url_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join(consts::SUPERVISOR_SCRIPT);
        assert!(fetch("http://127.0.0.1:9/shoreman.sh", &dest).is_err());
        assert!(!dest.exists());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn installs_complete_downloads() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join(consts::SUPERVISOR_SCRIPT);
        install(&b"#!/bin/sh\necho ok\n"[..], &dest).unwrap();
        assert_eq!(fs::read_to_string(&dest).unwrap(), "#!/bin/sh\necho ok\n");
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&dest).unwrap().permissions().mode();
            assert_eq!(mode & 0o111, 0o111);
        }
    }

    #[cfg(unix)]
    #[test]
    fn driver_is_executable() {
        use std::os::unix::fs::PermissionsExt;

        let dir = outdir();
        let campaign = Campaign::new(dir.path(), BackendKind::CpuOnly, Sweep::default());
        let driver = campaign.write().unwrap();
        let mode = fs::metadata(&driver).unwrap().permissions().mode();
        assert_eq!(mode & 0o111, 0o111);
        assert_eq!(
            campaign.command(),
            format!("cd {} && ./cpu-only-campaign.sh", dir.path().display())
        );
    }
}
