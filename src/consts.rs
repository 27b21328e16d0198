//! Crate-level constants.

/// Default array shape of the benchmark commands.
pub const DEFAULT_SHAPE: &str = "1000,1000";

/// Default number of iterations of the timing loop.
pub const DEFAULT_COUNT: u32 = 100;

/// Default seed for the random number generator (RNG).
pub const DEFAULT_SEED: u64 = 0;

/// Default `tracing` filter when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "ffs=warn";

/// Name of the benchmark executable, as written in the generated procfiles.
pub const BIN_NAME: &str = "ffs";

/// Campaign replication factors (number of identical concurrent jobs).
pub const CAMPAIGN_MULTIS: [usize; 4] = [1, 2, 3, 10];

/// Campaign `(shape, count)` pairs. Smaller arrays get proportionally more iterations.
pub const CAMPAIGN_SHAPE_COUNTS: [(&str, u32); 3] = [
    ("100,100", 10000),
    ("1000,1000", 1000),
    ("10000,1000", 100),
];

/// File name of the process supervisor script in the campaign directory.
pub const SUPERVISOR_SCRIPT: &str = "shoreman.sh";

/// Location the supervisor script is fetched from when missing.
pub const SUPERVISOR_URL: &str =
    "https://raw.githubusercontent.com/chrismytton/shoreman/master/shoreman.sh";

/// Suffix of the job-runner files.
pub const PROCFILE_SUFFIX: &str = ".procfile";

/// Suffix of the device monitoring log of a campaign job.
pub const DEVICE_LOG_SUFFIX: &str = "-gpu.log";

/// Suffix of the host monitoring log of a campaign job.
pub const HOST_LOG_SUFFIX: &str = "-cpu.log";

/// Suffix of the supervisor output log of a campaign job.
pub const JOB_LOG_SUFFIX: &str = "-job.log";

/// Work-group size of the OpenCL kernels.
#[cfg(feature = "opencl")]
pub const BLOCK_SIZE_1D: usize = 256;
