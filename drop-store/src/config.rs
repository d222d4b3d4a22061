use std::path::PathBuf;
use std::time::Duration;

/// Prefix shared by every staging file and staging directory in the content directory
pub const STAGING_PREFIX: &str = "droptemp";

/// Configuration for the drop store
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Directory holding one sub-directory per published object
    pub content_dir: PathBuf,

    /// Ceiling for a single upload, single-shot or chunked
    pub max_bytes_per_file: u64,

    /// Ceiling for the whole content directory, enforced by eviction
    pub max_bytes_total: u64,

    /// Lifetime granted to a 1 GB object; smaller objects live proportionally longer
    pub minutes_per_gigabyte: f64,

    /// How often the age-based sweep runs
    pub sweep_interval: Duration,

    /// Safety valve for the capacity enforcer
    pub trim_max_iterations: usize,

    /// How long a chunk request waits for its session to be finalized
    pub max_wait: Duration,

    /// Length of derived object identifiers
    pub id_length: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            content_dir: PathBuf::from("data"),
            max_bytes_per_file: 100_000_000,    // 100 MB
            max_bytes_total: 10_000_000_000,    // 10 GB
            minutes_per_gigabyte: 30.0,
            sweep_interval: Duration::from_secs(30 * 60),
            trim_max_iterations: 30,
            max_wait: Duration::from_secs(60 * 60),
            id_length: 6,
        }
    }
}

impl StoreConfig {
    /// Create a new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the content directory
    pub fn with_content_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.content_dir = dir.into();
        self
    }

    /// Set the per-file ceiling
    pub fn with_max_bytes_per_file(mut self, bytes: u64) -> Self {
        self.max_bytes_per_file = bytes;
        self
    }

    /// Set the total ceiling
    pub fn with_max_bytes_total(mut self, bytes: u64) -> Self {
        self.max_bytes_total = bytes;
        self
    }

    /// Set the retention scale
    pub fn with_minutes_per_gigabyte(mut self, minutes: f64) -> Self {
        self.minutes_per_gigabyte = minutes;
        self
    }

    /// Set the sweep interval
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Set the capacity enforcer iteration cap
    pub fn with_trim_max_iterations(mut self, iterations: usize) -> Self {
        self.trim_max_iterations = iterations;
        self
    }

    /// Set the bounded wait for chunked uploads
    pub fn with_max_wait(mut self, wait: Duration) -> Self {
        self.max_wait = wait;
        self
    }

    /// Set the identifier length
    pub fn with_id_length(mut self, length: usize) -> Self {
        self.id_length = length;
        self
    }
}
