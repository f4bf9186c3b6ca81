use std::time::Duration;

// Probing
pub const DEFAULT_BATCH_SIZE: usize = 1000;
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_BATCH_CONCURRENCY: usize = 1;

// Archive requests
pub const DEFAULT_SAMPLING_PERIOD: f64 = 1.0;
pub const DEFAULT_IGNORE_OLDER_DAYS: u64 = 30;
pub const DEFAULT_FILE_PATTERN: &str = "*/archive/*.archive";

// Registry
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_HTTP_RETRIES: usize = 3;
pub const RETRY_BACKOFF: Duration = Duration::from_millis(500);
pub const BPL_SUFFIX: &str = "bpl";
pub const EXAMPLE_BPL_URL: &str = "http://arch.slac.stanford.edu/mgmt/bpl";
