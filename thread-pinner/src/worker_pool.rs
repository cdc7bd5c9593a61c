use std::{thread, time::Duration};

/// Tunables of the scan loop and its worker pool.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScannerConfig {
    pub worker_threads: usize,
    pub stack_size_bytes: usize,
    /// How long processed thread ids and identity caches live
    pub cache_ttl: Duration,
    pub scan_interval: Duration,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            worker_threads: default_worker_threads(),
            stack_size_bytes: 2 * 1024 * 1024,
            cache_ttl: Duration::from_secs(600),
            scan_interval: Duration::from_millis(1000),
        }
    }
}

/// Half the available parallelism, at least one.
pub fn default_worker_threads() -> usize {
    thread::available_parallelism()
        .map(|parallelism| parallelism.get() / 2)
        .unwrap_or(1)
        .max(1)
}

/// Bounded pool the scanner fans per-process work out to.
#[derive(Debug)]
pub struct WorkerPool {
    pub rayon_pool: rayon::ThreadPool,
    pub config: ScannerConfig,
}

impl WorkerPool {
    pub fn new(config: ScannerConfig) -> Result<Self, rayon::ThreadPoolBuildError> {
        let rayon_pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.worker_threads.max(1))
            .stack_size(config.stack_size_bytes)
            .thread_name(|index| format!("tpScan{index:02}"))
            .build()?;
        Ok(Self { rayon_pool, config })
    }
}
