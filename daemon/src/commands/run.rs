use {
    anyhow::{anyhow, bail, Context},
    clap::Args,
    crossbeam_channel::unbounded,
    log::{debug, info, warn},
    signal_hook::consts::{SIGINT, SIGTERM, SIGUSR1},
    std::{
        path::Path,
        sync::{
            atomic::{AtomicBool, Ordering},
            Arc,
        },
        thread::{self, sleep},
        time::{Duration, Instant},
    },
    taskpin_cpu_utils::Topology,
    taskpin_thread_pinner::{
        config,
        watcher::{DEBOUNCE_WINDOW, POLL_INTERVAL},
        worker_pool::default_worker_threads,
        ConfigStore, ConfigWatcher, Debouncer, ProcessTable, ReloadService, ScannerConfig,
        SystemThreadControl, ThreadScanner,
    },
};

// Granularity at which the idle wait between cycles notices signals
const SIGNAL_CHECK_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Default, Args)]
pub struct RunArgs {
    /// Milliseconds between scan cycles [default: 1000]
    #[arg(long, value_name = "MS")]
    scan_interval_ms: Option<u64>,

    /// Seconds after which exited threads are forgotten and identity caches dropped [default: 600]
    #[arg(long, value_name = "SECS")]
    cache_ttl_secs: Option<u64>,

    /// Quiet period after the last rule file change before it is reloaded [default: 500]
    #[arg(long, value_name = "MS")]
    debounce_ms: Option<u64>,

    /// Scanner worker threads [default: half the available CPUs]
    #[arg(long, value_name = "N")]
    workers: Option<usize>,
}

impl RunArgs {
    pub fn scanner_config(&self) -> ScannerConfig {
        let defaults = ScannerConfig::default();
        ScannerConfig {
            worker_threads: self.workers.unwrap_or_else(default_worker_threads),
            cache_ttl: self
                .cache_ttl_secs
                .map_or(defaults.cache_ttl, Duration::from_secs),
            scan_interval: self
                .scan_interval_ms
                .map_or(defaults.scan_interval, Duration::from_millis),
            ..defaults
        }
    }

    fn debounce_window(&self) -> Duration {
        self.debounce_ms.map_or(DEBOUNCE_WINDOW, Duration::from_millis)
    }
}

pub fn run(config_path: &Path, args: &RunArgs) -> anyhow::Result<()> {
    let topology = Topology::detect();
    info!("{topology}");

    if !config_path.exists() {
        config::write_template(config_path)?;
        bail!(
            "No rule file found, wrote a template to {}. Add rules and start again",
            config_path.display()
        );
    }
    let store = Arc::new(
        ConfigStore::open(config_path, Arc::new(topology))
            .with_context(|| format!("Cannot load rules from {}", config_path.display()))?,
    );

    let exit = Arc::new(AtomicBool::new(false));
    let reapply = Arc::new(AtomicBool::new(false));
    for signal in [SIGINT, SIGTERM] {
        signal_hook::flag::register(signal, exit.clone())?;
    }
    signal_hook::flag::register(SIGUSR1, reapply.clone())?;

    let scanner_config = args.scanner_config();
    info!("Scanner configuration: {scanner_config:?}");
    let scanner = Arc::new(ThreadScanner::new(
        ProcessTable::system(),
        Arc::new(SystemThreadControl),
        scanner_config.clone(),
    )?);

    let reload_service = ReloadService::new(store.subscribe(), scanner.clone(), exit.clone())?;
    let (change_sender, change_receiver) = unbounded();
    let watcher = ConfigWatcher::new(
        config_path.to_path_buf(),
        POLL_INTERVAL,
        change_sender,
        exit.clone(),
    )?;
    let debouncer = {
        let store = store.clone();
        Debouncer::new(
            change_receiver,
            args.debounce_window(),
            exit.clone(),
            move || {
                if let Err(err) = store.reload() {
                    warn!(
                        "Keeping the current rules, reloading {} failed: {err}",
                        store.path().display()
                    );
                }
            },
        )?
    };

    info!("Started, applying rules every {:?}", scanner_config.scan_interval);
    while !exit.load(Ordering::Relaxed) {
        if reapply.swap(false, Ordering::Relaxed) {
            info!("Re-applying all rules on request");
            if let Err(err) = store.refresh_topology(Topology::detect()) {
                warn!("Keeping the current rules, re-resolving them failed: {err}");
            }
            scanner.reset_all();
        }

        let started = Instant::now();
        let stats = scanner.scan_with(|| store.rules());
        debug!("Scan cycle took {:?}: {stats:?}", started.elapsed());

        wait_for_next_cycle(scanner_config.scan_interval, &exit, &reapply);
    }

    info!("Shutting down");
    join("ConfigWatcher", watcher.join())?;
    join("Debouncer", debouncer.join())?;
    join("ReloadService", reload_service.join())?;
    Ok(())
}

/// Sleep for `interval`, returning early once either flag is raised.
fn wait_for_next_cycle(interval: Duration, exit: &AtomicBool, reapply: &AtomicBool) {
    let started = Instant::now();
    while started.elapsed() < interval {
        if exit.load(Ordering::Relaxed) || reapply.load(Ordering::Relaxed) {
            return;
        }
        sleep(
            interval
                .saturating_sub(started.elapsed())
                .min(SIGNAL_CHECK_INTERVAL),
        );
    }
}

fn join(name: &str, result: thread::Result<()>) -> anyhow::Result<()> {
    result.map_err(|_| anyhow!("{name} thread panicked"))
}
