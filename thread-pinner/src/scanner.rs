//! The `ThreadScanner` discovers threads in the process table and applies the
//! first matching rule to each new one.
//!
//! A thread id is processed at most once per epoch: it is marked before its
//! rule is applied, whatever the outcome, so a failing target is not retried
//! every cycle. At each epoch boundary (the cache TTL) the identity caches are
//! dropped and processed ids that were not seen in the last cycle are
//! forgotten.
//!
//! Discovery cycles, rule updates and resets are serialized by one cycle
//! lock, so an update that arrives during a scan takes effect after it.

use {
    crate::{
        lock,
        matcher::PatternMatcher,
        policy::{apply_rule, reset_thread, ThreadControl},
        procfs::{Pid, ProcessTable},
        rule::{AffinityRule, ProcessInfo, RuleSet},
        worker_pool::{ScannerConfig, WorkerPool},
    },
    log::{debug, info, warn},
    rayon::prelude::*,
    std::{
        cell::OnceCell,
        collections::{HashMap, HashSet},
        ops::Deref,
        sync::{Arc, Mutex},
        time::Instant,
    },
    taskpin_cpu_utils::{format_cpu_list, CpuMask, ThreadId},
};

/// Outcome of one discovery cycle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ScanStats {
    pub processes: usize,
    pub new_threads: usize,
    pub applied: usize,
    pub failed: usize,
}

impl ScanStats {
    fn merge(self, other: Self) -> Self {
        Self {
            processes: self.processes.saturating_add(other.processes),
            new_threads: self.new_threads.saturating_add(other.new_threads),
            applied: self.applied.saturating_add(other.applied),
            failed: self.failed.saturating_add(other.failed),
        }
    }
}

/// Each piece has its own lock so identity lookups do not contend with the
/// processed-set bookkeeping.
struct ScanState {
    processed: Mutex<HashSet<ThreadId>>,
    seen: Mutex<HashSet<ThreadId>>,
    exe_paths: Mutex<HashMap<Pid, Option<String>>>,
    command_lines: Mutex<HashMap<Pid, Option<String>>>,
    epoch_start: Mutex<Instant>,
}

impl ScanState {
    fn new() -> Self {
        Self {
            processed: Mutex::default(),
            seen: Mutex::default(),
            exe_paths: Mutex::default(),
            command_lines: Mutex::default(),
            epoch_start: Mutex::new(Instant::now()),
        }
    }
}

/// Identity of one process for the duration of one pass. The executable path
/// and command line are only read if a rule asks for them.
struct ProcessView<'a> {
    pid: Pid,
    name: String,
    scanner: &'a ThreadScanner,
    exe_path: OnceCell<Option<String>>,
    command_line: OnceCell<Option<String>>,
}

impl<'a> ProcessView<'a> {
    fn new(scanner: &'a ThreadScanner, pid: Pid, name: String) -> Self {
        Self {
            pid,
            name,
            scanner,
            exe_path: OnceCell::new(),
            command_line: OnceCell::new(),
        }
    }
}

impl ProcessInfo for ProcessView<'_> {
    fn name(&self) -> &str {
        &self.name
    }

    fn exe_path(&self) -> Option<&str> {
        self.exe_path
            .get_or_init(|| {
                self.scanner
                    .cached(&self.scanner.state.exe_paths, self.pid, |table, pid| {
                        table.exe_path(pid)
                    })
            })
            .as_deref()
    }

    fn command_line(&self) -> Option<&str> {
        self.command_line
            .get_or_init(|| {
                self.scanner
                    .cached(&self.scanner.state.command_lines, self.pid, |table, pid| {
                        table.command_line(pid)
                    })
            })
            .as_deref()
    }
}

pub struct ThreadScanner {
    table: ProcessTable,
    control: Arc<dyn ThreadControl>,
    matcher: PatternMatcher,
    state: ScanState,
    pool: WorkerPool,
    cycle: Mutex<()>,
}

impl ThreadScanner {
    pub fn new(
        table: ProcessTable,
        control: Arc<dyn ThreadControl>,
        config: ScannerConfig,
    ) -> Result<Self, rayon::ThreadPoolBuildError> {
        Ok(Self {
            table,
            control,
            matcher: PatternMatcher::default(),
            state: ScanState::new(),
            pool: WorkerPool::new(config)?,
            cycle: Mutex::default(),
        })
    }

    pub fn config(&self) -> &ScannerConfig {
        &self.pool.config
    }

    /// One discovery cycle: apply the first matching rule to every thread
    /// not processed yet in this epoch.
    pub fn scan_once(&self, rules: &RuleSet) -> ScanStats {
        self.scan_with(|| rules)
    }

    /// Like [`Self::scan_once`], but `rules` is only called once the cycle
    /// lock is held, so the snapshot is never older than the last update
    /// handled by [`Self::reapply_changed`] or [`Self::reset_deleted`].
    pub fn scan_with<R>(&self, rules: impl FnOnce() -> R) -> ScanStats
    where
        R: Deref<Target = RuleSet>,
    {
        let _cycle = lock(&self.cycle);
        let snapshot = rules();
        let rules: &RuleSet = &snapshot;
        lock(&self.state.seen).clear();
        let Some(pids) = self.pids() else {
            return ScanStats::default();
        };

        let stats = self.pool.rayon_pool.install(|| {
            pids.par_iter()
                .map(|pid| self.discover_process(*pid, rules))
                .reduce(ScanStats::default, ScanStats::merge)
        });

        self.maybe_start_new_epoch();
        if stats.new_threads > 0 {
            debug!("Scan cycle: {stats:?}");
        }
        stats
    }

    fn discover_process(&self, pid: Pid, rules: &RuleSet) -> ScanStats {
        let Some(name) = self.table.process_name(pid) else {
            // Exited since the listing
            return ScanStats::default();
        };
        let tids = self.table.thread_ids(pid);
        lock(&self.state.seen).extend(tids.iter().copied());

        let new_tids: Vec<ThreadId> = {
            let mut processed = lock(&self.state.processed);
            tids.into_iter().filter(|tid| processed.insert(*tid)).collect()
        };
        let mut stats = ScanStats {
            processes: 1,
            new_threads: new_tids.len(),
            ..ScanStats::default()
        };
        if new_tids.is_empty() {
            return stats;
        }

        let process = ProcessView::new(self, pid, name);
        let Some(rule) = rules.first_match(&process, &self.matcher) else {
            return stats;
        };
        for tid in new_tids {
            if self.apply(&process, tid, rule) {
                stats.applied = stats.applied.saturating_add(1);
            } else {
                stats.failed = stats.failed.saturating_add(1);
            }
        }
        stats
    }

    fn apply(&self, process: &ProcessView, tid: ThreadId, rule: &AffinityRule) -> bool {
        match apply_rule(self.control.as_ref(), tid, rule) {
            Ok(()) => {
                info!(
                    "Pinned pid {} tid {tid} ({}) by {} rule {:?} to CPUs {}",
                    process.pid,
                    process.name,
                    rule.match_type(),
                    rule.pattern(),
                    format_cpu_list(rule.cpus())
                );
                true
            }
            Err(err) => {
                warn!(
                    "Failed to pin pid {} tid {tid} ({}) to CPUs {}: {err}",
                    process.pid,
                    process.name,
                    format_cpu_list(rule.cpus())
                );
                false
            }
        }
    }

    /// Re-apply the rules in `changed` to every live thread whose first match
    /// in `rules` is one of them, processed or not. Returns the number of
    /// successful applications.
    pub fn reapply_changed(&self, rules: &RuleSet, changed: &[AffinityRule]) -> usize {
        if changed.is_empty() {
            return 0;
        }
        let _cycle = lock(&self.cycle);
        self.for_each_process(|process, tids| {
            let Some(rule) = rules.first_match(process, &self.matcher) else {
                return 0;
            };
            if !changed.contains(rule) {
                return 0;
            }
            lock(&self.state.processed).extend(tids.iter().copied());
            tids.iter()
                .filter(|tid| self.apply(process, **tid, rule))
                .count()
        })
    }

    /// Reset every live thread whose first match in `old_rules` was one of
    /// `deleted` to the default policy, and forget it so that ordinary
    /// discovery applies whatever rule matches it now. Returns the number of
    /// threads reset.
    pub fn reset_deleted(
        &self,
        old_rules: &RuleSet,
        deleted: &[AffinityRule],
        all_cpus: &CpuMask,
    ) -> usize {
        if deleted.is_empty() {
            return 0;
        }
        let _cycle = lock(&self.cycle);
        self.for_each_process(|process, tids| {
            let Some(rule) = old_rules.first_match(process, &self.matcher) else {
                return 0;
            };
            if !deleted.contains(rule) {
                return 0;
            }
            {
                let mut processed = lock(&self.state.processed);
                for tid in tids {
                    processed.remove(tid);
                }
            }
            tids.iter()
                .filter(|tid| match reset_thread(self.control.as_ref(), **tid, all_cpus) {
                    Ok(()) => {
                        info!(
                            "Reset pid {} tid {tid} ({}), rule {:?} was removed",
                            process.pid,
                            process.name,
                            rule.pattern()
                        );
                        true
                    }
                    Err(err) => {
                        warn!(
                            "Failed to reset pid {} tid {tid} ({}): {err}",
                            process.pid, process.name
                        );
                        false
                    }
                })
                .count()
        })
    }

    /// Forget every processed thread and cached identity, so the next cycle
    /// applies rules to all threads again.
    pub fn reset_all(&self) {
        let _cycle = lock(&self.cycle);
        lock(&self.state.processed).clear();
        lock(&self.state.seen).clear();
        lock(&self.state.exe_paths).clear();
        lock(&self.state.command_lines).clear();
        *lock(&self.state.epoch_start) = Instant::now();
        info!("Cleared scan state, all threads will be re-applied");
    }

    pub fn processed_count(&self) -> usize {
        lock(&self.state.processed).len()
    }

    pub fn is_processed(&self, tid: ThreadId) -> bool {
        lock(&self.state.processed).contains(&tid)
    }

    /// Full pass over every live process, regardless of processed state.
    fn for_each_process<F>(&self, f: F) -> usize
    where
        F: Fn(&ProcessView, &[ThreadId]) -> usize + Sync,
    {
        let Some(pids) = self.pids() else {
            return 0;
        };
        self.pool.rayon_pool.install(|| {
            pids.par_iter()
                .map(|pid| {
                    let Some(name) = self.table.process_name(*pid) else {
                        return 0;
                    };
                    let tids = self.table.thread_ids(*pid);
                    if tids.is_empty() {
                        return 0;
                    }
                    f(&ProcessView::new(self, *pid, name), &tids)
                })
                .sum()
        })
    }

    fn pids(&self) -> Option<Vec<Pid>> {
        match self.table.pids() {
            Ok(pids) => Some(pids),
            Err(err) => {
                warn!(
                    "Cannot list processes in {}: {err}",
                    self.table.root().display()
                );
                None
            }
        }
    }

    fn cached(
        &self,
        cache: &Mutex<HashMap<Pid, Option<String>>>,
        pid: Pid,
        read: impl FnOnce(&ProcessTable, Pid) -> Option<String>,
    ) -> Option<String> {
        if let Some(value) = lock(cache).get(&pid) {
            return value.clone();
        }
        // Read outside the lock so slow procfs reads do not serialize workers
        let value = read(&self.table, pid);
        lock(cache).insert(pid, value.clone());
        value
    }

    fn maybe_start_new_epoch(&self) {
        let mut epoch_start = lock(&self.state.epoch_start);
        if epoch_start.elapsed() < self.pool.config.cache_ttl {
            return;
        }
        *epoch_start = Instant::now();
        drop(epoch_start);

        lock(&self.state.exe_paths).clear();
        lock(&self.state.command_lines).clear();
        let seen = lock(&self.state.seen);
        let mut processed = lock(&self.state.processed);
        let before = processed.len();
        processed.retain(|tid| seen.contains(tid));
        debug!(
            "New scan epoch: cleared identity caches, forgot {} exited threads",
            before.saturating_sub(processed.len())
        );
    }
}
