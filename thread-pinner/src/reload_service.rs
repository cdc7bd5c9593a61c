//! Applies rule set updates published by the `ConfigStore` to live threads.

use {
    crate::{diff::RuleDiff, scanner::ThreadScanner, store::RuleSetUpdate},
    crossbeam_channel::{Receiver, RecvTimeoutError},
    log::{debug, info},
    std::{
        io,
        sync::{
            atomic::{AtomicBool, Ordering},
            Arc,
        },
        thread::{self, Builder, JoinHandle},
        time::Duration,
    },
    taskpin_cpu_utils::CpuMask,
};

const RECV_TIMEOUT: Duration = Duration::from_millis(100);

/// Threads touched by one update.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReloadOutcome {
    pub reset: usize,
    pub reapplied: usize,
}

pub struct ReloadService {
    thread_hdl: JoinHandle<()>,
}

impl ReloadService {
    pub fn new(
        updates: Receiver<RuleSetUpdate>,
        scanner: Arc<ThreadScanner>,
        exit: Arc<AtomicBool>,
    ) -> io::Result<Self> {
        let thread_hdl = Builder::new()
            .name("tpReload".to_string())
            .spawn(move || {
                while !exit.load(Ordering::Relaxed) {
                    match updates.recv_timeout(RECV_TIMEOUT) {
                        Ok(update) => {
                            Self::handle_update(&scanner, &update);
                        }
                        Err(RecvTimeoutError::Timeout) => {}
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                debug!("ReloadService has stopped");
            })?;
        Ok(Self { thread_hdl })
    }

    /// Reset the threads of deleted rules first, then re-apply changed rules,
    /// so a thread moving from a deleted rule to a changed one ends up with
    /// the changed rule.
    pub fn handle_update(scanner: &ThreadScanner, update: &RuleSetUpdate) -> ReloadOutcome {
        let diff = RuleDiff::compute(&update.old, &update.new);
        if diff.is_empty() {
            debug!("Rule set update without effective changes");
            return ReloadOutcome::default();
        }
        info!(
            "Applying rule update: {} changed, {} deleted",
            diff.changed.len(),
            diff.deleted.len()
        );

        let all_cpus = CpuMask::from(update.topology.all_cpus());
        let outcome = ReloadOutcome {
            reset: scanner.reset_deleted(&update.old, &diff.deleted, &all_cpus),
            reapplied: scanner.reapply_changed(&update.new, &diff.changed),
        };
        info!(
            "Rule update done: {} threads reset, {} threads re-applied",
            outcome.reset, outcome.reapplied
        );
        outcome
    }

    pub fn join(self) -> thread::Result<()> {
        self.thread_hdl.join()
    }
}
