//! Applying a rule's scheduling policy to a thread.

use {
    crate::rule::AffinityRule,
    log::debug,
    taskpin_cpu_utils::{
        set_io_priority, set_nice, set_thread_affinity, CpuAffinityError, CpuMask, IoPriority,
        ThreadId,
    },
};

/// The three per-thread resource controls.
pub trait ThreadControl: Send + Sync {
    fn set_affinity(&self, tid: ThreadId, mask: &CpuMask) -> Result<(), CpuAffinityError>;
    fn set_io_priority(&self, tid: ThreadId, priority: IoPriority) -> Result<(), CpuAffinityError>;
    fn set_nice(&self, tid: ThreadId, nice: i32) -> Result<(), CpuAffinityError>;
}

/// Issues the real system calls.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemThreadControl;

impl ThreadControl for SystemThreadControl {
    fn set_affinity(&self, tid: ThreadId, mask: &CpuMask) -> Result<(), CpuAffinityError> {
        set_thread_affinity(tid, mask)
    }

    fn set_io_priority(&self, tid: ThreadId, priority: IoPriority) -> Result<(), CpuAffinityError> {
        set_io_priority(tid, priority)
    }

    fn set_nice(&self, tid: ThreadId, nice: i32) -> Result<(), CpuAffinityError> {
        set_nice(tid, nice)
    }
}

/// Niceness a reset thread returns to.
pub const DEFAULT_NICE: i32 = 0;

/// Installs `rule` on `tid`.
///
/// Only the affinity outcome is returned; I/O priority and niceness are
/// applied afterwards on a best-effort basis.
pub fn apply_rule(
    control: &dyn ThreadControl,
    tid: ThreadId,
    rule: &AffinityRule,
) -> Result<(), CpuAffinityError> {
    let result = control.set_affinity(tid, rule.mask());

    if let Some(priority) = rule.io_priority() {
        if let Err(err) = control.set_io_priority(tid, priority) {
            debug!("Failed to set I/O priority {priority} on thread {tid}: {err}");
        }
    }
    if let Some(nice) = rule.nice() {
        if let Err(err) = control.set_nice(tid, nice) {
            debug!("Failed to set nice {nice} on thread {tid}: {err}");
        }
    }

    result
}

/// Returns `tid` to the default policy: every online CPU, nice 0 and
/// best-effort I/O at the default level.
pub fn reset_thread(
    control: &dyn ThreadControl,
    tid: ThreadId,
    all_cpus: &CpuMask,
) -> Result<(), CpuAffinityError> {
    let result = control.set_affinity(tid, all_cpus);

    if let Err(err) = control.set_io_priority(tid, IoPriority::DEFAULT) {
        debug!("Failed to reset I/O priority on thread {tid}: {err}");
    }
    if let Err(err) = control.set_nice(tid, DEFAULT_NICE) {
        debug!("Failed to reset nice on thread {tid}: {err}");
    }

    result
}

#[cfg(any(test, feature = "dev-context-only-utils"))]
mod recording {
    use {
        super::*,
        crate::lock,
        std::{collections::HashSet, io, sync::Mutex},
    };

    /// A control request captured by [`RecordingThreadControl`].
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum ControlCall {
        Affinity(ThreadId, CpuMask),
        IoPriority(ThreadId, IoPriority),
        Nice(ThreadId, i32),
    }

    /// Records every request instead of issuing system calls. Threads listed
    /// in `failing` reject affinity changes with `EPERM`.
    #[derive(Debug, Default)]
    pub struct RecordingThreadControl {
        calls: Mutex<Vec<ControlCall>>,
        failing: Mutex<HashSet<ThreadId>>,
    }

    impl RecordingThreadControl {
        pub fn fail_affinity_for(&self, tid: ThreadId) {
            lock(&self.failing).insert(tid);
        }

        pub fn calls(&self) -> Vec<ControlCall> {
            lock(&self.calls).clone()
        }

        pub fn take_calls(&self) -> Vec<ControlCall> {
            std::mem::take(&mut *lock(&self.calls))
        }

        /// Affinity requests only, in call order.
        pub fn affinity_calls(&self) -> Vec<(ThreadId, CpuMask)> {
            lock(&self.calls)
                .iter()
                .filter_map(|call| match call {
                    ControlCall::Affinity(tid, mask) => Some((*tid, *mask)),
                    _ => None,
                })
                .collect()
        }
    }

    impl ThreadControl for RecordingThreadControl {
        fn set_affinity(&self, tid: ThreadId, mask: &CpuMask) -> Result<(), CpuAffinityError> {
            lock(&self.calls).push(ControlCall::Affinity(tid, *mask));
            if lock(&self.failing).contains(&tid) {
                return Err(CpuAffinityError::Io(io::Error::from_raw_os_error(1)));
            }
            Ok(())
        }

        fn set_io_priority(
            &self,
            tid: ThreadId,
            priority: IoPriority,
        ) -> Result<(), CpuAffinityError> {
            lock(&self.calls).push(ControlCall::IoPriority(tid, priority));
            Ok(())
        }

        fn set_nice(&self, tid: ThreadId, nice: i32) -> Result<(), CpuAffinityError> {
            lock(&self.calls).push(ControlCall::Nice(tid, nice));
            Ok(())
        }
    }
}

#[cfg(any(test, feature = "dev-context-only-utils"))]
pub use recording::{ControlCall, RecordingThreadControl};

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::rule::{MatchType, RuleConfig},
        assert_matches::assert_matches,
        std::collections::BTreeMap,
        taskpin_cpu_utils::Topology,
    };

    fn rule(nice: Option<i32>, io_class: Option<u8>) -> AffinityRule {
        let mut config = RuleConfig::new(MatchType::ProcessName, "x", "0-1".into());
        config.nice = nice;
        config.io_priority_class = io_class;
        AffinityRule::initialize(&config, &Topology::from_siblings(&BTreeMap::new(), &BTreeMap::new()))
            .unwrap()
    }

    #[test]
    fn test_apply_affinity_only() {
        let control = RecordingThreadControl::default();
        apply_rule(&control, 7, &rule(None, None)).unwrap();
        assert_eq!(
            control.calls(),
            vec![ControlCall::Affinity(7, CpuMask::from_cpus([0, 1]))]
        );
    }

    #[test]
    fn test_apply_all_controls() {
        let control = RecordingThreadControl::default();
        apply_rule(&control, 7, &rule(Some(5), Some(3))).unwrap();
        assert_eq!(
            control.calls(),
            vec![
                ControlCall::Affinity(7, CpuMask::from_cpus([0, 1])),
                ControlCall::IoPriority(7, IoPriority::new(3, 0).unwrap()),
                ControlCall::Nice(7, 5),
            ]
        );
    }

    #[test]
    fn test_affinity_failure_still_applies_priorities() {
        let control = RecordingThreadControl::default();
        control.fail_affinity_for(7);
        let err = apply_rule(&control, 7, &rule(Some(5), None)).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(1));
        assert_matches!(control.calls().last(), Some(ControlCall::Nice(7, 5)));
    }

    #[test]
    fn test_reset_thread() {
        let control = RecordingThreadControl::default();
        let all = CpuMask::from_cpus(0..8);
        reset_thread(&control, 9, &all).unwrap();
        assert_eq!(
            control.take_calls(),
            vec![
                ControlCall::Affinity(9, all),
                ControlCall::IoPriority(9, IoPriority::DEFAULT),
                ControlCall::Nice(9, DEFAULT_NICE),
            ]
        );
        assert!(control.calls().is_empty());
    }
}
