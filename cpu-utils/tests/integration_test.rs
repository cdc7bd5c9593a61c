//! Integration tests for taskpin-cpu-utils
//!
//! These tests require a Linux system and will be skipped on other platforms.
//! They test actual system interactions on threads spawned by the test.

#[cfg(target_os = "linux")]
use std::{
    sync::{mpsc, Arc, Barrier},
    thread,
};
use taskpin_cpu_utils::*;

#[cfg(target_os = "linux")]
fn is_permission_denied(err: &CpuAffinityError) -> bool {
    // EPERM = 1, EACCES = 13
    matches!(err.raw_os_error(), Some(1) | Some(13))
}

#[cfg(target_os = "linux")]
/// Runs `f` with the kernel tid of a freshly spawned helper thread that stays
/// alive until `f` returns.
fn with_helper_thread<F: FnOnce(ThreadId)>(f: F) {
    let barrier = Arc::new(Barrier::new(2));
    let (tid_sender, tid_receiver) = mpsc::channel();
    let helper = {
        let barrier = barrier.clone();
        thread::Builder::new()
            .name("tpHelper".to_string())
            .spawn(move || {
                tid_sender.send(current_thread_id()).unwrap();
                barrier.wait();
            })
            .unwrap()
    };
    let tid = tid_receiver.recv().unwrap();
    f(tid);
    barrier.wait();
    helper.join().unwrap();
}

#[test]
#[cfg(target_os = "linux")]
fn test_set_and_get_thread_affinity() {
    let original = thread_affinity(0).expect("Failed to get original affinity");
    let Some(first_cpu) = original.cpus().next() else {
        panic!("calling thread has no allowed CPU");
    };

    with_helper_thread(|tid| {
        let mask = CpuMask::from_cpus([first_cpu]);
        match set_thread_affinity(tid, &mask) {
            Ok(()) => {
                let applied = thread_affinity(tid).expect("Failed to get new affinity");
                assert_eq!(applied, mask, "Helper should be pinned to one CPU");
            }
            Err(e) if is_permission_denied(&e) => {
                eprintln!("Skipping affinity test: insufficient permissions");
            }
            Err(e) => panic!("Unexpected error: {e:?}"),
        }
    });

    // Pinning another thread never changes the caller
    assert_eq!(thread_affinity(0).unwrap(), original);
}

#[test]
#[cfg(target_os = "linux")]
fn test_set_affinity_of_vanished_thread() {
    let (tid_sender, tid_receiver) = mpsc::channel();
    thread::spawn(move || tid_sender.send(current_thread_id()).unwrap())
        .join()
        .unwrap();
    let tid = tid_receiver.recv().unwrap();

    // The tid may in theory be reused, so only the error shape is checked
    if let Err(err) = set_thread_affinity(tid, &CpuMask::from_cpus([0])) {
        assert!(err.raw_os_error().is_some(), "{err:?}");
    }
}

#[test]
#[cfg(target_os = "linux")]
fn test_io_priority_and_nice_of_helper_thread() {
    with_helper_thread(|tid| {
        let idle = IoPriority::new(3, 0).unwrap();
        match set_io_priority(tid, idle) {
            Ok(()) => assert_eq!(io_priority(tid).unwrap(), Some(idle)),
            Err(e) if is_permission_denied(&e) => {
                eprintln!("Skipping ioprio test: insufficient permissions");
            }
            Err(e) => panic!("Unexpected error: {e:?}"),
        }

        let before = nice(tid).expect("getpriority on helper");
        if before < MAX_NICE {
            set_nice(tid, MAX_NICE).expect("raising niceness needs no privileges");
            assert_eq!(nice(tid).unwrap(), MAX_NICE);
        }
    });
}

#[test]
#[cfg(target_os = "linux")]
fn test_detected_topology_is_consistent() {
    let topology = Topology::detect();
    if topology.all_cpus().is_empty() {
        eprintln!("Skipping topology test: sysfs not available");
        return;
    }

    let union: CpuSet = topology
        .physical_cores()
        .union(topology.logical_threads())
        .copied()
        .collect();
    assert_eq!(&union, topology.all_cpus());
    assert!(topology
        .physical_cores()
        .is_disjoint(topology.logical_threads()));
    assert_eq!(topology.resolve_keyword("all"), Some(topology.all_cpus()));
    assert_eq!(
        topology.resolve_keyword("P").is_some(),
        topology.is_hybrid(),
        "P-core keywords exist only on hybrid CPUs"
    );

    // Every online CPU should be usable in a mask
    let mask = CpuMask::from(topology.all_cpus());
    assert_eq!(
        mask.count(),
        topology
            .all_cpus()
            .iter()
            .filter(|cpu| **cpu < CPU_SETSIZE)
            .count()
    );
}

#[test]
#[cfg(not(target_os = "linux"))]
fn test_non_linux_returns_not_supported() {
    assert!(matches!(
        set_thread_affinity(0, &CpuMask::from_cpus([0])),
        Err(CpuAffinityError::NotSupported)
    ));
    assert!(matches!(
        set_nice(0, 0),
        Err(CpuAffinityError::NotSupported)
    ));
}
