//! Per-thread CPU affinity operations and CPU list parsing.

#[cfg(target_os = "linux")]
use std::io;
use {
    crate::{
        error::CpuAffinityError,
        mask::{CpuMask, CpuSet, CPU_SETSIZE},
        ThreadId,
    },
    std::fmt::Write,
};

/// Set the CPU affinity of thread `tid`.
///
/// `tid` is a kernel thread id (as listed under `/proc/<pid>/task`); `0`
/// means the calling thread.
///
/// # Errors
///
/// Returns [`CpuAffinityError::EmptyCpuList`] if the mask has no CPUs.
/// Returns [`CpuAffinityError::Io`] if the system call fails (e.g. the thread
/// exited, or permission denied). The raw OS error code is preserved.
/// Returns [`CpuAffinityError::NotSupported`] on non-Linux platforms.
#[cfg(target_os = "linux")]
pub fn set_thread_affinity(tid: ThreadId, mask: &CpuMask) -> Result<(), CpuAffinityError> {
    if mask.is_empty() {
        return Err(CpuAffinityError::EmptyCpuList);
    }

    // safety: cpu_set_t is a POD type, zero-initialization is standard
    let mut cpu_set: libc::cpu_set_t = unsafe { std::mem::zeroed() };
    for cpu in mask.cpus() {
        // safety: CpuMask only holds ids below CPU_SETSIZE
        unsafe {
            libc::CPU_SET(cpu, &mut cpu_set);
        }
    }

    // safety: sched_setaffinity is safe with valid parameters
    let result = unsafe {
        libc::sched_setaffinity(tid, std::mem::size_of::<libc::cpu_set_t>(), &cpu_set)
    };

    if result != 0 {
        return Err(CpuAffinityError::Io(io::Error::last_os_error()));
    }

    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub fn set_thread_affinity(_tid: ThreadId, _mask: &CpuMask) -> Result<(), CpuAffinityError> {
    Err(CpuAffinityError::NotSupported)
}

/// Get the CPU affinity mask of thread `tid` (`0` for the calling thread).
///
/// # Errors
///
/// Returns [`CpuAffinityError::Io`] if the system call fails.
/// Returns [`CpuAffinityError::NotSupported`] on non-Linux platforms.
#[cfg(target_os = "linux")]
pub fn thread_affinity(tid: ThreadId) -> Result<CpuMask, CpuAffinityError> {
    // safety: cpu_set_t is a POD type, zero-initialization is standard
    let mut cpu_set: libc::cpu_set_t = unsafe { std::mem::zeroed() };

    // safety: sched_getaffinity is safe with valid parameters
    let result = unsafe {
        libc::sched_getaffinity(tid, std::mem::size_of::<libc::cpu_set_t>(), &mut cpu_set)
    };

    if result != 0 {
        return Err(CpuAffinityError::Io(io::Error::last_os_error()));
    }

    // safety: CPU_ISSET is safe with valid cpu_set_t and cpu < CPU_SETSIZE
    Ok((0..CPU_SETSIZE)
        .filter(|cpu| unsafe { libc::CPU_ISSET(*cpu, &cpu_set) })
        .collect())
}

#[cfg(not(target_os = "linux"))]
pub fn thread_affinity(_tid: ThreadId) -> Result<CpuMask, CpuAffinityError> {
    Err(CpuAffinityError::NotSupported)
}

/// Kernel thread id of the calling thread.
#[cfg(target_os = "linux")]
pub fn current_thread_id() -> ThreadId {
    // safety: gettid takes no arguments and cannot fail
    unsafe { libc::syscall(libc::SYS_gettid) as ThreadId }
}

#[cfg(not(target_os = "linux"))]
pub fn current_thread_id() -> ThreadId {
    0
}

/// Returns true if `s` consists solely of digits, commas, hyphens and spaces.
///
/// Such strings are always literal CPU lists (`"4-7"` is a range, never the
/// keyword expression "4 minus 7").
pub fn looks_like_cpu_list(s: &str) -> bool {
    s.chars()
        .all(|c| c.is_ascii_digit() || c == ',' || c == '-' || c == ' ')
}

/// Parse a CPU range list string (e.g., "0-3,5,7-9") into a set of CPU IDs.
///
/// Ids `>= CPU_SETSIZE` are silently dropped, so the size of the result is
/// bounded whatever the ranges span.
pub fn parse_cpu_list(s: &str) -> Result<CpuSet, CpuAffinityError> {
    let mut cpus = CpuSet::new();

    for part in s.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }

        if let Some((start_str, end_str)) = part.split_once('-') {
            let invalid = || CpuAffinityError::ParseError(format!("Invalid CPU range: {part}"));
            let start = start_str.trim().parse::<usize>().map_err(|_| invalid())?;
            let end = end_str.trim().parse::<usize>().map_err(|_| invalid())?;
            if start > end {
                return Err(invalid());
            }

            if start < CPU_SETSIZE {
                cpus.extend(start..=end.min(CPU_SETSIZE - 1));
            }
        } else {
            let cpu = part
                .parse::<usize>()
                .map_err(|_| CpuAffinityError::ParseError(format!("Invalid CPU ID: {part}")))?;
            if cpu < CPU_SETSIZE {
                cpus.insert(cpu);
            }
        }
    }

    Ok(cpus)
}

/// Formats CPU ids compactly, e.g. `{0, 1, 2, 3, 8, 9, 10}` -> `"0-3,8-10"`.
pub fn format_cpu_list<'a>(cpus: impl IntoIterator<Item = &'a usize>) -> String {
    let mut sorted: Vec<usize> = cpus.into_iter().copied().collect();
    sorted.sort_unstable();
    sorted.dedup();

    let mut out = String::new();
    let mut iter = sorted.into_iter().peekable();
    while let Some(start) = iter.next() {
        let mut end = start;
        while iter.peek() == Some(&end.saturating_add(1)) {
            end = end.saturating_add(1);
            iter.next();
        }
        if !out.is_empty() {
            out.push(',');
        }
        if start == end {
            let _ = write!(out, "{start}");
        } else {
            let _ = write!(out, "{start}-{end}");
        }
    }
    out
}
