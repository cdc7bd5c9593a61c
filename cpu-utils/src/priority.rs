//! Per-thread I/O priority and scheduling niceness.

#[cfg(target_os = "linux")]
use std::io;
use {
    crate::{error::CpuAffinityError, ThreadId},
    std::fmt,
};

#[cfg(target_os = "linux")]
const IOPRIO_WHO_PROCESS: libc::c_int = 1;
const IOPRIO_CLASS_SHIFT: u32 = 13;

/// Lowest (most favourable) niceness accepted by the scheduler.
pub const MIN_NICE: i32 = -20;
/// Highest (least favourable) niceness accepted by the scheduler.
pub const MAX_NICE: i32 = 19;
/// Highest I/O priority data value within a class.
pub const MAX_IO_PRIORITY_DATA: u8 = 7;

/// Kernel I/O scheduling class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum IoPriorityClass {
    RealTime = 1,
    BestEffort = 2,
    Idle = 3,
}

impl IoPriorityClass {
    pub fn from_raw(class: u8) -> Option<Self> {
        match class {
            1 => Some(Self::RealTime),
            2 => Some(Self::BestEffort),
            3 => Some(Self::Idle),
            _ => None,
        }
    }

    /// Data value used when a class is configured without one.
    pub fn default_data(self) -> u8 {
        match self {
            Self::RealTime | Self::BestEffort => 4,
            Self::Idle => 0,
        }
    }
}

impl fmt::Display for IoPriorityClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::RealTime => "realtime",
            Self::BestEffort => "best-effort",
            Self::Idle => "idle",
        };
        f.write_str(name)
    }
}

/// I/O priority class plus the class-specific data level (0 = highest).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IoPriority {
    class: IoPriorityClass,
    data: u8,
}

impl IoPriority {
    /// The state a thread is reset to: best-effort at the default level.
    pub const DEFAULT: Self = Self {
        class: IoPriorityClass::BestEffort,
        data: 4,
    };

    pub fn new(class: u8, data: u8) -> Result<Self, CpuAffinityError> {
        match IoPriorityClass::from_raw(class) {
            Some(class) if data <= MAX_IO_PRIORITY_DATA => Ok(Self { class, data }),
            _ => Err(CpuAffinityError::InvalidIoPriority { class, data }),
        }
    }

    pub fn class(&self) -> IoPriorityClass {
        self.class
    }

    pub fn data(&self) -> u8 {
        self.data
    }

    /// Packs class and data into the single value `ioprio_set` expects.
    pub fn to_raw(self) -> i32 {
        ((self.class as i32) << IOPRIO_CLASS_SHIFT) | i32::from(self.data)
    }

    pub fn from_raw(raw: i32) -> Option<Self> {
        let class = u8::try_from(raw >> IOPRIO_CLASS_SHIFT).ok()?;
        let data = u8::try_from(raw & ((1 << IOPRIO_CLASS_SHIFT) - 1)).ok()?;
        Self::new(class, data).ok()
    }
}

impl fmt::Display for IoPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.class, self.data)
    }
}

/// Validates a niceness value.
pub fn check_nice(nice: i32) -> Result<i32, CpuAffinityError> {
    if (MIN_NICE..=MAX_NICE).contains(&nice) {
        Ok(nice)
    } else {
        Err(CpuAffinityError::InvalidNice(nice))
    }
}

/// Set the I/O priority of thread `tid`.
///
/// # Errors
///
/// Returns [`CpuAffinityError::Io`] if the system call fails.
/// Returns [`CpuAffinityError::NotSupported`] on non-Linux platforms.
#[cfg(target_os = "linux")]
pub fn set_io_priority(tid: ThreadId, priority: IoPriority) -> Result<(), CpuAffinityError> {
    // safety: ioprio_set only reads its integer arguments
    let result = unsafe {
        libc::syscall(
            libc::SYS_ioprio_set,
            IOPRIO_WHO_PROCESS,
            tid,
            priority.to_raw(),
        )
    };
    if result < 0 {
        return Err(CpuAffinityError::Io(io::Error::last_os_error()));
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub fn set_io_priority(_tid: ThreadId, _priority: IoPriority) -> Result<(), CpuAffinityError> {
    Err(CpuAffinityError::NotSupported)
}

/// Get the I/O priority of thread `tid`, `None` if the kernel reports a
/// class this crate does not model (e.g. "none").
#[cfg(target_os = "linux")]
pub fn io_priority(tid: ThreadId) -> Result<Option<IoPriority>, CpuAffinityError> {
    // safety: ioprio_get only reads its integer arguments
    let result = unsafe { libc::syscall(libc::SYS_ioprio_get, IOPRIO_WHO_PROCESS, tid) };
    if result < 0 {
        return Err(CpuAffinityError::Io(io::Error::last_os_error()));
    }
    Ok(IoPriority::from_raw(result as i32))
}

#[cfg(not(target_os = "linux"))]
pub fn io_priority(_tid: ThreadId) -> Result<Option<IoPriority>, CpuAffinityError> {
    Err(CpuAffinityError::NotSupported)
}

/// Set the scheduling niceness of thread `tid`.
///
/// On Linux `setpriority(PRIO_PROCESS, tid, ..)` targets a single thread.
///
/// # Errors
///
/// Returns [`CpuAffinityError::InvalidNice`] if `nice` is outside -20..=19.
/// Returns [`CpuAffinityError::Io`] if the system call fails.
/// Returns [`CpuAffinityError::NotSupported`] on non-Linux platforms.
#[cfg(target_os = "linux")]
pub fn set_nice(tid: ThreadId, nice: i32) -> Result<(), CpuAffinityError> {
    let nice = check_nice(nice)?;
    // safety: setpriority only reads its integer arguments
    let result = unsafe { libc::setpriority(libc::PRIO_PROCESS, tid as libc::id_t, nice) };
    if result != 0 {
        return Err(CpuAffinityError::Io(io::Error::last_os_error()));
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub fn set_nice(_tid: ThreadId, _nice: i32) -> Result<(), CpuAffinityError> {
    Err(CpuAffinityError::NotSupported)
}

/// Get the scheduling niceness of thread `tid`.
#[cfg(target_os = "linux")]
pub fn nice(tid: ThreadId) -> Result<i32, CpuAffinityError> {
    // getpriority can legitimately return -1, so errno has to be cleared first
    // safety: errno is thread-local and getpriority only reads its arguments
    let result = unsafe {
        *libc::__errno_location() = 0;
        libc::getpriority(libc::PRIO_PROCESS, tid as libc::id_t)
    };
    if result == -1 {
        let err = io::Error::last_os_error();
        if err.raw_os_error() != Some(0) {
            return Err(CpuAffinityError::Io(err));
        }
    }
    Ok(result)
}

#[cfg(not(target_os = "linux"))]
pub fn nice(_tid: ThreadId) -> Result<i32, CpuAffinityError> {
    Err(CpuAffinityError::NotSupported)
}

#[cfg(test)]
mod tests {
    use {super::*, assert_matches::assert_matches};

    #[test]
    fn test_io_priority_packing() {
        let prio = IoPriority::new(2, 4).unwrap();
        assert_eq!(prio.to_raw(), (2 << 13) | 4);
        assert_eq!(IoPriority::from_raw(prio.to_raw()), Some(prio));

        let idle = IoPriority::new(3, 0).unwrap();
        assert_eq!(idle.to_raw(), 3 << 13);
        assert_eq!(idle.class(), IoPriorityClass::Idle);

        assert_eq!(IoPriority::DEFAULT, IoPriority::new(2, 4).unwrap());
        assert_eq!(IoPriority::from_raw(0), None);
    }

    #[test]
    fn test_io_priority_validation() {
        assert_matches!(
            IoPriority::new(0, 0),
            Err(CpuAffinityError::InvalidIoPriority { class: 0, data: 0 })
        );
        assert_matches!(
            IoPriority::new(4, 0),
            Err(CpuAffinityError::InvalidIoPriority { .. })
        );
        assert_matches!(
            IoPriority::new(1, 8),
            Err(CpuAffinityError::InvalidIoPriority { .. })
        );
        assert!(IoPriority::new(1, 7).is_ok());
    }

    #[test]
    fn test_check_nice() {
        assert_eq!(check_nice(-20).unwrap(), -20);
        assert_eq!(check_nice(19).unwrap(), 19);
        assert_matches!(check_nice(20), Err(CpuAffinityError::InvalidNice(20)));
        assert_matches!(check_nice(-21), Err(CpuAffinityError::InvalidNice(-21)));
    }

    #[test]
    fn test_class_defaults() {
        assert_eq!(IoPriorityClass::BestEffort.default_data(), 4);
        assert_eq!(IoPriorityClass::Idle.default_data(), 0);
        assert_eq!(IoPriority::DEFAULT.to_string(), "best-effort/4");
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn test_nice_of_current_thread() {
        let tid = crate::current_thread_id();
        let current = nice(tid).expect("getpriority on self");
        assert!((MIN_NICE..=MAX_NICE).contains(&current));
        // Raising niceness never needs privileges
        if current < MAX_NICE {
            set_nice(tid, MAX_NICE).expect("raising niceness");
            assert_eq!(nice(tid).unwrap(), MAX_NICE);
        }
    }
}
