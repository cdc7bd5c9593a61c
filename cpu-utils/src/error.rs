//! Error types for CPU topology and thread scheduling operations.

use {std::io, thiserror::Error};

/// Errors that can occur while building CPU sets or issuing per-thread
/// scheduling requests.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum CpuAffinityError {
    /// I/O or system call error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Operation not supported on this platform
    #[error("CPU affinity operations are not supported on this platform")]
    NotSupported,

    /// CPU list is empty
    #[error("CPU list cannot be empty")]
    EmptyCpuList,

    /// Failed to parse CPU range or ID
    #[error("Failed to parse CPU specification: {0}")]
    ParseError(String),

    /// I/O priority class or data outside the kernel's accepted range
    #[error("Invalid I/O priority: class {class}, data {data}")]
    InvalidIoPriority { class: u8, data: u8 },

    /// Niceness outside -20..=19
    #[error("Nice value {0} is out of range (-20..=19)")]
    InvalidNice(i32),
}

impl CpuAffinityError {
    /// Raw OS error code, when the error came from a failed system call.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Self::Io(err) => err.raw_os_error(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CpuAffinityError::EmptyCpuList;
        assert_eq!(err.to_string(), "CPU list cannot be empty");

        let err = CpuAffinityError::NotSupported;
        assert_eq!(
            err.to_string(),
            "CPU affinity operations are not supported on this platform"
        );

        let err = CpuAffinityError::ParseError("bad input".to_string());
        assert_eq!(
            err.to_string(),
            "Failed to parse CPU specification: bad input"
        );

        let err = CpuAffinityError::InvalidIoPriority { class: 4, data: 0 };
        assert_eq!(err.to_string(), "Invalid I/O priority: class 4, data 0");

        let err = CpuAffinityError::InvalidNice(25);
        assert_eq!(err.to_string(), "Nice value 25 is out of range (-20..=19)");
    }

    #[test]
    fn test_from_io_error() {
        let io_err = io::Error::from_raw_os_error(1);
        let cpu_err: CpuAffinityError = io_err.into();
        assert_eq!(cpu_err.raw_os_error(), Some(1));
        match cpu_err {
            CpuAffinityError::Io(err) => {
                assert_eq!(err.kind(), io::ErrorKind::PermissionDenied);
            }
            _ => panic!("Expected Io error"),
        }
        assert_eq!(CpuAffinityError::EmptyCpuList.raw_os_error(), None);
    }
}
