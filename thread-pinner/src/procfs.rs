//! Reading process identity and thread lists from `/proc`.
//!
//! Processes and threads may exit at any point between listing and reading.
//! Every per-process read therefore treats a missing file as "gone" and
//! returns nothing instead of an error.

use {
    log::debug,
    std::{
        fs,
        io::{self, ErrorKind},
        path::{Path, PathBuf},
    },
    taskpin_cpu_utils::ThreadId,
};

pub const PROC_ROOT: &str = "/proc";
/// Longer command lines are cut and suffixed with `...`.
pub const MAX_COMMAND_LINE_CHARS: usize = 200;

pub type Pid = i32;

#[derive(Debug, Clone)]
pub struct ProcessTable {
    root: PathBuf,
}

impl ProcessTable {
    pub fn system() -> Self {
        Self::new(PROC_ROOT)
    }

    /// A process table rooted somewhere other than `/proc`, e.g. a fake tree.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// All pids currently listed, ascending.
    pub fn pids(&self) -> io::Result<Vec<Pid>> {
        let mut pids: Vec<Pid> = fs::read_dir(&self.root)?
            .filter_map(Result::ok)
            .filter_map(|entry| entry.file_name().to_str()?.parse::<Pid>().ok())
            .filter(|pid| *pid > 0)
            .collect();
        pids.sort_unstable();
        Ok(pids)
    }

    /// The `Name:` field of `/proc/<pid>/status`.
    pub fn process_name(&self, pid: Pid) -> Option<String> {
        let status = read_transient(&self.root.join(pid.to_string()).join("status"))?;
        status
            .lines()
            .find_map(|line| line.strip_prefix("Name:"))
            .map(|name| name.trim().to_string())
    }

    /// Target of `/proc/<pid>/exe`. Unavailable for kernel threads and for
    /// processes of other users without privileges.
    pub fn exe_path(&self, pid: Pid) -> Option<String> {
        let link = self.root.join(pid.to_string()).join("exe");
        match fs::read_link(&link) {
            Ok(target) => Some(target.to_string_lossy().into_owned()),
            Err(err) => {
                if err.kind() != ErrorKind::NotFound {
                    debug!("Cannot resolve {}: {err}", link.display());
                }
                None
            }
        }
    }

    /// `/proc/<pid>/cmdline` with NUL separators turned into spaces, trimmed
    /// and truncated to [`MAX_COMMAND_LINE_CHARS`]. `None` when empty.
    pub fn command_line(&self, pid: Pid) -> Option<String> {
        let path = self.root.join(pid.to_string()).join("cmdline");
        let raw = match fs::read(&path) {
            Ok(raw) => raw,
            Err(err) => {
                log_unexpected(&path, &err);
                return None;
            }
        };
        let joined: Vec<u8> = raw
            .into_iter()
            .map(|byte| if byte == 0 { b' ' } else { byte })
            .collect();
        let command_line = String::from_utf8_lossy(&joined);
        let command_line = command_line.trim();
        if command_line.is_empty() {
            return None;
        }
        Some(truncate_command_line(command_line))
    }

    /// Thread ids listed under `/proc/<pid>/task`, ascending.
    pub fn thread_ids(&self, pid: Pid) -> Vec<ThreadId> {
        let task_dir = self.root.join(pid.to_string()).join("task");
        let entries = match fs::read_dir(&task_dir) {
            Ok(entries) => entries,
            Err(err) => {
                log_unexpected(&task_dir, &err);
                return Vec::new();
            }
        };
        let mut tids: Vec<ThreadId> = entries
            .filter_map(Result::ok)
            .filter_map(|entry| entry.file_name().to_str()?.parse::<ThreadId>().ok())
            .collect();
        tids.sort_unstable();
        tids
    }
}

fn truncate_command_line(command_line: &str) -> String {
    match command_line.char_indices().nth(MAX_COMMAND_LINE_CHARS) {
        Some((cut, _)) => format!("{}...", &command_line[..cut]),
        None => command_line.to_string(),
    }
}

fn read_transient(path: &Path) -> Option<String> {
    fs::read_to_string(path)
        .map_err(|err| log_unexpected(path, &err))
        .ok()
}

fn log_unexpected(path: &Path, err: &io::Error) {
    // ESRCH shows up for files of a process that exited mid-read
    if err.kind() != ErrorKind::NotFound && err.raw_os_error() != Some(3) {
        debug!("Cannot read {}: {err}", path.display());
    }
}

#[cfg(any(test, feature = "dev-context-only-utils"))]
pub mod test_utils {
    use {super::*, std::os::unix::fs::symlink};

    /// Builds a `/proc`-like tree under a caller-owned directory.
    pub struct FakeProcfs {
        root: PathBuf,
    }

    impl FakeProcfs {
        pub fn new(root: impl Into<PathBuf>) -> Self {
            Self { root: root.into() }
        }

        pub fn table(&self) -> ProcessTable {
            ProcessTable::new(&self.root)
        }

        /// Add a process. An empty `cmdline` models a kernel thread, which
        /// also has no `exe` link.
        pub fn add_process(
            &self,
            pid: Pid,
            name: &str,
            exe: Option<&str>,
            cmdline: &[&str],
            tids: &[ThreadId],
        ) {
            let dir = self.root.join(pid.to_string());
            fs::create_dir_all(dir.join("task")).unwrap();
            fs::write(
                dir.join("status"),
                format!("Name:\t{name}\nUmask:\t0022\nState:\tS (sleeping)\nTgid:\t{pid}\n"),
            )
            .unwrap();
            let mut raw = Vec::new();
            for arg in cmdline {
                raw.extend_from_slice(arg.as_bytes());
                raw.push(0);
            }
            fs::write(dir.join("cmdline"), raw).unwrap();
            if let Some(exe) = exe {
                symlink(exe, dir.join("exe")).unwrap();
            }
            for tid in tids {
                self.add_thread(pid, *tid);
            }
        }

        pub fn add_thread(&self, pid: Pid, tid: ThreadId) {
            fs::create_dir_all(self.root.join(pid.to_string()).join("task").join(tid.to_string()))
                .unwrap();
        }

        pub fn remove_thread(&self, pid: Pid, tid: ThreadId) {
            fs::remove_dir_all(self.root.join(pid.to_string()).join("task").join(tid.to_string()))
                .unwrap();
        }

        pub fn remove_process(&self, pid: Pid) {
            fs::remove_dir_all(self.root.join(pid.to_string())).unwrap();
        }
    }
}
