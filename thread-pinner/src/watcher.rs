//! Rule file change detection.
//!
//! The `ConfigWatcher` polls the file's metadata and emits an event whenever
//! it differs from the last observation. The `Debouncer` collapses bursts of
//! events (editors often write a file several times in a row) into a single
//! callback.

use {
    crossbeam_channel::{Receiver, RecvTimeoutError, Sender},
    log::{debug, info},
    std::{
        fs, io,
        os::unix::fs::MetadataExt,
        path::{Path, PathBuf},
        sync::{
            atomic::{AtomicBool, Ordering},
            Arc,
        },
        thread::{self, sleep, Builder, JoinHandle},
        time::{Duration, SystemTime},
    },
};

pub const POLL_INTERVAL: Duration = Duration::from_millis(100);
pub const DEBOUNCE_WINDOW: Duration = Duration::from_millis(500);

// How often an idle debouncer checks the exit flag
const IDLE_RECV_TIMEOUT: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileStamp {
    modified: Option<SystemTime>,
    len: u64,
    inode: u64,
}

/// `None` while the file does not exist.
fn stamp(path: &Path) -> Option<FileStamp> {
    let metadata = fs::metadata(path).ok()?;
    Some(FileStamp {
        modified: metadata.modified().ok(),
        len: metadata.len(),
        inode: metadata.ino(),
    })
}

pub struct ConfigWatcher {
    thread_hdl: JoinHandle<()>,
}

impl ConfigWatcher {
    pub fn new(
        path: PathBuf,
        poll_interval: Duration,
        events: Sender<()>,
        exit: Arc<AtomicBool>,
    ) -> io::Result<Self> {
        let thread_hdl = Builder::new()
            .name("tpCfgWatch".to_string())
            .spawn(move || {
                info!("Watching rule file {}", path.display());
                let mut last = stamp(&path);
                while !exit.load(Ordering::Relaxed) {
                    sleep(poll_interval);
                    let current = stamp(&path);
                    if current == last {
                        continue;
                    }
                    debug!("Rule file {} changed: {current:?}", path.display());
                    last = current;
                    if events.send(()).is_err() {
                        break;
                    }
                }
                debug!("ConfigWatcher has stopped");
            })?;
        Ok(Self { thread_hdl })
    }

    pub fn join(self) -> thread::Result<()> {
        self.thread_hdl.join()
    }
}

pub struct Debouncer {
    thread_hdl: JoinHandle<()>,
}

impl Debouncer {
    /// Calls `on_settled` once no event has arrived for `window` after the
    /// last one. Every event restarts the window.
    pub fn new<F>(
        events: Receiver<()>,
        window: Duration,
        exit: Arc<AtomicBool>,
        mut on_settled: F,
    ) -> io::Result<Self>
    where
        F: FnMut() + Send + 'static,
    {
        let thread_hdl = Builder::new()
            .name("tpDebounce".to_string())
            .spawn(move || {
                let mut disconnected = false;
                while !disconnected && !exit.load(Ordering::Relaxed) {
                    match events.recv_timeout(IDLE_RECV_TIMEOUT) {
                        Ok(()) => {}
                        Err(RecvTimeoutError::Timeout) => continue,
                        Err(RecvTimeoutError::Disconnected) => break,
                    }

                    loop {
                        match events.recv_timeout(window) {
                            Ok(()) => continue,
                            Err(RecvTimeoutError::Timeout) => break,
                            Err(RecvTimeoutError::Disconnected) => {
                                disconnected = true;
                                break;
                            }
                        }
                    }
                    on_settled();
                }
                debug!("Debouncer has stopped");
            })?;
        Ok(Self { thread_hdl })
    }

    pub fn join(self) -> thread::Result<()> {
        self.thread_hdl.join()
    }
}
