// Activate some of the Rust 2024 lints to make the future migration easier.
#![warn(if_let_rescope)]
#![warn(keyword_idents_2024)]
#![warn(missing_unsafe_on_extern)]
#![warn(rust_2024_guarded_string_incompatible_syntax)]
#![warn(rust_2024_incompatible_pat)]
#![warn(tail_expr_drop_order)]
#![warn(unsafe_attr_outside_unsafe)]
#![warn(unsafe_op_in_unsafe_fn)]

//! Rule-driven thread placement.
//!
//! Rules match processes by name, executable path or command line and assign
//! their threads a CPU set, an I/O priority and a niceness. The
//! [`ThreadScanner`] walks `/proc` once per cycle and applies the first
//! matching rule to each thread it has not seen before. The [`ConfigStore`]
//! owns the active [`RuleSet`] and publishes every successful reload; the
//! [`ReloadService`] turns those into a [`RuleDiff`] and re-applies or resets
//! only the affected threads.

pub mod config;
pub mod diff;
pub mod error;
pub mod matcher;
pub mod policy;
pub mod procfs;
pub mod reload_service;
pub mod rule;
pub mod scanner;
pub mod store;
pub mod watcher;
pub mod worker_pool;

pub use {
    config::{ConfigFormat, RuleFile},
    diff::RuleDiff,
    error::{ConfigError, RuleError},
    matcher::PatternMatcher,
    policy::{SystemThreadControl, ThreadControl},
    procfs::ProcessTable,
    reload_service::{ReloadOutcome, ReloadService},
    rule::{AffinityRule, CpuSpec, MatchType, ProcessIdentity, ProcessInfo, RuleConfig, RuleSet},
    scanner::{ScanStats, ThreadScanner},
    store::{ConfigStore, RuleSetUpdate},
    watcher::{ConfigWatcher, Debouncer},
    worker_pool::ScannerConfig,
};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Locks `mutex`, recovering the data if a holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
