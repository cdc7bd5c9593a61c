// Activate some of the Rust 2024 lints to make the future migration easier.
#![warn(if_let_rescope)]
#![warn(keyword_idents_2024)]
#![warn(missing_unsafe_on_extern)]
#![warn(rust_2024_guarded_string_incompatible_syntax)]
#![warn(rust_2024_incompatible_pat)]
#![warn(tail_expr_drop_order)]
#![warn(unsafe_attr_outside_unsafe)]
#![warn(unsafe_op_in_unsafe_fn)]

//! CPU topology and per-thread scheduling primitives for Linux.
//!
//! This crate detects the CPU topology (physical cores, hyper-threads and the
//! performance/efficiency split of hybrid processors), resolves CPU keyword
//! expressions against it, and applies CPU affinity, I/O priority and
//! niceness to individual kernel threads.
//!
//! # Platform Support
//!
//! Linux only. All system calls return [`CpuAffinityError::NotSupported`] on
//! other platforms.
//!
//! # Examples
//!
//! ```no_run
//! use taskpin_cpu_utils::*;
//!
//! # fn main() -> Result<(), CpuAffinityError> {
//! let topology = Topology::detect();
//!
//! // Keep a thread off hyper-thread siblings
//! if let Some(cpus) = topology.resolve_cpu_spec("all-logical") {
//!     set_thread_affinity(current_thread_id(), &CpuMask::from(&cpus))?;
//! }
//!
//! // Lower its I/O and CPU priority
//! set_io_priority(current_thread_id(), IoPriority::new(3, 0)?)?;
//! set_nice(current_thread_id(), 10)?;
//! # Ok(())
//! # }
//! ```

mod affinity;
mod error;
mod mask;
mod priority;
mod topology;

/// Kernel thread id, as listed under `/proc/<pid>/task`.
pub type ThreadId = i32;

pub use {
    affinity::{
        current_thread_id, format_cpu_list, looks_like_cpu_list, parse_cpu_list,
        set_thread_affinity, thread_affinity,
    },
    error::CpuAffinityError,
    mask::{CpuMask, CpuSet, CPU_MASK_BYTES, CPU_SETSIZE},
    priority::{
        check_nice, io_priority, nice, set_io_priority, set_nice, IoPriority, IoPriorityClass,
        MAX_IO_PRIORITY_DATA, MAX_NICE, MIN_NICE,
    },
    topology::{CpuKeyword, Topology, KEYWORD_ALIASES, SYSFS_CPU_ROOT},
};
