//! Preemptible, priority ordered process scheduler for small multicore
//! targets.
//!
//! The scheduler owns no hardware. Everything it needs from the board
//! (stack swaps, the permit semaphore, alarms, core start-up) is borrowed
//! through the `Platform` trait.

#![cfg_attr(not(test), no_std)]

pub mod bridge;
pub mod config;
pub mod cpu;
pub mod event;
pub mod platform;
pub mod process;
pub mod scheduler;
pub mod waitlist;

pub use config::SchedulerConfig;
pub use event::{Event, EventFlags};
pub use platform::{CoreId, Deadline, Entry, Platform};
pub use process::{Affinity, Pid, ProcRole, ProcessConfig, ProcessControlBlock};
pub use scheduler::{Dispatch, SchedGuard, Scheduler};
pub use waitlist::WaitList;
