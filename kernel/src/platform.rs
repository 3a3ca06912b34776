//! The capabilities the scheduler borrows from the host platform.
//!
//! Everything in here is implemented by board support code: the stack
//! swap and frame construction are assembly, the permit is usually a
//! hardware spinlock or semaphore, the alarm is a hardware timer.

use core::{sync::atomic::AtomicUsize, time::Duration};

use crate::process::{context::InitialFrame, process::Pid};

pub type CoreId = usize;

/// Process entry point, invoked once at first dispatch with the argument
/// given at spawn time
pub type Entry = fn(usize) -> usize;

/// Where a process lands when its entry returns
pub type ExitHook = fn(usize) -> !;

/// Entry of a core that never returns (system loop, secondary start)
pub type CoreEntry = fn(usize) -> !;

/// How long a `wait` blocks.
/// Times are absolute (since boot), never relative, so repeated waits do
/// not drift.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deadline {
    /// return at once, never yield
    NoWait,
    /// block until notified, no alarm
    Forever,
    /// block until notified or until the alarm fires
    At(Duration),
}

pub trait Platform: Sync + 'static {
    /// Block the calling core until an interrupt occurs
    fn poll_event(&self);

    /// Wake any core blocked in `poll_event`
    fn signal_event(&self);

    /// Call `Scheduler::notify_pid(pid)` at or after `at`
    fn set_alarm(&self, at: Duration, pid: Pid);

    /// Start `core` running `entry(arg)`.
    /// Returns false when the platform cannot launch cores.
    fn core_launch(&self, core: CoreId, entry: CoreEntry, arg: usize) -> bool {
        let _ = (core, entry, arg);
        false
    }

    fn core_get_id(&self) -> CoreId;

    // the single scheduler permit
    fn sem_set_permits(&self, permits: u32);
    fn sem_try_take(&self) -> bool;
    fn sem_take(&self);
    fn sem_give(&self);

    /// Build the initial frame of a process on its stack and return the
    /// resulting stack pointer
    fn register_proc(&self, frame: &InitialFrame) -> usize;

    /// Request an asynchronous stack swap: the current stack pointer is
    /// saved to `save_to` and the one in `restore_from` is resumed.
    /// Completes later, in the low priority switch exception.
    fn switch_stack(&self, save_to: &AtomicUsize, restore_from: &AtomicUsize);

    /// Move the calling core onto the stack at `sp` and run `entry(arg)`
    fn startup(&self, sp: usize, entry: CoreEntry, arg: usize) -> !;

    /// Raise the service-call interrupt which ends up in
    /// `Scheduler::service_call`
    fn request_call(&self);
}
