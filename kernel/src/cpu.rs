use core::sync::atomic::{AtomicU16, Ordering};

use crate::event::Event;
use crate::platform::CoreId;
use crate::process::Pid;

const NO_PID: u16 = u16::MAX;

/// Per-core scheduler state.
/// `current` is only written by the owning core's scheduler loop while it
/// holds the permit, but read from any core (pid resolution), hence atomic.
#[derive(Debug)]
pub struct PercpuBlock {
    current: AtomicU16,
    system: AtomicU16,
    sleep: AtomicU16,
    pub event: Event,
}

impl PercpuBlock {
    pub const EMPTY: PercpuBlock = PercpuBlock::new();

    pub const fn new() -> Self {
        Self {
            current: AtomicU16::new(NO_PID),
            system: AtomicU16::new(NO_PID),
            sleep: AtomicU16::new(NO_PID),
            event: Event::new(),
        }
    }

    /// The dispatched process, `None` while the system process runs
    pub fn current(&self) -> Option<Pid> {
        load(&self.current)
    }

    pub(crate) fn set_executing_process(&self, pid: Pid) {
        let prev = self.current.swap(pid.as_u16(), Ordering::SeqCst);
        assert_eq!(
            prev, NO_PID,
            "PercpuBlock::set_executing_process: core already runs pid {}",
            prev
        );
    }

    pub(crate) fn take_executing_process(&self) -> Option<Pid> {
        match self.current.swap(NO_PID, Ordering::SeqCst) {
            NO_PID => None,
            pid => Some(Pid::new(pid)),
        }
    }

    pub fn system(&self) -> Option<Pid> {
        load(&self.system)
    }

    pub fn sleep(&self) -> Option<Pid> {
        load(&self.sleep)
    }

    pub(crate) fn set_system(&self, pid: Pid) {
        self.system.store(pid.as_u16(), Ordering::SeqCst);
    }

    pub(crate) fn set_sleep(&self, pid: Pid) {
        self.sleep.store(pid.as_u16(), Ordering::SeqCst);
    }
}

impl Default for PercpuBlock {
    fn default() -> Self {
        Self::new()
    }
}

fn load(slot: &AtomicU16) -> Option<Pid> {
    match slot.load(Ordering::SeqCst) {
        NO_PID => None,
        pid => Some(Pid::new(pid)),
    }
}

/// Sentinel for "no core holds the permit"
pub(crate) const NO_CORE: usize = usize::MAX;

pub(crate) fn is_core(core: usize) -> Option<CoreId> {
    (core != NO_CORE).then_some(core)
}
