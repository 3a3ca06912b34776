use core::fmt;
use core::sync::atomic::{AtomicBool, AtomicI32, AtomicU16, AtomicU8, Ordering};

use crate::platform::{CoreId, Entry};

use super::context::Stack;

#[repr(transparent)]
#[derive(PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Hash, Debug)]
pub struct Pid(u16);

impl Pid {
    pub const INVALID: Pid = Pid(u16::MAX);

    pub const fn new(id: u16) -> Self {
        Self(id)
    }

    pub fn as_usize(&self) -> usize {
        self.0 as usize
    }

    pub fn as_u16(&self) -> u16 {
        self.0
    }
}

impl PartialEq<usize> for Pid {
    fn eq(&self, other: &usize) -> bool {
        self.as_usize() == *other
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which cores may run a process.
///
/// The raw encoding is kept for the platform side:
///  0: any core
/// +N: only core N-1
/// -N: only core N-1, and never counted as pending work (idle processes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Affinity {
    Any,
    Pinned(CoreId),
    Exclusive(CoreId),
}

impl Affinity {
    pub fn from_raw(raw: i32) -> Self {
        match raw {
            0 => Affinity::Any,
            n if n > 0 => Affinity::Pinned((n - 1) as CoreId),
            n => Affinity::Exclusive((-(n as i64) - 1) as CoreId),
        }
    }

    /// Core ids must be below `MAX_CORES`, the scheduler rejects others
    pub fn as_raw(self) -> i32 {
        match self {
            Affinity::Any => 0,
            Affinity::Pinned(core) => core as i32 + 1,
            Affinity::Exclusive(core) => -(core as i32 + 1),
        }
    }

    pub fn core(self) -> Option<CoreId> {
        match self {
            Affinity::Any => None,
            Affinity::Pinned(core) | Affinity::Exclusive(core) => Some(core),
        }
    }

    /// may `core` run this process at all
    pub fn permits(self, core: CoreId) -> bool {
        self.core().map_or(true, |pinned| pinned == core)
    }

    /// is this process pinned to `core`
    pub fn fits(self, core: CoreId) -> bool {
        self.core() == Some(core)
    }

    pub fn is_exclusive(self) -> bool {
        matches!(self, Affinity::Exclusive(_))
    }
}

impl Default for Affinity {
    fn default() -> Self {
        Affinity::Any
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcRole {
    Unused = 0,
    User = 1,
    /// runs the scheduler loop of one core, never queued
    System = 2,
    /// per-core idle process, always ready
    Sleep = 3,
}

impl ProcRole {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => ProcRole::User,
            2 => ProcRole::System,
            3 => ProcRole::Sleep,
            _ => ProcRole::Unused,
        }
    }
}

const NO_CORE: i32 = -1;

/// Process control block.
///
/// The arena is statically allocated and shared between cores, so every
/// field that is read or written outside the scheduler permit is atomic.
/// Ordering-relevant fields (readiness, priority, affinity) are only
/// re-evaluated by the permit holder when it re-sorts the ready queue.
#[derive(Debug)]
pub struct ProcessControlBlock {
    pid: AtomicU16,
    role: AtomicU8,
    pub stack: Stack,
    entry: spin::Once<Entry>,
    ready: AtomicBool,
    ended: AtomicBool,
    priority: AtomicI32,
    affinity: AtomicI32,
    core_id: AtomicI32,
}

impl ProcessControlBlock {
    pub const EMPTY: ProcessControlBlock = ProcessControlBlock::new();

    pub const fn new() -> Self {
        Self {
            pid: AtomicU16::new(u16::MAX),
            role: AtomicU8::new(ProcRole::Unused as u8),
            stack: Stack::new(),
            entry: spin::Once::new(),
            ready: AtomicBool::new(false),
            ended: AtomicBool::new(false),
            priority: AtomicI32::new(0),
            affinity: AtomicI32::new(0),
            core_id: AtomicI32::new(NO_CORE),
        }
    }

    /// Called once by the arena when the slot is handed out
    pub(crate) fn assign(&self, pid: Pid, role: ProcRole, priority: i32, affinity: Affinity) {
        self.pid.store(pid.as_u16(), Ordering::SeqCst);
        self.priority.store(priority, Ordering::SeqCst);
        self.affinity.store(affinity.as_raw(), Ordering::SeqCst);
        self.core_id.store(NO_CORE, Ordering::SeqCst);
        self.ended.store(false, Ordering::SeqCst);
        self.ready.store(true, Ordering::SeqCst);
        self.role.store(role as u8, Ordering::SeqCst);
    }

    pub(crate) fn set_entry(&self, entry: Entry) {
        self.entry.call_once(|| entry);
    }

    pub fn get_pid(&self) -> Pid {
        Pid(self.pid.load(Ordering::SeqCst))
    }

    pub fn role(&self) -> ProcRole {
        ProcRole::from_u8(self.role.load(Ordering::SeqCst))
    }

    pub fn entry(&self) -> Option<Entry> {
        self.entry.get().copied()
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    /// Marks ready, returns the previous readiness
    pub(crate) fn make_ready(&self) -> bool {
        self.ready.swap(true, Ordering::SeqCst)
    }

    pub fn is_ended(&self) -> bool {
        self.ended.load(Ordering::SeqCst)
    }

    /// Terminal: an ended process is never queued again
    pub(crate) fn end(&self) {
        self.ended.store(true, Ordering::SeqCst);
        self.ready.store(false, Ordering::SeqCst);
    }

    /// allocated and not yet ended
    pub fn is_live(&self) -> bool {
        self.role() != ProcRole::Unused && !self.is_ended()
    }

    pub fn priority(&self) -> i32 {
        self.priority.load(Ordering::SeqCst)
    }

    pub(crate) fn set_priority(&self, priority: i32) {
        self.priority.store(priority, Ordering::SeqCst);
    }

    /// Negative priorities are never preempted
    pub fn is_preemptible(&self) -> bool {
        self.priority() >= 0
    }

    pub fn affinity(&self) -> Affinity {
        Affinity::from_raw(self.affinity.load(Ordering::SeqCst))
    }

    pub(crate) fn set_affinity(&self, affinity: Affinity) {
        self.affinity.store(affinity.as_raw(), Ordering::SeqCst);
    }

    /// The core currently executing this process
    pub fn core_id(&self) -> Option<CoreId> {
        match self.core_id.load(Ordering::SeqCst) {
            NO_CORE => None,
            core => Some(core as CoreId),
        }
    }

    pub(crate) fn set_core_id(&self, core: Option<CoreId>) {
        let raw = core.map_or(NO_CORE, |core| core as i32);
        self.core_id.store(raw, Ordering::SeqCst);
    }

    /// May `core` dispatch this process right now
    pub fn is_eligible(&self, core: CoreId) -> bool {
        self.is_ready() && !self.is_ended() && self.affinity().permits(core)
    }
}

impl Default for ProcessControlBlock {
    fn default() -> Self {
        Self::new()
    }
}

/// What application code chooses when registering a process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProcessConfig {
    pub priority: i32,
    pub affinity: Affinity,
}

impl ProcessConfig {
    pub fn with_priority(priority: i32) -> Self {
        Self {
            priority,
            affinity: Affinity::Any,
        }
    }

    pub fn pinned(mut self, core: CoreId) -> Self {
        self.affinity = Affinity::Pinned(core);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn affinity_raw_encoding() {
        assert_eq!(Affinity::from_raw(0), Affinity::Any);
        assert_eq!(Affinity::from_raw(1), Affinity::Pinned(0));
        assert_eq!(Affinity::from_raw(2), Affinity::Pinned(1));
        assert_eq!(Affinity::from_raw(-1), Affinity::Exclusive(0));
        assert_eq!(Affinity::from_raw(-2), Affinity::Exclusive(1));
        for raw in -4..=4 {
            assert_eq!(Affinity::from_raw(raw).as_raw(), raw);
        }
    }

    #[test]
    fn affinity_permits_and_fits() {
        assert!(Affinity::Any.permits(0));
        assert!(Affinity::Any.permits(3));
        assert!(!Affinity::Any.fits(0));

        let pinned = Affinity::Pinned(1);
        assert!(pinned.permits(1));
        assert!(!pinned.permits(0));
        assert!(pinned.fits(1));

        let sleep = Affinity::Exclusive(0);
        assert!(sleep.permits(0));
        assert!(!sleep.permits(1));
        assert!(sleep.is_exclusive());
    }

    #[test]
    fn ended_process_is_never_eligible() {
        let pcb = ProcessControlBlock::new();
        pcb.assign(Pid::new(4), ProcRole::User, 3, Affinity::Any);
        assert!(pcb.is_eligible(0));
        pcb.end();
        pcb.set_ready(true);
        assert!(!pcb.is_eligible(0));
        assert!(!pcb.is_live());
    }

    #[test]
    fn core_id_round_trips_none() {
        let pcb = ProcessControlBlock::new();
        assert_eq!(pcb.core_id(), None);
        pcb.set_core_id(Some(2));
        assert_eq!(pcb.core_id(), Some(2));
        pcb.set_core_id(None);
        assert_eq!(pcb.core_id(), None);
    }
}
