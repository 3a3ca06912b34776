use core::sync::atomic::{AtomicUsize, Ordering};

use crate::config::MAX_PROCS;

use super::process::{Affinity, Pid, ProcRole, ProcessControlBlock};

/// Fixed arena of PCBs.
///
/// Pids are the slot indices, handed out monotonically; a slot is never
/// recycled since processes are never destroyed, so a pid stays valid for
/// the lifetime of the scheduler.
pub struct ProcessTable {
    slots: [ProcessControlBlock; MAX_PROCS],
    // next pid to hand out
    count: AtomicUsize,
}

impl ProcessTable {
    pub const fn new() -> Self {
        Self {
            slots: [ProcessControlBlock::EMPTY; MAX_PROCS],
            count: AtomicUsize::new(0),
        }
    }

    /// Reserves the next slot. Running out of slots is fatal.
    pub fn allocate(&self, role: ProcRole, priority: i32, affinity: Affinity) -> &ProcessControlBlock {
        let id = self
            .count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |count| {
                (count < MAX_PROCS).then_some(count + 1)
            })
            .unwrap_or_else(|count| {
                log::error!("ProcessTable::allocate: {} slots in use", count);
                panic!("ProcessTable::allocate: no free process slot");
            });

        let pid = Pid::new(id as u16);
        let pcb = &self.slots[id];
        pcb.assign(pid, role, priority, affinity);
        log::trace!(
            "ProcessTable::allocate: pid {} ({:?}), priority {}",
            pid,
            role,
            priority
        );
        pcb
    }

    pub fn get(&self, pid: Pid) -> Option<&ProcessControlBlock> {
        if pid.as_usize() < self.len() {
            Some(&self.slots[pid.as_usize()])
        } else {
            None
        }
    }

    /// Internal lookup of a pid the scheduler handed out itself
    pub fn pcb(&self, pid: Pid) -> &ProcessControlBlock {
        match self.get(pid) {
            Some(pcb) => pcb,
            None => panic!("ProcessTable::pcb: unallocated pid {}", pid),
        }
    }

    pub fn len(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProcessControlBlock> {
        self.slots[..self.len()].iter()
    }
}

impl Default for ProcessTable {
    fn default() -> Self {
        Self::new()
    }
}
