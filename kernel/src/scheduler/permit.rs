//! The single scheduler permit.
//!
//! Exactly one core holds it at a time. The holder is the only core that
//! may touch the ready queue, and it does so through a `SchedGuard`.
//! Besides the platform semaphore we track which core holds the permit,
//! so that a guard can check it is created by the right core.

use core::sync::atomic::Ordering;

use crate::cpu::{is_core, NO_CORE};
use crate::event::EventFlags;
use crate::platform::{CoreId, Platform};
use crate::process::queue::ReadyQueue;
use crate::process::{Affinity, Pid, ProcessControlBlock};

use super::Scheduler;

/// Scheduler state that needs the permit
pub struct SchedState {
    queue: ReadyQueue,
}

impl SchedState {
    pub const fn new() -> Self {
        Self {
            queue: ReadyQueue::new(),
        }
    }
}

impl Default for SchedState {
    fn default() -> Self {
        Self::new()
    }
}

/// Mutation guard over the ready queue, proof that `core` holds the permit
pub struct SchedGuard<'a, P: Platform> {
    sch: &'a Scheduler<P>,
    core: CoreId,
    state: &'a mut SchedState,
}

impl<'a, P: Platform> SchedGuard<'a, P> {
    pub fn core(&self) -> CoreId {
        self.core
    }

    pub fn scheduler(&self) -> &'a Scheduler<P> {
        self.sch
    }

    pub fn queue(&self) -> &ReadyQueue {
        &self.state.queue
    }

    pub fn push(&mut self, pid: Pid) -> bool {
        log::trace!("SchedGuard::push: pid {} on core {}", pid, self.core);
        self.state.queue.push(pid, &self.sch.table, self.core)
    }

    pub fn pop(&mut self) -> Option<Pid> {
        self.state.queue.pop_front()
    }

    pub fn remove(&mut self, pid: Pid) -> bool {
        self.state.queue.remove(pid)
    }

    /// Re-sorts for the core holding the guard
    pub fn sort(&mut self) {
        self.state.queue.sort(&self.sch.table, self.core);

        if cfg!(feature = "extra-checks") && !self.state.queue.is_sorted(&self.sch.table, self.core)
        {
            log::error!("SchedGuard::sort: order check failed");
            panic!("SchedGuard::sort: ready queue out of order on core {}", self.core);
        }
    }

    fn live(&self, pid: Pid) -> Option<&'a ProcessControlBlock> {
        self.sch.table.get(pid).filter(|pcb| pcb.is_live())
    }

    pub fn set_priority(&mut self, pid: Pid, priority: i32) -> bool {
        let Some(pcb) = self.live(pid) else {
            return false;
        };
        pcb.set_priority(priority);
        self.sort();
        true
    }

    pub fn set_affinity(&mut self, pid: Pid, affinity: Affinity) -> bool {
        let Some(pcb) = self.live(pid) else {
            return false;
        };
        pcb.set_affinity(affinity);
        self.sort();
        true
    }
}

impl<P: Platform> Scheduler<P> {
    /// Blocking take, as the scheduler loop does it
    pub(crate) fn take_permit(&self, core: CoreId) {
        self.platform.sem_take();
        self.claim_permit(core);
    }

    pub(crate) fn try_take_permit(&self, core: CoreId) -> bool {
        if !self.platform.sem_try_take() {
            return false;
        }
        self.claim_permit(core);
        true
    }

    fn claim_permit(&self, core: CoreId) {
        if let Err(holder) =
            self.permit_holder
                .compare_exchange(NO_CORE, core, Ordering::SeqCst, Ordering::SeqCst)
        {
            log::error!("Scheduler::claim_permit: permit granted twice");
            panic!(
                "Scheduler::claim_permit: core {} got the permit held by core {}",
                core, holder
            );
        }
    }

    /// Gives the permit back and tells every other core it is available
    pub(crate) fn release_permit(&self, core: CoreId) {
        if let Err(holder) =
            self.permit_holder
                .compare_exchange(core, NO_CORE, Ordering::SeqCst, Ordering::SeqCst)
        {
            panic!(
                "Scheduler::release_permit: core {} released a permit held by {:?}",
                core,
                is_core(holder)
            );
        }
        self.platform.sem_give();

        for (other, cpu) in self.cpus[..self.cores()].iter().enumerate() {
            if other != core {
                cpu.event.add(EventFlags::SCH_AVAILABLE);
            }
        }
        self.platform.signal_event();
    }

    /// Spins on the non-blocking take, idling in `poll_event` until some
    /// core announces the permit is available again
    pub(crate) fn acquire_for_handoff(&self, core: CoreId) {
        let event = &self.cpus[core].event;
        loop {
            // clear first, a release after this point is not lost
            event.clear(EventFlags::SCH_AVAILABLE);
            if self.try_take_permit(core) {
                return;
            }
            while !event.check(EventFlags::SCH_AVAILABLE) {
                self.platform.poll_event();
            }
        }
    }

    pub fn permit_holder(&self) -> Option<CoreId> {
        is_core(self.permit_holder.load(Ordering::SeqCst))
    }

    /// The only way to reach the ready queue
    pub(crate) fn lock(&self, core: CoreId) -> SchedGuard<'_, P> {
        let holder = self.permit_holder();
        assert_eq!(
            holder,
            Some(core),
            "Scheduler::lock: core {} does not hold the permit",
            core
        );
        SchedGuard {
            sch: self,
            core,
            // Safety: the permit is held by `core`, and no other guard is
            // alive on it
            state: unsafe { &mut *self.state.get() },
        }
    }

    /// Takes the permit on the calling core, runs `f` over the ready queue
    /// and releases it again
    pub fn with_queue<R>(&self, f: impl FnOnce(&ReadyQueue) -> R) -> R {
        let core = self.core_id();
        self.take_permit(core);
        let result = {
            let guard = self.lock(core);
            f(guard.queue())
        };
        self.release_permit(core);
        result
    }
}
