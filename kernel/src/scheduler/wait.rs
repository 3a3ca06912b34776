//! Blocking and waking processes.
//!
//! A wait is two steps: `block` clears readiness, `sleep` arms the alarm
//! and yields. Callers that publish themselves somewhere (see `WaitList`)
//! do so between the two, so a notify racing the wait is never lost: it
//! either finds the process not yet blocked, or already published.

use crate::event::EventFlags;
use crate::platform::{Deadline, Platform};
use crate::process::{Pid, ProcRole, ProcessControlBlock};

use super::Scheduler;

impl<P: Platform> Scheduler<P> {
    /// The process dispatched on the calling core, `None` while its system
    /// process runs
    pub fn current_pid(&self) -> Option<Pid> {
        self.cpus[self.core_id()].current()
    }

    /// Blocks the calling process until notified or until `deadline`
    pub fn wait(&self, deadline: Deadline) {
        let pid = self.running_on(self.core_id());
        self.wait_proc(deadline, pid);
    }

    /// Like `wait`, on behalf of `pid`, which is resolved first
    pub fn wait_pid(&self, deadline: Deadline, pid: Pid) {
        let pid = self.resolve(pid);
        self.wait_proc(deadline, pid);
    }

    fn wait_proc(&self, deadline: Deadline, pid: Pid) {
        if deadline == Deadline::NoWait {
            return;
        }
        self.block(pid);
        self.sleep(deadline, pid);
    }

    /// Clears readiness of `pid`. A system process is never blocked, and
    /// neither is anything while the calling core hands off to its
    /// scheduler loop. Returns whether readiness was cleared.
    pub(crate) fn block(&self, pid: Pid) -> bool {
        let pcb = self.table.pcb(pid);
        if pcb.role() == ProcRole::System {
            return false;
        }
        let core = self.core_id();
        if self.cpus[core].event.check(EventFlags::PREEMPT_DISABLED) {
            log::trace!("Scheduler::block: core {} in hand-off, pid {} stays ready", core, pid);
            return false;
        }
        pcb.set_ready(false);
        true
    }

    /// Arms the alarm for `deadline`, if any, and yields
    pub(crate) fn sleep(&self, deadline: Deadline, pid: Pid) {
        match deadline {
            Deadline::NoWait => return,
            Deadline::Forever => {}
            Deadline::At(at) => self.platform.set_alarm(at, pid),
        }
        self.yield_now();
    }

    /// Makes `pcb` ready and asks every core to reconsider.
    ///
    /// Does nothing for a process that is already ready or has ended.
    /// Unless the target is the caller itself, or the calling core is
    /// already handing off or holds the permit, the caller is preempted so
    /// a more urgent process gets the chance to run. Returns whether
    /// readiness changed.
    pub fn notify(&self, pcb: &ProcessControlBlock) -> bool {
        if pcb.is_ended() || pcb.make_ready() {
            return false;
        }
        let pid = pcb.get_pid();
        log::trace!("Scheduler::notify: pid {} ready", pid);
        self.raise_all(EventFlags::CONTEXT_SWITCH);

        // no yield while this core is mid hand-off or holds the permit,
        // the pending CONTEXT_SWITCH is picked up at the next preempt point
        let core = self.core_id();
        if self.running_on(core) == pid
            || self.cpus[core].event.check(EventFlags::PREEMPT_DISABLED)
            || self.permit_holder() == Some(core)
        {
            return true;
        }
        self.preempt();
        true
    }

    /// `notify` by pid, for interrupt handlers and alarms
    pub fn notify_pid(&self, pid: Pid) -> bool {
        let pid = self.resolve(pid);
        self.notify(self.table.pcb(pid))
    }

    /// Maps a pid onto a live process: one executing on some core, or a
    /// live arena record. Anything else falls back to the system process
    /// of the calling core.
    pub fn resolve(&self, pid: Pid) -> Pid {
        let executing = self.cpus[..self.cores()]
            .iter()
            .any(|cpu| cpu.current() == Some(pid));
        if executing {
            return pid;
        }
        match self.table.get(pid) {
            Some(pcb) if pcb.is_live() => pid,
            _ => {
                let fallback = self.system_pid(self.core_id());
                log::warn!(
                    "Scheduler::resolve: pid {} not found, using system pid {}",
                    pid,
                    fallback
                );
                fallback
            }
        }
    }
}
