//! The per-core scheduler loop and the hand-off into it.

use crate::bridge::{Call, SystemCall};
use crate::event::EventFlags;
use crate::platform::{CoreId, Platform};
use crate::process::{Affinity, Pid, ProcRole};

use super::{SchedGuard, Scheduler};

/// Outcome of one scheduler loop iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// nothing asked for a context switch, the core idled once
    Idle,
    /// the best candidate cannot run here, the permit was handed back
    Deferred,
    /// a swap into this process was requested
    Dispatched(Pid),
}

impl<P: Platform> Scheduler<P> {
    /// Body of every system process
    pub fn system_loop(&self) -> ! {
        loop {
            self.schedule_once();
        }
    }

    /// One iteration of the scheduler loop on the calling core.
    ///
    /// Takes the permit (unless the hand-off already did), puts the
    /// displaced process back into the queue, sorts for this core and
    /// dispatches the head if it may run here. The permit is always given
    /// back through the call bridge before the swap is requested.
    pub fn schedule_once(&self) -> Dispatch {
        let core = self.core_id();
        let cpu = &self.cpus[core];

        if !cpu.event.check(EventFlags::PREEMPT_DISABLED) {
            if !cpu.event.check(EventFlags::CONTEXT_SWITCH) {
                self.platform.poll_event();
                return Dispatch::Idle;
            }
            self.take_permit(core);
            cpu.event.add(EventFlags::PREEMPT_DISABLED);
        }

        let outcome = {
            let mut guard = self.lock(core);
            if let Some(prev) = cpu.take_executing_process() {
                let pcb = self.table.pcb(prev);
                pcb.set_core_id(None);
                if pcb.is_ended() {
                    log::debug!("Scheduler::schedule_once: pid {} ended, dropped", prev);
                } else {
                    guard.push(prev);
                }
            }

            guard.sort();
            match guard.pop() {
                Some(next) if self.table.pcb(next).is_eligible(core) => {
                    cpu.set_executing_process(next);
                    self.table.pcb(next).set_core_id(Some(core));
                    Dispatch::Dispatched(next)
                }
                Some(head) => {
                    guard.push(head);
                    Dispatch::Deferred
                }
                None => Dispatch::Deferred,
            }
        };

        match outcome {
            Dispatch::Dispatched(next) => {
                cpu.event
                    .clear(EventFlags::CONTEXT_SWITCH | EventFlags::PREEMPT_DISABLED);
                log::trace!("Scheduler::schedule_once: core {} runs pid {}", core, next);
                self.announce_available(core);
                self.platform.switch_stack(
                    self.system_pcb(core).stack.slot(),
                    self.table.pcb(next).stack.slot(),
                );
            }
            _ => {
                // retry on the next context switch request
                cpu.event.clear(EventFlags::PREEMPT_DISABLED);
                self.announce_available(core);
                self.platform.poll_event();
            }
        }
        outcome
    }

    /// Releases the permit `core` holds through the call bridge, so the
    /// release and the wake-up of the other cores happen in the
    /// service-call handler
    fn announce_available(&self, core: CoreId) {
        // submitted from the loop, whatever `current` already names
        self.bridge.submit(
            Call::SchedulerAvailable { from: core },
            &[],
            self.system_pid(core),
        );
        self.platform.request_call();
    }

    /// Hands the calling core back to its scheduler loop.
    ///
    /// From a process: marks the core for a context switch, takes the
    /// permit and swaps to the system stack. The process resumes here once
    /// it is dispatched again. From the system process it only flags a
    /// context switch.
    pub fn yield_now(&self) {
        let core = self.core_id();
        let cpu = &self.cpus[core];
        let Some(current) = cpu.current() else {
            cpu.event.add(EventFlags::CONTEXT_SWITCH);
            return;
        };
        if self.permit_holder() == Some(core) {
            // already handed off, or inside a permit section
            log::trace!("Scheduler::yield_now: core {} holds the permit, deferred", core);
            cpu.event.add(EventFlags::CONTEXT_SWITCH);
            return;
        }

        cpu.event
            .add(EventFlags::CONTEXT_SWITCH | EventFlags::PREEMPT_DISABLED);
        self.acquire_for_handoff(core);
        self.platform.switch_stack(
            self.table.pcb(current).stack.slot(),
            self.system_pcb(core).stack.slot(),
        );
    }

    /// Yields unless whatever runs on this core has a negative priority.
    /// Returns whether a yield happened.
    pub fn preempt(&self) -> bool {
        let core = self.core_id();
        let pid = self.running_on(core);
        if !self.table.pcb(pid).is_preemptible() {
            log::trace!("Scheduler::preempt: pid {} is not preemptible", pid);
            return false;
        }
        self.yield_now();
        true
    }

    /// Marks the current process ended; it is dropped from the ready
    /// queue at its next displacement
    pub fn retire_current(&self) -> Option<Pid> {
        let pid = self.cpus[self.core_id()].current()?;
        self.table.pcb(pid).end();
        log::info!("Scheduler::retire_current: pid {} ended", pid);
        Some(pid)
    }

    /// Ends the current process and never returns to it
    pub fn exit_current(&self) -> ! {
        let pid = self.retire_current();
        loop {
            self.yield_now();
            if let Some(pid) = pid {
                self.table.pcb(pid).set_ready(false);
            }
        }
    }

    /// Body of every sleep process
    pub fn sleep_loop(&self) -> ! {
        loop {
            self.platform.poll_event();
            let core = self.core_id();
            if self.cpus[core].event.check(EventFlags::CONTEXT_SWITCH) {
                self.yield_now();
            }
        }
    }

    /// Any user process that is ready and not executing anywhere
    pub fn has_ready_work(&self) -> bool {
        self.table.iter().any(|pcb| {
            pcb.role() == ProcRole::User
                && pcb.is_ready()
                && !pcb.is_ended()
                && !pcb.affinity().is_exclusive()
                && pcb.core_id().is_none()
        })
    }

    /// Parks the calling core until a user process is ready to run
    pub fn idle_till_ready(&self) {
        while !self.has_ready_work() {
            self.platform.poll_event();
        }
    }

    /// Service-call handler, installed by the platform on the
    /// service-call interrupt. Executes the pending bridge call if there
    /// is one; returns whether it did.
    pub fn service_call(&self) -> bool {
        let Some((call, argv, argc)) = self.bridge.take() else {
            return false;
        };
        match call {
            Call::SchedulerAvailable { from } => {
                self.bridge.finish(0);
                self.release_permit(from);
            }
            Call::System(f) => {
                let Some(holder) = self.permit_holder() else {
                    panic!("Scheduler::service_call: system call without the permit");
                };
                let result = {
                    let mut guard = self.lock(holder);
                    f(&mut guard, &argv[..argc])
                };
                self.bridge.finish(result);
            }
        }
        true
    }

    /// Runs `call` under the scheduler permit in service-call context and
    /// returns its result. Blocks the calling process until done.
    pub fn system_call(&self, call: SystemCall<P>, args: &[usize]) -> i32 {
        let core = self.core_id();
        let caller = self.running_on(core);
        self.take_permit(core);
        self.bridge.submit(Call::System(call), args, caller);
        self.platform.request_call();
        while !self.bridge.is_complete() {
            self.platform.poll_event();
        }
        let result = self.bridge.result();
        self.release_permit(core);
        result
    }

    /// Changes the priority of a live process and re-sorts the queue.
    /// Returns false for an unknown or ended pid.
    pub fn set_priority(&self, pid: Pid, priority: i32) -> bool {
        let args = [pid.as_usize(), priority as isize as usize];
        self.system_call(Self::reprioritise, &args) == 0
    }

    pub fn set_affinity(&self, pid: Pid, affinity: Affinity) -> bool {
        if let Some(core) = affinity.core().filter(|core| *core >= self.cores()) {
            log::warn!("Scheduler::set_affinity: core {} is not configured", core);
            return false;
        }
        let args = [pid.as_usize(), affinity.as_raw() as isize as usize];
        self.system_call(Self::repin, &args) == 0
    }

    fn reprioritise(guard: &mut SchedGuard<'_, P>, args: &[usize]) -> i32 {
        let pid = Pid::new(args[0] as u16);
        if guard.set_priority(pid, args[1] as isize as i32) {
            0
        } else {
            -1
        }
    }

    fn repin(guard: &mut SchedGuard<'_, P>, args: &[usize]) -> i32 {
        let pid = Pid::new(args[0] as u16);
        if guard.set_affinity(pid, Affinity::from_raw(args[1] as isize as i32)) {
            0
        } else {
            -1
        }
    }
}
