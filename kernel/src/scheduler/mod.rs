//! The scheduler engine.
//!
//! One `Scheduler` value exists per system, usually in a `static`. Every
//! entry point borrows it explicitly; the ready queue is only reachable
//! through a `SchedGuard`, which only the core holding the scheduler
//! permit can create.

use core::cell::UnsafeCell;
use core::sync::atomic::AtomicUsize;

use crate::bridge::CallBridge;
use crate::config::{SchedulerConfig, MAX_CORES, SLEEP_STACK_SIZE, SYSTEM_STACK_SIZE};
use crate::cpu::{PercpuBlock, NO_CORE};
use crate::event::{Event, EventFlags};
use crate::platform::{CoreId, Entry, Platform};
use crate::process::context::{InitialFrame, StackStorage};
use crate::process::table::ProcessTable;
use crate::process::{Affinity, Pid, ProcRole, ProcessConfig, ProcessControlBlock};

pub mod dispatch;
pub mod permit;
pub mod wait;

pub use dispatch::Dispatch;
pub use permit::{SchedGuard, SchedState};

const SYSTEM_STACK: StackStorage<SYSTEM_STACK_SIZE> = StackStorage::new();
const SLEEP_STACK: StackStorage<SLEEP_STACK_SIZE> = StackStorage::new();

pub struct Scheduler<P: Platform> {
    platform: P,
    config: spin::Once<SchedulerConfig>,
    table: ProcessTable,
    cpus: [PercpuBlock; MAX_CORES],
    // only touched through `SchedGuard`
    state: UnsafeCell<SchedState>,
    permit_holder: AtomicUsize,
    bridge: CallBridge<P>,
    system_stacks: [StackStorage<SYSTEM_STACK_SIZE>; MAX_CORES],
    sleep_stacks: [StackStorage<SLEEP_STACK_SIZE>; MAX_CORES],
}

// Safety: `state` is only accessed by the core holding the scheduler
// permit (see `Scheduler::lock`), everything else is atomic
unsafe impl<P: Platform> Sync for Scheduler<P> {}

impl<P: Platform> Scheduler<P> {
    pub const fn new(platform: P) -> Self {
        Self {
            platform,
            config: spin::Once::new(),
            table: ProcessTable::new(),
            cpus: [PercpuBlock::EMPTY; MAX_CORES],
            state: UnsafeCell::new(SchedState::new()),
            permit_holder: AtomicUsize::new(NO_CORE),
            bridge: CallBridge::new(),
            system_stacks: [SYSTEM_STACK; MAX_CORES],
            sleep_stacks: [SLEEP_STACK; MAX_CORES],
        }
    }

    /// Creates the per-core system and sleep processes and hands out the
    /// single scheduler permit. Must run once, before any other call.
    pub fn init(&'static self, config: SchedulerConfig) {
        config.validate();
        if self.config.is_completed() {
            panic!("Scheduler::init: initialised twice");
        }
        self.config.call_once(|| config);
        self.platform.sem_set_permits(1);

        // system processes are entered through `startup`, never through a
        // swap into a fresh frame, so no frame is registered for them
        for core in 0..config.cores {
            let pcb = self.table.allocate(
                ProcRole::System,
                config.system_priority,
                Affinity::Exclusive(core),
            );
            let storage = &self.system_stacks[core];
            // Safety: each embedded stack is attached to exactly one PCB
            unsafe { pcb.stack.attach(storage.as_mut_ptr(), storage.len()) };
            self.cpus[core].set_system(pcb.get_pid());
            self.cpus[core].event.init(EventFlags::CONTEXT_SWITCH);
        }

        for core in 0..config.cores {
            let storage = &self.sleep_stacks[core];
            let sleep = ProcessConfig {
                priority: config.sleep_priority,
                affinity: Affinity::Exclusive(core),
            };
            // Safety: as above
            let pid = unsafe {
                self.register(
                    ProcRole::Sleep,
                    storage.as_mut_ptr(),
                    storage.len(),
                    Self::sleep_entry,
                    self.as_arg(),
                    sleep,
                )
            };
            self.cpus[core].set_sleep(pid);
        }

        log::info!(
            "Scheduler::init: {} core(s), {} process slots in use",
            config.cores,
            self.table.len()
        );
    }

    /// Registers a process that may run on any core
    pub fn spawn(
        &'static self,
        stack: &'static mut [u8],
        entry: Entry,
        arg: usize,
        priority: i32,
    ) -> Pid {
        self.spawn_with(stack, entry, arg, ProcessConfig::with_priority(priority))
    }

    /// Registers a process: zeroes its stack, asks the platform for its
    /// first frame and queues it. The stack belongs to the process from
    /// now on. Affinity to a core outside the configuration is fatal.
    pub fn spawn_with(
        &'static self,
        stack: &'static mut [u8],
        entry: Entry,
        arg: usize,
        config: ProcessConfig,
    ) -> Pid {
        if let Some(core) = config.affinity.core() {
            if core >= self.cores() {
                log::error!("Scheduler::spawn_with: bad affinity {:?}", config.affinity);
                panic!("Scheduler::spawn_with: affinity to unconfigured core {}", core);
            }
        }
        // Safety: the exclusive 'static borrow is consumed here
        unsafe {
            self.register(
                ProcRole::User,
                stack.as_mut_ptr(),
                stack.len(),
                entry,
                arg,
                config,
            )
        }
    }

    /// Safety: `base..base + size` must be exclusively owned by the new
    /// process for the lifetime of the scheduler
    unsafe fn register(
        &'static self,
        role: ProcRole,
        base: *mut u8,
        size: usize,
        entry: Entry,
        arg: usize,
        config: ProcessConfig,
    ) -> Pid {
        let pcb = self.table.allocate(role, config.priority, config.affinity);
        let pid = pcb.get_pid();
        pcb.stack.attach(base, size);
        pcb.set_entry(entry);

        let frame = InitialFrame {
            pid,
            stack_base: pcb.stack.base(),
            stack_top: pcb.stack.top(),
            entry,
            entry_arg: arg,
            on_exit: Self::exit_trampoline,
            exit_arg: self.as_arg(),
        };
        let sp = self.platform.register_proc(&frame);
        pcb.stack.set_stack_pointer(sp);

        let core = self.core_id();
        self.take_permit(core);
        self.lock(core).push(pid);
        self.release_permit(core);
        self.raise_all(EventFlags::CONTEXT_SWITCH);

        log::info!(
            "Scheduler::register: pid {} ({:?}), priority {}, affinity {:?}",
            pid,
            role,
            config.priority,
            config.affinity
        );
        pid
    }

    /// Launches the secondary cores and turns the calling (boot) core
    /// into its system process. Never returns.
    pub fn start(&'static self) -> ! {
        let boot = self.core_id();
        for core in (0..self.cores()).filter(|core| *core != boot) {
            self.launch_core(core);
        }
        log::info!("Scheduler::start: core {} entering the scheduler loop", boot);
        self.platform.startup(
            self.system_pcb(boot).stack.stack_pointer(),
            Self::system_entry,
            self.as_arg(),
        )
    }

    /// Starts `core` on its system process. An invalid core is fatal.
    pub fn launch_core(&'static self, core: CoreId) {
        if core >= self.cores() || core == self.core_id() {
            log::error!("Scheduler::launch_core: invalid core id {}", core);
            panic!("Scheduler::launch_core: invalid core id {}", core);
        }
        if self
            .platform
            .core_launch(core, Self::secondary_entry, self.as_arg())
        {
            log::info!("Scheduler::launch_core: core {} launched", core);
        } else {
            log::warn!(
                "Scheduler::launch_core: platform cannot launch core {}, ignored",
                core
            );
        }
    }

    fn secondary_entry(arg: usize) -> ! {
        let sch = Self::from_arg(arg);
        let core = sch.core_id();
        log::info!("Scheduler::secondary_entry: core {} booting", core);
        sch.platform.startup(
            sch.system_pcb(core).stack.stack_pointer(),
            Self::system_entry,
            arg,
        )
    }

    fn system_entry(arg: usize) -> ! {
        Self::from_arg(arg).system_loop()
    }

    fn sleep_entry(arg: usize) -> usize {
        Self::from_arg(arg).sleep_loop()
    }

    /// Where every process lands when its entry returns
    fn exit_trampoline(arg: usize) -> ! {
        Self::from_arg(arg).exit_current()
    }

    fn as_arg(&'static self) -> usize {
        self as *const Self as usize
    }

    fn from_arg(arg: usize) -> &'static Self {
        // Safety: only ever built by `as_arg` from a 'static reference
        unsafe { &*(arg as *const Self) }
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn config(&self) -> &SchedulerConfig {
        match self.config.get() {
            Some(config) => config,
            None => panic!("Scheduler::config: scheduler not initialised"),
        }
    }

    pub fn cores(&self) -> usize {
        self.config().cores
    }

    /// The calling core. A core outside the configuration is fatal.
    pub fn core_id(&self) -> CoreId {
        let core = self.platform.core_get_id();
        if core >= self.cores() {
            log::error!("Scheduler::core_id: platform reported core {}", core);
            panic!("Scheduler::core_id: core {} is not configured", core);
        }
        core
    }

    pub fn process(&self, pid: Pid) -> Option<&ProcessControlBlock> {
        self.table.get(pid)
    }

    pub fn process_count(&self) -> usize {
        self.table.len()
    }

    pub fn cpu(&self, core: CoreId) -> &PercpuBlock {
        &self.cpus[core]
    }

    pub fn events(&self, core: CoreId) -> &Event {
        &self.cpus[core].event
    }

    pub fn bridge(&self) -> &CallBridge<P> {
        &self.bridge
    }

    pub fn system_pid(&self, core: CoreId) -> Pid {
        match self.cpus[core].system() {
            Some(pid) => pid,
            None => panic!("Scheduler::system_pid: core {} has no system process", core),
        }
    }

    pub fn sleep_pid(&self, core: CoreId) -> Option<Pid> {
        self.cpus[core].sleep()
    }

    fn system_pcb(&self, core: CoreId) -> &ProcessControlBlock {
        self.table.pcb(self.system_pid(core))
    }

    /// Whatever `core` executes now: its dispatched process, or its
    /// system process between dispatches
    pub(crate) fn running_on(&self, core: CoreId) -> Pid {
        self.cpus[core]
            .current()
            .unwrap_or_else(|| self.system_pid(core))
    }

    pub(crate) fn raise_all(&self, flags: EventFlags) {
        for cpu in &self.cpus[..self.cores()] {
            cpu.event.add(flags);
        }
        self.platform.signal_event();
    }
}
