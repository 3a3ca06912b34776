//! Host stand-in for board support code.
//!
//! Stack swaps are only recorded, never performed: a test plays the part
//! of the running process by calling scheduler entry points directly, and
//! the part of the system process by calling `schedule_once`. The calling
//! core is a thread local, so a single test thread can act as any core.

#![allow(dead_code)]

use std::cell::Cell;
use std::sync::atomic::{AtomicI32, AtomicPtr, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use hartsched::platform::CoreEntry;
use hartsched::process::context::InitialFrame;
use hartsched::{CoreId, Pid, Platform, Scheduler, SchedulerConfig};

thread_local! {
    static CORE: Cell<CoreId> = Cell::new(0);
}

/// Makes the calling thread act as `core`
pub fn set_core(core: CoreId) {
    CORE.with(|c| c.set(core));
}

/// A requested stack swap, resolved to the owning processes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Swap {
    pub from: Option<Pid>,
    pub to: Option<Pid>,
}

#[derive(Default)]
pub struct MockPlatform {
    permits: AtomicI32,
    sch: AtomicPtr<Scheduler<MockPlatform>>,
    launch_supported: bool,
    pub alarms: Mutex<Vec<(Duration, Pid)>>,
    pub swaps: Mutex<Vec<Swap>>,
    pub launches: Mutex<Vec<CoreId>>,
    pub frames: Mutex<Vec<InitialFrame>>,
    pub polls: AtomicUsize,
    pub signals: AtomicUsize,
    pub calls: AtomicUsize,
}

impl MockPlatform {
    pub fn with_launch() -> Self {
        Self {
            launch_supported: true,
            ..Self::default()
        }
    }

    /// Lets `request_call` reach the scheduler's service-call handler
    pub fn attach(&self, sch: &'static Scheduler<MockPlatform>) {
        let ptr = sch as *const Scheduler<MockPlatform> as *mut Scheduler<MockPlatform>;
        self.sch.store(ptr, Ordering::SeqCst);
    }

    fn scheduler(&self) -> Option<&'static Scheduler<MockPlatform>> {
        let ptr = self.sch.load(Ordering::SeqCst);
        // Safety: only ever set from a leaked 'static scheduler
        unsafe { ptr.as_ref() }
    }

    fn owner(&self, slot: &AtomicUsize) -> Option<Pid> {
        let sch = self.scheduler()?;
        (0..sch.process_count())
            .map(|id| Pid::new(id as u16))
            .find(|pid| {
                sch.process(*pid)
                    .map_or(false, |pcb| std::ptr::eq(pcb.stack.slot(), slot))
            })
    }

    pub fn swaps(&self) -> Vec<Swap> {
        self.swaps.lock().unwrap().clone()
    }

    pub fn last_swap(&self) -> Option<Swap> {
        self.swaps.lock().unwrap().last().copied()
    }

    pub fn alarms(&self) -> Vec<(Duration, Pid)> {
        self.alarms.lock().unwrap().clone()
    }

    pub fn permits(&self) -> i32 {
        self.permits.load(Ordering::SeqCst)
    }
}

impl Platform for MockPlatform {
    fn poll_event(&self) {
        self.polls.fetch_add(1, Ordering::SeqCst);
        std::thread::yield_now();
    }

    fn signal_event(&self) {
        self.signals.fetch_add(1, Ordering::SeqCst);
    }

    fn set_alarm(&self, at: Duration, pid: Pid) {
        self.alarms.lock().unwrap().push((at, pid));
    }

    fn core_launch(&self, core: CoreId, _entry: CoreEntry, _arg: usize) -> bool {
        if !self.launch_supported {
            return false;
        }
        self.launches.lock().unwrap().push(core);
        true
    }

    fn core_get_id(&self) -> CoreId {
        CORE.with(|c| c.get())
    }

    fn sem_set_permits(&self, permits: u32) {
        self.permits.store(permits as i32, Ordering::SeqCst);
    }

    fn sem_try_take(&self) -> bool {
        self.permits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |p| {
                (p > 0).then_some(p - 1)
            })
            .is_ok()
    }

    fn sem_take(&self) {
        let started = Instant::now();
        while !self.sem_try_take() {
            if started.elapsed() > Duration::from_secs(5) {
                panic!("MockPlatform::sem_take: permit deadlock");
            }
            std::thread::yield_now();
        }
    }

    fn sem_give(&self) {
        self.permits.fetch_add(1, Ordering::SeqCst);
    }

    fn register_proc(&self, frame: &InitialFrame) -> usize {
        self.frames.lock().unwrap().push(*frame);
        frame.stack_top - 64
    }

    fn switch_stack(&self, save_to: &AtomicUsize, restore_from: &AtomicUsize) {
        let swap = Swap {
            from: self.owner(save_to),
            to: self.owner(restore_from),
        };
        self.swaps.lock().unwrap().push(swap);
    }

    fn startup(&self, _sp: usize, _entry: CoreEntry, _arg: usize) -> ! {
        panic!("MockPlatform::startup: cannot leave the host thread");
    }

    fn request_call(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(sch) = self.scheduler() {
            sch.service_call();
        }
    }
}

pub fn boot(cores: usize) -> &'static Scheduler<MockPlatform> {
    boot_with(MockPlatform::default(), cores)
}

pub fn boot_with(platform: MockPlatform, cores: usize) -> &'static Scheduler<MockPlatform> {
    set_core(0);
    let sch: &'static Scheduler<MockPlatform> = Box::leak(Box::new(Scheduler::new(platform)));
    sch.platform().attach(sch);
    sch.init(SchedulerConfig::with_cores(cores));
    sch
}

pub fn stack(size: usize) -> &'static mut [u8] {
    Box::leak(vec![0u8; size].into_boxed_slice())
}

pub fn entry(arg: usize) -> usize {
    arg
}

pub fn spawn(sch: &'static Scheduler<MockPlatform>, priority: i32) -> Pid {
    sch.spawn(stack(1024), entry, 0, priority)
}
