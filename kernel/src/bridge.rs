//! Deferred cross-core call slot.
//!
//! Exactly one call can be pending. The submitter claims the slot, writes
//! the payload and publishes it; the service-call handler of whichever
//! core observes it first claims it for execution, so it runs exactly
//! once. The slot state machine is a single atomic byte:
//!
//! Empty -> Writing -> Pending -> Running -> Empty

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicBool, AtomicI32, AtomicU16, AtomicU8, Ordering};

use primitive_enum::primitive_enum;

use crate::config::MAX_CALL_ARGS;
use crate::platform::{CoreId, Platform};
use crate::process::Pid;
use crate::scheduler::permit::SchedGuard;

primitive_enum! {
CallState u8;
    Empty = 0,
    Writing = 1,
    Pending = 2,
    Running = 3,
}

/// A function executed under the scheduler permit on behalf of a process
pub type SystemCall<P> = fn(&mut SchedGuard<'_, P>, &[usize]) -> i32;

pub enum Call<P: Platform> {
    /// Raise "scheduler available" on every core but `from` and release
    /// the permit `from` holds
    SchedulerAvailable { from: CoreId },
    System(SystemCall<P>),
}

// derive would require `P: Clone`
impl<P: Platform> Clone for Call<P> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<P: Platform> Copy for Call<P> {}

struct Payload<P: Platform> {
    call: Option<Call<P>>,
    argc: usize,
    argv: [usize; MAX_CALL_ARGS],
}

pub struct CallBridge<P: Platform> {
    state: AtomicU8,
    payload: UnsafeCell<Payload<P>>,
    result: AtomicI32,
    complete: AtomicBool,
    caller: AtomicU16,
}

// Safety: the payload is only written by the thread that moved the state
// Empty -> Writing, and only read by the thread that moved it
// Pending -> Running
unsafe impl<P: Platform> Sync for CallBridge<P> {}

impl<P: Platform> CallBridge<P> {
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(CallState::Empty as u8),
            payload: UnsafeCell::new(Payload {
                call: None,
                argc: 0,
                argv: [0; MAX_CALL_ARGS],
            }),
            result: AtomicI32::new(0),
            complete: AtomicBool::new(true),
            caller: AtomicU16::new(u16::MAX),
        }
    }

    /// No call is being written, pending or running
    pub fn is_idle(&self) -> bool {
        self.state.load(Ordering::SeqCst) == CallState::Empty as u8
    }

    /// Claims the slot, spinning while another call is in flight, and
    /// publishes `call`. Too many arguments is fatal.
    pub fn submit(&self, call: Call<P>, args: &[usize], caller: Pid) {
        if args.len() > MAX_CALL_ARGS {
            panic!(
                "CallBridge::submit: {} arguments, at most {}",
                args.len(),
                MAX_CALL_ARGS
            );
        }

        while self
            .state
            .compare_exchange(
                CallState::Empty as u8,
                CallState::Writing as u8,
                Ordering::Acquire,
                Ordering::Relaxed,
            )
            .is_err()
        {
            core::hint::spin_loop();
        }

        // Safety: we own the slot while it is in `Writing`
        let payload = unsafe { &mut *self.payload.get() };
        payload.call = Some(call);
        payload.argc = args.len();
        payload.argv[..args.len()].copy_from_slice(args);

        self.caller.store(caller.as_u16(), Ordering::SeqCst);
        self.complete.store(false, Ordering::SeqCst);
        self.state.store(CallState::Pending as u8, Ordering::Release);
        log::trace!("CallBridge::submit: call from pid {} pending", caller);
    }

    /// Claims the pending call for execution. At most one caller ever
    /// gets `Some` for a given submission.
    pub fn take(&self) -> Option<(Call<P>, [usize; MAX_CALL_ARGS], usize)> {
        self.state
            .compare_exchange(
                CallState::Pending as u8,
                CallState::Running as u8,
                Ordering::Acquire,
                Ordering::Relaxed,
            )
            .ok()?;

        // Safety: we own the slot while it is in `Running`
        let payload = unsafe { &mut *self.payload.get() };
        let call = payload.call.take()?;
        Some((call, payload.argv, payload.argc))
    }

    /// Publishes the result and frees the slot
    pub fn finish(&self, result: i32) {
        self.result.store(result, Ordering::SeqCst);
        self.complete.store(true, Ordering::SeqCst);
        self.state.store(CallState::Empty as u8, Ordering::Release);
    }

    pub fn is_complete(&self) -> bool {
        self.complete.load(Ordering::SeqCst)
    }

    pub fn result(&self) -> i32 {
        self.result.load(Ordering::SeqCst)
    }

    /// pid of the process that submitted the last call
    pub fn caller(&self) -> Pid {
        Pid::new(self.caller.load(Ordering::SeqCst))
    }
}

impl<P: Platform> Default for CallBridge<P> {
    fn default() -> Self {
        Self::new()
    }
}
