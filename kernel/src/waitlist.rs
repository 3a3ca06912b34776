//! Keyed waiter table, for locks built on top of the scheduler.
//!
//! A lock implementation uses the lock address (or any other word) as the
//! key: a contending process waits on it, the unlocking side notifies it.
//! Waiters of one key are woken oldest first.

use crate::platform::{Deadline, Platform};
use crate::process::Pid;
use crate::scheduler::Scheduler;

#[derive(Debug, Clone, Copy)]
struct Waiter {
    key: usize,
    pid: Pid,
    // arrival order
    seq: u64,
    used: bool,
}

impl Waiter {
    const FREE: Waiter = Waiter {
        key: 0,
        pid: Pid::INVALID,
        seq: 0,
        used: false,
    };
}

struct Waiters<const N: usize> {
    slots: [Waiter; N],
    next_seq: u64,
}

pub struct WaitList<const N: usize> {
    inner: spin::Mutex<Waiters<N>>,
}

impl<const N: usize> WaitList<N> {
    pub const fn new() -> Self {
        Self {
            inner: spin::Mutex::new(Waiters {
                slots: [Waiter::FREE; N],
                next_seq: 0,
            }),
        }
    }

    /// Registers `pid` as waiting on `key`. A process waits on one key at
    /// a time, a stale registration is replaced. A full table is fatal.
    pub fn enqueue(&self, key: usize, pid: Pid) {
        let mut inner = self.inner.lock();
        let seq = inner.next_seq;
        inner.next_seq += 1;

        let slots = &mut inner.slots;
        if let Some(stale) = slots.iter_mut().find(|w| w.used && w.pid == pid) {
            stale.used = false;
        }
        let Some(slot) = slots.iter_mut().find(|w| !w.used) else {
            log::error!("WaitList::enqueue: {} waiters, table full", N);
            panic!("WaitList::enqueue: no free wait slot for pid {}", pid);
        };
        *slot = Waiter {
            key,
            pid,
            seq,
            used: true,
        };
    }

    /// Unregisters and returns the oldest waiter on `key`
    pub fn dequeue(&self, key: usize) -> Option<Pid> {
        let mut inner = self.inner.lock();
        let oldest = inner
            .slots
            .iter_mut()
            .filter(|w| w.used && w.key == key)
            .min_by_key(|w| w.seq)?;
        oldest.used = false;
        Some(oldest.pid)
    }

    /// Drops the registration of `pid`, e.g. after a wait timed out
    pub fn remove(&self, pid: Pid) -> bool {
        let mut inner = self.inner.lock();
        match inner.slots.iter_mut().find(|w| w.used && w.pid == pid) {
            Some(waiter) => {
                waiter.used = false;
                true
            }
            None => false,
        }
    }

    pub fn is_waiting(&self, key: usize) -> bool {
        self.inner
            .lock()
            .slots
            .iter()
            .any(|w| w.used && w.key == key)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().slots.iter().filter(|w| w.used).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Blocks the calling process on `key`.
    /// Readiness is cleared before the registration is visible, so a
    /// notify that finds the registration always wakes the process.
    pub fn wait<P: Platform>(&self, sch: &Scheduler<P>, key: usize, deadline: Deadline) {
        if deadline == Deadline::NoWait {
            return;
        }
        let pid = sch.running_on(sch.core_id());
        sch.block(pid);
        self.enqueue(key, pid);
        sch.sleep(deadline, pid);
    }

    /// Wakes the oldest waiter on `key`; false if nobody waited
    pub fn notify<P: Platform>(&self, sch: &Scheduler<P>, key: usize) -> bool {
        match self.dequeue(key) {
            Some(pid) => {
                sch.notify_pid(pid);
                true
            }
            None => false,
        }
    }

    /// Wakes every waiter on `key`, returns how many
    pub fn notify_all<P: Platform>(&self, sch: &Scheduler<P>, key: usize) -> usize {
        let mut woken = 0;
        while self.notify(sch, key) {
            woken += 1;
        }
        woken
    }
}

impl<const N: usize> Default for WaitList<N> {
    fn default() -> Self {
        Self::new()
    }
}
