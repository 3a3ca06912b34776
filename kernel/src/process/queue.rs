//! The ready queue: an intrusive doubly-linked list over arena indices.
//!
//! Order, most eligible first:
//!  1. the end of the queue sorts after every real record
//!  2. ready before not ready
//!  3. lower priority value before higher
//!  4. pinned to the querying core before anything else
//! Remaining ties keep insertion order.

use core::cmp::Ordering;

use crate::config::MAX_PROCS;
use crate::platform::CoreId;

use super::process::{Pid, ProcessControlBlock};
use super::table::ProcessTable;

/// Compares two records for the core asking "what do I run next".
/// `Less` means `a` runs before `b`.
pub fn order(
    a: Option<&ProcessControlBlock>,
    b: Option<&ProcessControlBlock>,
    core: CoreId,
) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(a), Some(b)) => rank(a, core).cmp(&rank(b, core)),
    }
}

// tuple comparison does the rest: false < true, ascending priority
fn rank(pcb: &ProcessControlBlock, core: CoreId) -> (bool, i32, bool) {
    (
        !pcb.is_ready(),
        pcb.priority(),
        !pcb.affinity().fits(core),
    )
}

#[derive(Debug, Clone, Copy)]
struct Link {
    prev: Option<usize>,
    next: Option<usize>,
    linked: bool,
}

impl Link {
    const UNLINKED: Link = Link {
        prev: None,
        next: None,
        linked: false,
    };
}

pub struct ReadyQueue {
    links: [Link; MAX_PROCS],
    head: Option<usize>,
    tail: Option<usize>,
    len: usize,
}

impl ReadyQueue {
    pub const fn new() -> Self {
        Self {
            links: [Link::UNLINKED; MAX_PROCS],
            head: None,
            tail: None,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn contains(&self, pid: Pid) -> bool {
        self.links
            .get(pid.as_usize())
            .map_or(false, |link| link.linked)
    }

    pub fn front(&self) -> Option<Pid> {
        self.head.map(|idx| Pid::new(idx as u16))
    }

    /// Inserts before the first record `pid` must precede.
    /// A pid that is already linked is left where it is, so pushing is
    /// idempotent. Returns whether the pid was inserted.
    pub fn push(&mut self, pid: Pid, table: &ProcessTable, core: CoreId) -> bool {
        let idx = pid.as_usize();
        if self.contains(pid) {
            log::trace!("ReadyQueue::push: pid {} already queued", pid);
            return false;
        }
        let pcb = table.pcb(pid);

        let mut cursor = self.head;
        while let Some(at) = cursor {
            let other = table.pcb(Pid::new(at as u16));
            if order(Some(pcb), Some(other), core) == Ordering::Less {
                break;
            }
            cursor = self.links[at].next;
        }

        match cursor {
            Some(before) => self.link_before(idx, before),
            None => self.link_back(idx),
        }
        true
    }

    pub fn pop_front(&mut self) -> Option<Pid> {
        let idx = self.head?;
        self.unlink(idx);
        Some(Pid::new(idx as u16))
    }

    /// Find-by-identity removal
    pub fn remove(&mut self, pid: Pid) -> bool {
        if !self.contains(pid) {
            return false;
        }
        self.unlink(pid.as_usize());
        true
    }

    /// Re-establishes the order for `core`. Needed whenever readiness or
    /// priority changed behind the queue's back, or the querying core
    /// changed. Stable: equal records keep their relative order.
    pub fn sort(&mut self, table: &ProcessTable, core: CoreId) {
        let mut order_buf = [0usize; MAX_PROCS];
        let mut n = 0;
        let mut cursor = self.head;
        while let Some(idx) = cursor {
            order_buf[n] = idx;
            n += 1;
            cursor = self.links[idx].next;
        }

        for &idx in &order_buf[..n] {
            self.unlink(idx);
        }
        for &idx in &order_buf[..n] {
            self.push(Pid::new(idx as u16), table, core);
        }
    }

    /// True if no neighbouring pair is out of order for `core`
    pub fn is_sorted(&self, table: &ProcessTable, core: CoreId) -> bool {
        let mut cursor = self.head;
        while let Some(idx) = cursor {
            let next = self.links[idx].next;
            let a = table.get(Pid::new(idx as u16));
            let b = next.and_then(|n| table.get(Pid::new(n as u16)));
            if next.is_some() && order(a, b, core) == Ordering::Greater {
                return false;
            }
            cursor = next;
        }
        true
    }

    pub fn iter(&self) -> Iter<'_> {
        Iter {
            queue: self,
            cursor: self.head,
        }
    }

    fn link_before(&mut self, idx: usize, before: usize) {
        let prev = self.links[before].prev;
        self.links[idx] = Link {
            prev,
            next: Some(before),
            linked: true,
        };
        self.links[before].prev = Some(idx);
        match prev {
            Some(p) => self.links[p].next = Some(idx),
            None => self.head = Some(idx),
        }
        self.len += 1;
    }

    fn link_back(&mut self, idx: usize) {
        self.links[idx] = Link {
            prev: self.tail,
            next: None,
            linked: true,
        };
        match self.tail {
            Some(t) => self.links[t].next = Some(idx),
            None => self.head = Some(idx),
        }
        self.tail = Some(idx);
        self.len += 1;
    }

    fn unlink(&mut self, idx: usize) {
        let Link { prev, next, linked } = self.links[idx];
        assert!(linked, "ReadyQueue::unlink: index {} not linked", idx);
        match prev {
            Some(p) => self.links[p].next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.links[n].prev = prev,
            None => self.tail = prev,
        }
        self.links[idx] = Link::UNLINKED;
        self.len -= 1;
    }
}

impl Default for ReadyQueue {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Iter<'a> {
    queue: &'a ReadyQueue,
    cursor: Option<usize>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = Pid;

    fn next(&mut self) -> Option<Pid> {
        let idx = self.cursor?;
        self.cursor = self.queue.links[idx].next;
        Some(Pid::new(idx as u16))
    }
}
