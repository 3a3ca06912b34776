use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicUsize, Ordering};

use crate::platform::{Entry, ExitHook};

use super::process::Pid;

/// Stack frames are aligned to 8 bytes on every supported target
const STACK_ALIGN: usize = 8;

/// Stack descriptor of a process.
/// The scheduler never touches the stack contents after zeroing them at
/// registration; it only stores the saved stack pointer, whose address
/// is handed to the platform swap routine.
#[derive(Debug)]
pub struct Stack {
    base: AtomicUsize,
    size: AtomicUsize,
    sp: AtomicUsize,
}

impl Stack {
    pub const fn new() -> Self {
        Self {
            base: AtomicUsize::new(0),
            size: AtomicUsize::new(0),
            sp: AtomicUsize::new(0),
        }
    }

    /// Takes over a memory region and zeroes it.
    ///
    /// Safety: `base..base + size` must be writable and owned by this
    /// process for the rest of its life.
    pub(crate) unsafe fn attach(&self, base: *mut u8, size: usize) {
        core::ptr::write_bytes(base, 0, size);
        self.base.store(base as usize, Ordering::SeqCst);
        self.size.store(size, Ordering::SeqCst);
        self.sp.store(self.top(), Ordering::SeqCst);
    }

    pub fn base(&self) -> usize {
        self.base.load(Ordering::SeqCst)
    }

    pub fn size(&self) -> usize {
        self.size.load(Ordering::SeqCst)
    }

    /// Highest aligned address of the region; stacks grow down
    pub fn top(&self) -> usize {
        (self.base() + self.size()) & !(STACK_ALIGN - 1)
    }

    pub fn stack_pointer(&self) -> usize {
        self.sp.load(Ordering::SeqCst)
    }

    pub(crate) fn set_stack_pointer(&self, sp: usize) {
        self.sp.store(sp, Ordering::SeqCst);
    }

    /// The save slot the platform writes into on a swap
    pub fn slot(&self) -> &AtomicUsize {
        &self.sp
    }

    pub fn contains(&self, addr: usize) -> bool {
        (self.base()..self.base() + self.size()).contains(&addr)
    }
}

impl Default for Stack {
    fn default() -> Self {
        Self::new()
    }
}

/// What the platform needs to build the first frame of a process:
/// the first swap into the stack enters `entry(entry_arg)`, and a return
/// from `entry` continues in `on_exit(exit_arg)`.
#[derive(Debug, Clone, Copy)]
pub struct InitialFrame {
    pub pid: Pid,
    pub stack_base: usize,
    pub stack_top: usize,
    pub entry: Entry,
    pub entry_arg: usize,
    pub on_exit: ExitHook,
    pub exit_arg: usize,
}

/// Stack memory the scheduler embeds for its own system and sleep
/// processes
pub struct StackStorage<const N: usize> {
    data: UnsafeCell<[u8; N]>,
}

// Safety: the region is only ever handed out once, to a single PCB, and
// afterwards only the owning process (through the platform swap) touches it
unsafe impl<const N: usize> Sync for StackStorage<N> {}

impl<const N: usize> StackStorage<N> {
    pub const fn new() -> Self {
        Self {
            data: UnsafeCell::new([0; N]),
        }
    }

    pub fn as_mut_ptr(&self) -> *mut u8 {
        self.data.get() as *mut u8
    }

    pub const fn len(&self) -> usize {
        N
    }
}

impl<const N: usize> Default for StackStorage<N> {
    fn default() -> Self {
        Self::new()
    }
}
