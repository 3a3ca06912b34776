//! Process control blocks, their arena and the ready queue.
//! No behaviour beyond bookkeeping lives here; the scheduler decides.

pub mod context;
pub mod process;
pub mod queue;
pub mod table;

pub use process::{Affinity, Pid, ProcRole, ProcessConfig, ProcessControlBlock};
