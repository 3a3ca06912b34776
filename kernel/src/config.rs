/// Maximum supported cores on the target.
/// Note that every core owns a system stack and a sleep stack, both
/// allocated inside the scheduler.
pub const MAX_CORES: usize = 4;

/// Capacity of the process arena, system and sleep processes included
pub const MAX_PROCS: usize = 32;

pub const SYSTEM_STACK_SIZE: usize = 4 * 1024;
pub const SLEEP_STACK_SIZE: usize = 4 * 1024;

/// Fixed argument array length of the deferred-call slot
pub const MAX_CALL_ARGS: usize = 32;

/// Negative: the system process must never be preempted
pub const SYSTEM_PROC_PRIORITY: i32 = -1;
pub const SLEEP_PROC_PRIORITY: i32 = 20;

/// Runtime configuration, supplied once to `Scheduler::init`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// hardware threads actually brought up, `1..=MAX_CORES`
    pub cores: usize,
    pub system_priority: i32,
    pub sleep_priority: i32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            cores: 1,
            system_priority: SYSTEM_PROC_PRIORITY,
            sleep_priority: SLEEP_PROC_PRIORITY,
        }
    }
}

impl SchedulerConfig {
    pub fn with_cores(cores: usize) -> Self {
        Self {
            cores,
            ..Self::default()
        }
    }

    /// halts on a configuration the scheduler cannot run with
    pub fn validate(&self) {
        if self.cores == 0 || self.cores > MAX_CORES {
            log::error!("SchedulerConfig::validate: {} cores requested", self.cores);
            panic!(
                "SchedulerConfig::validate: cores must be within 1..={}, got {}",
                MAX_CORES, self.cores
            );
        }
        if self.system_priority >= 0 {
            panic!(
                "SchedulerConfig::validate: system priority must be negative, got {}",
                self.system_priority
            );
        }
        // every core needs a system and a sleep process
        assert!(2 * self.cores <= MAX_PROCS);
    }
}
