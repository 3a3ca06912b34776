use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use bitflags::bitflags;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EventFlags: u32 {
        /// the scheduler loop should pick a (possibly) new process
        const CONTEXT_SWITCH = 0x0000_0001;
        /// another core released the scheduler permit
        const SCH_AVAILABLE = 0x0000_0002;
        /// this core is handing off to its scheduler loop and holds, or
        /// is about to hold, the permit
        const PREEMPT_DISABLED = 0x0000_0004;
    }
}

/// Per-core event word.
/// Written from interrupt context without the permit, so every access
/// is a single atomic operation on the word.
#[derive(Debug)]
pub struct Event {
    active: AtomicU32,
    fresh: AtomicBool,
}

impl Event {
    pub const fn new() -> Self {
        Self {
            active: AtomicU32::new(0),
            fresh: AtomicBool::new(false),
        }
    }

    pub fn init(&self, flags: EventFlags) {
        self.active.store(flags.bits(), Ordering::SeqCst);
        self.fresh.store(true, Ordering::SeqCst);
    }

    /// Consumes freshness and reports whether any flag of `mask` is set
    pub fn check(&self, mask: EventFlags) -> bool {
        self.fresh.store(false, Ordering::SeqCst);
        self.active.load(Ordering::SeqCst) & mask.bits() != 0
    }

    pub fn add(&self, mask: EventFlags) {
        self.active.fetch_or(mask.bits(), Ordering::SeqCst);
        self.fresh.store(true, Ordering::SeqCst);
    }

    pub fn clear(&self, mask: EventFlags) {
        self.active.fetch_and(!mask.bits(), Ordering::SeqCst);
    }

    pub fn clear_all(&self) {
        self.active.store(0, Ordering::SeqCst);
    }

    /// true if something was added since the last `check`
    pub fn is_fresh(&self) -> bool {
        self.fresh.load(Ordering::SeqCst)
    }

    pub fn flags(&self) -> EventFlags {
        EventFlags::from_bits_truncate(self.active.load(Ordering::SeqCst))
    }
}

impl Default for Event {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_reports_any_bit_of_mask() {
        let event = Event::new();
        event.add(EventFlags::CONTEXT_SWITCH);
        assert!(event.check(EventFlags::CONTEXT_SWITCH | EventFlags::SCH_AVAILABLE));
        assert!(!event.check(EventFlags::PREEMPT_DISABLED));
    }

    #[test]
    fn check_consumes_freshness_but_not_flags() {
        let event = Event::new();
        assert!(!event.is_fresh());
        event.add(EventFlags::SCH_AVAILABLE);
        assert!(event.is_fresh());
        assert!(event.check(EventFlags::SCH_AVAILABLE));
        assert!(!event.is_fresh());
        // still set until cleared
        assert!(event.check(EventFlags::SCH_AVAILABLE));
    }

    #[test]
    fn clear_only_touches_masked_bits() {
        let event = Event::new();
        event.init(EventFlags::all());
        event.clear(EventFlags::PREEMPT_DISABLED);
        assert_eq!(
            event.flags(),
            EventFlags::CONTEXT_SWITCH | EventFlags::SCH_AVAILABLE
        );
        event.clear_all();
        assert!(event.flags().is_empty());
    }
}
