//! Entropy-pool wakeups.
//!
//! Interrupt handlers report entropy arrival; the scheduler's pre-sleep
//! poll converts that into wakeups for processes blocked waiting for random
//! bytes.

use core::sync::atomic::{AtomicU64, Ordering};

use crate::scheduler::{self, Queue};

static ENTROPY_EVENTS: AtomicU64 = AtomicU64::new(0);

static RANDOM_MARKER: u8 = 0;

/// Condition token for processes blocked on random bytes.
pub fn random_cond() -> u64 {
    core::ptr::addr_of!(RANDOM_MARKER) as u64
}

/// Note an entropy-bearing event. Safe from interrupt context.
pub fn add_entropy_event() {
    ENTROPY_EVENTS.fetch_add(1, Ordering::Relaxed);
}

/// Wake processes waiting for random bytes if entropy arrived since the
/// last poll.
pub fn checkrandom() {
    if ENTROPY_EVENTS.swap(0, Ordering::Relaxed) > 0 {
        scheduler::wake(Queue::Io, random_cond());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn poll_consumes_the_event_counter() {
        ENTROPY_EVENTS.store(0, Ordering::Relaxed);
        add_entropy_event();
        add_entropy_event();
        checkrandom();
        assert_eq!(ENTROPY_EVENTS.load(Ordering::Relaxed), 0);
        checkrandom();
    }
}
