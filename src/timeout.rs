//! Deadline callouts.
//!
//! A fixed arena of callbacks fired from the post-wake bookkeeping path.
//! Callers layered on top of the blocking primitive use these to bound a
//! wait: the callback typically wakes the same condition the caller sleeps
//! on, and the scheduler neither knows nor cares whether a wake came from
//! the real event or from timeout expiry.

use crate::ipl::IplLock;
use crate::kdebug;
use crate::scheduler::{self, Queue};

/// Callout arena slots.
pub const MAX_TIMEOUTS: usize = 16;

#[derive(Clone, Copy)]
struct Callout {
    /// Absolute deadline in timer ticks.
    expire: u64,
    func: fn(u64),
    arg: u64,
    seq: u32,
}

struct CalloutTable {
    slots: [Option<Callout>; MAX_TIMEOUTS],
    next_seq: u32,
}

static CALLOUTS: IplLock<CalloutTable> = IplLock::new(CalloutTable {
    slots: [None; MAX_TIMEOUTS],
    next_seq: 1,
});

/// Cancellation handle for a scheduled callout.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimeoutHandle {
    idx: u16,
    seq: u32,
}

static NAP_MARKER: u8 = 0;

/// Condition token for timed naps. The scheduler's no-one-ready fallback
/// wakes this token before resorting to the root process.
pub fn nap_cond() -> u64 {
    core::ptr::addr_of!(NAP_MARKER) as u64
}

/// Schedule `func(arg)` to fire `delta_ticks` from now.
pub fn addtimeout(delta_ticks: u64, func: fn(u64), arg: u64) -> Result<TimeoutHandle, &'static str> {
    let expire = scheduler::ticks().saturating_add(delta_ticks);
    let mut table = CALLOUTS.lock();
    let seq = table.next_seq;
    table.next_seq = table.next_seq.wrapping_add(1);
    for (idx, slot) in table.slots.iter_mut().enumerate() {
        if slot.is_none() {
            *slot = Some(Callout {
                expire,
                func,
                arg,
                seq,
            });
            return Ok(TimeoutHandle {
                idx: idx as u16,
                seq,
            });
        }
    }
    Err("callout table full")
}

/// Cancel a scheduled callout. Canceling one that already fired (or was
/// already canceled) is harmless.
pub fn canceltimeout(handle: TimeoutHandle) {
    let mut table = CALLOUTS.lock();
    let slot = &mut table.slots[handle.idx as usize];
    if let Some(callout) = slot {
        if callout.seq == handle.seq {
            *slot = None;
        }
    }
}

/// Fire every callout whose deadline has passed. Callbacks run outside the
/// table lock, so they are free to schedule or wake.
pub fn checkalarms() {
    let now = scheduler::ticks();
    let mut due: [Option<(fn(u64), u64)>; MAX_TIMEOUTS] = [None; MAX_TIMEOUTS];
    let mut n = 0;
    {
        let mut table = CALLOUTS.lock();
        for slot in table.slots.iter_mut() {
            let Some(callout) = slot else { continue };
            if callout.expire <= now {
                due[n] = Some((callout.func, callout.arg));
                n += 1;
                *slot = None;
            }
        }
    }
    for entry in due.iter().take(n) {
        let Some((func, arg)) = entry else { continue };
        func(*arg);
    }
}

fn nap_alarm(_arg: u64) {
    scheduler::wake(Queue::Select, nap_cond());
}

/// Sleep on the select queue for at most `delta_ticks`. Returns the
/// blocking primitive's signal flag.
pub fn nap(delta_ticks: u64) -> bool {
    let handle = match addtimeout(delta_ticks, nap_alarm, 0) {
        Ok(handle) => handle,
        Err(why) => {
            kdebug!("nap: {}", why);
            return false;
        }
    };
    let sigs = scheduler::sleep(Queue::Select, nap_cond());
    canceltimeout(handle);
    sigs
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicU64, Ordering};
    use serial_test::serial;

    static FIRED: AtomicU64 = AtomicU64::new(0);

    fn record(arg: u64) {
        FIRED.fetch_add(arg, Ordering::SeqCst);
    }

    fn clear_table() {
        let mut table = CALLOUTS.lock();
        table.slots = [None; MAX_TIMEOUTS];
    }

    #[test]
    #[serial]
    fn callouts_fire_once_at_their_deadline() {
        clear_table();
        FIRED.store(0, Ordering::SeqCst);

        addtimeout(0, record, 3).unwrap();
        checkalarms();
        assert_eq!(FIRED.load(Ordering::SeqCst), 3);

        checkalarms();
        assert_eq!(FIRED.load(Ordering::SeqCst), 3);
    }

    #[test]
    #[serial]
    fn future_deadlines_hold_their_fire() {
        clear_table();
        FIRED.store(0, Ordering::SeqCst);

        addtimeout(1_000_000, record, 1).unwrap();
        checkalarms();
        assert_eq!(FIRED.load(Ordering::SeqCst), 0);
        clear_table();
    }

    #[test]
    #[serial]
    fn canceled_callouts_never_fire() {
        clear_table();
        FIRED.store(0, Ordering::SeqCst);

        let handle = addtimeout(0, record, 7).unwrap();
        canceltimeout(handle);
        checkalarms();
        assert_eq!(FIRED.load(Ordering::SeqCst), 0);
    }

    #[test]
    #[serial]
    fn stale_handles_do_not_cancel_replacements() {
        clear_table();
        FIRED.store(0, Ordering::SeqCst);

        let stale = addtimeout(0, record, 1).unwrap();
        checkalarms();
        assert_eq!(FIRED.load(Ordering::SeqCst), 1);

        // The slot is reused; the stale handle's sequence no longer matches.
        let fresh = addtimeout(0, record, 10).unwrap();
        assert_eq!(stale.idx, fresh.idx);
        canceltimeout(stale);
        checkalarms();
        assert_eq!(FIRED.load(Ordering::SeqCst), 11);
    }

    #[test]
    #[serial]
    fn table_capacity_is_bounded() {
        clear_table();
        for _ in 0..MAX_TIMEOUTS {
            addtimeout(1_000_000, record, 0).unwrap();
        }
        assert!(addtimeout(1_000_000, record, 0).is_err());
        clear_table();
    }
}
