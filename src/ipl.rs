//! Interrupt-priority-level gate.
//!
//! Every critical section that touches the run queues or the current-process
//! pointer is bounded by raising the interrupt priority level and restoring
//! the saved level on the way out. The level that excludes scheduler-relevant
//! interrupt sources is [`IPL_NO_SCHED`]; [`splhigh`] masks everything.
//!
//! On bare metal the gate maps onto the CPU interrupt-enable flag. Hosted
//! builds model the level as a process-local atomic that a simulated
//! asynchronous event source is expected to honor, so the same code paths are
//! exercisable under `cargo test`.

use core::ops::{Deref, DerefMut};
use core::mem::ManuallyDrop;

use spin::{Mutex, MutexGuard};

/// Levels at or above this exclude the timer and device interrupts the
/// scheduler synchronizes against.
pub const IPL_NO_SCHED: u8 = 5;

/// The highest maskable level.
pub const IPL_HIGH: u8 = 7;

/// Saved prior interrupt priority level, returned by [`splhigh`]/[`spl7`] and
/// consumed exactly once by [`spl`].
#[derive(Clone, Copy, Debug)]
#[must_use = "the saved level must be restored with spl()"]
pub struct IplToken {
    prev: u8,
}

impl IplToken {
    /// Whether the caller sat below the scheduler-excluding level, i.e. the
    /// slow polling and bookkeeping work is permitted.
    #[inline]
    pub fn was_low(self) -> bool {
        self.prev < IPL_NO_SCHED
    }
}

#[cfg(target_os = "none")]
mod gate {
    use super::{IPL_HIGH, IplToken};

    #[inline]
    pub fn raise() -> IplToken {
        #[cfg(target_arch = "x86_64")]
        {
            let enabled = x86_64::instructions::interrupts::are_enabled();
            x86_64::instructions::interrupts::disable();
            IplToken { prev: if enabled { 0 } else { IPL_HIGH } }
        }
        #[cfg(not(target_arch = "x86_64"))]
        {
            IplToken { prev: IPL_HIGH }
        }
    }

    #[inline]
    pub fn restore(token: IplToken) {
        #[cfg(target_arch = "x86_64")]
        if token.prev == 0 {
            x86_64::instructions::interrupts::enable();
        }
        #[cfg(not(target_arch = "x86_64"))]
        let _ = token;
    }
}

#[cfg(not(target_os = "none"))]
mod gate {
    use super::{IPL_HIGH, IplToken};

    #[cfg(test)]
    mod level {
        use core::cell::Cell;

        std::thread_local! {
            static LEVEL: Cell<u8> = const { Cell::new(0) };
        }

        pub fn swap(new: u8) -> u8 {
            LEVEL.with(|l| {
                let prev = l.get();
                l.set(new);
                prev
            })
        }

        pub fn set(value: u8) {
            LEVEL.with(|l| l.set(value));
        }
    }

    #[cfg(not(test))]
    mod level {
        use core::sync::atomic::{AtomicU8, Ordering};

        static LEVEL: AtomicU8 = AtomicU8::new(0);

        pub fn swap(new: u8) -> u8 {
            LEVEL.swap(new, Ordering::AcqRel)
        }

        pub fn set(value: u8) {
            LEVEL.store(value, Ordering::Release);
        }
    }

    #[inline]
    pub fn raise() -> IplToken {
        IplToken {
            prev: level::swap(IPL_HIGH),
        }
    }

    #[inline]
    pub fn restore(token: IplToken) {
        level::set(token.prev);
    }
}

/// Raise to the highest level, returning the level to restore.
#[inline]
pub fn splhigh() -> IplToken {
    gate::raise()
}

/// Raise to level 7. On every supported target this coincides with
/// [`splhigh`]; both names exist because callers express different intents
/// (mask everything vs. mask the scheduler sources).
#[inline]
pub fn spl7() -> IplToken {
    gate::raise()
}

/// Restore a previously saved level.
#[inline]
pub fn spl(token: IplToken) {
    gate::restore(token)
}

/// Scoped form of the gate: raises on construction, restores on drop, so
/// early returns cannot leak a raised level.
pub struct IplGuard {
    token: IplToken,
}

impl IplGuard {
    #[inline]
    pub fn new() -> Self {
        Self { token: gate::raise() }
    }
}

impl Default for IplGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for IplGuard {
    #[inline]
    fn drop(&mut self) {
        gate::restore(self.token);
    }
}

/// A spin mutex whose guard also holds the interrupt gate. Locking raises the
/// level before spinning; unlocking releases the mutex first and only then
/// restores the saved level, so no window exists where an interrupt handler
/// could observe the protected state mid-update.
pub struct IplLock<T> {
    inner: Mutex<T>,
}

impl<T> IplLock<T> {
    pub const fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(value),
        }
    }

    pub fn lock(&self) -> IplLockGuard<'_, T> {
        let token = gate::raise();
        IplLockGuard {
            guard: ManuallyDrop::new(self.inner.lock()),
            token,
        }
    }
}

pub struct IplLockGuard<'a, T> {
    guard: ManuallyDrop<MutexGuard<'a, T>>,
    token: IplToken,
}

impl<T> Deref for IplLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for IplLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T> Drop for IplLockGuard<'_, T> {
    fn drop(&mut self) {
        unsafe { ManuallyDrop::drop(&mut self.guard) };
        gate::restore(self.token);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_reports_prior_level() {
        let outer = splhigh();
        let inner = spl7();
        assert!(!inner.was_low());
        spl(inner);
        spl(outer);
        let fresh = splhigh();
        assert!(fresh.was_low());
        spl(fresh);
    }

    #[test]
    fn guard_restores_on_drop() {
        {
            let _g = IplGuard::new();
            let nested = splhigh();
            assert!(!nested.was_low());
            spl(nested);
        }
        let after = splhigh();
        assert!(after.was_low());
        spl(after);
    }

    #[test]
    fn lock_round_trip() {
        let lock = IplLock::new(41u32);
        {
            let mut g = lock.lock();
            *g += 1;
        }
        assert_eq!(*lock.lock(), 42);
    }
}
