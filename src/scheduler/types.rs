//! Scheduler type definitions and tuning constants.

/// Number of scheduling queues, including the pseudo-queue slot for the
/// running process (which has no list of its own).
pub const NUM_QUEUES: usize = 8;

/// The fixed set of scheduling queues. `Curproc` doubles as the "not on any
/// queue" sentinel carried by the running process.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Queue {
    /// Pseudo-queue: the running process, never linked on a list.
    Curproc = 0,
    /// Processes eligible to run next.
    Ready = 1,
    /// Waiting for a child to exit.
    Wait = 2,
    /// Blocked on device I/O.
    Io = 3,
    /// Terminated, awaiting reaping.
    Zombie = 4,
    /// Terminated but resident.
    Tsr = 5,
    /// Stopped by job control.
    Stop = 6,
    /// Blocked in an I/O-multiplexing wait.
    Select = 7,
}

impl Queue {
    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    pub const fn name(self) -> &'static str {
        match self {
            Queue::Curproc => "run",
            Queue::Ready => "ready",
            Queue::Wait => "wait",
            Queue::Io => "iowait",
            Queue::Zombie => "zombie",
            Queue::Tsr => "tsr",
            Queue::Stop => "stop",
            Queue::Select => "select",
        }
    }
}

/// Nicest (most yielding) base priority.
pub const MIN_NICE: i16 = -20;
/// Greediest base priority.
pub const MAX_NICE: i16 = 20;

/// Penalty passes a process at the given decayed priority must sit out
/// between turns. Non-negative priorities run every pass.
#[inline]
pub const fn slices_for(pri: i16) -> i16 {
    if pri >= 0 {
        0
    } else {
        -pri
    }
}

/// Default time-slice budget in clock ticks; tunable at runtime.
pub const DEFAULT_TIME_SLICE: u16 = 2;

/// Initial countdown value: large enough that nothing is preempted while the
/// kernel is still starting up.
pub const BOOT_CLOCK: u16 = 0x7fff;

/// Timer interrupts per second.
pub const HZ: u64 = 200;

/// Milliseconds of CPU time charged per clock tick.
pub const MS_PER_TICK: u64 = 1000 / HZ;

/// Fixed-point scale of the load-average figures: a steady single runnable
/// process converges each window to exactly this value.
pub const LOAD_SCALE: u64 = 2048;

/// Seconds between load-average samples.
pub const LOAD_SAMPLE_SECS: u64 = 5;

/// Samples per averaging window at one sample each 5 seconds.
pub const SAMPS_PER_MIN: usize = 12;
pub const SAMPS_PER_5MIN: usize = 60;
pub const SAMPS_PER_15MIN: usize = 180;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn penalty_passes_grow_as_priority_drops() {
        assert_eq!(slices_for(MAX_NICE), 0);
        assert_eq!(slices_for(0), 0);
        assert_eq!(slices_for(-1), 1);
        assert_eq!(slices_for(MIN_NICE), 20);
    }

    #[test]
    fn queue_names_are_distinct() {
        let all = [
            Queue::Curproc,
            Queue::Ready,
            Queue::Wait,
            Queue::Io,
            Queue::Zombie,
            Queue::Tsr,
            Queue::Stop,
            Queue::Select,
        ];
        for (i, a) in all.iter().enumerate() {
            assert_eq!(a.index(), i);
            for b in &all[i + 1..] {
                assert_ne!(a.name(), b.name());
            }
        }
    }
}
