//! Priority decay reset and load-average accounting.
//!
//! Both run off the timer: priorities are reset once per second so CPU hogs
//! still see an occasional slice, and every fifth second the number of
//! runnable processes is folded into three exponential-decay windows — the
//! conventional 1/5/15-minute load figures, scaled by [`LOAD_SCALE`].

use core::sync::atomic::{AtomicU16, AtomicU64, Ordering};

use crate::ipl::IplLock;
use crate::kpanic;
use crate::process::STACK_MAGIC;

use super::table::{Sched, SCHED};
use super::types::{
    slices_for, Queue, HZ, LOAD_SAMPLE_SECS, LOAD_SCALE, SAMPS_PER_15MIN, SAMPS_PER_5MIN,
    SAMPS_PER_MIN,
};

static TICKS: AtomicU64 = AtomicU64::new(0);
static UPTIME_SECS: AtomicU64 = AtomicU64::new(0);
static NUMBER_RUNNING: AtomicU16 = AtomicU16::new(0);

static AVENRUN: [AtomicU64; 3] = [
    AtomicU64::new(0),
    AtomicU64::new(0),
    AtomicU64::new(0),
];

/// One exponential-decay window: a circular buffer of runnable-count
/// samples plus the running scaled sum.
pub struct LoadWindow<const N: usize> {
    samples: [u8; N],
    ptr: usize,
    sum: u64,
}

impl<const N: usize> LoadWindow<N> {
    pub const fn new() -> Self {
        Self {
            samples: [0; N],
            ptr: 0,
            sum: 0,
        }
    }

    /// Replace the oldest sample and return the scaled window average.
    pub fn sample(&mut self, nrun: u8) -> u64 {
        let old = self.samples[self.ptr] as i64;
        self.samples[self.ptr] = nrun;
        self.ptr = (self.ptr + 1) % N;
        self.sum = (self.sum as i64 + (nrun as i64 - old) * LOAD_SCALE as i64) as u64;
        self.sum / N as u64
    }
}

struct LoadState {
    one_min: LoadWindow<SAMPS_PER_MIN>,
    five_min: LoadWindow<SAMPS_PER_5MIN>,
    fifteen_min: LoadWindow<SAMPS_PER_15MIN>,
}

static LOAD: IplLock<LoadState> = IplLock::new(LoadState {
    one_min: LoadWindow::new(),
    five_min: LoadWindow::new(),
    fifteen_min: LoadWindow::new(),
});

impl Sched {
    /// Reset every process not currently being penalized back to its base
    /// priority, with the slice budget recomputed from it.
    pub fn reset_priorities(&mut self) {
        let mut cursor = self.proclist;
        while let Some(slot) = cursor {
            let p = self.proc_mut(slot);
            if p.slices >= 0 {
                p.curpri = p.pri;
                p.slices = slices_for(p.curpri);
            }
            cursor = p.gl_next;
        }
    }

    /// Count the runnable processes (ready or running, excluding the root
    /// process) and validate every stack guard on the way; a corrupted
    /// guard is unrecoverable.
    pub fn count_runnable(&self) -> u16 {
        let mut number_running = 0;
        for slot in self.all_procs() {
            let p = self.proc(slot);
            if slot != self.rootproc
                && (p.wait_q == Queue::Curproc || p.wait_q == Queue::Ready)
            {
                number_running += 1;
            }
            if p.stack_magic != STACK_MAGIC {
                kpanic!(
                    "proc pid {} has invalid stack guard {:#x}",
                    p.pid,
                    p.stack_magic
                );
            }
        }
        number_running
    }
}

/// Reset all process priorities to their base level. Called once per second
/// so that CPU hogs can get _some_ time slices.
pub fn reset_priorities() {
    SCHED.lock().reset_priorities();
}

/// Fold the current runnable count into all three windows.
pub fn calc_load_average() {
    let number_running = SCHED.lock().count_runnable();
    NUMBER_RUNNING.store(number_running, Ordering::Relaxed);
    let clamped = number_running.min(u8::MAX as u16) as u8;

    let mut load = LOAD.lock();
    AVENRUN[0].store(load.one_min.sample(clamped), Ordering::Relaxed);
    AVENRUN[1].store(load.five_min.sample(clamped), Ordering::Relaxed);
    AVENRUN[2].store(load.fifteen_min.sample(clamped), Ordering::Relaxed);
}

/// The three scaled load averages (1, 5, 15 minutes).
pub fn avenrun() -> [u64; 3] {
    [
        AVENRUN[0].load(Ordering::Relaxed),
        AVENRUN[1].load(Ordering::Relaxed),
        AVENRUN[2].load(Ordering::Relaxed),
    ]
}

/// Runnable count captured by the latest load sample.
pub fn number_running() -> u16 {
    NUMBER_RUNNING.load(Ordering::Relaxed)
}

/// Seconds since boot.
pub fn uptime() -> u64 {
    UPTIME_SECS.load(Ordering::Relaxed)
}

/// Timer ticks since boot.
pub fn ticks() -> u64 {
    TICKS.load(Ordering::Relaxed)
}

/// Advance the accounting clock by one timer tick.
pub(crate) fn uptick() {
    let t = TICKS.fetch_add(1, Ordering::Relaxed) + 1;
    if t % HZ == 0 {
        reset_priorities();
        let secs = UPTIME_SECS.fetch_add(1, Ordering::Relaxed) + 1;
        if secs % LOAD_SAMPLE_SECS == 0 {
            calc_load_average();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::Pcb;
    use serial_test::serial;

    fn boot_with(n: u64) -> (Sched, std::vec::Vec<u16>) {
        let mut s = Sched::new();
        s.install_root("root");
        let slots = (1..=n)
            .map(|pid| s.insert(Pcb::new(pid, Some(0), "proc", 0)).unwrap())
            .collect();
        (s, slots)
    }

    #[test]
    fn window_converges_to_constant_input() {
        let mut w: LoadWindow<12> = LoadWindow::new();
        let mut avg = 0;
        for _ in 0..24 {
            avg = w.sample(3);
        }
        assert_eq!(avg, 3 * LOAD_SCALE);

        for _ in 0..12 {
            avg = w.sample(0);
        }
        assert_eq!(avg, 0);
    }

    #[test]
    fn window_average_tracks_partial_fill() {
        let mut w: LoadWindow<4> = LoadWindow::new();
        assert_eq!(w.sample(4), LOAD_SCALE);
        assert_eq!(w.sample(4), 2 * LOAD_SCALE);
        assert_eq!(w.sample(4), 3 * LOAD_SCALE);
        assert_eq!(w.sample(4), 4 * LOAD_SCALE);
        // Steady state: replacing old samples with equal ones changes
        // nothing.
        assert_eq!(w.sample(4), 4 * LOAD_SCALE);
    }

    #[test]
    fn runnable_count_excludes_root_and_waiters() {
        let (mut s, p) = boot_with(3);
        s.add_q(Queue::Ready, p[0]);
        s.add_q(Queue::Io, p[1]);
        // p[2] is unqueued (counts as running) and root is excluded.
        assert_eq!(s.count_runnable(), 2);
    }

    #[test]
    #[should_panic(expected = "invalid stack guard")]
    fn corrupted_stack_guard_is_fatal() {
        let (mut s, p) = boot_with(1);
        s.proc_mut(p[0]).stack_magic = 0xbad;
        s.count_runnable();
    }

    #[test]
    fn priorities_reset_after_preemption_penalties() {
        let (mut s, p) = boot_with(2);
        {
            let a = s.proc_mut(p[0]);
            a.pri = 5;
            a.curpri = 1;
            a.slices = 0;
        }
        {
            let b = s.proc_mut(p[1]);
            b.pri = 5;
            b.curpri = 2;
            b.slices = -3;
        }

        s.reset_priorities();

        let a = s.proc(p[0]);
        assert_eq!(a.curpri, 5);
        assert_eq!(a.slices, slices_for(5));
        // A run_next grantee keeps its guarantee until it has run.
        let b = s.proc(p[1]);
        assert_eq!(b.curpri, 2);
        assert_eq!(b.slices, -3);
    }

    #[test]
    fn repeated_resets_converge_to_base_priority() {
        let (mut s, p) = boot_with(1);
        {
            let a = s.proc_mut(p[0]);
            a.pri = 0;
            a.curpri = -6;
            a.slices = 4;
        }
        s.reset_priorities();
        s.reset_priorities();
        let a = s.proc(p[0]);
        assert_eq!(a.curpri, a.pri);
        assert_eq!(a.slices, 0);
    }

    #[test]
    #[serial]
    fn global_sample_feeds_all_three_windows() {
        {
            let mut sched = SCHED.lock();
            *sched = Sched::new();
            sched.install_root("root");
            let slot = sched.insert(Pcb::new(900, Some(0), "busy", 0)).unwrap();
            sched.add_q(Queue::Ready, slot);
        }
        for _ in 0..SAMPS_PER_15MIN * 2 {
            calc_load_average();
        }
        assert_eq!(avenrun(), [LOAD_SCALE, LOAD_SCALE, LOAD_SCALE]);
        assert_eq!(number_running(), 1);
    }
}
