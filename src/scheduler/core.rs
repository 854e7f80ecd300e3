//! The blocking primitive and context-switch machinery.
//!
//! Every voluntary yield and every wait-for-event funnels through [`sleep`].
//! The decision work (fast-path detection, enqueueing, victim selection) is
//! split from the effect work (the actual context transfer) the same way the
//! queue state is split from the CPU state: decisions are `Sched` methods
//! that run under the interrupt gate and can be driven directly by tests,
//! the transfer happens after the lock is dropped with raw frame pointers.

use core::sync::atomic::{AtomicU16, Ordering};

use crate::console;
use crate::process::{Context, CTXT_CURRENT, CTXT_MAGIC, STACK_MAGIC};
use crate::signal::{self, SIGBUS, SIGXCPU};
use crate::timeout;
use crate::{kdebug, kerror, kpanic};

use super::context::context_switch;
use super::table::{Sched, SCHED};
use super::types::{
    slices_for, Queue, BOOT_CLOCK, DEFAULT_TIME_SLICE, MAX_NICE, MIN_NICE, MS_PER_TICK,
};
use super::wake::wake;

/// Remaining clock ticks of the current process's slice. The timer interrupt
/// counts it down; it starts high so nothing is preempted during startup.
pub static PROC_CLOCK: AtomicU16 = AtomicU16::new(BOOT_CLOCK);

static TIME_SLICE: AtomicU16 = AtomicU16::new(DEFAULT_TIME_SLICE);

pub fn time_slice() -> u16 {
    TIME_SLICE.load(Ordering::Relaxed)
}

pub fn set_time_slice(ticks: u16) {
    TIME_SLICE.store(ticks, Ordering::Relaxed);
}

pub fn proc_clock() -> u16 {
    PROC_CLOCK.load(Ordering::Relaxed)
}

pub fn set_proc_clock(ticks: u16) {
    PROC_CLOCK.store(ticks, Ordering::Relaxed);
}

static WAITPID_MARKER: u8 = 0;

/// Condition token for wait-for-child blocking. Pending signals are left
/// undelivered across a sleep on this token so the waiter can reap first.
pub fn waitpid_cond() -> u64 {
    core::ptr::addr_of!(WAITPID_MARKER) as u64
}

/// Outcome of the sleep decision layer.
#[derive(Debug, PartialEq, Eq)]
pub enum SleepPlan {
    /// Do not block: resume the caller immediately. `newslice` tells the
    /// bookkeeping whether to hand out a fresh slice or keep the remaining
    /// one.
    Resume { newslice: bool },
    /// The caller has been enqueued and a victim must be chosen.
    Blocked,
}

/// Raw frames for the context transfer, valid until the processes involved
/// are retired.
pub struct SwitchFrames {
    pub old: *mut Context,
    pub new: *const Context,
}

impl Sched {
    /// Decide whether the current process actually has to block, and if so
    /// enqueue it.
    ///
    /// The fast path fires when the caller would only wake itself again:
    /// yielding to an empty ready queue, a wake that already landed (the
    /// recorded sleep condition no longer matches), an interrupt-context
    /// wake that raced ahead (`iwakecond`), or a pre-armed wait condition
    /// that was cleared before we got here (`checked`). A raced wake only
    /// short-circuits while this process still owns slice time; once the
    /// clock has run out and others are ready, the sleep degrades into a
    /// yield onto the ready queue.
    pub fn plan_sleep(&mut self, que: Queue, checked: bool, cond: u64, clock_left: u16) -> SleepPlan {
        let ready_empty = self.ready_is_empty();
        let mut newslice = true;

        let raced = self.sleepcond != cond
            || (self.iwakecond == cond && cond != 0)
            || (checked && self.cur().wait_cond != cond);

        let fast = if que == Queue::Ready && ready_empty {
            true
        } else if raced {
            if ready_empty {
                true
            } else {
                newslice = false;
                clock_left != 0
            }
        } else {
            false
        };

        self.iwakecond = 0;
        if fast {
            return SleepPlan::Resume { newslice };
        }

        let slot = self.curslot();
        let que = if newslice {
            self.cur_mut().wait_cond = cond;
            que
        } else {
            Queue::Ready
        };
        self.add_q(que, slot);
        SleepPlan::Blocked
    }

    /// Last line of the liveness defense: with nothing ready and nap revival
    /// already attempted by the caller, drag the root process onto the ready
    /// queue so there is always someone to charge time to.
    pub fn ensure_ready_nonempty(&mut self) {
        if !self.ready_is_empty() {
            return;
        }
        let root = self.rootproc;
        let wait_q = self.proc(root).wait_q;
        self.rm_q(wait_q, root);
        self.add_q(Queue::Ready, root);
        kdebug!("scheduler: nothing ready, reviving pid 0");
    }

    /// Scan the ready queue until a process with a non-positive slice
    /// counter is found, decrementing the counters of everyone skipped.
    /// Counters fall monotonically, so the scan terminates; the winner is
    /// removed from the queue.
    pub fn select_victim(&mut self) -> u16 {
        loop {
            let mut cursor = self.sys_q[Queue::Ready.index()];
            while let Some(slot) = cursor {
                if self.proc(slot).slices > 0 {
                    let p = self.proc_mut(slot);
                    p.slices -= 1;
                    cursor = p.q_next;
                } else {
                    self.rm_q(Queue::Ready, slot);
                    return slot;
                }
            }
            if self.ready_is_empty() {
                kpanic!("select_victim: ready queue empty");
            }
        }
    }

    /// Hand the CPU to the victim: it becomes current and the caller gets
    /// the raw frames for the transfer.
    pub fn switch_frames(&mut self, victim: u16) -> SwitchFrames {
        {
            let v = self.proc(victim);
            if v.magic != CTXT_MAGIC {
                kpanic!("switch_frames: pid {} has corrupt context magic", v.pid);
            }
        }
        let old_slot = self.curslot();
        self.curproc = victim;
        SwitchFrames {
            old: &mut self.proc_mut(old_slot).ctxt[CTXT_CURRENT] as *mut Context,
            new: &self.proc(victim).ctxt[CTXT_CURRENT] as *const Context,
        }
    }

    /// Compute the fresh slice budget for the process that is about to
    /// resume. A `run_next` grantee carries its guarantee into the budget
    /// and has its priority restored; everyone else gets the plain slice.
    /// Returns the clock ticks to load, or None when the remaining time is
    /// kept.
    pub fn grant_fresh_slice(&mut self, newslice: bool, slice_ticks: u16) -> Option<u16> {
        if !newslice {
            return None;
        }
        let cur = self.cur_mut();
        let clock = if cur.slices >= 0 {
            slice_ticks
        } else {
            let bonus = (-cur.slices) as u16;
            cur.curpri = cur.pri;
            slice_ticks.saturating_add(bonus)
        };
        cur.slices = slices_for(cur.curpri);
        Some(clock)
    }
}

/// Restore any paged-out memory regions of the process that just switched
/// in. Called unconditionally after every context-switch-in.
pub fn swap_in_curproc() {
    let (pid, restored) = {
        let mut sched = SCHED.lock();
        let cur = sched.cur_mut();
        (cur.pid, cur.mem.swap_in())
    };
    if restored > 0 {
        kdebug!("swap_in: restored {} regions for pid {}", restored, pid);
    }
}

/// Post-wake bookkeeping, run every time a process comes back from (or
/// declines) a sleep: stack-guard check, CPU-quota check, expired-callout
/// dispatch, pending-signal delivery, then the fresh-slice grant.
fn do_wakeup_things(was_low: bool, newslice: bool, cond: u64) {
    if was_low {
        let guard_blown = {
            let sched = SCHED.lock();
            let cur = sched.cur();
            cur.pid != 0 && cur.stack_magic != STACK_MAGIC
        };
        if guard_blown {
            kerror!("stack underflow");
            signal::handle_sig(SIGBUS);
        }

        let over_quota = {
            let sched = SCHED.lock();
            let cur = sched.cur();
            cur.maxcpu != 0 && cur.maxcpu <= cur.systime + cur.usrtime
        };
        if over_quota {
            kdebug!("cpu limit exceeded");
            signal::raise(SIGXCPU);
        }

        timeout::checkalarms();

        let pending = {
            let sched = SCHED.lock();
            sched.cur().sigstate.next_deliverable().is_some()
        };
        if pending && cond != waitpid_cond() {
            signal::check_sigs();
        }
    }

    let mut sched = SCHED.lock();
    if let Some(clock) = sched.grant_fresh_slice(newslice, time_slice()) {
        PROC_CLOCK.store(clock, Ordering::Relaxed);
    }
}

/// Put the current process on the given queue and switch contexts. Returns
/// whether any signal was delivered to the caller since its previous sleep.
pub fn sleep(que: Queue, cond: u64) -> bool {
    sleep_in(que, false, cond)
}

/// Like [`sleep`], for callers that pre-armed `wait_cond` before publishing
/// it to an interrupt handler: a mismatch between the armed condition and
/// `cond` is taken as proof the wakeup already fired, and the call returns
/// without blocking.
pub fn sleep_checked(que: Queue, cond: u64) -> bool {
    sleep_in(que, true, cond)
}

fn sleep_in(que: Queue, checked: bool, cond: u64) -> bool {
    let probe = crate::ipl::splhigh();
    let was_low = probe.was_low();
    crate::ipl::spl(probe);

    let onsigs = { SCHED.lock().cur().nsigs };

    // Record the condition before any polling below: a wake raised from the
    // pollers must be able to clear it and push us down the fast path.
    {
        SCHED.lock().sleepcond = cond;
    }

    if was_low {
        console::checkbttys();
        if console::take_key_interrupt() {
            console::checkkeys();
        }
        #[cfg(feature = "dev_random")]
        crate::random::checkrandom();

        let (pending, is_root) = {
            let sched = SCHED.lock();
            let cur = sched.cur();
            (cur.sigstate.next_deliverable().is_some(), cur.pid == 0)
        };
        if pending && !is_root && que != Queue::Zombie && que != Queue::Tsr {
            signal::check_sigs();
            SCHED.lock().sleepcond = 0;
        }
    }

    let plan = {
        let mut sched = SCHED.lock();
        let clock_left = PROC_CLOCK.load(Ordering::Relaxed);
        sched.plan_sleep(que, checked, cond, clock_left)
    };

    if let SleepPlan::Resume { newslice } = plan {
        do_wakeup_things(was_low, newslice, cond);
        return SCHED.lock().cur().nsigs != onsigs;
    }

    // The caller is enqueued. If no one is ready to run this may be a
    // deadlock or may not: first revive any process napping on the timer,
    // and failing that fall back to the root process.
    if SCHED.lock().ready_is_empty() {
        wake(Queue::Select, timeout::nap_cond());
        SCHED.lock().ensure_ready_nonempty();
    }

    let frames = {
        let mut sched = SCHED.lock();
        let victim = sched.select_victim();
        let frames = sched.switch_frames(victim);
        PROC_CLOCK.store(time_slice(), Ordering::Relaxed);
        frames
    };

    unsafe { context_switch(frames.old, frames.new) };

    // Control arrives here when this process is next selected.
    swap_in_curproc();
    do_wakeup_things(was_low, true, cond);
    SCHED.lock().cur().nsigs != onsigs
}

/// Involuntary preemption hook, invoked when a process exhausted its slice
/// without yielding. Buffered console output is the usual culprit and is
/// flushed instead of punishing the process; otherwise the decayed priority
/// drops one step. Either way the process is funneled through the blocking
/// path on the ready queue.
pub fn preempt() {
    if console::bcon_pending() > 0 {
        console::bflush();
    } else {
        let mut sched = SCHED.lock();
        let cur = sched.cur_mut();
        if cur.curpri >= MIN_NICE {
            cur.curpri -= 1;
        }
    }

    let cond = { SCHED.lock().cur().wait_cond };
    sleep(Queue::Ready, cond);
}

/// Grant the current process `extra` additional clock ticks on top of a
/// fresh slice, resetting everyone's priorities first.
pub fn fresh_slices(extra: u16) {
    {
        let mut sched = SCHED.lock();
        sched.reset_priorities();
        let cur = sched.cur_mut();
        cur.slices = 0;
        cur.curpri = MAX_NICE + 1;
    }
    PROC_CLOCK.store(time_slice().saturating_add(extra), Ordering::Relaxed);
}

/// Per-tick driver entry, expected from the timer interrupt: charges CPU
/// time, advances the uptime/load accounting, and counts the slice down.
/// Returns true when the slice is exhausted and the caller should invoke
/// [`preempt`] once back in process context.
pub fn timer_tick() -> bool {
    {
        let mut sched = SCHED.lock();
        sched.cur_mut().usrtime += MS_PER_TICK;
    }

    super::load::uptick();

    let _ = PROC_CLOCK.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |c| c.checked_sub(1));
    PROC_CLOCK.load(Ordering::Relaxed) == 0
}
