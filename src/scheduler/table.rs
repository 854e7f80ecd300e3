//! The process table and global scheduler state.
//!
//! All shared scheduler state lives in one [`Sched`] value: the PCB arena,
//! the all-processes list, the queue heads, the current/root process slots,
//! and the two race markers the sleep/wake protocol uses. Every mutation
//! funnels through methods on `Sched`, and the kernel's single instance sits
//! behind an [`IplLock`] so the masking discipline is enforced at one
//! boundary.

use core::sync::atomic::{AtomicU64, Ordering};

use crate::ipl::{IplLock, IplLockGuard};
use crate::kinfo;
use crate::kpanic;
use crate::process::{Pcb, Pid, MAX_PROCESSES};

use super::types::{Queue, NUM_QUEUES};

/// The scheduler context object.
pub struct Sched {
    slots: [Option<Pcb>; MAX_PROCESSES],
    /// Head of the all-processes list, threaded through `gl_next`.
    pub(crate) proclist: Option<u16>,
    /// Heads of the scheduling queues, threaded through `q_next`. The
    /// `Curproc` slot is never used.
    pub(crate) sys_q: [Option<u16>; NUM_QUEUES],
    /// Arena slot of the process currently executing.
    pub(crate) curproc: u16,
    /// Arena slot of pid 0, the last-resort runnable process.
    pub(crate) rootproc: u16,
    /// Condition of the most recent sleep attempt; cleared by a matching
    /// wake so a sleep that has not yet blocked takes the fast path.
    pub(crate) sleepcond: u64,
    /// Condition delivered by `iwake` while its owner was between deciding
    /// to sleep and enqueuing; observed by the sleep fast path.
    pub(crate) iwakecond: u64,
}

/// The kernel's scheduler instance.
pub static SCHED: IplLock<Sched> = IplLock::new(Sched::new());

static NEXT_PID: AtomicU64 = AtomicU64::new(1);

impl Sched {
    pub const fn new() -> Self {
        Self {
            slots: [None; MAX_PROCESSES],
            proclist: None,
            sys_q: [None; NUM_QUEUES],
            curproc: 0,
            rootproc: 0,
            sleepcond: 0,
            iwakecond: 0,
        }
    }

    /// Bootstrap pid 0 as already current and running. The region tables are
    /// inline fixed-size storage, so unlike a heap-backed bootstrap this
    /// cannot fail.
    pub fn install_root(&mut self, name: &str) -> u16 {
        if self.slots[0].is_some() {
            kpanic!("install_root: process table already bootstrapped");
        }
        let mut root = Pcb::new(0, None, name, 0);
        // Job control is meaningless for the kernel process; leave these
        // inert unless a shell re-arms them.
        let _ = root
            .sigstate
            .set_action(crate::signal::SIGTTIN, crate::signal::SignalAction::Ignore);
        let _ = root
            .sigstate
            .set_action(crate::signal::SIGTTOU, crate::signal::SignalAction::Ignore);
        let _ = root
            .sigstate
            .set_action(crate::signal::SIGTSTP, crate::signal::SignalAction::Ignore);

        self.slots[0] = Some(root);
        self.proclist = Some(0);
        self.curproc = 0;
        self.rootproc = 0;
        0
    }

    /// Add a freshly created process to the table and the all-processes
    /// list. The caller decides which queue it first lands on.
    pub fn insert(&mut self, pcb: Pcb) -> Result<u16, &'static str> {
        for (idx, slot) in self.slots.iter_mut().enumerate() {
            if slot.is_none() {
                let idx = idx as u16;
                let mut pcb = pcb;
                pcb.gl_next = self.proclist;
                *slot = Some(pcb);
                self.proclist = Some(idx);
                return Ok(idx);
            }
        }
        Err("process table full")
    }

    /// Remove a terminated process from the table. It must not be running;
    /// a lingering queue membership is dropped first.
    pub fn retire(&mut self, slot: u16) {
        if slot == self.curproc {
            kpanic!("retire: pid {} is still current", self.proc(slot).pid);
        }
        if slot == self.rootproc {
            kpanic!("retire: refusing to retire the root process");
        }
        let wait_q = self.proc(slot).wait_q;
        if wait_q != Queue::Curproc {
            self.rm_q(wait_q, slot);
        }

        let next = self.proc(slot).gl_next;
        if self.proclist == Some(slot) {
            self.proclist = next;
        } else {
            let mut cursor = self.proclist;
            while let Some(s) = cursor {
                if self.proc(s).gl_next == Some(slot) {
                    self.proc_mut(s).gl_next = next;
                    break;
                }
                cursor = self.proc(s).gl_next;
            }
        }
        self.slots[slot as usize] = None;
    }

    #[inline]
    pub fn proc(&self, slot: u16) -> &Pcb {
        match self.slots.get(slot as usize).and_then(Option::as_ref) {
            Some(pcb) => pcb,
            None => kpanic!("empty pcb slot {}", slot),
        }
    }

    #[inline]
    pub fn proc_mut(&mut self, slot: u16) -> &mut Pcb {
        match self.slots.get_mut(slot as usize).and_then(Option::as_mut) {
            Some(pcb) => pcb,
            None => kpanic!("empty pcb slot {}", slot),
        }
    }

    #[inline]
    pub fn curslot(&self) -> u16 {
        self.curproc
    }

    #[inline]
    pub fn cur(&self) -> &Pcb {
        self.proc(self.curproc)
    }

    #[inline]
    pub fn cur_mut(&mut self) -> &mut Pcb {
        self.proc_mut(self.curproc)
    }

    pub fn pid_slot(&self, pid: Pid) -> Option<u16> {
        self.all_procs().find(|&s| self.proc(s).pid == pid)
    }

    #[inline]
    pub fn ready_is_empty(&self) -> bool {
        self.sys_q[Queue::Ready.index()].is_none()
    }

    /// Walk the all-processes list.
    pub fn all_procs(&self) -> impl Iterator<Item = u16> + '_ {
        core::iter::successors(self.proclist, move |&s| self.proc(s).gl_next)
    }

    /// Walk one queue in FIFO order.
    pub fn queue_iter(&self, que: Queue) -> impl Iterator<Item = u16> + '_ {
        core::iter::successors(self.sys_q[que.index()], move |&s| self.proc(s).q_next)
    }
}

impl Default for Sched {
    fn default() -> Self {
        Self::new()
    }
}

/// Initialize the process table: pid 0 becomes current and running.
pub fn init_proc() {
    let mut sched = SCHED.lock();
    sched.install_root("vesta");
    drop(sched);
    kinfo!("process table initialized, pid 0 current");
}

/// Create a process and place it on the ready queue.
pub fn new_proc(name: &str, pri: i16) -> Result<Pid, &'static str> {
    let pid = NEXT_PID.fetch_add(1, Ordering::SeqCst);
    let mut sched = SCHED.lock();
    let ppid = sched.cur().pid;
    let slot = sched.insert(Pcb::new(pid, Some(ppid), name, pri))?;
    sched.add_q(Queue::Ready, slot);
    drop(sched);
    kinfo!("created process pid {} '{}' priority {}", pid, name, pri);
    Ok(pid)
}

/// Pid of the process currently executing.
pub fn current_pid() -> Pid {
    SCHED.lock().cur().pid
}

/// Lock the scheduler state for direct access.
pub fn sched_lock() -> IplLockGuard<'static, Sched> {
    SCHED.lock()
}
