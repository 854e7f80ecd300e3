//! Signal state and delivery.
//!
//! The scheduler core consumes this subsystem at documented points: the
//! pending-signal pre-check before a process commits to sleeping, and the
//! post-wake bookkeeping after every context-switch-in. Delivery here is the
//! act the blocking primitive's return value counts via the per-process
//! `nsigs` counter; what a handler does afterwards is outside the core.

use crate::scheduler::table::SCHED;
use crate::{kdebug, ktrace};

pub const SIGHUP: u32 = 1;
pub const SIGINT: u32 = 2;
pub const SIGQUIT: u32 = 3;
pub const SIGILL: u32 = 4;
pub const SIGTRAP: u32 = 5;
pub const SIGABRT: u32 = 6;
pub const SIGBUS: u32 = 7;
pub const SIGFPE: u32 = 8;
pub const SIGKILL: u32 = 9;
pub const SIGUSR1: u32 = 10;
pub const SIGSEGV: u32 = 11;
pub const SIGUSR2: u32 = 12;
pub const SIGPIPE: u32 = 13;
pub const SIGALRM: u32 = 14;
pub const SIGTERM: u32 = 15;
pub const SIGCHLD: u32 = 17;
pub const SIGCONT: u32 = 18;
pub const SIGSTOP: u32 = 19;
pub const SIGTSTP: u32 = 20;
pub const SIGTTIN: u32 = 21;
pub const SIGTTOU: u32 = 22;
pub const SIGXCPU: u32 = 24;

pub const NSIG: usize = 32;

/// Per-signal disposition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SignalAction {
    Default,
    Ignore,
    Handler(u64),
}

/// Per-process signal state.
#[derive(Clone, Copy)]
pub struct SignalState {
    pending: u32,
    blocked: u32,
    actions: [SignalAction; NSIG],
}

impl SignalState {
    pub const fn new() -> Self {
        Self {
            pending: 0,
            blocked: 0,
            actions: [SignalAction::Default; NSIG],
        }
    }

    /// Mark a signal pending for this process.
    pub fn send_signal(&mut self, signum: u32) -> Result<(), &'static str> {
        if signum == 0 || signum >= NSIG as u32 {
            return Err("invalid signal number");
        }
        self.pending |= 1u32 << signum;
        Ok(())
    }

    /// Bitmask of signals that are pending, unblocked, and not ignored.
    pub fn deliverable_mask(&self) -> u32 {
        let mut mask = self.pending & !self.blocked;
        for signum in 1..NSIG {
            if self.actions[signum] == SignalAction::Ignore {
                mask &= !(1u32 << signum);
            }
        }
        mask
    }

    /// Lowest-numbered deliverable signal, if any.
    pub fn next_deliverable(&self) -> Option<u32> {
        let mask = self.deliverable_mask();
        if mask == 0 {
            return None;
        }
        Some(mask.trailing_zeros())
    }

    pub fn clear_signal(&mut self, signum: u32) {
        if signum < NSIG as u32 {
            self.pending &= !(1u32 << signum);
        }
    }

    pub fn set_action(
        &mut self,
        signum: u32,
        action: SignalAction,
    ) -> Result<SignalAction, &'static str> {
        if signum == 0 || signum >= NSIG as u32 {
            return Err("invalid signal number");
        }
        if signum == SIGKILL || signum == SIGSTOP {
            return Err("cannot change SIGKILL or SIGSTOP");
        }
        let old = self.actions[signum as usize];
        self.actions[signum as usize] = action;
        Ok(old)
    }

    pub fn action(&self, signum: u32) -> SignalAction {
        if signum as usize >= NSIG {
            return SignalAction::Default;
        }
        self.actions[signum as usize]
    }

    pub fn block_signal(&mut self, signum: u32) {
        if signum != SIGKILL && signum != SIGSTOP && signum < NSIG as u32 {
            self.blocked |= 1u32 << signum;
        }
    }

    pub fn unblock_signal(&mut self, signum: u32) {
        if signum < NSIG as u32 {
            self.blocked &= !(1u32 << signum);
        }
    }
}

impl Default for SignalState {
    fn default() -> Self {
        Self::new()
    }
}

/// Raise a signal against the current process.
pub fn raise(signum: u32) {
    let mut sched = SCHED.lock();
    let pid = sched.cur().pid;
    if let Err(why) = sched.cur_mut().sigstate.send_signal(signum) {
        drop(sched);
        kdebug!("raise: {} (signal {})", why, signum);
        return;
    }
    drop(sched);
    ktrace!("raise: signal {} pending for pid {}", signum, pid);
}

/// Post a signal to an arbitrary process.
pub fn post_sig(pid: crate::process::Pid, signum: u32) -> Result<(), &'static str> {
    let mut sched = SCHED.lock();
    let Some(slot) = sched.pid_slot(pid) else {
        return Err("no such process");
    };
    sched.proc_mut(slot).sigstate.send_signal(signum)
}

/// Deliver every deliverable pending signal to the current process. Each
/// delivery bumps the process's `nsigs` counter, which is what the blocking
/// primitive's return value is computed from.
pub fn check_sigs() -> u32 {
    let mut delivered = 0;
    loop {
        let taken = {
            let mut sched = SCHED.lock();
            let cur = sched.cur_mut();
            match cur.sigstate.next_deliverable() {
                Some(signum) => {
                    cur.sigstate.clear_signal(signum);
                    cur.nsigs += 1;
                    Some((cur.pid, signum, cur.sigstate.action(signum)))
                }
                None => None,
            }
        };
        let Some((pid, signum, action)) = taken else { break };
        match action {
            SignalAction::Handler(entry) => {
                kdebug!(
                    "signal {} delivered to pid {} (handler {:#x})",
                    signum,
                    pid,
                    entry
                );
            }
            _ => kdebug!("signal {} delivered to pid {}", signum, pid),
        }
        delivered += 1;
    }
    delivered
}

/// Raise and immediately deliver a signal against the current process.
pub fn handle_sig(signum: u32) {
    raise(signum);
    check_sigs();
}
