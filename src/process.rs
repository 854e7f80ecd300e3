//! Process control blocks and saved execution contexts.
//!
//! A `Pcb` is `Copy` and fixed-size so the whole process table can live in a
//! const-initialized arena. Queue membership is threaded through the PCBs
//! themselves: `q_next` links the scheduling queue a process currently
//! occupies, `gl_next` links the all-processes list that exists for the
//! process's entire lifetime.

use crate::memspace::MemSpace;
use crate::scheduler::types::Queue;
use crate::signal::SignalState;

/// Process ID type
pub type Pid = u64;

/// Arena slots in the process table.
pub const MAX_PROCESSES: usize = 64;

/// Bytes reserved for a process name.
pub const PNAMSIZ: usize = 16;

/// Stack-guard value stamped at creation; any mutation means the stack grew
/// over its barrier and the accounting pass treats that as unrecoverable.
pub const STACK_MAGIC: u64 = 0x5645_5354_4147_5244;

/// Stamped into each PCB when its context becomes switchable.
pub const CTXT_MAGIC: u32 = 0x4354_5854;

/// Index of the context a process was running with when it last suspended.
pub const CTXT_CURRENT: usize = 0;
/// Index of the context captured at kernel entry, kept for diagnostics.
pub const CTXT_SYSCALL: usize = 1;

/// Saved machine state. Field order matches the context-switch assembly:
/// fifteen general-purpose registers, then instruction pointer, stack
/// pointer, and flags.
#[derive(Clone, Copy, Debug)]
#[repr(C)]
pub struct Context {
    pub regs: [u64; 15],
    pub rip: u64,
    pub rsp: u64,
    pub rflags: u64,
}

impl Context {
    pub const fn zero() -> Self {
        Self {
            regs: [0; 15],
            rip: 0,
            rsp: 0,
            rflags: 0,
        }
    }
}

/// Process control block.
#[derive(Clone, Copy)]
pub struct Pcb {
    pub pid: Pid,
    pub ppid: Option<Pid>,
    pub name: [u8; PNAMSIZ],

    /// Base priority, set at creation or by renice.
    pub pri: i16,
    /// Decayed priority: lowered on preemption, restored on cooperation.
    pub curpri: i16,
    /// Signed slice counter. Negative: guaranteed slices granted by
    /// `run_next`. Zero: exhausted, owed a penalty pass. Positive: turns to
    /// skip before becoming eligible again.
    pub slices: i16,

    /// Queue this process is linked on. `Queue::Curproc` is the sentinel for
    /// "not on any list" and is what the running process carries.
    pub wait_q: Queue,
    /// Next process on `wait_q`'s list (arena slot index).
    pub q_next: Option<u16>,
    /// Next process on the all-processes list (arena slot index).
    pub gl_next: Option<u16>,
    /// Condition this process is blocked on; 0 means not waiting. Compared
    /// by value only, never dereferenced.
    pub wait_cond: u64,

    pub ctxt: [Context; 2],
    pub magic: u32,

    pub sigstate: SignalState,
    /// Signals delivered over the process lifetime; the blocking primitive
    /// returns whether this moved since the previous sleep.
    pub nsigs: u64,

    /// Accumulated system CPU time, ms.
    pub systime: u64,
    /// Accumulated user CPU time, ms.
    pub usrtime: u64,
    /// CPU-time quota in ms; 0 means unlimited.
    pub maxcpu: u64,

    pub stack_magic: u64,
    pub mem: MemSpace,
}

impl Pcb {
    pub fn new(pid: Pid, ppid: Option<Pid>, name: &str, pri: i16) -> Self {
        let mut pcb = Self {
            pid,
            ppid,
            name: [0; PNAMSIZ],
            pri,
            curpri: pri,
            slices: 0,
            wait_q: Queue::Curproc,
            q_next: None,
            gl_next: None,
            wait_cond: 0,
            ctxt: [Context::zero(); 2],
            magic: CTXT_MAGIC,
            sigstate: SignalState::new(),
            nsigs: 0,
            systime: 0,
            usrtime: 0,
            maxcpu: 0,
            stack_magic: STACK_MAGIC,
            mem: MemSpace::new(),
        };
        pcb.set_name(name);
        pcb
    }

    pub fn set_name(&mut self, name: &str) {
        self.name = [0; PNAMSIZ];
        for (dst, src) in self.name.iter_mut().zip(name.bytes()) {
            *dst = src;
        }
    }

    pub fn name(&self) -> &str {
        let len = self.name.iter().position(|&b| b == 0).unwrap_or(PNAMSIZ);
        core::str::from_utf8(&self.name[..len]).unwrap_or("?")
    }

    /// Whether this process is linked on any queue list.
    pub fn queued(&self) -> bool {
        self.wait_q != Queue::Curproc
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_truncates_to_field_size() {
        let pcb = Pcb::new(7, Some(1), "a-process-name-that-overflows", 0);
        assert_eq!(pcb.name().len(), PNAMSIZ);
        assert!(pcb.name().starts_with("a-process-name-"));
    }

    #[test]
    fn fresh_pcb_is_unqueued_and_guarded() {
        let pcb = Pcb::new(3, Some(0), "worker", 5);
        assert!(!pcb.queued());
        assert_eq!(pcb.wait_cond, 0);
        assert_eq!(pcb.stack_magic, STACK_MAGIC);
        assert_eq!(pcb.magic, CTXT_MAGIC);
        assert_eq!(pcb.curpri, pcb.pri);
    }
}
