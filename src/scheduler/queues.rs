//! Queue management.
//!
//! Processes move between a fixed set of FIFO queues threaded through their
//! own `q_next` links. Membership is exclusive and strictly tracked: putting
//! a process on two lists, or removing one from a list it is not on, is a
//! logic bug the kernel refuses to continue past.

use crate::kpanic;
use crate::process::Pid;

use super::table::{Sched, SCHED};
use super::types::{slices_for, Queue, MAX_NICE};

impl Sched {
    /// Append a process to the tail of the named queue.
    ///
    /// Entering a wait queue with a non-negative slice counter rewards the
    /// process for yielding: its decayed priority snaps back to base and its
    /// slice budget is recomputed from it.
    pub fn add_q(&mut self, que: Queue, slot: u16) {
        if que == Queue::Curproc {
            kpanic!("add_q: the run pseudo-queue has no list");
        }
        {
            let p = self.proc(slot);
            if p.wait_q != Queue::Curproc || p.q_next.is_some() {
                kpanic!(
                    "add_q: pid {} is already on the {} queue",
                    p.pid,
                    p.wait_q.name()
                );
            }
        }

        match self.sys_q[que.index()] {
            None => self.sys_q[que.index()] = Some(slot),
            Some(head) => {
                let mut tail = head;
                while let Some(next) = self.proc(tail).q_next {
                    tail = next;
                }
                self.proc_mut(tail).q_next = Some(slot);
            }
        }

        let p = self.proc_mut(slot);
        p.wait_q = que;
        if que != Queue::Ready && p.slices >= 0 {
            p.curpri = p.pri;
            p.slices = slices_for(p.curpri);
        }
    }

    /// Remove a specific process from the named queue.
    pub fn rm_q(&mut self, que: Queue, slot: u16) {
        {
            let p = self.proc(slot);
            if p.wait_q != que {
                kpanic!(
                    "rm_q: pid {} is on the {} queue, not {}",
                    p.pid,
                    p.wait_q.name(),
                    que.name()
                );
            }
        }

        let mut prev: Option<u16> = None;
        let mut cursor = self.sys_q[que.index()];
        while let Some(s) = cursor {
            if s == slot {
                break;
            }
            prev = Some(s);
            cursor = self.proc(s).q_next;
        }
        if cursor.is_none() {
            kpanic!("rm_q: unable to remove process from queue");
        }

        let next = self.proc(slot).q_next;
        match prev {
            Some(p) => self.proc_mut(p).q_next = next,
            None => self.sys_q[que.index()] = next,
        }

        let p = self.proc_mut(slot);
        p.wait_q = Queue::Curproc;
        p.q_next = None;
    }

    /// Administrative override: splice a process onto the head of the ready
    /// queue with `count` guaranteed slices and maximum priority, so it wins
    /// the very next victim-selection pass. It does not start running until
    /// the next context switch. The caller must ensure the process is not
    /// currently on any queue.
    pub fn run_next(&mut self, slot: u16, count: i16) {
        let head = self.sys_q[Queue::Ready.index()];
        let p = self.proc_mut(slot);
        p.slices = -count;
        p.curpri = MAX_NICE;
        p.wait_q = Queue::Ready;
        p.q_next = head;
        self.sys_q[Queue::Ready.index()] = Some(slot);
    }
}

/// Schedule the process to run at the very next context switch.
pub fn run_next(pid: Pid, count: i16) -> Result<(), &'static str> {
    let mut sched = SCHED.lock();
    let Some(slot) = sched.pid_slot(pid) else {
        return Err("no such process");
    };
    sched.run_next(slot, count);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::Pcb;

    fn boot_with(n: u64) -> (Sched, std::vec::Vec<u16>) {
        let mut s = Sched::new();
        s.install_root("root");
        let slots = (1..=n)
            .map(|pid| s.insert(Pcb::new(pid, Some(0), "proc", 0)).unwrap())
            .collect();
        (s, slots)
    }

    fn members(s: &Sched, que: Queue) -> std::vec::Vec<u16> {
        s.queue_iter(que).collect()
    }

    /// No process may ever be linked on two lists, and the running process
    /// may not be linked at all.
    fn assert_membership_invariants(s: &Sched) {
        let queues = [
            Queue::Ready,
            Queue::Wait,
            Queue::Io,
            Queue::Zombie,
            Queue::Tsr,
            Queue::Stop,
            Queue::Select,
        ];
        let mut seen = std::vec::Vec::new();
        for que in queues {
            for slot in s.queue_iter(que) {
                assert_eq!(s.proc(slot).wait_q, que);
                assert!(!seen.contains(&slot), "slot {} on two queues", slot);
                assert_ne!(slot, s.curslot(), "current process is enqueued");
                seen.push(slot);
            }
        }
    }

    #[test]
    fn fifo_order_is_preserved() {
        let (mut s, p) = boot_with(3);
        for &slot in &p {
            s.add_q(Queue::Ready, slot);
        }
        assert_eq!(members(&s, Queue::Ready), p);
        assert_membership_invariants(&s);

        s.rm_q(Queue::Ready, p[1]);
        assert_eq!(members(&s, Queue::Ready), [p[0], p[2]]);
        assert!(!s.proc(p[1]).queued());
        assert_membership_invariants(&s);
    }

    #[test]
    fn membership_matches_enqueue_history() {
        let (mut s, p) = boot_with(4);
        s.add_q(Queue::Io, p[0]);
        s.add_q(Queue::Io, p[1]);
        s.add_q(Queue::Select, p[2]);
        s.rm_q(Queue::Io, p[0]);
        s.add_q(Queue::Io, p[3]);
        assert_eq!(members(&s, Queue::Io), [p[1], p[3]]);
        assert_eq!(members(&s, Queue::Select), [p[2]]);
        assert_membership_invariants(&s);
    }

    #[test]
    #[should_panic(expected = "already on the")]
    fn double_enqueue_is_fatal() {
        let (mut s, p) = boot_with(1);
        s.add_q(Queue::Ready, p[0]);
        s.add_q(Queue::Io, p[0]);
    }

    #[test]
    #[should_panic(expected = "not")]
    fn removing_a_non_member_is_fatal() {
        let (mut s, p) = boot_with(1);
        s.rm_q(Queue::Ready, p[0]);
    }

    #[test]
    #[should_panic(expected = "pseudo-queue")]
    fn enqueuing_on_the_run_slot_is_fatal() {
        let (mut s, p) = boot_with(1);
        s.add_q(Queue::Curproc, p[0]);
    }

    #[test]
    fn wait_queue_entry_rewards_cooperation() {
        let (mut s, p) = boot_with(1);
        {
            let pcb = s.proc_mut(p[0]);
            pcb.pri = -4;
            pcb.curpri = -9;
            pcb.slices = 2;
        }
        s.add_q(Queue::Io, p[0]);
        let pcb = s.proc(p[0]);
        assert_eq!(pcb.curpri, -4);
        assert_eq!(pcb.slices, slices_for(-4));
    }

    #[test]
    fn ready_queue_entry_does_not_reward() {
        let (mut s, p) = boot_with(1);
        {
            let pcb = s.proc_mut(p[0]);
            pcb.pri = 0;
            pcb.curpri = -3;
            pcb.slices = 1;
        }
        s.add_q(Queue::Ready, p[0]);
        let pcb = s.proc(p[0]);
        assert_eq!(pcb.curpri, -3);
        assert_eq!(pcb.slices, 1);
    }

    #[test]
    fn run_next_grantees_keep_their_slices() {
        let (mut s, p) = boot_with(1);
        s.run_next(p[0], 3);
        s.rm_q(Queue::Ready, p[0]);
        // A negative counter survives wait-queue entry untouched.
        s.add_q(Queue::Io, p[0]);
        assert_eq!(s.proc(p[0]).slices, -3);
    }

    #[test]
    fn run_next_splices_at_the_head() {
        let (mut s, p) = boot_with(3);
        s.add_q(Queue::Ready, p[0]);
        s.add_q(Queue::Ready, p[1]);
        s.run_next(p[2], 2);
        assert_eq!(members(&s, Queue::Ready), [p[2], p[0], p[1]]);
        let pcb = s.proc(p[2]);
        assert_eq!(pcb.slices, -2);
        assert_eq!(pcb.curpri, MAX_NICE);
        assert_membership_invariants(&s);
    }
}
