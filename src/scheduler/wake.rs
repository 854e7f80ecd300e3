//! Waking blocked processes.
//!
//! Wake operations promote matching sleepers to the ready queue's tail; a
//! woken process is ready, not running, and is subject to normal victim
//! selection. Two single-slot markers close the windows where a wakeup can
//! race a process that decided to sleep but has not blocked yet:
//! `sleepcond` covers the ordinary kernel-call path, `iwakecond` covers
//! interrupt handlers firing a moment before their owner enqueues.

use crate::kwarn;
use crate::process::Pid;

use super::table::{Sched, SCHED};
use super::types::Queue;

static SELECT_WAIT: u8 = 0;
static SELECT_COLL: u8 = 0;

/// Condition token a process parks on while polling descriptors.
pub fn select_cond() -> u64 {
    core::ptr::addr_of!(SELECT_WAIT) as u64
}

/// Condition token recorded when concurrent polls collided and every waiter
/// must re-scan.
pub fn select_coll_cond() -> u64 {
    core::ptr::addr_of!(SELECT_COLL) as u64
}

impl Sched {
    /// Move every process on `que` blocked on `cond` to the ready queue, in
    /// their original relative order. The scan restarts from the head
    /// whenever an element's membership looks inconsistent, so it tolerates
    /// queue mutation between examinations.
    fn do_wake(&mut self, que: Queue, cond: u64) {
        'top: loop {
            let mut cursor = self.sys_q[que.index()];
            while let Some(slot) = cursor {
                if self.proc(slot).wait_q != que {
                    continue 'top;
                }
                cursor = self.proc(slot).q_next;
                if self.proc(slot).wait_cond == cond {
                    self.rm_q(que, slot);
                    self.add_q(Queue::Ready, slot);
                }
            }
            break;
        }
    }

    /// Wake all processes on `que` waiting for `cond`. Waking the ready
    /// queue is a logic error: reported and ignored.
    pub fn wake(&mut self, que: Queue, cond: u64) {
        if que == Queue::Ready {
            kwarn!("wake: why wake up ready processes??");
            return;
        }
        if self.sleepcond == cond {
            self.sleepcond = 0;
        }
        self.do_wake(que, cond);
    }

    /// Interrupt-context wake. When `owner` is the process that is in the
    /// act of sleeping on this very condition but has not enqueued yet, the
    /// condition is recorded as already delivered so the sleep fast path
    /// observes the race; an already-armed marker makes the whole call a
    /// no-op. Callers pass `owner = None` whenever their process might be
    /// sleeping on something unrelated.
    pub fn iwake(&mut self, que: Queue, cond: u64, owner: Option<Pid>) {
        if let Some(pid) = owner {
            if self.iwakecond == cond {
                return;
            }
            if self.cur().pid == pid && !self.cur().queued() {
                self.iwakecond = cond;
            }
        }
        self.do_wake(que, cond);
    }

    /// Promote one process out of an I/O-multiplexing wait. Clears its
    /// condition when it carries one of the select sentinels, and moves it
    /// to ready if it sits on the select queue.
    pub fn wakeselect(&mut self, slot: u16) {
        {
            let p = self.proc_mut(slot);
            if p.wait_cond == select_cond() || p.wait_cond == select_coll_cond() {
                p.wait_cond = 0;
            }
        }
        if self.proc(slot).wait_q == Queue::Select {
            self.rm_q(Queue::Select, slot);
            self.add_q(Queue::Ready, slot);
        }
    }
}

/// Wake all processes on the queue waiting for the condition.
pub fn wake(que: Queue, cond: u64) {
    SCHED.lock().wake(que, cond);
}

/// Interrupt-safe wake; see [`Sched::iwake`].
pub fn iwake(que: Queue, cond: u64, owner: Option<Pid>) {
    SCHED.lock().iwake(que, cond, owner);
}

/// Wake a process from an I/O-multiplexing wait. Safe from interrupt
/// context.
pub fn wakeselect(pid: Pid) {
    let mut sched = SCHED.lock();
    if let Some(slot) = sched.pid_slot(pid) {
        sched.wakeselect(slot);
    }
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

    fn block(s: &mut Sched, slot: u16, que: Queue, cond: u64) {
        s.proc_mut(slot).wait_cond = cond;
        s.add_q(que, slot);
    }

    #[test]
    fn wake_moves_matching_sleepers_in_order() {
        let (mut s, p) = boot_with(4);
        block(&mut s, p[0], Queue::Io, 42);
        block(&mut s, p[1], Queue::Io, 7);
        block(&mut s, p[2], Queue::Io, 42);
        block(&mut s, p[3], Queue::Wait, 42);

        s.wake(Queue::Io, 42);

        let ready: std::vec::Vec<u16> = s.queue_iter(Queue::Ready).collect();
        assert_eq!(ready, [p[0], p[2]]);
        let io: std::vec::Vec<u16> = s.queue_iter(Queue::Io).collect();
        assert_eq!(io, [p[1]]);
        // A different queue with the same condition is untouched.
        assert_eq!(s.proc(p[3]).wait_q, Queue::Wait);
    }

    #[test]
    fn wake_on_the_ready_queue_is_reported_and_ignored() {
        let (mut s, p) = boot_with(1);
        block(&mut s, p[0], Queue::Ready, 5);
        s.sleepcond = 5;
        s.wake(Queue::Ready, 5);
        // Nothing moved, and the race marker was left alone.
        assert_eq!(s.proc(p[0]).wait_q, Queue::Ready);
        assert_eq!(s.sleepcond, 5);
    }

    #[test]
    fn wake_clears_a_matching_sleep_marker() {
        let (mut s, _) = boot_with(0);
        s.sleepcond = 42;
        s.wake(Queue::Io, 42);
        assert_eq!(s.sleepcond, 0);

        s.sleepcond = 43;
        s.wake(Queue::Io, 42);
        assert_eq!(s.sleepcond, 43);
    }

    #[test]
    fn iwake_arms_the_marker_only_for_the_racing_owner() {
        let (mut s, p) = boot_with(1);
        // Current process (pid 0) is about to sleep on 42 and not enqueued:
        // this is exactly the race iwake closes.
        s.iwake(Queue::Io, 42, Some(0));
        assert_eq!(s.iwakecond, 42);

        // Marker already armed: the call is a no-op, even for a sleeper
        // that would otherwise match.
        block(&mut s, p[0], Queue::Io, 42);
        s.iwake(Queue::Io, 42, Some(0));
        assert_eq!(s.proc(p[0]).wait_q, Queue::Io);
    }

    #[test]
    fn iwake_with_foreign_owner_just_wakes() {
        let (mut s, p) = boot_with(2);
        block(&mut s, p[0], Queue::Io, 42);
        s.iwake(Queue::Io, 42, Some(s.proc(p[1]).pid));
        assert_eq!(s.iwakecond, 0);
        assert_eq!(s.proc(p[0]).wait_q, Queue::Ready);
    }

    #[test]
    fn iwake_without_owner_never_arms() {
        let (mut s, p) = boot_with(1);
        block(&mut s, p[0], Queue::Io, 42);
        s.iwake(Queue::Io, 42, None);
        assert_eq!(s.iwakecond, 0);
        assert_eq!(s.proc(p[0]).wait_q, Queue::Ready);
    }

    #[test]
    fn wakeselect_clears_sentinels_and_promotes() {
        let (mut s, p) = boot_with(2);
        block(&mut s, p[0], Queue::Select, select_cond());
        block(&mut s, p[1], Queue::Io, select_cond());

        s.wakeselect(p[0]);
        assert_eq!(s.proc(p[0]).wait_q, Queue::Ready);
        assert_eq!(s.proc(p[0]).wait_cond, 0);

        // Not on the select queue: the condition clears, membership stays.
        s.wakeselect(p[1]);
        assert_eq!(s.proc(p[1]).wait_q, Queue::Io);
        assert_eq!(s.proc(p[1]).wait_cond, 0);
    }

    #[test]
    fn wakeselect_leaves_foreign_conditions_alone() {
        let (mut s, p) = boot_with(1);
        block(&mut s, p[0], Queue::Select, 1234);
        s.wakeselect(p[0]);
        // Still promoted off the select queue, but the condition survives.
        assert_eq!(s.proc(p[0]).wait_q, Queue::Ready);
        assert_eq!(s.proc(p[0]).wait_cond, 1234);
    }
}
