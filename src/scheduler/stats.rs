//! Scheduler diagnostics.

use crate::kinfo;
use crate::process::CTXT_SYSCALL;

use super::load::{avenrun, number_running, uptime};
use super::table::SCHED;
use super::types::LOAD_SCALE;

/// Dump the process table: uptime, the three load figures (scaled to
/// hundredths), and per process the queue it sits on plus the program
/// counter and stack pointer captured at its last kernel entry.
pub fn dump_processes() {
    let loads = avenrun();
    kinfo!(
        "Uptime: {} seconds Loads: {} {} {} Processes running: {}",
        uptime(),
        (loads[0] * 100) / LOAD_SCALE,
        (loads[1] * 100) / LOAD_SCALE,
        (loads[2] * 100) / LOAD_SCALE,
        number_running()
    );

    let sched = SCHED.lock();
    for slot in sched.all_procs() {
        let p = sched.proc(slot);
        kinfo!(
            "pid {:>4} {:<16} state {:<6} PC: {:#x} SP: {:#x}",
            p.pid,
            p.name(),
            p.wait_q.name(),
            p.ctxt[CTXT_SYSCALL].rip,
            p.ctxt[CTXT_SYSCALL].rsp
        );
    }
}

/// Processes currently linked on each queue, in dump order: ready, wait,
/// iowait, zombie, tsr, stop, select.
pub fn queue_lengths() -> [usize; 7] {
    use super::types::Queue;
    let sched = SCHED.lock();
    [
        Queue::Ready,
        Queue::Wait,
        Queue::Io,
        Queue::Zombie,
        Queue::Tsr,
        Queue::Stop,
        Queue::Select,
    ]
    .map(|que| sched.queue_iter(que).count())
}
