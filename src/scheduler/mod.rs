//! Scheduler subsystem
//!
//! A preemptible, priority-aware scheduler for a single physical execution
//! unit. Processes sit on a fixed set of FIFO queues threaded through their
//! control blocks; everything that can run funnels through one blocking
//! primitive, and asynchronous wakeups move blocked processes back to the
//! ready queue where priority-weighted round-robin selection picks them up.
//!
//! ## Key mechanisms
//! - **Slice counters**: signed per-process counters; positive values are
//!   penalty passes to sit out, negative values are guarantees granted by
//!   `run_next`.
//! - **Race markers**: two single-slot conditions (`sleepcond`,
//!   `iwakecond`) let wakeups that fire before the sleeper blocks short-
//!   circuit the sleep entirely.
//! - **Liveness fallback**: with nothing ready, napping processes are
//!   revived and pid 0 is dragged back onto the ready queue as a last
//!   resort.
//!
//! ## Module Organization
//!
//! - `types`: queue enumeration and tuning constants
//! - `table`: the process table and global scheduler state
//! - `queues`: enqueue/dequeue and the run-next override
//! - `core`: the blocking primitive, preemption hook, timer tick
//! - `wake`: wake dispatch and the interrupt-race variants
//! - `load`: priority decay reset and load averaging
//! - `stats`: diagnostic process dump
//! - `context`: the low-level context transfer

mod context;
mod core;
mod load;
mod queues;
mod stats;
pub mod table;
pub mod types;
mod wake;

pub use types::{Queue, MAX_NICE, MIN_NICE};
pub use types::{slices_for, DEFAULT_TIME_SLICE, HZ, LOAD_SCALE};

pub use table::{current_pid, init_proc, new_proc, sched_lock, Sched};

pub use queues::run_next;

pub use self::core::{
    fresh_slices, preempt, proc_clock, set_proc_clock, set_time_slice, sleep, sleep_checked,
    swap_in_curproc, time_slice, timer_tick, waitpid_cond, SleepPlan, SwitchFrames,
};

pub use wake::{iwake, select_coll_cond, select_cond, wake, wakeselect};

pub use load::{
    avenrun, calc_load_average, number_running, reset_priorities, ticks, uptime, LoadWindow,
};

pub use stats::{dump_processes, queue_lengths};
