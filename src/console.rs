//! Buffered console output and the keyboard-interrupt latch.
//!
//! Console writes from interrupt-unfriendly paths are parked in a byte ring
//! and drained from process context. The scheduler polls this module before
//! blocking, and the preemption hook prefers flushing pending output over
//! punishing a process that was merely waiting on the console.

use core::sync::atomic::{AtomicBool, Ordering};

use crate::ipl::IplLock;
use crate::ktrace;
use crate::scheduler::{self, Queue};

const OUT_BUF_SIZE: usize = 256;
const SCAN_BUF_SIZE: usize = 16;

struct OutBuf {
    buf: [u8; OUT_BUF_SIZE],
    len: usize,
}

struct ScanBuf {
    buf: [u8; SCAN_BUF_SIZE],
    len: usize,
}

static OUT: IplLock<OutBuf> = IplLock::new(OutBuf {
    buf: [0; OUT_BUF_SIZE],
    len: 0,
});

static SCANCODES: IplLock<ScanBuf> = IplLock::new(ScanBuf {
    buf: [0; SCAN_BUF_SIZE],
    len: 0,
});

/// Set by the keyboard interrupt handler; consumed by the scheduler's
/// pre-sleep poll.
static KINTR: AtomicBool = AtomicBool::new(false);

static KEYBOARD_MARKER: u8 = 0;

/// Condition token for processes blocked on console input.
pub fn keyboard_cond() -> u64 {
    core::ptr::addr_of!(KEYBOARD_MARKER) as u64
}

/// Park bytes for a later flush. Returns how many fit.
pub fn queue_output(bytes: &[u8]) -> usize {
    let mut out = OUT.lock();
    let room = OUT_BUF_SIZE - out.len;
    let n = bytes.len().min(room);
    let start = out.len;
    out.buf[start..start + n].copy_from_slice(&bytes[..n]);
    out.len += n;
    n
}

/// Bytes currently parked.
pub fn bcon_pending() -> usize {
    OUT.lock().len
}

/// Drain the parked output to the console device.
pub fn bflush() {
    let mut out = OUT.lock();
    if out.len == 0 {
        return;
    }
    let len = out.len;
    out.len = 0;

    #[cfg(all(target_arch = "x86_64", target_os = "none"))]
    crate::serial::write_bytes(&out.buf[..len]);
    #[cfg(not(all(target_arch = "x86_64", target_os = "none")))]
    {
        let _ = &out.buf[..len];
        ktrace!("console: flushed {} buffered bytes", len);
    }
}

/// Record a scancode from the keyboard interrupt handler and latch the
/// "keys arrived" flag. Safe from interrupt context.
pub fn push_scancode(code: u8) {
    let mut scan = SCANCODES.lock();
    if scan.len < SCAN_BUF_SIZE {
        let idx = scan.len;
        scan.buf[idx] = code;
        scan.len += 1;
    }
    KINTR.store(true, Ordering::Release);
}

/// Take the keyboard-interrupt latch, clearing it.
pub fn take_key_interrupt() -> bool {
    KINTR.swap(false, Ordering::AcqRel)
}

/// Drain pending scancodes and wake anyone blocked on console input.
pub fn checkkeys() {
    let drained = {
        let mut scan = SCANCODES.lock();
        let n = scan.len;
        scan.len = 0;
        n
    };
    if drained > 0 {
        ktrace!("console: {} scancodes", drained);
        scheduler::wake(Queue::Io, keyboard_cond());
    }
}

/// Poll the console: flush any parked output.
pub fn checkbttys() {
    if bcon_pending() > 0 {
        bflush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn output_ring_fills_and_drains() {
        bflush();
        assert_eq!(queue_output(b"hello"), 5);
        assert_eq!(bcon_pending(), 5);
        bflush();
        assert_eq!(bcon_pending(), 0);
    }

    #[test]
    #[serial]
    fn output_ring_is_bounded() {
        bflush();
        let big = [b'x'; OUT_BUF_SIZE + 32];
        assert_eq!(queue_output(&big), OUT_BUF_SIZE);
        assert_eq!(queue_output(b"more"), 0);
        bflush();
    }

    #[test]
    #[serial]
    fn key_interrupt_latch_is_take_once() {
        take_key_interrupt();
        push_scancode(0x1c);
        assert!(take_key_interrupt());
        assert!(!take_key_interrupt());
        checkkeys();
    }
}
