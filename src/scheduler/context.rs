//! Low-level context transfer.
//!
//! `context_switch` saves the caller's machine state into `old` and resumes
//! `new`; the call "returns" only when some later switch selects the saved
//! context again. Only bare metal can actually transfer control — hosted
//! builds keep the decision layer testable and treat reaching the transfer
//! itself as a hard error.

use crate::process::Context;

/// Save the current machine state into `old_context` and resume
/// `new_context`.
///
/// # Safety
/// Both pointers must reference live, correctly laid out [`Context`] values,
/// and no locks may be held across the call: the resumed process would
/// inherit them on a foreign stack.
#[cfg(all(target_arch = "x86_64", target_os = "none"))]
#[unsafe(naked)]
pub unsafe extern "C" fn context_switch(
    _old_context: *mut Context,
    _new_context: *const Context,
) {
    core::arch::naked_asm!(
        "test rdi, rdi",
        "jz 2f",
        "mov [rdi + 0x00], r15",
        "mov [rdi + 0x08], r14",
        "mov [rdi + 0x10], r13",
        "mov [rdi + 0x18], r12",
        "mov [rdi + 0x20], r11",
        "mov [rdi + 0x28], r10",
        "mov [rdi + 0x30], r9",
        "mov [rdi + 0x38], r8",
        "mov [rdi + 0x40], rsi",
        "mov [rdi + 0x48], rdi",
        "mov [rdi + 0x50], rbp",
        "mov [rdi + 0x58], rdx",
        "mov [rdi + 0x60], rcx",
        "mov [rdi + 0x68], rbx",
        "mov [rdi + 0x70], rax",
        // Return address becomes the saved rip; the stack pointer is taken
        // from before it was pushed.
        "mov rax, [rsp]",
        "mov [rdi + 0x78], rax",
        "lea rax, [rsp + 8]",
        "mov [rdi + 0x80], rax",
        "pushfq",
        "pop rax",
        "mov [rdi + 0x88], rax",
        "2:",
        "mov r15, [rsi + 0x00]",
        "mov r14, [rsi + 0x08]",
        "mov r13, [rsi + 0x10]",
        "mov r12, [rsi + 0x18]",
        "mov r11, [rsi + 0x20]",
        "mov r10, [rsi + 0x28]",
        "mov r9,  [rsi + 0x30]",
        "mov r8,  [rsi + 0x38]",
        "mov rbp, [rsi + 0x50]",
        "mov rdx, [rsi + 0x58]",
        "mov rcx, [rsi + 0x60]",
        "mov rbx, [rsi + 0x68]",
        "mov rax, [rsi + 0x70]",
        "mov rdi, [rsi + 0x88]",
        "push rdi",
        "popfq",
        "mov rsp, [rsi + 0x80]",
        "mov rdi, [rsi + 0x78]",
        "push rdi",
        "mov rdi, [rsi + 0x48]",
        "mov rsi, [rsi + 0x40]",
        "ret",
    )
}

#[cfg(not(all(target_arch = "x86_64", target_os = "none")))]
pub unsafe extern "C" fn context_switch(
    _old_context: *mut Context,
    _new_context: *const Context,
) {
    unreachable!("context transfer is only possible on a bare-metal target");
}
