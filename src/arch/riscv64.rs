// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! RISC-V 64 (Linux) back end: a verbatim passthrough to the native
//! `setjmp`/`longjmp`, with the same single-naked-frame discipline as the
//! other back ends.

use core::arch::naked_asm;
use core::ffi::c_void;
use core::marker::PhantomData;
use libc::c_int;

/// Native jump buffer, the layout of `struct __jmp_buf_tag` shared by glibc
/// and musl: `pc`, `s0..s11`, `sp`, `fs0..fs11`, then the signal-mask flag
/// and room for the saved mask.
#[repr(C, align(16))]
pub struct JumpBuf {
    __jmp_buf: [u64; 26],
    __mask_was_saved: c_int,
    __saved_mask: libc::sigset_t,
    _not_send_sync: PhantomData<*const u8>,
}

impl JumpBuf {
    /// A zeroed buffer. The contents only become meaningful once a save has
    /// written to it.
    #[must_use]
    pub const fn new() -> Self {
        // Safety: all-zero bytes are a valid (if unsaved) buffer state
        unsafe { core::mem::zeroed() }
    }
}

unsafe extern "C" {
    // Referenced through `sym` below; never called from Rust code directly.
    fn setjmp(env: *mut JumpBuf) -> c_int;
    fn longjmp(env: *mut JumpBuf, val: c_int) -> !;
}

/// Saves the calling context into `*env`, then runs `f(arg, env)` inside the
/// save's activation. Returns `f`'s result if no jump happened, or the value
/// delivered by [`long_jump`] after one did.
///
/// # Safety
///
/// `env` and `arg` must be valid for the duration of the call, and `f` must
/// not unwind. Jumping to `*env` after this function has returned is
/// undefined behavior.
#[unsafe(naked)]
pub unsafe extern "C" fn set_jump_raw(
    env: *mut JumpBuf,
    arg: *mut c_void,
    f: unsafe extern "C" fn(*mut c_void, *mut JumpBuf) -> c_int,
) -> c_int {
    naked_asm! {
        ".balign 4",
        ".cfi_startproc",
        // At this point our register state contains the following:
        // - A0 holds the jump buffer.
        // - A1 holds the callback argument.
        // - A2 holds the callback.
        "addi sp, sp, -32",
        ".cfi_def_cfa_offset 32",
        "sd ra, 24(sp)",
        ".cfi_offset ra, -8",
        // Stash the callback, its argument and the buffer in callee-saved
        // registers. setjmp preserves them on the way in, and longjmp
        // reloads them from the buffer on the way back, so they are valid on
        // both returns.
        "sd s2, 16(sp)",
        "sd s3, 8(sp)",
        "sd s4, 0(sp)",
        "mv s2, a1",
        "mv s3, a2",
        "mv s4, a0",
        // First return gives 0, a second return through longjmp gives the
        // jump value.
        "call {setjmp}",
        "bnez a0, 2f",
        "mv a0, s2",
        "mv a1, s4",
        "jalr s3",
        "2:",
        "ld s4, 0(sp)",
        "ld s3, 8(sp)",
        "ld s2, 16(sp)",
        "ld ra, 24(sp)",
        "addi sp, sp, 32",
        ".cfi_def_cfa_offset 0",
        "ret",
        ".cfi_endproc",
        setjmp = sym setjmp,
    }
}

/// Restores a context saved by [`set_jump_raw`]. Forwards to the native
/// `longjmp` unchanged.
///
/// # Safety
///
/// The save activation for `env` must still be live on this thread, and no
/// frame being jumped over may carry drop glue.
pub unsafe fn long_jump(env: *mut JumpBuf, val: c_int) -> ! {
    // Safety: ensured by caller
    unsafe { longjmp(env, val) }
}
