// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! AArch64 back end: a verbatim passthrough to the native `setjmp`/`longjmp`.
//!
//! Same shape as the x86_64 System V back end: the save call and the
//! callback invocation share one naked frame so the saved context stays
//! valid for the callback's whole dynamic extent and no Rust local can sit
//! in a register across the twice-returning call.

use cfg_if::cfg_if;
use core::arch::naked_asm;
use core::ffi::c_void;
use core::marker::PhantomData;
use libc::c_int;

cfg_if! {
    if #[cfg(target_os = "linux")] {
        /// Native jump buffer, the layout of `struct __jmp_buf_tag` shared by
        /// glibc and musl: `x19..x30`, `sp`, `d8..d15` plus a reserved slot,
        /// then the signal-mask flag and room for the saved mask.
        #[repr(C, align(16))]
        pub struct JumpBuf {
            __jmp_buf: [u64; 22],
            __mask_was_saved: c_int,
            __saved_mask: libc::sigset_t,
            _not_send_sync: PhantomData<*const u8>,
        }
    } else if #[cfg(target_os = "macos")] {
        /// Native jump buffer, `int[_JBLEN]` with `_JBLEN == 48`.
        #[repr(C, align(16))]
        pub struct JumpBuf {
            __opaque: [c_int; 48],
            _not_send_sync: PhantomData<*const u8>,
        }
    } else {
        compile_error!("unsupported operating system");
    }
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
        // - X0 holds the jump buffer.
        // - X1 holds the callback argument.
        // - X2 holds the callback.
        "stp x29, x30, [sp, #-48]!",
        ".cfi_def_cfa_offset 48",
        ".cfi_offset w29, -48",
        ".cfi_offset w30, -40",
        "mov x29, sp",
        // Stash the callback, its argument and the buffer in callee-saved
        // registers. setjmp preserves them on the way in, and longjmp
        // reloads them from the buffer on the way back, so they are valid on
        // both returns.
        "stp x19, x20, [sp, #16]",
        "str x21, [sp, #32]",
        "mov x19, x1",
        "mov x20, x2",
        "mov x21, x0",
        // First return gives 0, a second return through longjmp gives the
        // jump value.
        "bl {setjmp}",
        "cbnz w0, 2f",
        "mov x0, x19",
        "mov x1, x21",
        "blr x20",
        "2:",
        "ldr x21, [sp, #32]",
        "ldp x19, x20, [sp, #16]",
        "ldp x29, x30, [sp], #48",
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
