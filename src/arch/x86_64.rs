// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! x86_64 System V back end: a verbatim passthrough to the native
//! `setjmp`/`longjmp`.
//!
//! The only subtlety is that a function which calls `setjmp` through an
//! ordinary Rust frame would invalidate the saved context the moment it
//! returns, and the compiler is free to keep locals in registers across a
//! call that returns twice. Both problems disappear by doing the save call
//! and the callback invocation inside one naked frame whose layout we fully
//! control.

use cfg_if::cfg_if;
use core::arch::naked_asm;
use core::ffi::c_void;
use core::marker::PhantomData;
use libc::c_int;

cfg_if! {
    if #[cfg(target_os = "linux")] {
        /// Native jump buffer, the layout of `struct __jmp_buf_tag` shared by
        /// glibc and musl: eight saved registers, the signal-mask flag and
        /// room for the saved mask.
        #[repr(C, align(16))]
        pub struct JumpBuf {
            __jmp_buf: [u64; 8],
            __mask_was_saved: c_int,
            __saved_mask: libc::sigset_t,
            _not_send_sync: PhantomData<*const u8>,
        }
    } else if #[cfg(target_os = "macos")] {
        /// Native jump buffer, `int[_JBLEN]` with `_JBLEN == 37`. The saved
        /// signal mask lives inside the array on this platform.
        #[repr(C, align(16))]
        pub struct JumpBuf {
            __opaque: [c_int; 37],
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
        ".balign 16",
        ".cfi_startproc",
        // At this point our register state contains the following:
        // - RDI holds the jump buffer.
        // - RSI holds the callback argument.
        // - RDX holds the callback.
        "push rbp",
        ".cfi_def_cfa_offset 16",
        ".cfi_offset rbp, -16",
        "mov rbp, rsp",
        ".cfi_def_cfa_register rbp",
        // Stash the callback, its argument and the buffer in callee-saved
        // registers. setjmp preserves them on the way in, and longjmp reloads
        // them from the buffer on the way back, so they are valid on both
        // returns.
        "push r12",
        "push r13",
        "push r14",
        // Keep RSP 16-byte aligned for the calls below.
        "sub rsp, 8",
        "mov r12, rsi",
        "mov r13, rdx",
        "mov r14, rdi",
        // First return gives 0, a second return through longjmp gives the
        // jump value. RSP and RIP recorded here are exactly what the second
        // return restores, which is why the whole dance lives in this frame.
        "call {setjmp}",
        "test eax, eax",
        "jnz 2f",
        "mov rdi, r12",
        "mov rsi, r14",
        "call r13",
        "2:",
        "add rsp, 8",
        "pop r14",
        "pop r13",
        "pop r12",
        "pop rbp",
        ".cfi_def_cfa rsp, 8",
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
