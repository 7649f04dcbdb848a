// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! x86_64 Windows back end: `_setjmp` with a null frame-unwind descriptor.
//!
//! On Win64 the CRT's `setjmp` macro expands to `_setjmp(buf, frame)` where
//! `frame` is the caller's frame address. With a nonzero `Frame` field in the
//! buffer, `longjmp` runs `RtlUnwindEx` toward that frame instead of simply
//! reloading registers. The unwind walks every intermediate frame's unwind
//! metadata; when frames built by MinGW, MSVC and rustc mix in one call
//! chain, that metadata does not always line up and the walk dies with
//! `STATUS_BAD_STACK`. MinGW-built save points in particular have crashed
//! this way for years whenever the restore crossed MSVC-built frames.
//!
//! The saves here always pass a null frame pointer, so `Frame` is zero and
//! `longjmp` does an unconditional direct reload. Nothing else about the
//! save/restore contract changes; the unwind was optional cleanup that the
//! error-recovery protocols built on this primitive do not use.

use core::arch::naked_asm;
use core::ffi::{c_int, c_void};
use core::marker::PhantomData;

/// Native jump buffer, the CRT's `_JUMP_BUFFER`. `Frame` comes first, then
/// the GPRs, the FP control words and `Xmm6..Xmm15`, which is what forces the
/// 16-byte alignment.
#[repr(C, align(16))]
pub struct JumpBuf {
    frame: u64,
    __gpr: [u64; 10],
    __mxcsr: u32,
    __fpcsr: u16,
    __spare: u16,
    __xmm: [[u64; 2]; 10],
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

    /// The `Frame` member of the underlying `_JUMP_BUFFER`. Zero after every
    /// save made through this crate, which is precisely what keeps `longjmp`
    /// off the SEH unwind path.
    #[must_use]
    pub fn frame_descriptor(&self) -> u64 {
        self.frame
    }
}

unsafe extern "C" {
    // Referenced through `sym` below; never called from Rust code directly.
    // The two-argument form is the real CRT entry point that the setjmp
    // macro hides: the second argument becomes the buffer's Frame field.
    fn _setjmp(env: *mut JumpBuf, frame: *mut c_void) -> c_int;
    fn longjmp(env: *mut JumpBuf, val: c_int) -> !;
}

/// Saves the calling context into `*env`, then runs `f(arg, env)` inside the
/// save's activation. Returns `f`'s result if no jump happened, or the value
/// delivered by [`long_jump`] after one did.
///
/// The saved context always carries a null frame-unwind descriptor; see the
/// module docs.
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
        ".seh_proc set_jump_raw",
        // At this point our register state contains the following:
        // - RCX holds the jump buffer.
        // - RDX holds the callback argument.
        // - R8 holds the callback.
        "push rbp",
        ".seh_pushreg rbp",
        "push rsi",
        ".seh_pushreg rsi",
        "push rdi",
        ".seh_pushreg rdi",
        "push rbx",
        ".seh_pushreg rbx",
        // 32 bytes of shadow space for the calls below plus 8 to keep RSP
        // 16-byte aligned.
        "sub rsp, 40",
        ".seh_stackalloc 40",
        ".seh_endprologue",
        // Stash the callback, its argument and the buffer in callee-saved
        // registers. _setjmp preserves them on the way in, and longjmp
        // reloads them from the buffer on the way back, so they are valid on
        // both returns.
        "mov rsi, rdx",
        "mov rdi, r8",
        "mov rbx, rcx",
        // Null frame-unwind descriptor instead of the caller's frame address.
        // The stock macro expansion would put a real frame address here and
        // arm the RtlUnwindEx path in longjmp.
        "xor edx, edx",
        "call {setjmp}",
        "test eax, eax",
        "jnz 2f",
        "mov rcx, rsi",
        "mov rdx, rbx",
        "call rdi",
        "2:",
        "add rsp, 40",
        "pop rbx",
        "pop rdi",
        "pop rsi",
        "pop rbp",
        "ret",
        ".seh_endproc",
        setjmp = sym _setjmp,
    }
}

/// Restores a context saved by [`set_jump_raw`]. Forwards to the CRT's
/// `longjmp` unchanged; with the `Frame` field zeroed by every save here, the
/// CRT takes its direct register-reload path.
///
/// # Safety
///
/// The save activation for `env` must still be live on this thread, and no
/// frame being jumped over may carry drop glue.
pub unsafe fn long_jump(env: *mut JumpBuf, val: c_int) -> ! {
    // Safety: ensured by caller
    unsafe { longjmp(env, val) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::ptr;

    unsafe extern "C" fn run_nothing(_arg: *mut c_void, _env: *mut JumpBuf) -> c_int {
        0
    }

    unsafe extern "C" fn jump_three(_arg: *mut c_void, env: *mut JumpBuf) -> c_int {
        // Safety: the matching save activation is live
        unsafe { long_jump(env, 3) }
    }

    #[test]
    fn save_writes_null_frame_descriptor() {
        let mut env = JumpBuf::new();
        // Safety: the buffer outlives the call
        let ret = unsafe { set_jump_raw(&mut env, ptr::null_mut(), run_nothing) };
        assert_eq!(ret, 0);
        assert_eq!(env.frame_descriptor(), 0);
    }

    #[test]
    fn save_overwrites_stale_frame_descriptor() {
        // The save must write the null descriptor itself rather than rely on
        // the buffer having been zero-initialized.
        let mut env = JumpBuf::new();
        env.frame = u64::MAX;
        // Safety: the buffer outlives the call
        let ret = unsafe { set_jump_raw(&mut env, ptr::null_mut(), run_nothing) };
        assert_eq!(ret, 0);
        assert_eq!(env.frame_descriptor(), 0);
    }

    #[test]
    fn frame_descriptor_stays_null_across_jump() {
        let mut env = JumpBuf::new();
        // Safety: the buffer outlives the call
        let ret = unsafe { set_jump_raw(&mut env, ptr::null_mut(), jump_three) };
        assert_eq!(ret, 3);
        assert_eq!(env.frame_descriptor(), 0);
    }

    /// The stock MinGW expansion of `setjmp()`: forwards the caller's frame
    /// address, arming the SEH unwind in `longjmp`. Exists only so the fault
    /// this crate removes stays reproducible.
    #[cfg(target_env = "gnu")]
    #[unsafe(naked)]
    unsafe extern "C" fn set_jump_stock_frame(
        env: *mut JumpBuf,
        arg: *mut c_void,
        f: unsafe extern "C" fn(*mut c_void, *mut JumpBuf) -> c_int,
    ) -> c_int {
        naked_asm! {
            ".balign 16",
            ".seh_proc set_jump_stock_frame",
            "push rbp",
            ".seh_pushreg rbp",
            "push rsi",
            ".seh_pushreg rsi",
            "push rdi",
            ".seh_pushreg rdi",
            "push rbx",
            ".seh_pushreg rbx",
            "sub rsp, 40",
            ".seh_stackalloc 40",
            ".seh_endprologue",
            "mov rsi, rdx",
            "mov rdi, r8",
            "mov rbx, rcx",
            // This frame's canonical frame address: entry RSP + 8, which is
            // RSP + 80 after the four pushes and the stack allocation above.
            "lea rdx, [rsp + 80]",
            "call {setjmp}",
            "test eax, eax",
            "jnz 2f",
            "mov rcx, rsi",
            "mov rdx, rbx",
            "call rdi",
            "2:",
            "add rsp, 40",
            "pop rbx",
            "pop rdi",
            "pop rsi",
            "pop rbp",
            "ret",
            ".seh_endproc",
            setjmp = sym _setjmp,
        }
    }

    /// Negative control for the null-descriptor override. With a populated
    /// descriptor, the restore runs `RtlUnwindEx` across the rustc-built
    /// frames between the two points and faults with `STATUS_BAD_STACK`.
    /// Excluded from the default run; run with `--ignored` to watch it crash.
    #[cfg(target_env = "gnu")]
    #[test]
    #[ignore = "expected to crash the process: reproduces the unwind fault the null descriptor removes"]
    fn stock_frame_descriptor_faults_across_foreign_frames() {
        unsafe extern "C" fn jump_from_below(_arg: *mut c_void, env: *mut JumpBuf) -> c_int {
            #[inline(never)]
            fn deeper(env: *mut JumpBuf) -> c_int {
                // Safety: the save activation is still live
                unsafe { long_jump(env, 3) }
            }
            deeper(env)
        }

        let mut env = JumpBuf::new();
        // Safety: the buffer outlives the call
        let ret = unsafe { set_jump_stock_frame(&mut env, ptr::null_mut(), jump_from_below) };
        assert_eq!(ret, 3);
        assert_ne!(env.frame_descriptor(), 0);
    }
}
