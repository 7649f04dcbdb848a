//! Non-local control transfer (`setjmp`/`longjmp`) with a safe entry point.
//!
//! This crate wraps the platform's native save/restore-context primitive. A
//! context is saved with [`catch_long_jump`] (or the raw [`set_jump_raw`]) and
//! restored with [`JumpPoint::long_jump`] (or the raw [`long_jump`]), which
//! transfers control straight back to the save point, bypassing every return
//! in between. C-style libraries use this pair for centralized error
//! recovery.
//!
//! On every Unix target the crate is a transparent passthrough to the native
//! `setjmp`/`longjmp`. On 64-bit Windows it is not quite: there the CRT's
//! `setjmp` macro stores the caller's frame address in the jump buffer and
//! `longjmp` uses it to run a structured SEH unwind across the intermediate
//! frames. That unwind is only sound when every frame between the restore and
//! the save carries unwind metadata the CRT unwinder understands; mixing
//! MinGW-built, MSVC-built and Rust frames in one call chain makes it fault
//! with `STATUS_BAD_STACK`. Every save made through this crate therefore
//! passes an explicitly null frame pointer to `_setjmp`, so `longjmp` falls
//! back to a plain register/stack-pointer reload. See
//! [`suppresses_frame_unwind`] and the `arch::x86_64_windows` module.
//!
//! The trade is MinGW `longjmp`'s optional cleanup-on-unwind behavior, which
//! the error-recovery protocols this primitive serves do not rely on: they
//! expect no work in intermediate frames.
//!
//! # Jumping over Rust frames
//!
//! A restore skips intermediate frames without running their `Drop` impls.
//! Jumping over frames that own live resources leaks them at best and is
//! undefined behavior at worst; that is why every restore operation in this
//! crate is `unsafe`. Keep the frames between a save and its restore free of
//! drop glue.

#![cfg_attr(not(test), no_std)]

mod arch;

use core::ffi::{c_int, c_void};
use core::marker::PhantomData;
use core::mem::{ManuallyDrop, MaybeUninit};
use core::ops::ControlFlow;
use core::ptr;

pub use arch::JumpBuf;
pub use arch::set_jump_raw;

/// Whether saved contexts on this target carry a forced-null frame-unwind
/// descriptor.
///
/// True exactly on 64-bit Windows, where the CRT's `longjmp` would otherwise
/// attempt an SEH unwind over frames that may not have been produced by a
/// toolchain whose unwind metadata the CRT understands. The decision is a
/// compile-time fact of the target: it deliberately does not depend on which
/// toolchain compiled any particular object file, since the hazard lives in
/// the restore path of the CRT, not in the save-side caller.
///
/// 32-bit Windows is outside this predicate: the hazard is specific to the
/// 64-bit calling convention's frame-based unwind metadata.
#[must_use]
pub const fn suppresses_frame_unwind() -> bool {
    cfg!(all(windows, target_pointer_width = "64"))
}

/// Restores a context saved by [`set_jump_raw`] or [`catch_long_jump`],
/// transferring control back to the save point, which then reports `val`.
///
/// A `val` of 0 is reported as 1, as the native facility defines.
///
/// # Safety
///
/// `env` must hold a context whose save activation is still live: the
/// [`set_jump_raw`] call (or [`catch_long_jump`] closure) that produced it
/// must not have returned yet, and must be executing on this thread. Every
/// frame between the caller and the save point must be free of drop glue.
pub unsafe fn long_jump(env: *mut JumpBuf, val: c_int) -> ! {
    // Safety: ensured by caller
    unsafe { arch::long_jump(env, val) }
}

/// Handle to a live save point, scoped to a [`catch_long_jump`] closure.
///
/// The lifetime ties the handle to the closure invocation; it cannot escape
/// the dynamic extent of its save point through safe code.
pub struct JumpPoint<'a> {
    env: *mut JumpBuf,
    /// Tied to the save activation, and must stay on the thread that created
    /// it.
    _marker: PhantomData<(&'a JumpBuf, *mut ())>,
}

impl JumpPoint<'_> {
    /// Reconstructs a handle from a raw jump buffer pointer.
    ///
    /// # Safety
    ///
    /// `env` must point to a buffer whose save activation is still live on
    /// this thread, and the chosen lifetime must not outlive that activation.
    #[must_use]
    pub unsafe fn from_raw(env: *mut JumpBuf) -> Self {
        Self {
            env,
            _marker: PhantomData,
        }
    }

    /// Returns the underlying jump buffer, e.g. to hand to foreign code that
    /// will perform the restore.
    #[must_use]
    pub fn as_raw(&self) -> *mut JumpBuf {
        self.env
    }

    /// Restores the saved context: the enclosing [`catch_long_jump`] returns
    /// `ControlFlow::Break(val)` (with 0 reported as 1).
    ///
    /// # Safety
    ///
    /// Every frame between the caller and the save point must be free of drop
    /// glue, and the handle must still be within the dynamic extent of its
    /// [`catch_long_jump`] closure.
    pub unsafe fn long_jump(self, val: c_int) -> ! {
        // Safety: ensured by caller
        unsafe { long_jump(self.env, val) }
    }
}

/// Saves the current context and runs `f` inside its activation.
///
/// Returns `ControlFlow::Continue` with the closure's result if it runs to
/// completion, or `ControlFlow::Break` with the jump value if the closure (or
/// anything it called into) restored the context through its [`JumpPoint`].
///
/// The save point lives exactly as long as the closure invocation; each
/// restore pairs with the save that is currently executing. To jump again,
/// save again: the C idiom of re-entering one `setjmp` many times becomes a
/// loop around `catch_long_jump`.
///
/// A panic that unwinds out of `f` aborts the process: the closure runs below
/// an `extern "C"` frame, which panics cannot cross.
pub fn catch_long_jump<T, F>(f: F) -> ControlFlow<c_int, T>
where
    F: for<'a> FnOnce(JumpPoint<'a>) -> T,
{
    struct Payload<F, T> {
        func: ManuallyDrop<F>,
        out: *mut MaybeUninit<T>,
    }

    unsafe extern "C" fn trampoline<T, F>(arg: *mut c_void, env: *mut JumpBuf) -> c_int
    where
        F: for<'a> FnOnce(JumpPoint<'a>) -> T,
    {
        // Safety: `arg` is the Payload owned by the enclosing call, alive
        // until set_jump_raw returns; `env` is the buffer whose save
        // activation we are running in.
        unsafe {
            let payload = &mut *arg.cast::<Payload<F, T>>();
            let func = ManuallyDrop::take(&mut payload.func);
            (*payload.out).write(func(JumpPoint::from_raw(env)));
        }
        0
    }

    let mut env = JumpBuf::new();
    let mut out = MaybeUninit::<T>::uninit();
    let mut payload = Payload {
        func: ManuallyDrop::new(f),
        out: &mut out,
    };

    // Safety: `env` and `payload` live until set_jump_raw returns, and the
    // trampoline matches the payload type.
    let status = unsafe {
        set_jump_raw(
            &mut env,
            ptr::from_mut(&mut payload).cast(),
            trampoline::<T, F>,
        )
    };

    if status == 0 {
        // Safety: the trampoline ran to completion and initialized `out`. If
        // a jump happened instead, status is nonzero (0 is reported as 1).
        ControlFlow::Continue(unsafe { out.assume_init() })
    } else {
        ControlFlow::Break(status)
    }
}

impl Default for JumpBuf {
    fn default() -> Self {
        Self::new()
    }
}
