// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Per-target back ends: the native jump buffer layout, the native symbol
//! bindings, and the save trampoline.
//!
//! Exactly one module is compiled per target, so at most one definition of
//! the save trampoline exists per link no matter how many places use the
//! crate. Targets without a back end are a hard compile error rather than a
//! silent fallback to behavior nobody audited.

cfg_if::cfg_if! {
    if #[cfg(all(target_arch = "x86_64", not(windows)))] {
        mod x86_64;
        pub use x86_64::*;
    } else if #[cfg(all(target_arch = "x86_64", windows))] {
        mod x86_64_windows;
        pub use x86_64_windows::*;
    } else if #[cfg(all(target_arch = "aarch64", not(windows)))] {
        mod aarch64;
        pub use aarch64::*;
    } else if #[cfg(all(target_arch = "riscv64", target_os = "linux"))] {
        mod riscv64;
        pub use riscv64::*;
    } else {
        compile_error!("unsupported target architecture");
    }
}
