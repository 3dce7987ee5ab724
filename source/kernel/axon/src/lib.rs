// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: LoongArch64 trap layer (exception/interrupt/syscall dispatch, TLB refill, signals)
//! OWNERS: @kernel-team
//! PUBLIC API: frame, mm::{check_user, check_kernel}, trap::Dispatcher, signal::{deliver, sigreturn}
//! DEPENDS_ON: hal::Port (all hardware access), log (diagnostics)
//! INVARIANTS: No hardware access outside hal; fatal/recoverable decision only in trap::cause
//! ADR: docs/adr/0001-trap-layer-boundaries.md

#![cfg_attr(not(test), no_std)]
#![cfg_attr(not(test), forbid(clippy::unwrap_used))]

extern crate alloc;

pub mod log;

pub mod arch;
pub mod config;
pub mod debug;
pub mod frame;
pub mod hal;
pub mod heap;
pub mod mm;
#[cfg(all(target_arch = "loongarch64", target_os = "none"))]
mod panic;
pub mod signal;
pub mod task;
pub mod trap;
pub mod types;
#[cfg(all(target_arch = "loongarch64", target_os = "none"))]
pub mod uart;
