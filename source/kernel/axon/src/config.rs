// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Build-time configuration of the trap layer.
//!
//! Page-table geometry is picked by cargo features (`pt-levels-2`,
//! `pt-levels-3`, `page-16k`) and checked in a const context by
//! [`crate::mm::ACTIVE_WALK`]; an unsupported combination fails the build.

/// Number of cores the per-core registry is sized for.
pub const MAX_CPUS: usize = 8;

/// Size of the standard syscall table.
pub const SYSCALL_NUM: usize = 512;
/// First syscall number routed to the extended table.
pub const EXTENDED_SYSCALL_START: usize = 0x1000;
/// Size of the extended syscall table.
pub const EXTENDED_SYSCALL_NUM: usize = 64;

/// Number of interrupt sources the handler table can hold.
pub const MAX_IRQS: usize = 256;

/// Upper bound on live tasks tracked by the task arena.
pub const MAX_TASKS: usize = 256;

/// Width of the hardware virtual address space (`CPUCFG1.VALEN`).
pub const VA_BITS: u32 = 48;

/// Byte distance between two entries of the exception vector table.
pub const VECSIZE: usize = 0x200;

#[cfg(feature = "pt-levels-2")]
pub const PGTABLE_LEVELS: usize = 2;
#[cfg(all(feature = "pt-levels-3", not(feature = "pt-levels-2")))]
pub const PGTABLE_LEVELS: usize = 3;
#[cfg(not(any(feature = "pt-levels-2", feature = "pt-levels-3")))]
pub const PGTABLE_LEVELS: usize = 4;

#[cfg(feature = "page-16k")]
pub const PAGE_SHIFT: u32 = 14;
#[cfg(not(feature = "page-16k"))]
pub const PAGE_SHIFT: u32 = 12;

/// Size of a base page in bytes.
pub const PAGE_SIZE: usize = 1 << PAGE_SHIFT;
