// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Hardware port used by every trap-layer component
//! OWNERS: @kernel-team
//! PUBLIC API: Port, Csr, FpBank, HwDebugState, CpuFeatures
//! DEPENDS_ON: frame::FpuState
//! INVARIANTS: Only `la64` contains LoongArch instructions; one method per primitive;
//!             user-memory primitives are called only after mm::uaccess validation
//! ADR: docs/adr/0001-trap-layer-boundaries.md

#[cfg(all(target_arch = "loongarch64", target_os = "none"))]
pub mod la64;

#[cfg(test)]
pub mod fake;

use crate::frame::FpuState;

/// Control/status registers the trap layer touches.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u16)]
pub enum Csr {
    Crmd = 0x0,
    Prmd = 0x1,
    Euen = 0x2,
    Ecfg = 0x4,
    Estat = 0x5,
    Era = 0x6,
    Badv = 0x7,
    Eentry = 0xc,
    TlbIdx = 0x10,
    TlbEhi = 0x11,
    TlbElo0 = 0x12,
    TlbElo1 = 0x13,
    Asid = 0x18,
    Pgdl = 0x19,
    Pgdh = 0x1a,
    Pwctl0 = 0x1c,
    Pwctl1 = 0x1d,
    Stlbps = 0x1e,
    CpuId = 0x20,
    /// Kernel stack top of this core, read by the entry stub on user traps.
    Ks0 = 0x30,
    /// Entry-stub scratch.
    Ks1 = 0x31,
    /// Entry target chosen by the vector slot.
    Ks2 = 0x32,
    Tmid = 0x40,
    TlbrEntry = 0x88,
    TlbrEhi = 0x8e,
}

impl Csr {
    #[inline]
    pub const fn number(self) -> u16 {
        self as u16
    }
}

/// Register bank selected for a floating-point/vector save or restore.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FpBank {
    /// 64-bit scalar FPU registers.
    Fpu,
    /// 128-bit LSX vector registers.
    Lsx,
    /// 256-bit LASX vector registers.
    Lasx,
}

/// Capability flags probed at boot by the CPU-info collaborator.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CpuFeatures {
    pub fpu: bool,
    pub lsx: bool,
    pub lasx: bool,
    pub lbt: bool,
}

/// Maximum number of hardware watchpoints of each kind.
pub const MAX_WATCHPOINTS: usize = 8;

/// One hardware watchpoint slot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Watchpoint {
    pub addr: u64,
    pub mask: u64,
    pub ctrl: u64,
}

/// Hardware debug state reinstated before a traced task returns to user mode.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HwDebugState {
    pub inst: [Watchpoint; MAX_WATCHPOINTS],
    pub data: [Watchpoint; MAX_WATCHPOINTS],
    /// Single-step requested by the debugger.
    pub single_step: bool,
}

/// Primitive hardware operations.
///
/// Implementations are expected to be cheap and non-blocking; the dispatcher
/// calls them with the current trap class masked.
pub trait Port {
    /// Reads a control/status register.
    fn read_csr(&self, csr: Csr) -> u64;
    /// Writes a control/status register.
    fn write_csr(&self, csr: Csr, value: u64);

    /// Invalidates every TLB entry on the current core (`invtlb 0`).
    fn invalidate_tlb_all(&self);
    /// Loads an even/odd page pair for the page containing `va`.
    fn tlb_fill(&self, va: u64, lo0: u64, lo1: u64, page_shift: u32);

    /// Copies executable bytes to `addr`. Boot-time only.
    fn write_code(&self, addr: u64, code: &[u8]);
    /// Makes `[addr, addr + len)` coherent with the instruction stream.
    fn flush_icache(&self, addr: u64, len: usize);

    /// Reads entry `index` of the page-table page at physical `table`,
    /// mapped through the scratch window reserved for `level`.
    fn read_table_entry(&self, level: usize, table: u64, index: usize) -> u64;

    /// Copies bytes into user memory. Callers validate the range first.
    fn write_user(&self, addr: u64, bytes: &[u8]);
    /// Copies bytes out of user memory. Callers validate the range first.
    fn read_user(&self, addr: u64, out: &mut [u8]);

    /// Saves the live register bank into `state`.
    fn save_fp(&self, bank: FpBank, state: &mut FpuState);
    /// Loads `state` into the live register bank.
    fn restore_fp(&self, bank: FpBank, state: &FpuState);
    /// Saves the live binary-translation registers.
    fn save_lbt(&self, state: &mut FpuState);
    /// Loads the binary-translation registers.
    fn restore_lbt(&self, state: &FpuState);

    /// Programs the watchpoint and single-step hardware.
    fn write_debug_regs(&self, state: &HwDebugState);

    /// Stops the current core for good.
    fn halt(&self) -> !;
}
