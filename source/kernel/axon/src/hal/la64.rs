// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: LoongArch64 implementation of the hardware port
//! OWNERS: @kernel-arch-team
//! PUBLIC API: La64, PORT
//! DEPENDS_ON: core::arch::asm
//! INVARIANTS: Physical memory is reached through the cached direct-map window (DMW1);
//!             FP/vector banks are touched only while their EUEN enable bit is set
//! ADR: docs/adr/0001-trap-layer-boundaries.md

use core::arch::asm;

use super::{Csr, FpBank, HwDebugState, Port, MAX_WATCHPOINTS};
use crate::frame::FpuState;

/// Cached direct-map window configured by the boot stub.
pub const DMW_CACHED_BASE: u64 = 0x9000_0000_0000_0000;

/// `FWPS.Skip`: single-step the next instruction.
const FWPS_SKIP: u64 = 1 << 16;

/// `TLBIDX.PS` field.
const TLBIDX_PS_SHIFT: u32 = 24;
const TLBIDX_PS_MASK: u64 = 0x3f << TLBIDX_PS_SHIFT;

/// The live machine.
pub struct La64;

pub static PORT: La64 = La64;

macro_rules! csrrd {
    ($num:literal) => {{
        let value: u64;
        // SAFETY: CSR reads have no memory effects.
        unsafe { asm!("csrrd {0}, {csr}", out(reg) value, csr = const $num, options(nostack)) };
        value
    }};
}

macro_rules! csrwr {
    ($num:literal, $value:expr) => {{
        let value: u64 = $value;
        // SAFETY: kernel mode; callers own the semantics of the register written.
        unsafe { asm!("csrwr {0}, {csr}", inout(reg) value => _, csr = const $num, options(nostack)) };
    }};
}

macro_rules! csr_table {
    ($($variant:ident => $num:literal),* $(,)?) => {
        fn csr_read(csr: Csr) -> u64 {
            match csr {
                $(Csr::$variant => csrrd!($num),)*
            }
        }

        fn csr_write(csr: Csr, value: u64) {
            match csr {
                $(Csr::$variant => csrwr!($num, value),)*
            }
        }
    };
}

csr_table! {
    Crmd => 0x0,
    Prmd => 0x1,
    Euen => 0x2,
    Ecfg => 0x4,
    Estat => 0x5,
    Era => 0x6,
    Badv => 0x7,
    Eentry => 0xc,
    TlbIdx => 0x10,
    TlbEhi => 0x11,
    TlbElo0 => 0x12,
    TlbElo1 => 0x13,
    Asid => 0x18,
    Pgdl => 0x19,
    Pgdh => 0x1a,
    Pwctl0 => 0x1c,
    Pwctl1 => 0x1d,
    Stlbps => 0x1e,
    CpuId => 0x20,
    Ks0 => 0x30,
    Ks1 => 0x31,
    Ks2 => 0x32,
    Tmid => 0x40,
    TlbrEntry => 0x88,
    TlbrEhi => 0x8e,
}

/// Stores or loads all 32 registers of one bank at 32-byte strides from `{base}`.
macro_rules! fpr_bank {
    ($insn:literal, $reg:literal) => {
        concat!(
            $insn, " ", $reg, "0, {base}, 0\n",
            $insn, " ", $reg, "1, {base}, 32\n",
            $insn, " ", $reg, "2, {base}, 64\n",
            $insn, " ", $reg, "3, {base}, 96\n",
            $insn, " ", $reg, "4, {base}, 128\n",
            $insn, " ", $reg, "5, {base}, 160\n",
            $insn, " ", $reg, "6, {base}, 192\n",
            $insn, " ", $reg, "7, {base}, 224\n",
            $insn, " ", $reg, "8, {base}, 256\n",
            $insn, " ", $reg, "9, {base}, 288\n",
            $insn, " ", $reg, "10, {base}, 320\n",
            $insn, " ", $reg, "11, {base}, 352\n",
            $insn, " ", $reg, "12, {base}, 384\n",
            $insn, " ", $reg, "13, {base}, 416\n",
            $insn, " ", $reg, "14, {base}, 448\n",
            $insn, " ", $reg, "15, {base}, 480\n",
            $insn, " ", $reg, "16, {base}, 512\n",
            $insn, " ", $reg, "17, {base}, 544\n",
            $insn, " ", $reg, "18, {base}, 576\n",
            $insn, " ", $reg, "19, {base}, 608\n",
            $insn, " ", $reg, "20, {base}, 640\n",
            $insn, " ", $reg, "21, {base}, 672\n",
            $insn, " ", $reg, "22, {base}, 704\n",
            $insn, " ", $reg, "23, {base}, 736\n",
            $insn, " ", $reg, "24, {base}, 768\n",
            $insn, " ", $reg, "25, {base}, 800\n",
            $insn, " ", $reg, "26, {base}, 832\n",
            $insn, " ", $reg, "27, {base}, 864\n",
            $insn, " ", $reg, "28, {base}, 896\n",
            $insn, " ", $reg, "29, {base}, 928\n",
            $insn, " ", $reg, "30, {base}, 960\n",
            $insn, " ", $reg, "31, {base}, 992\n",
        )
    };
}

/// Packs fcc0..fcc7 into one byte each of `{acc}`.
macro_rules! save_fcc {
    () => {
        "
    move {acc}, $zero
    movcf2gr {t}, $fcc0
    bstrins.d {acc}, {t}, 7, 0
    movcf2gr {t}, $fcc1
    bstrins.d {acc}, {t}, 15, 8
    movcf2gr {t}, $fcc2
    bstrins.d {acc}, {t}, 23, 16
    movcf2gr {t}, $fcc3
    bstrins.d {acc}, {t}, 31, 24
    movcf2gr {t}, $fcc4
    bstrins.d {acc}, {t}, 39, 32
    movcf2gr {t}, $fcc5
    bstrins.d {acc}, {t}, 47, 40
    movcf2gr {t}, $fcc6
    bstrins.d {acc}, {t}, 55, 48
    movcf2gr {t}, $fcc7
    bstrins.d {acc}, {t}, 63, 56
        "
    };
}

macro_rules! restore_fcc {
    () => {
        "
    bstrpick.d {t}, {acc}, 7, 0
    movgr2cf $fcc0, {t}
    bstrpick.d {t}, {acc}, 15, 8
    movgr2cf $fcc1, {t}
    bstrpick.d {t}, {acc}, 23, 16
    movgr2cf $fcc2, {t}
    bstrpick.d {t}, {acc}, 31, 24
    movgr2cf $fcc3, {t}
    bstrpick.d {t}, {acc}, 39, 32
    movgr2cf $fcc4, {t}
    bstrpick.d {t}, {acc}, 47, 40
    movgr2cf $fcc5, {t}
    bstrpick.d {t}, {acc}, 55, 48
    movgr2cf $fcc6, {t}
    bstrpick.d {t}, {acc}, 63, 56
    movgr2cf $fcc7, {t}
        "
    };
}

/// Programs one instruction (`0x390`) or data (`0x310`) watchpoint slot.
macro_rules! wp_slot {
    ($addr:literal, $mask:literal, $ctrl:literal, $wp:expr) => {{
        let wp = $wp;
        csrwr!($addr, wp.addr);
        csrwr!($mask, wp.mask);
        csrwr!($ctrl, wp.ctrl);
    }};
}

impl La64 {
    #[inline]
    fn phys_to_virt(pa: u64) -> u64 {
        DMW_CACHED_BASE | pa
    }

    fn save_fcc_fcsr(state: &mut FpuState) {
        let acc: u64;
        let fcsr: u64;
        // SAFETY: FPE is enabled by the caller; only integer temporaries are clobbered.
        unsafe {
            asm!(save_fcc!(), acc = out(reg) acc, t = out(reg) _, options(nostack));
            asm!("movfcsr2gr {0}, $fcsr0", out(reg) fcsr, options(nostack));
        }
        state.fcc = acc;
        state.fcsr = fcsr;
    }

    fn restore_fcc_fcsr(state: &FpuState) {
        // SAFETY: FPE is enabled by the caller.
        unsafe {
            asm!(restore_fcc!(), acc = in(reg) state.fcc, t = out(reg) _, options(nostack));
            asm!("movgr2fcsr $fcsr0, {0}", in(reg) state.fcsr, options(nostack));
        }
    }
}

impl Port for La64 {
    #[inline]
    fn read_csr(&self, csr: Csr) -> u64 {
        csr_read(csr)
    }

    #[inline]
    fn write_csr(&self, csr: Csr, value: u64) {
        csr_write(csr, value)
    }

    fn invalidate_tlb_all(&self) {
        // SAFETY: drops cached translations only.
        unsafe { asm!("invtlb 0, $zero, $zero", "dbar 0", options(nostack)) };
    }

    fn tlb_fill(&self, va: u64, lo0: u64, lo1: u64, page_shift: u32) {
        let idx = csr_read(Csr::TlbIdx) & !TLBIDX_PS_MASK;
        csr_write(Csr::TlbIdx, idx | (u64::from(page_shift) << TLBIDX_PS_SHIFT));
        csr_write(Csr::TlbEhi, va);
        csr_write(Csr::TlbElo0, lo0);
        csr_write(Csr::TlbElo1, lo1);
        // SAFETY: TLBEHI/TLBELO0/TLBELO1/TLBIDX were just programmed for this pair.
        unsafe { asm!("tlbfill", options(nostack)) };
    }

    fn write_code(&self, addr: u64, code: &[u8]) {
        // SAFETY: boot-time copy into the kernel's own vector area.
        unsafe { core::ptr::copy_nonoverlapping(code.as_ptr(), addr as *mut u8, code.len()) };
    }

    fn flush_icache(&self, _addr: u64, _len: usize) {
        // SAFETY: barriers only.
        unsafe { asm!("dbar 0", "ibar 0", options(nostack)) };
    }

    fn read_table_entry(&self, _level: usize, table: u64, index: usize) -> u64 {
        // Every level goes through the same direct-map window.
        let ptr = (Self::phys_to_virt(table) as *const u64).wrapping_add(index);
        // SAFETY: `table` is a page-table page owned by the kernel and `index` < entries.
        unsafe { core::ptr::read_volatile(ptr) }
    }

    fn write_user(&self, addr: u64, bytes: &[u8]) {
        // SAFETY: the range was validated writable against the live root.
        unsafe { core::ptr::copy_nonoverlapping(bytes.as_ptr(), addr as *mut u8, bytes.len()) };
    }

    fn read_user(&self, addr: u64, out: &mut [u8]) {
        // SAFETY: the range was validated readable against the live root.
        unsafe { core::ptr::copy_nonoverlapping(addr as *const u8, out.as_mut_ptr(), out.len()) };
    }

    fn save_fp(&self, bank: FpBank, state: &mut FpuState) {
        let base = state.fpr.as_mut_ptr() as u64;
        // SAFETY: the matching EUEN enable is set; `fpr` holds 32 x 32 bytes.
        unsafe {
            match bank {
                FpBank::Fpu => asm!(fpr_bank!("fst.d", "$f"), base = in(reg) base, options(nostack)),
                FpBank::Lsx => asm!(fpr_bank!("vst", "$vr"), base = in(reg) base, options(nostack)),
                FpBank::Lasx => asm!(fpr_bank!("xvst", "$xr"), base = in(reg) base, options(nostack)),
            }
        }
        Self::save_fcc_fcsr(state);
    }

    fn restore_fp(&self, bank: FpBank, state: &FpuState) {
        let base = state.fpr.as_ptr() as u64;
        // SAFETY: as for `save_fp`.
        unsafe {
            match bank {
                FpBank::Fpu => asm!(fpr_bank!("fld.d", "$f"), base = in(reg) base, options(nostack)),
                FpBank::Lsx => asm!(fpr_bank!("vld", "$vr"), base = in(reg) base, options(nostack)),
                FpBank::Lasx => asm!(fpr_bank!("xvld", "$xr"), base = in(reg) base, options(nostack)),
            }
        }
        Self::restore_fcc_fcsr(state);
    }

    fn save_lbt(&self, state: &mut FpuState) {
        let (s0, s1, s2, s3, eflags, ftop): (u64, u64, u64, u64, u64, u64);
        // SAFETY: EUEN.BTE is set by the caller.
        unsafe {
            asm!(
                "movscr2gr {0}, $scr0",
                "movscr2gr {1}, $scr1",
                "movscr2gr {2}, $scr2",
                "movscr2gr {3}, $scr3",
                "x86mfflag {4}, 0x3f",
                "x86mftop {5}",
                out(reg) s0, out(reg) s1, out(reg) s2, out(reg) s3, out(reg) eflags, out(reg) ftop,
                options(nostack)
            );
        }
        state.scr = [s0, s1, s2, s3];
        state.eflags = eflags;
        state.ftop = ftop;
    }

    fn restore_lbt(&self, state: &FpuState) {
        // SAFETY: EUEN.BTE is set by the caller.
        unsafe {
            asm!(
                "movgr2scr $scr0, {0}",
                "movgr2scr $scr1, {1}",
                "movgr2scr $scr2, {2}",
                "movgr2scr $scr3, {3}",
                "x86mtflag {4}, 0x3f",
                in(reg) state.scr[0], in(reg) state.scr[1], in(reg) state.scr[2],
                in(reg) state.scr[3], in(reg) state.eflags,
                options(nostack)
            );
            // x86mttop only takes an immediate.
            match state.ftop & 0x7 {
                0 => asm!("x86mttop 0", options(nostack)),
                1 => asm!("x86mttop 1", options(nostack)),
                2 => asm!("x86mttop 2", options(nostack)),
                3 => asm!("x86mttop 3", options(nostack)),
                4 => asm!("x86mttop 4", options(nostack)),
                5 => asm!("x86mttop 5", options(nostack)),
                6 => asm!("x86mttop 6", options(nostack)),
                _ => asm!("x86mttop 7", options(nostack)),
            }
        }
    }

    fn write_debug_regs(&self, state: &HwDebugState) {
        const _: () = assert!(MAX_WATCHPOINTS == 8);
        wp_slot!(0x390, 0x391, 0x392, state.inst[0]);
        wp_slot!(0x398, 0x399, 0x39a, state.inst[1]);
        wp_slot!(0x3a0, 0x3a1, 0x3a2, state.inst[2]);
        wp_slot!(0x3a8, 0x3a9, 0x3aa, state.inst[3]);
        wp_slot!(0x3b0, 0x3b1, 0x3b2, state.inst[4]);
        wp_slot!(0x3b8, 0x3b9, 0x3ba, state.inst[5]);
        wp_slot!(0x3c0, 0x3c1, 0x3c2, state.inst[6]);
        wp_slot!(0x3c8, 0x3c9, 0x3ca, state.inst[7]);
        wp_slot!(0x310, 0x311, 0x312, state.data[0]);
        wp_slot!(0x318, 0x319, 0x31a, state.data[1]);
        wp_slot!(0x320, 0x321, 0x322, state.data[2]);
        wp_slot!(0x328, 0x329, 0x32a, state.data[3]);
        wp_slot!(0x330, 0x331, 0x332, state.data[4]);
        wp_slot!(0x338, 0x339, 0x33a, state.data[5]);
        wp_slot!(0x340, 0x341, 0x342, state.data[6]);
        wp_slot!(0x348, 0x349, 0x34a, state.data[7]);

        let fwps = csrrd!(0x381);
        csrwr!(0x381, if state.single_step { fwps | FWPS_SKIP } else { fwps & !FWPS_SKIP });
    }

    fn halt(&self) -> ! {
        loop {
            // SAFETY: parks the core until the next interrupt; interrupts stay masked.
            unsafe { asm!("idle 0", options(nostack, nomem)) };
        }
    }
}
