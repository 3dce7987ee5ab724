// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! User-visible signal frame layout.
//!
//! ```text
//! +0    trampoline   4 x u32   (li a7, rt_sigreturn; syscall 0; 2 x nop)
//! +16   siginfo      128 bytes
//! +144  ucontext     uc_flags, uc_link, uc_stack, uc_sigmask[128], pad
//! +320  mcontext     sc_pc, sc_regs[32], sc_flags, pad
//! +592  extended-context records, upward to the terminator
//! ```

use alloc::vec;
use alloc::vec::Vec;

use static_assertions::const_assert_eq;

use super::{AltStack, SigInfo, SigSet};
use crate::frame::NUM_GPRS;

/// `addi.w a7, zero, 139`
pub const INSN_LI_A7_SIGRETURN: u32 = 0x0282_2C0B;
/// `syscall 0`
pub const INSN_SYSCALL: u32 = 0x002B_0000;
/// `andi zero, zero, 0`
pub const INSN_NOP: u32 = 0x0340_0000;

pub const TRAMPOLINE: [u32; 4] = [INSN_LI_A7_SIGRETURN, INSN_SYSCALL, INSN_NOP, INSN_NOP];

pub const TRAMP_OFF: usize = 0;
pub const INFO_OFF: usize = 16;
pub const UC_OFF: usize = INFO_OFF + SigInfo::WIRE_SIZE;
pub const UC_FLAGS_OFF: usize = UC_OFF;
pub const UC_LINK_OFF: usize = UC_OFF + 8;
pub const UC_STACK_OFF: usize = UC_OFF + 16;
pub const UC_SIGMASK_OFF: usize = UC_OFF + 40;
/// `uc_sigmask` is padded to 1024 bits.
pub const SIGMASK_AREA: usize = 128;
pub const MC_OFF: usize = UC_OFF + 176;
pub const SC_PC_OFF: usize = MC_OFF;
pub const SC_REGS_OFF: usize = MC_OFF + 8;
pub const SC_FLAGS_OFF: usize = SC_REGS_OFF + NUM_GPRS * 8;
/// Start of the extended-context chain.
pub const SC_EXT_OFF: usize = (SC_FLAGS_OFF + 4 + 15) & !15;
pub const RT_SIGFRAME_SIZE: usize = SC_EXT_OFF;

const_assert_eq!(UC_SIGMASK_OFF + SIGMASK_AREA, MC_OFF - 8);
const_assert_eq!(MC_OFF % 16, 0);
const_assert_eq!(RT_SIGFRAME_SIZE % 16, 0);

/// `sc_flags`: an FP/vector record is present.
pub const SC_USED_FP: u32 = 1;

/// Machine state captured into the frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MContext {
    pub pc: u64,
    pub regs: [u64; NUM_GPRS],
    pub flags: u32,
}

/// Contents of a user signal frame, minus the extended records.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SigFrame {
    pub info: SigInfo,
    pub uc_flags: u64,
    pub uc_link: u64,
    pub stack: AltStack,
    pub mask: SigSet,
    pub mcontext: MContext,
}

impl SigFrame {
    /// Serializes to the on-stack image, trampoline included.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![0u8; RT_SIGFRAME_SIZE];
        for (i, insn) in TRAMPOLINE.iter().enumerate() {
            put_u32(&mut out, TRAMP_OFF + i * 4, *insn);
        }
        out[INFO_OFF..INFO_OFF + SigInfo::WIRE_SIZE].copy_from_slice(&self.info.to_bytes());
        put_u64(&mut out, UC_FLAGS_OFF, self.uc_flags);
        put_u64(&mut out, UC_LINK_OFF, self.uc_link);
        put_u64(&mut out, UC_STACK_OFF, self.stack.sp);
        put_u32(&mut out, UC_STACK_OFF + 8, self.stack.flags);
        put_u64(&mut out, UC_STACK_OFF + 16, self.stack.size);
        put_u64(&mut out, UC_SIGMASK_OFF, self.mask.0);
        put_u64(&mut out, SC_PC_OFF, self.mcontext.pc);
        for (i, r) in self.mcontext.regs.iter().enumerate() {
            put_u64(&mut out, SC_REGS_OFF + i * 8, *r);
        }
        put_u32(&mut out, SC_FLAGS_OFF, self.mcontext.flags);
        out
    }

    /// Parses the fields the return path trusts; siginfo is not read back.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut regs = [0u64; NUM_GPRS];
        for (i, r) in regs.iter_mut().enumerate() {
            *r = get_u64(bytes, SC_REGS_OFF + i * 8);
        }
        Self {
            info: SigInfo::default(),
            uc_flags: get_u64(bytes, UC_FLAGS_OFF),
            uc_link: get_u64(bytes, UC_LINK_OFF),
            stack: AltStack {
                sp: get_u64(bytes, UC_STACK_OFF),
                flags: get_u32(bytes, UC_STACK_OFF + 8),
                size: get_u64(bytes, UC_STACK_OFF + 16),
            },
            mask: SigSet(get_u64(bytes, UC_SIGMASK_OFF)),
            mcontext: MContext {
                pc: get_u64(bytes, SC_PC_OFF),
                regs,
                flags: get_u32(bytes, SC_FLAGS_OFF),
            },
        }
    }
}

fn put_u64(out: &mut [u8], off: usize, v: u64) {
    out[off..off + 8].copy_from_slice(&v.to_le_bytes());
}

fn put_u32(out: &mut [u8], off: usize, v: u32) {
    out[off..off + 4].copy_from_slice(&v.to_le_bytes());
}

fn get_u64(b: &[u8], off: usize) -> u64 {
    let mut w = [0u8; 8];
    w.copy_from_slice(&b[off..off + 8]);
    u64::from_le_bytes(w)
}

fn get_u32(b: &[u8], off: usize) -> u32 {
    let mut w = [0u8; 4];
    w.copy_from_slice(&b[off..off + 4]);
    u32::from_le_bytes(w)
}
