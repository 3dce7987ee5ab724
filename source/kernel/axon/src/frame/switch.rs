// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Long-lived per-task switch context and the floating-point/vector save area.

use static_assertions::const_assert_eq;

use super::{
    read_gpr, reg, write_gpr, Crmd, CsrField, FrameError, Prmd, NUM_GPRS, PLV_KERNEL,
    PRMD_USER_ENTRY,
};
use crate::types::Asid;

/// Number of vector registers; each is 256 bits wide when LASX is present.
pub const NUM_FPRS: usize = 32;

/// Floating-point, vector and binary-translation state saved across switches.
///
/// The vector registers are stored at full LASX width; FPU and LSX views use
/// the low 64 and 128 bits of each register.
#[repr(C, align(32))]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FpuState {
    pub fpr: [[u64; 4]; NUM_FPRS],
    /// Condition flags fcc0..fcc7, one byte each.
    pub fcc: u64,
    pub fcsr: u64,
    /// LBT scratch registers scr0..scr3.
    pub scr: [u64; 4],
    pub eflags: u64,
    pub ftop: u64,
    /// Non-zero once the task has executed a floating-point instruction.
    pub used: u64,
    _pad: [u64; 3],
}

impl Default for FpuState {
    fn default() -> Self {
        Self {
            fpr: [[0; 4]; NUM_FPRS],
            fcc: 0,
            fcsr: 0,
            scr: [0; 4],
            eflags: 0,
            ftop: 0,
            used: 0,
            _pad: [0; 3],
        }
    }
}

pub const FPU_WORDS: usize = NUM_FPRS * 4 + 12;
const_assert_eq!(core::mem::size_of::<FpuState>(), FPU_WORDS * 8);
const_assert_eq!(core::mem::size_of::<FpuState>() % 32, 0);

impl FpuState {
    #[inline]
    pub fn is_used(&self) -> bool {
        self.used != 0
    }

    fn write_words(&self, out: &mut [u64]) {
        for (i, r) in self.fpr.iter().enumerate() {
            out[i * 4..i * 4 + 4].copy_from_slice(r);
        }
        let tail = NUM_FPRS * 4;
        out[tail] = self.fcc;
        out[tail + 1] = self.fcsr;
        out[tail + 2..tail + 6].copy_from_slice(&self.scr);
        out[tail + 6] = self.eflags;
        out[tail + 7] = self.ftop;
        out[tail + 8] = self.used;
        out[tail + 9..tail + 12].copy_from_slice(&self._pad);
    }

    fn read_words(words: &[u64]) -> Self {
        let mut st = Self::default();
        for (i, r) in st.fpr.iter_mut().enumerate() {
            r.copy_from_slice(&words[i * 4..i * 4 + 4]);
        }
        let tail = NUM_FPRS * 4;
        st.fcc = words[tail];
        st.fcsr = words[tail + 1];
        st.scr.copy_from_slice(&words[tail + 2..tail + 6]);
        st.eflags = words[tail + 6];
        st.ftop = words[tail + 7];
        st.used = words[tail + 8];
        st._pad.copy_from_slice(&words[tail + 9..tail + 12]);
        st
    }
}

// ——— task switch context ———

/// Registers that survive a voluntary context switch.
///
/// Owned by the task control block; only the switch routine and
/// [`TaskSwitchContext::thread_init`] write it.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TaskSwitchContext {
    pub badv: u64,
    pub crmd: u64,
    pub prmd: u64,
    pub euen: u64,
    pub ecfg: u64,
    pub estat: u64,
    pub pc: u64,
    pub sp: u64,
    pub tls: u64,
    /// User root page table (`CSR.PGDL`) installed when the task runs.
    pub pgdl: u64,
    pub asid: u64,
    /// Non-zero while the task runs with interrupts enabled in its switch frame.
    pub vintflag: u64,
    pub regs: [u64; NUM_GPRS],
    pub fpu: FpuState,
}

const TSC_HEAD_WORDS: usize = 12;
pub const TSC_WORDS: usize = TSC_HEAD_WORDS + NUM_GPRS + FPU_WORDS;

pub const TSC_OFF_PC: usize = 6 * 8;
pub const TSC_OFF_SP: usize = 7 * 8;
pub const TSC_OFF_REGS: usize = TSC_HEAD_WORDS * 8;
pub const TSC_OFF_FPU: usize = TSC_OFF_REGS + NUM_GPRS * 8;

const_assert_eq!(core::mem::size_of::<TaskSwitchContext>(), TSC_WORDS * 8);
const_assert_eq!(core::mem::offset_of!(TaskSwitchContext, pc), TSC_OFF_PC);
const_assert_eq!(core::mem::offset_of!(TaskSwitchContext, sp), TSC_OFF_SP);
const_assert_eq!(core::mem::offset_of!(TaskSwitchContext, regs), TSC_OFF_REGS);
const_assert_eq!(core::mem::offset_of!(TaskSwitchContext, fpu), TSC_OFF_FPU);

impl TaskSwitchContext {
    /// Seeds the context of a task that has never run.
    pub fn thread_init(entry: u64, stack_top: u64, tls: u64, pgdl: u64, asid: Asid, user: bool) -> Self {
        let mut ctx = Self {
            pc: entry,
            sp: stack_top & !0xf,
            tls,
            pgdl,
            asid: u64::from(asid.0),
            crmd: PLV_KERNEL | Crmd::PG.bits(),
            prmd: if user { PRMD_USER_ENTRY } else { PLV_KERNEL | Prmd::PIE.bits() },
            vintflag: 1,
            ..Self::default()
        };
        ctx.regs[reg::SP] = ctx.sp;
        ctx.regs[reg::TP] = tls;
        ctx
    }

    #[inline]
    pub fn gpr(&self, index: usize) -> Result<u64, FrameError> {
        read_gpr(&self.regs, index)
    }

    #[inline]
    pub fn set_gpr(&mut self, index: usize, value: u64) -> Result<(), FrameError> {
        write_gpr(&mut self.regs, index, value)
    }

    /// The switch context carries every status field except `ERA`.
    pub fn csr(&self, field: CsrField) -> Result<u64, FrameError> {
        Ok(match field {
            CsrField::Era => return Err(FrameError::NoSuchField(field)),
            CsrField::Badv => self.badv,
            CsrField::Crmd => self.crmd,
            CsrField::Prmd => self.prmd,
            CsrField::Euen => self.euen,
            CsrField::Ecfg => self.ecfg,
            CsrField::Estat => self.estat,
        })
    }

    pub fn set_csr(&mut self, field: CsrField, value: u64) -> Result<(), FrameError> {
        let slot = match field {
            CsrField::Era => return Err(FrameError::NoSuchField(field)),
            CsrField::Badv => &mut self.badv,
            CsrField::Crmd => &mut self.crmd,
            CsrField::Prmd => &mut self.prmd,
            CsrField::Euen => &mut self.euen,
            CsrField::Ecfg => &mut self.ecfg,
            CsrField::Estat => &mut self.estat,
        };
        *slot = value;
        Ok(())
    }

    pub fn to_words(&self) -> [u64; TSC_WORDS] {
        let mut out = [0u64; TSC_WORDS];
        let head = [
            self.badv, self.crmd, self.prmd, self.euen, self.ecfg, self.estat, self.pc, self.sp,
            self.tls, self.pgdl, self.asid, self.vintflag,
        ];
        out[..TSC_HEAD_WORDS].copy_from_slice(&head);
        out[TSC_HEAD_WORDS..TSC_HEAD_WORDS + NUM_GPRS].copy_from_slice(&self.regs);
        self.fpu.write_words(&mut out[TSC_HEAD_WORDS + NUM_GPRS..]);
        out
    }

    pub fn from_words(words: &[u64; TSC_WORDS]) -> Self {
        let mut regs = [0u64; NUM_GPRS];
        regs.copy_from_slice(&words[TSC_HEAD_WORDS..TSC_HEAD_WORDS + NUM_GPRS]);
        Self {
            badv: words[0],
            crmd: words[1],
            prmd: words[2],
            euen: words[3],
            ecfg: words[4],
            estat: words[5],
            pc: words[6],
            sp: words[7],
            tls: words[8],
            pgdl: words[9],
            asid: words[10],
            vintflag: words[11],
            regs,
            fpu: FpuState::read_words(&words[TSC_HEAD_WORDS + NUM_GPRS..]),
        }
    }
}
