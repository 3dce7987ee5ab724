// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Register frame model (exception entry frame, task switch context, debug frame)
//! OWNERS: @kernel-team
//! PUBLIC API: ExceptionFrame, FrameType, CsrField, FrameError, reg::*, TaskSwitchContext, DebugFrame
//! DEPENDS_ON: static_assertions (layout), bitflags (status bits)
//! INVARIANTS: #[repr(C)] layouts match arch/loongarch64/trap.S offsets; r0 reads as zero;
//!             out-of-range GPR index is an error, never truncated
//! ADR: docs/adr/0001-trap-layer-boundaries.md

pub mod debug;
pub mod switch;

#[cfg(test)]
mod tests;

pub use debug::DebugFrame;
pub use switch::{FpuState, TaskSwitchContext};

use core::fmt;

use bitflags::bitflags;
use static_assertions::const_assert_eq;

/// Number of general-purpose registers.
pub const NUM_GPRS: usize = 32;

/// Register numbers of the LoongArch64 calling convention.
pub mod reg {
    pub const ZERO: usize = 0;
    pub const RA: usize = 1;
    pub const TP: usize = 2;
    pub const SP: usize = 3;
    pub const A0: usize = 4;
    pub const A1: usize = 5;
    pub const A2: usize = 6;
    pub const A3: usize = 7;
    pub const A4: usize = 8;
    pub const A5: usize = 9;
    pub const A6: usize = 10;
    /// Carries the syscall number.
    pub const A7: usize = 11;
}

/// Privilege level field shared by CRMD.PLV and PRMD.PPLV.
pub const PLV_MASK: u64 = 0x3;
pub const PLV_KERNEL: u64 = 0;
pub const PLV_USER: u64 = 3;

bitflags! {
    /// Current mode (`CSR.CRMD`) bits above the PLV field.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Crmd: u64 {
        const IE = 1 << 2;
        const DA = 1 << 3;
        const PG = 1 << 4;
        const WE = 1 << 9;
    }
}

bitflags! {
    /// Pre-exception mode (`CSR.PRMD`) bits above the PPLV field.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Prmd: u64 {
        const PIE = 1 << 2;
        const PWE = 1 << 3;
    }
}

bitflags! {
    /// Extended unit enable (`CSR.EUEN`).
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Euen: u64 {
        const FPE = 1 << 0;
        const SXE = 1 << 1;
        const ASXE = 1 << 2;
        const BTE = 1 << 3;
    }
}

/// `PRMD` value used to enter user mode: PPLV=3, PIE, PWE.
pub const PRMD_USER_ENTRY: u64 = PLV_USER | Prmd::PIE.bits() | Prmd::PWE.bits();

/// Exception code field of `ESTAT` (bits 21:16).
#[inline]
pub const fn estat_ecode(estat: u64) -> u32 {
    ((estat >> 16) & 0x3f) as u32
}

/// Exception sub-code field of `ESTAT` (bits 30:22).
#[inline]
pub const fn estat_esubcode(estat: u64) -> u32 {
    ((estat >> 22) & 0x1ff) as u32
}

/// Pending interrupt status field of `ESTAT` (bits 12:0).
#[inline]
pub const fn estat_is(estat: u64) -> u32 {
    (estat & 0x1fff) as u32
}

/// Why the frame was pushed; stored as a raw word so the stub can write it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u64)]
pub enum FrameType {
    Exception = 0,
    Syscall = 1,
    Irq = 2,
    TlbRefill = 3,
    /// Registers were just reloaded from a signal frame; no syscall restart applies.
    SigReturn = 4,
}

impl FrameType {
    const fn from_raw(raw: u64) -> Self {
        match raw {
            1 => Self::Syscall,
            2 => Self::Irq,
            3 => Self::TlbRefill,
            4 => Self::SigReturn,
            _ => Self::Exception,
        }
    }
}

/// Status/control fields captured in frames.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CsrField {
    Era,
    Badv,
    Crmd,
    Prmd,
    Euen,
    Ecfg,
    Estat,
}

impl CsrField {
    pub const ALL: [CsrField; 7] = [
        CsrField::Era,
        CsrField::Badv,
        CsrField::Crmd,
        CsrField::Prmd,
        CsrField::Euen,
        CsrField::Ecfg,
        CsrField::Estat,
    ];
}

/// Error returned by frame accessors.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameError {
    /// General-purpose register index was >= 32.
    IndexOutOfRange(usize),
    /// The field does not exist in this representation.
    NoSuchField(CsrField),
    /// A debugger tried to install a privileged mode.
    PrivilegedMode(u64),
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[inline]
pub(crate) fn read_gpr(regs: &[u64; NUM_GPRS], index: usize) -> Result<u64, FrameError> {
    match regs.get(index) {
        Some(_) if index == reg::ZERO => Ok(0),
        Some(v) => Ok(*v),
        None => Err(FrameError::IndexOutOfRange(index)),
    }
}

#[inline]
pub(crate) fn write_gpr(
    regs: &mut [u64; NUM_GPRS],
    index: usize,
    value: u64,
) -> Result<(), FrameError> {
    match regs.get_mut(index) {
        Some(_) if index == reg::ZERO => Ok(()),
        Some(slot) => {
            *slot = value;
            Ok(())
        }
        None => Err(FrameError::IndexOutOfRange(index)),
    }
}

// ——— exception entry frame ———

/// Register snapshot pushed by the trap entry stub.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExceptionFrame {
    pub regs: [u64; NUM_GPRS],
    /// First syscall argument as it was on entry; `a0` is overwritten by the result.
    pub orig_a0: u64,
    pub frame_type: u64,
    pub era: u64,
    pub badv: u64,
    pub crmd: u64,
    pub prmd: u64,
    pub euen: u64,
    pub ecfg: u64,
    pub estat: u64,
}

/// Number of 64-bit words in an [`ExceptionFrame`].
pub const EF_WORDS: usize = NUM_GPRS + 9;
/// Stack bytes the entry stub reserves (frame rounded to the 16-byte ABI alignment).
pub const EF_STACK_SIZE: usize = (core::mem::size_of::<ExceptionFrame>() + 15) & !15;

pub const EF_OFF_ORIG_A0: usize = NUM_GPRS * 8;
pub const EF_OFF_TYPE: usize = EF_OFF_ORIG_A0 + 8;
pub const EF_OFF_ERA: usize = EF_OFF_TYPE + 8;
pub const EF_OFF_BADV: usize = EF_OFF_ERA + 8;
pub const EF_OFF_CRMD: usize = EF_OFF_BADV + 8;
pub const EF_OFF_PRMD: usize = EF_OFF_CRMD + 8;
pub const EF_OFF_EUEN: usize = EF_OFF_PRMD + 8;
pub const EF_OFF_ECFG: usize = EF_OFF_EUEN + 8;
pub const EF_OFF_ESTAT: usize = EF_OFF_ECFG + 8;

const_assert_eq!(core::mem::size_of::<ExceptionFrame>(), EF_WORDS * 8);
const_assert_eq!(core::mem::offset_of!(ExceptionFrame, orig_a0), EF_OFF_ORIG_A0);
const_assert_eq!(core::mem::offset_of!(ExceptionFrame, frame_type), EF_OFF_TYPE);
const_assert_eq!(core::mem::offset_of!(ExceptionFrame, era), EF_OFF_ERA);
const_assert_eq!(core::mem::offset_of!(ExceptionFrame, badv), EF_OFF_BADV);
const_assert_eq!(core::mem::offset_of!(ExceptionFrame, crmd), EF_OFF_CRMD);
const_assert_eq!(core::mem::offset_of!(ExceptionFrame, prmd), EF_OFF_PRMD);
const_assert_eq!(core::mem::offset_of!(ExceptionFrame, euen), EF_OFF_EUEN);
const_assert_eq!(core::mem::offset_of!(ExceptionFrame, ecfg), EF_OFF_ECFG);
const_assert_eq!(core::mem::offset_of!(ExceptionFrame, estat), EF_OFF_ESTAT);
const_assert_eq!(EF_STACK_SIZE % 16, 0);

impl ExceptionFrame {
    /// CSR writes performed on the return path, in order. `PRMD` carries the
    /// privilege level and interrupt enable that `ertn` installs, so it goes last.
    pub const RESTORE_ORDER: [CsrField; 3] = [CsrField::Euen, CsrField::Era, CsrField::Prmd];

    #[inline]
    pub fn gpr(&self, index: usize) -> Result<u64, FrameError> {
        read_gpr(&self.regs, index)
    }

    #[inline]
    pub fn set_gpr(&mut self, index: usize, value: u64) -> Result<(), FrameError> {
        write_gpr(&mut self.regs, index, value)
    }

    pub fn csr(&self, field: CsrField) -> u64 {
        match field {
            CsrField::Era => self.era,
            CsrField::Badv => self.badv,
            CsrField::Crmd => self.crmd,
            CsrField::Prmd => self.prmd,
            CsrField::Euen => self.euen,
            CsrField::Ecfg => self.ecfg,
            CsrField::Estat => self.estat,
        }
    }

    pub fn set_csr(&mut self, field: CsrField, value: u64) {
        let slot = match field {
            CsrField::Era => &mut self.era,
            CsrField::Badv => &mut self.badv,
            CsrField::Crmd => &mut self.crmd,
            CsrField::Prmd => &mut self.prmd,
            CsrField::Euen => &mut self.euen,
            CsrField::Ecfg => &mut self.ecfg,
            CsrField::Estat => &mut self.estat,
        };
        *slot = value;
    }

    #[inline]
    pub fn kind(&self) -> FrameType {
        FrameType::from_raw(self.frame_type)
    }

    #[inline]
    pub fn set_kind(&mut self, kind: FrameType) {
        self.frame_type = kind as u64;
    }

    /// True when the trap was taken from user mode (`PRMD.PPLV == 3`).
    #[inline]
    pub fn from_user(&self) -> bool {
        self.prmd & PLV_MASK == PLV_USER
    }

    #[inline]
    pub fn sp(&self) -> u64 {
        self.regs[reg::SP]
    }

    #[inline]
    pub fn syscall_nr(&self) -> u64 {
        self.regs[reg::A7]
    }

    #[inline]
    pub fn ecode(&self) -> u32 {
        estat_ecode(self.estat)
    }

    #[inline]
    pub fn esubcode(&self) -> u32 {
        estat_esubcode(self.estat)
    }

    /// Raw in-memory image, word for word.
    pub fn to_words(&self) -> [u64; EF_WORDS] {
        let mut out = [0u64; EF_WORDS];
        out[..NUM_GPRS].copy_from_slice(&self.regs);
        out[NUM_GPRS] = self.orig_a0;
        out[NUM_GPRS + 1] = self.frame_type;
        for (i, field) in CsrField::ALL.iter().enumerate() {
            out[NUM_GPRS + 2 + i] = self.csr(*field);
        }
        out
    }

    /// Rebuilds a frame from its raw image.
    pub fn from_words(words: &[u64; EF_WORDS]) -> Self {
        let mut frame = Self::default();
        frame.regs.copy_from_slice(&words[..NUM_GPRS]);
        frame.orig_a0 = words[NUM_GPRS];
        frame.frame_type = words[NUM_GPRS + 1];
        for (i, field) in CsrField::ALL.iter().enumerate() {
            frame.set_csr(*field, words[NUM_GPRS + 2 + i]);
        }
        frame
    }
}
