// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Debugger-visible register set (`user_regs_struct` layout).

use static_assertions::const_assert_eq;

use super::{
    read_gpr, write_gpr, CsrField, ExceptionFrame, FrameError, NUM_GPRS, PLV_MASK, PLV_USER,
};

/// Flattened, ABI-stable register view handed to debuggers.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DebugFrame {
    pub regs: [u64; NUM_GPRS],
    pub era: u64,
    pub badv: u64,
    pub crmd: u64,
    pub prmd: u64,
    pub euen: u64,
    pub ecfg: u64,
    pub estat: u64,
}

pub const DF_WORDS: usize = NUM_GPRS + 7;
const_assert_eq!(core::mem::size_of::<DebugFrame>(), DF_WORDS * 8);
const_assert_eq!(core::mem::offset_of!(DebugFrame, era), NUM_GPRS * 8);

impl DebugFrame {
    /// View of a task that has never run: only the entry point is meaningful.
    pub fn first_start(entry: u64) -> Self {
        Self { era: entry, ..Self::default() }
    }

    /// Copies registers and status fields out of a task's exception shadow.
    pub fn from_frame(frame: &ExceptionFrame) -> Self {
        Self {
            regs: frame.regs,
            era: frame.era,
            badv: frame.badv,
            crmd: frame.crmd,
            prmd: frame.prmd,
            euen: frame.euen,
            ecfg: frame.ecfg,
            estat: frame.estat,
        }
    }

    /// Rejects register sets that would resume the task in a privileged mode.
    ///
    /// `PRMD.PPLV` is what `ertn` installs on the way out, so that is the field checked.
    pub fn validate(&self) -> Result<(), FrameError> {
        if self.prmd & PLV_MASK != PLV_USER {
            return Err(FrameError::PrivilegedMode(self.prmd & PLV_MASK));
        }
        Ok(())
    }

    /// Validates, then writes this view back into an exception shadow.
    pub fn apply_to(&self, frame: &mut ExceptionFrame) -> Result<(), FrameError> {
        self.validate()?;
        frame.regs = self.regs;
        frame.regs[0] = 0;
        for field in CsrField::ALL {
            frame.set_csr(field, self.csr(field));
        }
        Ok(())
    }

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
        match field {
            CsrField::Era => self.era = value,
            CsrField::Badv => self.badv = value,
            CsrField::Crmd => self.crmd = value,
            CsrField::Prmd => self.prmd = value,
            CsrField::Euen => self.euen = value,
            CsrField::Ecfg => self.ecfg = value,
            CsrField::Estat => self.estat = value,
        }
    }

    pub fn to_words(&self) -> [u64; DF_WORDS] {
        let mut out = [0u64; DF_WORDS];
        out[..NUM_GPRS].copy_from_slice(&self.regs);
        for (i, field) in CsrField::ALL.iter().enumerate() {
            out[NUM_GPRS + i] = self.csr(*field);
        }
        out
    }

    pub fn from_words(words: &[u64; DF_WORDS]) -> Self {
        let mut df = Self::default();
        df.regs.copy_from_slice(&words[..NUM_GPRS]);
        for (i, field) in CsrField::ALL.iter().enumerate() {
            df.set_csr(*field, words[NUM_GPRS + i]);
        }
        df
    }
}
