// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Exception vector table installation (`EENTRY`, `ECFG.VS`).

use core::fmt;

use static_assertions::const_assert;

use crate::config::VECSIZE;
use crate::hal::{Csr, Port};
use crate::mm::tlb::REFILL_VECTOR;

/// `ECFG.VS` field: bits 18:16.
const ECFG_VS_SHIFT: u32 = 16;
const ECFG_VS_MASK: u64 = 0x7 << ECFG_VS_SHIFT;
/// `ECFG.LIE` field: local interrupt enables 12:0.
pub const ECFG_LIE_MASK: u64 = 0x1fff;
/// `EENTRY` must be page aligned.
const EENTRY_ALIGN: u64 = 0x1000;

/// `ECFG.VS` for a slot of `vecsize` bytes: slots hold `2^VS` instructions.
pub const fn vector_spacing(vecsize: usize) -> u64 {
    (vecsize / 4).trailing_zeros() as u64
}

const_assert!(VECSIZE.is_power_of_two());
const_assert!(vector_spacing(VECSIZE) >= 1 && vector_spacing(VECSIZE) <= 7);

/// General vector slots below the TLB refill slot.
pub const NUM_VECTORS: usize = REFILL_VECTOR;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VectorError {
    Misaligned(u64),
    NoSuchVector(usize),
    /// Handler code larger than one slot.
    TooLarge(usize),
}

impl fmt::Display for VectorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Points the exception vectors at `eentry` and enables the local lines in `lie`.
pub fn install_vectors<P: Port + ?Sized>(port: &P, eentry: u64, lie: u64) -> Result<(), VectorError> {
    if eentry & (EENTRY_ALIGN - 1) != 0 {
        return Err(VectorError::Misaligned(eentry));
    }
    let ecfg = port.read_csr(Csr::Ecfg) & !(ECFG_VS_MASK | ECFG_LIE_MASK);
    port.write_csr(
        Csr::Ecfg,
        ecfg | (vector_spacing(VECSIZE) << ECFG_VS_SHIFT) | (lie & ECFG_LIE_MASK),
    );
    port.write_csr(Csr::Eentry, eentry);
    Ok(())
}

/// Copies `code` into vector slot `vector` of the table at `eentry`.
pub fn set_handler<P: Port + ?Sized>(
    port: &P,
    eentry: u64,
    vector: usize,
    code: &[u8],
) -> Result<u64, VectorError> {
    if vector >= NUM_VECTORS {
        return Err(VectorError::NoSuchVector(vector));
    }
    if code.len() > VECSIZE {
        return Err(VectorError::TooLarge(code.len()));
    }
    let slot = eentry + (vector * VECSIZE) as u64;
    port.write_code(slot, code);
    port.flush_icache(slot, VECSIZE);
    Ok(slot)
}
