// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![cfg(test)]
//! CONTEXT: Unit and property tests for the register frame model
//! OWNERS: @kernel-team
//! NOTE: Tests only; no kernel logic.
//!
//! TEST_SCOPE:
//!   - Raw-image save/restore of all three representations is bit exact
//!   - GPR accessors reject out-of-range indices and pin r0 to zero
//!   - Debug view first-start semantics and privilege validation
//!
//! TEST_SCENARIOS:
//!   - exception_frame_roundtrip(): from_words(to_words(f)) == f
//!   - switch_context_roundtrip(): same for TaskSwitchContext including FPU block
//!   - debug_frame_roundtrip(): same for DebugFrame
//!   - gpr_index_out_of_range(): index 32 yields IndexOutOfRange on every representation

use proptest::prelude::*;

use super::switch::{TSC_WORDS, FPU_WORDS};
use super::debug::DF_WORDS;
use super::*;
use crate::types::Asid;

fn arb_words<const N: usize>() -> impl Strategy<Value = [u64; N]> {
    proptest::collection::vec(any::<u64>(), N).prop_map(|v| {
        let mut out = [0u64; N];
        out.copy_from_slice(&v);
        out
    })
}

proptest! {
    #[test]
    fn exception_frame_roundtrip(words in arb_words::<EF_WORDS>()) {
        let frame = ExceptionFrame::from_words(&words);
        prop_assert_eq!(frame.to_words(), words);
        prop_assert_eq!(ExceptionFrame::from_words(&frame.to_words()), frame);
    }

    #[test]
    fn switch_context_roundtrip(words in arb_words::<TSC_WORDS>()) {
        let ctx = TaskSwitchContext::from_words(&words);
        prop_assert_eq!(ctx.to_words(), words);
        prop_assert_eq!(TaskSwitchContext::from_words(&ctx.to_words()), ctx);
    }

    #[test]
    fn debug_frame_roundtrip(words in arb_words::<DF_WORDS>()) {
        let df = DebugFrame::from_words(&words);
        prop_assert_eq!(df.to_words(), words);
        prop_assert_eq!(DebugFrame::from_words(&df.to_words()), df);
    }

    #[test]
    fn gpr_set_then_get(index in 1usize..NUM_GPRS, value in any::<u64>()) {
        let mut frame = ExceptionFrame::default();
        frame.set_gpr(index, value).unwrap();
        prop_assert_eq!(frame.gpr(index), Ok(value));
    }
}

#[test]
fn gpr_index_out_of_range() {
    let mut frame = ExceptionFrame::default();
    assert_eq!(frame.gpr(NUM_GPRS), Err(FrameError::IndexOutOfRange(NUM_GPRS)));
    assert_eq!(frame.set_gpr(NUM_GPRS, 1), Err(FrameError::IndexOutOfRange(NUM_GPRS)));

    let mut ctx = TaskSwitchContext::default();
    assert_eq!(ctx.gpr(40), Err(FrameError::IndexOutOfRange(40)));
    assert_eq!(ctx.set_gpr(usize::MAX, 0), Err(FrameError::IndexOutOfRange(usize::MAX)));

    let df = DebugFrame::default();
    assert_eq!(df.gpr(32), Err(FrameError::IndexOutOfRange(32)));
}

#[test]
fn zero_register_ignores_writes() {
    let mut frame = ExceptionFrame::default();
    frame.set_gpr(reg::ZERO, 0xdead).unwrap();
    assert_eq!(frame.gpr(reg::ZERO), Ok(0));
    assert_eq!(frame.regs[0], 0);
}

#[test]
fn switch_context_has_no_era() {
    let mut ctx = TaskSwitchContext::default();
    assert_eq!(ctx.csr(CsrField::Era), Err(FrameError::NoSuchField(CsrField::Era)));
    assert!(ctx.set_csr(CsrField::Prmd, PRMD_USER_ENTRY).is_ok());
    assert_eq!(ctx.csr(CsrField::Prmd), Ok(PRMD_USER_ENTRY));
}

#[test]
fn thread_init_seeds_user_entry() {
    let ctx = TaskSwitchContext::thread_init(0x1_2000, 0x7fff_0008, 0x55, 0x9000, Asid(7), true);
    assert_eq!(ctx.pc, 0x1_2000);
    assert_eq!(ctx.sp, 0x7fff_0000);
    assert_eq!(ctx.regs[reg::SP], 0x7fff_0000);
    assert_eq!(ctx.regs[reg::TP], 0x55);
    assert_eq!(ctx.asid, 7);
    assert_eq!(ctx.prmd & PLV_MASK, PLV_USER);
    assert_ne!(ctx.prmd & Prmd::PIE.bits(), 0);
    assert!(!ctx.fpu.is_used());
    assert_eq!(FPU_WORDS * 8, core::mem::size_of::<FpuState>());
}

#[test]
fn debug_frame_first_start_only_has_entry() {
    let df = DebugFrame::first_start(0x4000);
    assert_eq!(df.era, 0x4000);
    assert_eq!(df.regs, [0; NUM_GPRS]);
    assert_eq!(df.prmd, 0);
}

#[test]
fn debug_frame_write_back_requires_user_mode() {
    let mut shadow = ExceptionFrame { prmd: PRMD_USER_ENTRY, era: 0x1000, ..Default::default() };
    shadow.regs[reg::A0] = 9;

    let mut df = DebugFrame::from_frame(&shadow);
    df.regs[reg::A0] = 10;
    df.regs[0] = 0xffff;
    df.apply_to(&mut shadow).unwrap();
    assert_eq!(shadow.regs[reg::A0], 10);
    assert_eq!(shadow.regs[0], 0);

    df.prmd = PLV_KERNEL;
    let before = shadow;
    assert_eq!(df.apply_to(&mut shadow), Err(FrameError::PrivilegedMode(0)));
    assert_eq!(shadow, before);
}

#[test]
fn restore_order_writes_privilege_last() {
    assert_eq!(ExceptionFrame::RESTORE_ORDER.last(), Some(&CsrField::Prmd));
}

#[test]
fn estat_fields_decode() {
    let estat = (0x3u64 << 22) | (0xbu64 << 16) | 0x800;
    assert_eq!(estat_ecode(estat), 0xb);
    assert_eq!(estat_esubcode(estat), 3);
    assert_eq!(estat_is(estat), 0x800);
}
