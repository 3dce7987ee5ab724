// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Building the signal frame on the user stack and tearing it down on `rt_sigreturn`.

use alloc::vec;
use alloc::vec::Vec;
use core::fmt;

use super::extctx::{read_chain, ChainError, ExtLayout, SubContext, SubKind};
use super::frame::{
    MContext, SigFrame, INFO_OFF, RT_SIGFRAME_SIZE, SC_EXT_OFF, SC_USED_FP, TRAMP_OFF, UC_OFF,
};
use super::{
    AltStack, Disposition, SaFlags, SigInfo, SignalEnv, FPE_FLTUNK, SIGFPE, SS_DISABLE,
    SS_ONSTACK,
};
use crate::frame::{reg, Euen, ExceptionFrame, FpuState, FrameType};
use crate::hal::{CpuFeatures, Port};
use crate::mm::uaccess::USER_START;
use crate::mm::{check_user, Access};
use crate::task::Task;

/// Returned by [`signal_stack_top`] when the alternate stack would overflow.
pub const SIGFRAME_INVALID: u64 = u64::MAX;

/// Room reserved below the stack top for the largest record chain.
const MAX_EXT_SIZE: u64 = 2048;

/// `FCSR` enable bits 4:0 and cause bits 28:24.
const FCSR_ENABLES: u64 = 0x1f;
const FCSR_CAUSE_SHIFT: u32 = 24;
const FCSR_CAUSES: u64 = 0x1f << FCSR_CAUSE_SHIFT;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeliverError {
    /// Signal has no user handler installed.
    NoHandler(u32),
    /// Running on the alternate stack and the frame would not fit on it.
    AltStackOverflow,
    /// Frame region failed user-range validation.
    BadFrame { addr: u64 },
}

impl fmt::Display for DeliverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SigreturnError {
    BadFrame { addr: u64 },
    Chain(ChainError),
}

impl From<ChainError> for SigreturnError {
    fn from(value: ChainError) -> Self {
        Self::Chain(value)
    }
}

impl fmt::Display for SigreturnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Picks the stack the frame is built on, 16-byte aligned.
///
/// Returns [`SIGFRAME_INVALID`] when `sp` is already on the alternate stack
/// and even the base frame below it would leave the stack. [`deliver`] repeats
/// the check once the record chain is sized.
pub fn signal_stack_top(alt: &AltStack, flags: SaFlags, sp: u64) -> u64 {
    if alt.contains(sp) && !alt.contains(sp.wrapping_sub(RT_SIGFRAME_SIZE as u64)) {
        return SIGFRAME_INVALID;
    }
    let top = if flags.contains(SaFlags::ONSTACK) && alt.enabled() && !alt.contains(sp) {
        alt.sp + alt.size
    } else {
        sp
    };
    top & !15
}

/// Records to save, in save order: one FP/vector bank (widest live one), then LBT.
pub fn ext_kinds(features: CpuFeatures, euen: u64, fpu: &FpuState) -> Vec<SubKind> {
    let live = Euen::from_bits_truncate(euen);
    let mut kinds = Vec::with_capacity(2);
    if fpu.is_used() || live.contains(Euen::FPE) {
        let kind = if live.contains(Euen::FPE) {
            if features.lasx && live.contains(Euen::ASXE) {
                Some(SubKind::Lasx)
            } else if features.lsx && live.contains(Euen::SXE) {
                Some(SubKind::Lsx)
            } else {
                features.fpu.then_some(SubKind::Fpu)
            }
        } else if features.lasx {
            Some(SubKind::Lasx)
        } else if features.lsx {
            Some(SubKind::Lsx)
        } else {
            features.fpu.then_some(SubKind::Fpu)
        };
        kinds.extend(kind);
    }
    if features.lbt && live.contains(Euen::BTE) {
        kinds.push(SubKind::Lbt);
    }
    kinds
}

/// Captures each record from the live registers when the unit is enabled,
/// otherwise from the task's saved copy.
fn capture<P: Port + ?Sized>(
    port: &P,
    euen: u64,
    saved: &mut FpuState,
    kinds: &[SubKind],
) -> Vec<SubContext> {
    let live = Euen::from_bits_truncate(euen);
    kinds
        .iter()
        .map(|&kind| {
            match kind.bank() {
                Some(bank) if live.contains(Euen::FPE) => port.save_fp(bank, saved),
                None if live.contains(Euen::BTE) => port.save_lbt(saved),
                _ => {}
            }
            SubContext::capture(kind, saved)
        })
        .collect()
}

/// Builds the frame for `sig` and redirects `frame` to the handler.
///
/// Returns the frame address. On error nothing was written and `frame` is unchanged.
pub fn deliver<P: Port + ?Sized>(
    env: &SignalEnv<'_, P>,
    task: &mut Task,
    sig: u32,
    info: &SigInfo,
    frame: &mut ExceptionFrame,
) -> Result<u64, DeliverError> {
    let action = task.signals.action(sig);
    let Disposition::Handler(handler) = action.disposition(sig) else {
        return Err(DeliverError::NoHandler(sig));
    };

    let alt = task.signals.altstack;
    let top = signal_stack_top(&alt, action.flags, frame.sp());
    if top == SIGFRAME_INVALID {
        return Err(DeliverError::AltStackOverflow);
    }
    if top < USER_START + RT_SIGFRAME_SIZE as u64 + MAX_EXT_SIZE {
        return Err(DeliverError::BadFrame { addr: top });
    }

    let kinds = ext_kinds(env.features, frame.euen, &task.switch.fpu);
    let layout = ExtLayout::plan(top, &kinds);
    let addr = layout.low - RT_SIGFRAME_SIZE as u64;
    // Base frame plus records must stay on the alternate stack.
    if alt.contains(frame.sp()) && !alt.contains(addr) {
        return Err(DeliverError::AltStackOverflow);
    }
    if !check_user(env.port, env.walk, addr, (top - addr) as usize, Access::ReadWrite) {
        return Err(DeliverError::BadFrame { addr });
    }

    let contexts = capture(env.port, frame.euen, &mut task.switch.fpu, &kinds);
    let has_fp = kinds.iter().any(|k| k.bank().is_some());
    let image = SigFrame {
        info: *info,
        uc_flags: 0,
        uc_link: 0,
        stack: AltStack {
            flags: if alt.contains(frame.sp()) { SS_ONSTACK } else { alt.flags },
            ..alt
        },
        mask: task.signals.blocked,
        mcontext: MContext {
            pc: frame.era,
            regs: frame.regs,
            flags: if has_fp { SC_USED_FP } else { 0 },
        },
    };
    env.port.write_user(addr, &image.to_bytes());
    layout.write(env.port, &contexts);
    env.port.flush_icache(addr + TRAMP_OFF as u64, 16);

    frame.regs[reg::SP] = addr;
    frame.regs[reg::A0] = u64::from(sig);
    frame.regs[reg::A1] = addr + INFO_OFF as u64;
    frame.regs[reg::A2] = addr + UC_OFF as u64;
    frame.regs[reg::RA] = if action.flags.contains(SaFlags::RESTORER) && action.restorer != 0 {
        action.restorer
    } else {
        addr + TRAMP_OFF as u64
    };
    frame.era = handler;

    let mut blocked = task.signals.blocked.union(action.mask);
    if !action.flags.contains(SaFlags::NODEFER) {
        blocked.insert(sig);
    }
    task.signals.set_blocked(blocked);
    if action.flags.contains(SaFlags::RESETHAND) {
        // Only fails for uncatchable signals, which never reach a handler.
        let _ = task.signals.set_action(sig, Default::default());
    }
    Ok(addr)
}

/// Restores the state saved by [`deliver`] from the frame at the user `sp`.
///
/// Everything is read and validated before any task state changes. The caller
/// terminates the task on error.
pub fn sigreturn<P: Port + ?Sized>(
    env: &SignalEnv<'_, P>,
    task: &mut Task,
    frame: &mut ExceptionFrame,
) -> Result<(), SigreturnError> {
    let addr = frame.sp();
    if !check_user(env.port, env.walk, addr, RT_SIGFRAME_SIZE, Access::Read) {
        return Err(SigreturnError::BadFrame { addr });
    }
    let mut bytes = vec![0u8; RT_SIGFRAME_SIZE];
    env.port.read_user(addr, &mut bytes);
    let image = SigFrame::from_bytes(&bytes);
    let chain = read_chain(env.port, env.walk, addr + SC_EXT_OFF as u64)?;

    task.signals.set_blocked(image.mask);

    frame.era = image.mcontext.pc;
    frame.regs = image.mcontext.regs;
    frame.regs[reg::ZERO] = 0;

    task.signals.altstack = if image.stack.flags & SS_DISABLE != 0 {
        AltStack::default()
    } else {
        AltStack { flags: 0, ..image.stack }
    };

    // Chain is in address order: the reverse of the order it was saved in.
    let live = Euen::from_bits_truncate(frame.euen);
    for ctx in &chain {
        let mut st = task.switch.fpu;
        ctx.apply(&mut st);
        match ctx.kind().bank() {
            Some(bank) => {
                if (st.fcsr >> FCSR_CAUSE_SHIFT) & st.fcsr & FCSR_ENABLES != 0 {
                    st.fcsr &= !FCSR_CAUSES;
                    let info = SigInfo {
                        signo: SIGFPE as i32,
                        code: FPE_FLTUNK,
                        addr: frame.era,
                        ..SigInfo::default()
                    };
                    let _ = task.signals.send(SIGFPE, info);
                }
                st.used = 1;
                if live.contains(Euen::FPE) {
                    env.port.restore_fp(bank, &st);
                }
            }
            None => {
                if live.contains(Euen::BTE) {
                    env.port.restore_lbt(&st);
                }
            }
        }
        task.switch.fpu = st;
    }

    frame.set_kind(FrameType::SigReturn);
    Ok(())
}
