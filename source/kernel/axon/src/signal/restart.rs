// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Syscall restart decision, taken once per return to user mode.
//!
//! | a0                      | no handler        | handler, SA_RESTART | handler      |
//! |-------------------------|-------------------|---------------------|--------------|
//! | -ERESTARTNOHAND         | rewind            | -EINTR              | -EINTR       |
//! | -ERESTART_RESTARTBLOCK  | rewind, a7=128    | -EINTR              | -EINTR       |
//! | -ERESTARTSYS            | rewind            | rewind              | -EINTR       |
//! | -ERESTARTNOINTR         | rewind            | rewind              | rewind       |

use super::{SaFlags, SigAction};
use crate::frame::{reg, ExceptionFrame, FrameType};

pub const ERESTARTSYS: i64 = 512;
pub const ERESTARTNOINTR: i64 = 513;
pub const ERESTARTNOHAND: i64 = 514;
pub const ERESTART_RESTARTBLOCK: i64 = 516;
pub const EINTR: i64 = 4;

/// `restart_syscall`
pub const NR_RESTART_SYSCALL: u64 = 128;
/// `rt_sigreturn`
pub const NR_RT_SIGRETURN: u64 = 139;

/// Width of a `syscall` instruction.
const INSN_SIZE: u64 = 4;

/// Internal restart codes a syscall may leave in `a0`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RestartCode {
    NoHand,
    RestartBlock,
    Sys,
    NoIntr,
}

impl RestartCode {
    pub fn from_return(a0: u64) -> Option<Self> {
        match (a0 as i64).checked_neg()? {
            ERESTARTNOHAND => Some(Self::NoHand),
            ERESTART_RESTARTBLOCK => Some(Self::RestartBlock),
            ERESTARTSYS => Some(Self::Sys),
            ERESTARTNOINTR => Some(Self::NoIntr),
            _ => None,
        }
    }
}

/// What the return path does with the interrupted syscall.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RestartAction {
    /// Fail the call with `-EINTR`.
    Interrupt,
    /// Re-execute the `syscall` instruction with the original `a0`.
    Rewind,
    /// Re-execute, switching `a7` to `restart_syscall`.
    RewindRestartBlock,
}

/// Looks up the table above.
pub fn decide(code: RestartCode, handler: Option<&SigAction>) -> RestartAction {
    match (code, handler) {
        (RestartCode::RestartBlock, None) => RestartAction::RewindRestartBlock,
        (_, None) | (RestartCode::NoIntr, Some(_)) => RestartAction::Rewind,
        (RestartCode::Sys, Some(act)) if act.flags.contains(SaFlags::RESTART) => {
            RestartAction::Rewind
        }
        (_, Some(_)) => RestartAction::Interrupt,
    }
}

/// Applies the restart decision to a syscall frame and marks it consumed.
///
/// Frames that are not syscall frames, or whose `a0` is not a restart code,
/// are left untouched.
pub fn apply(frame: &mut ExceptionFrame, handler: Option<&SigAction>) -> Option<RestartAction> {
    if frame.kind() != FrameType::Syscall {
        return None;
    }
    let code = RestartCode::from_return(frame.regs[reg::A0])?;
    let action = decide(code, handler);
    match action {
        RestartAction::Interrupt => frame.regs[reg::A0] = (-EINTR) as u64,
        RestartAction::Rewind => rewind(frame),
        RestartAction::RewindRestartBlock => {
            rewind(frame);
            frame.regs[reg::A7] = NR_RESTART_SYSCALL;
        }
    }
    // Consumed: a later pass over the same frame must not decide again.
    frame.set_kind(FrameType::Exception);
    Some(action)
}

fn rewind(frame: &mut ExceptionFrame) {
    frame.regs[reg::A0] = frame.orig_a0;
    frame.era = frame.era.wrapping_sub(INSN_SIZE);
}
