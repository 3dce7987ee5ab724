// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Signal bookkeeping and the user-stack signal trampoline
//! OWNERS: @kernel-team
//! PUBLIC API: SigSet, SigAction, SaFlags, AltStack, SigInfo, SignalState, deliver(), sigreturn(),
//!             do_work_pending(), restart::*
//! DEPENDS_ON: frame::ExceptionFrame, mm::uaccess (every user access), hal::Port (FP banks)
//! INVARIANTS: Nothing is written to the user stack before the whole region validates;
//!             a frame that fails validation on return kills the task with SIGSEGV;
//!             SIGKILL/SIGSTOP can be neither blocked nor caught
//! ADR: docs/adr/0001-trap-layer-boundaries.md

pub mod deliver;
pub mod extctx;
pub mod frame;
pub mod restart;


pub use deliver::{deliver, sigreturn, DeliverError, SigreturnError, SIGFRAME_INVALID};

use core::fmt;

use bitflags::bitflags;

use crate::frame::{ExceptionFrame, FrameType};
use crate::hal::{CpuFeatures, Port};
use crate::mm::PageWalkConfig;
use crate::task::Task;
use crate::trap::Scheduler;
use crate::types::TaskId;

/// Highest signal number.
pub const NSIG: u32 = 64;

pub const SIGHUP: u32 = 1;
pub const SIGINT: u32 = 2;
pub const SIGQUIT: u32 = 3;
pub const SIGILL: u32 = 4;
pub const SIGTRAP: u32 = 5;
pub const SIGABRT: u32 = 6;
pub const SIGBUS: u32 = 7;
pub const SIGFPE: u32 = 8;
pub const SIGKILL: u32 = 9;
pub const SIGUSR1: u32 = 10;
pub const SIGSEGV: u32 = 11;
pub const SIGUSR2: u32 = 12;
pub const SIGPIPE: u32 = 13;
pub const SIGALRM: u32 = 14;
pub const SIGTERM: u32 = 15;
pub const SIGCHLD: u32 = 17;
pub const SIGCONT: u32 = 18;
pub const SIGSTOP: u32 = 19;
pub const SIGTSTP: u32 = 20;
pub const SIGTTIN: u32 = 21;
pub const SIGTTOU: u32 = 22;
pub const SIGURG: u32 = 23;
pub const SIGWINCH: u32 = 28;

/// `si_code` for signals raised by the kernel.
pub const SI_KERNEL: i32 = 0x80;
/// `si_code` for FP exceptions with an unidentified cause.
pub const FPE_FLTUNK: i32 = 14;

/// Set of signals 1..=64, bit `n - 1` for signal `n`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SigSet(pub u64);

impl SigSet {
    pub const EMPTY: SigSet = SigSet(0);
    /// Signals that can never be blocked.
    pub const UNBLOCKABLE: SigSet = SigSet((1 << (SIGKILL - 1)) | (1 << (SIGSTOP - 1)));

    #[inline]
    const fn bit(sig: u32) -> u64 {
        if sig == 0 || sig > NSIG {
            0
        } else {
            1 << (sig - 1)
        }
    }

    #[inline]
    pub fn contains(self, sig: u32) -> bool {
        self.0 & Self::bit(sig) != 0
    }

    #[inline]
    pub fn insert(&mut self, sig: u32) {
        self.0 |= Self::bit(sig);
    }

    #[inline]
    pub fn remove(&mut self, sig: u32) {
        self.0 &= !Self::bit(sig);
    }

    #[inline]
    pub fn union(self, other: SigSet) -> SigSet {
        SigSet(self.0 | other.0)
    }

    #[inline]
    pub fn without(self, other: SigSet) -> SigSet {
        SigSet(self.0 & !other.0)
    }

    /// Lowest-numbered member.
    #[inline]
    pub fn first(self) -> Option<u32> {
        if self.0 == 0 {
            None
        } else {
            Some(self.0.trailing_zeros() + 1)
        }
    }
}

bitflags! {
    /// `sa_flags`.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct SaFlags: u64 {
        const NOCLDSTOP = 0x0000_0001;
        const NOCLDWAIT = 0x0000_0002;
        const SIGINFO = 0x0000_0004;
        const RESTORER = 0x0400_0000;
        const ONSTACK = 0x0800_0000;
        const RESTART = 0x1000_0000;
        const NODEFER = 0x4000_0000;
        const RESETHAND = 0x8000_0000;
    }
}

pub const SIG_DFL: u64 = 0;
pub const SIG_IGN: u64 = 1;

/// Registered disposition of one signal.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SigAction {
    pub handler: u64,
    pub flags: SaFlags,
    pub restorer: u64,
    pub mask: SigSet,
}

/// What happens when a signal is taken.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Disposition {
    Handler(u64),
    Ignore,
    Terminate,
    Stop,
}

impl SigAction {
    pub fn disposition(&self, sig: u32) -> Disposition {
        match self.handler {
            SIG_DFL => default_disposition(sig),
            SIG_IGN => Disposition::Ignore,
            addr => Disposition::Handler(addr),
        }
    }
}

/// Default action of a signal with `SIG_DFL`.
pub fn default_disposition(sig: u32) -> Disposition {
    match sig {
        SIGCHLD | SIGCONT | SIGURG | SIGWINCH => Disposition::Ignore,
        SIGSTOP | SIGTSTP | SIGTTIN | SIGTTOU => Disposition::Stop,
        _ => Disposition::Terminate,
    }
}

pub const SS_ONSTACK: u32 = 1;
pub const SS_DISABLE: u32 = 2;

/// Alternate signal stack (`stack_t`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AltStack {
    pub sp: u64,
    pub flags: u32,
    pub size: u64,
}

impl Default for AltStack {
    fn default() -> Self {
        Self { sp: 0, flags: SS_DISABLE, size: 0 }
    }
}

impl AltStack {
    #[inline]
    pub fn enabled(&self) -> bool {
        self.flags & SS_DISABLE == 0 && self.size != 0
    }

    /// True if `sp` lies inside the alternate stack.
    #[inline]
    pub fn contains(&self, sp: u64) -> bool {
        self.enabled() && sp > self.sp && sp - self.sp <= self.size
    }
}

/// Kernel view of `siginfo_t` (128 bytes on the wire).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SigInfo {
    pub signo: i32,
    pub errno: i32,
    pub code: i32,
    /// Faulting address or sender pid, depending on `code`.
    pub addr: u64,
    pub value: u64,
}

impl SigInfo {
    pub const WIRE_SIZE: usize = 128;

    pub fn kernel(sig: u32) -> Self {
        Self { signo: sig as i32, code: SI_KERNEL, ..Self::default() }
    }

    pub fn to_bytes(&self) -> [u8; Self::WIRE_SIZE] {
        let mut out = [0u8; Self::WIRE_SIZE];
        out[0..4].copy_from_slice(&self.signo.to_le_bytes());
        out[4..8].copy_from_slice(&self.errno.to_le_bytes());
        out[8..12].copy_from_slice(&self.code.to_le_bytes());
        out[16..24].copy_from_slice(&self.addr.to_le_bytes());
        out[24..32].copy_from_slice(&self.value.to_le_bytes());
        out
    }
}

/// Per-task signal state.
#[derive(Clone, Debug)]
pub struct SignalState {
    pub pending: SigSet,
    pub blocked: SigSet,
    pub altstack: AltStack,
    actions: [SigAction; NSIG as usize],
    info: [SigInfo; NSIG as usize],
}

impl Default for SignalState {
    fn default() -> Self {
        Self {
            pending: SigSet::EMPTY,
            blocked: SigSet::EMPTY,
            altstack: AltStack::default(),
            actions: [SigAction::default(); NSIG as usize],
            info: [SigInfo::default(); NSIG as usize],
        }
    }
}

/// Error returned by signal-state mutators.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SignalError {
    InvalidSignal(u32),
    /// SIGKILL and SIGSTOP keep their default action.
    Uncatchable(u32),
}

impl fmt::Display for SignalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl SignalState {
    #[inline]
    fn slot(sig: u32) -> Result<usize, SignalError> {
        if sig == 0 || sig > NSIG {
            Err(SignalError::InvalidSignal(sig))
        } else {
            Ok(sig as usize - 1)
        }
    }

    pub fn action(&self, sig: u32) -> SigAction {
        Self::slot(sig).map(|i| self.actions[i]).unwrap_or_default()
    }

    pub fn set_action(&mut self, sig: u32, action: SigAction) -> Result<(), SignalError> {
        let i = Self::slot(sig)?;
        if SigSet::UNBLOCKABLE.contains(sig) {
            return Err(SignalError::Uncatchable(sig));
        }
        self.actions[i] = action;
        Ok(())
    }

    /// Queues `sig` with its info; a second send before delivery coalesces.
    pub fn send(&mut self, sig: u32, info: SigInfo) -> Result<(), SignalError> {
        let i = Self::slot(sig)?;
        self.pending.insert(sig);
        self.info[i] = info;
        Ok(())
    }

    /// Replaces the blocked mask; SIGKILL/SIGSTOP are stripped.
    pub fn set_blocked(&mut self, mask: SigSet) {
        self.blocked = mask.without(SigSet::UNBLOCKABLE);
    }

    /// Lowest-numbered pending, unblocked signal, left pending.
    pub fn next_deliverable(&self) -> Option<u32> {
        self.pending.without(self.blocked).first()
    }

    /// Clears `sig` from pending and returns its info.
    pub fn take(&mut self, sig: u32) -> SigInfo {
        self.pending.remove(sig);
        Self::slot(sig).map(|i| self.info[i]).unwrap_or_else(|_| SigInfo::kernel(sig))
    }
}

/// Shared inputs of deliver/return.
pub struct SignalEnv<'a, P: Port + ?Sized> {
    pub port: &'a P,
    pub walk: &'a PageWalkConfig,
    pub features: CpuFeatures,
}

/// Result of the return-to-user signal pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkOutcome {
    /// Nothing deliverable; the frame resumes as is (after any restart rewind).
    Resume,
    /// A handler frame was built for `sig`.
    Delivered(u32),
    /// The task was terminated by `sig`.
    Killed(u32),
    /// The task was stopped by `sig`.
    Stopped(u32),
}

/// Consumes pending signals before `frame` returns to user mode.
///
/// At most one handler frame is built per pass. Ignored signals are dropped
/// on the way. Syscall restart is decided exactly once, here.
pub fn do_work_pending<P: Port + ?Sized>(
    env: &SignalEnv<'_, P>,
    sched: &dyn Scheduler,
    id: TaskId,
    task: &mut Task,
    frame: &mut ExceptionFrame,
) -> WorkOutcome {
    let in_syscall = frame.kind() == FrameType::Syscall;
    while let Some(sig) = task.signals.next_deliverable() {
        let action = task.signals.action(sig);
        match action.disposition(sig) {
            Disposition::Ignore => {
                task.signals.take(sig);
            }
            Disposition::Terminate => {
                task.signals.take(sig);
                task.terminate(sig);
                sched.mark_reschedule_needed();
                return WorkOutcome::Killed(sig);
            }
            Disposition::Stop => {
                task.signals.take(sig);
                task.stop(sig);
                sched.mark_reschedule_needed();
                return WorkOutcome::Stopped(sig);
            }
            Disposition::Handler(_) => {
                if in_syscall {
                    restart::apply(frame, Some(&action));
                }
                let info = task.signals.take(sig);
                return match deliver(env, task, sig, &info, frame) {
                    Ok(_) => WorkOutcome::Delivered(sig),
                    Err(err) => {
                        crate::log_error!(
                            target: "signal",
                            "{}: cannot build frame for signal {}: {:?}",
                            id,
                            sig,
                            err
                        );
                        force_sigsegv(sched, task);
                        WorkOutcome::Killed(SIGSEGV)
                    }
                };
            }
        }
    }
    if in_syscall {
        restart::apply(frame, None);
    }
    WorkOutcome::Resume
}

/// Terminates `task` with SIGSEGV after a signal-frame violation.
pub fn force_sigsegv(sched: &dyn Scheduler, task: &mut Task) {
    task.terminate(SIGSEGV);
    sched.mark_reschedule_needed();
}
