// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Syscall number routing and the two handler tables
//! OWNERS: @kernel-team
//! PUBLIC API: SyscallTable, SyscallTables, Args, Handler, Route, route(), Error
//! DEPENDS_ON: config (table windows), signal::restart (rt_sigreturn number)
//! INVARIANTS: Standard window [0, SYSCALL_NUM); extended window
//!             [EXTENDED_SYSCALL_START, +EXTENDED_SYSCALL_NUM); rt_sigreturn never reaches a table
//! ADR: docs/adr/0001-trap-layer-boundaries.md

use core::fmt;

use crate::config::{EXTENDED_SYSCALL_NUM, EXTENDED_SYSCALL_START, SYSCALL_NUM};
use crate::frame::{reg, ExceptionFrame};
use crate::signal::restart::NR_RT_SIGRETURN;

/// Result type used by the tables.
pub type SysResult<T> = Result<T, Error>;

/// Syscall arguments passed in registers a0-a5.
#[derive(Default, Clone, Copy, Debug, PartialEq, Eq)]
pub struct Args {
    regs: [u64; 6],
}

impl Args {
    pub const fn new(regs: [u64; 6]) -> Self {
        Self { regs }
    }

    /// Arguments of a standard syscall: a0..a5.
    pub fn from_frame(frame: &ExceptionFrame) -> Self {
        let mut regs = [0u64; 6];
        regs.copy_from_slice(&frame.regs[reg::A0..reg::A0 + 6]);
        Self { regs }
    }

    /// Arguments of an extended syscall. Slot 0 gets the frame address in place
    /// of `a0`; every other slot sees the user's registers.
    pub fn extended(frame: &ExceptionFrame, slot: usize, frame_addr: u64) -> Self {
        let mut args = Self::from_frame(frame);
        if slot == 0 {
            args.regs[0] = frame_addr;
        }
        args
    }

    /// Returns the raw register at `index`.
    pub fn get(&self, index: usize) -> u64 {
        self.regs[index]
    }
}

/// Error returned by table operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Syscall number not present in the dispatch table.
    InvalidSyscall(u64),
    /// Slot outside the table window.
    OutOfRange(usize),
    AlreadyRegistered(usize),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Type alias for a syscall handler; the result is written to `a0`.
pub type Handler = fn(&Args) -> i64;

/// Dispatch table storing handlers by slot.
pub struct SyscallTable<const N: usize> {
    handlers: [Option<Handler>; N],
}

impl<const N: usize> Default for SyscallTable<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> SyscallTable<N> {
    pub const fn new() -> Self {
        const NONE: Option<Handler> = None;
        Self { handlers: [NONE; N] }
    }

    /// Registers a handler in an empty slot.
    pub fn register(&mut self, slot: usize, handler: Handler) -> SysResult<()> {
        let entry = self.handlers.get_mut(slot).ok_or(Error::OutOfRange(slot))?;
        if entry.is_some() {
            return Err(Error::AlreadyRegistered(slot));
        }
        *entry = Some(handler);
        Ok(())
    }

    /// Executes the handler in `slot`.
    #[must_use]
    pub fn dispatch(&self, slot: usize, args: &Args) -> SysResult<i64> {
        self.handlers
            .get(slot)
            .and_then(|entry| *entry)
            .ok_or(Error::InvalidSyscall(slot as u64))
            .map(|handler| handler(args))
    }
}

/// Where a syscall number goes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Route {
    SigReturn,
    Standard(usize),
    Extended(usize),
    Invalid(u64),
}

/// Routes the number in `a7`.
pub fn route(nr: u64) -> Route {
    if nr == NR_RT_SIGRETURN {
        return Route::SigReturn;
    }
    let start = EXTENDED_SYSCALL_START as u64;
    if nr < SYSCALL_NUM as u64 {
        Route::Standard(nr as usize)
    } else if nr >= start && nr - start < EXTENDED_SYSCALL_NUM as u64 {
        Route::Extended((nr - start) as usize)
    } else {
        Route::Invalid(nr)
    }
}

/// The standard and extended tables.
pub struct SyscallTables {
    pub standard: SyscallTable<SYSCALL_NUM>,
    pub extended: SyscallTable<EXTENDED_SYSCALL_NUM>,
}

impl Default for SyscallTables {
    fn default() -> Self {
        Self::new()
    }
}

impl SyscallTables {
    pub const fn new() -> Self {
        Self { standard: SyscallTable::new(), extended: SyscallTable::new() }
    }

    /// Registers `handler` under the full syscall number.
    pub fn register(&mut self, nr: u64, handler: Handler) -> SysResult<()> {
        match route(nr) {
            Route::Standard(slot) => self.standard.register(slot, handler),
            Route::Extended(slot) => self.extended.register(slot, handler),
            Route::SigReturn | Route::Invalid(_) => Err(Error::InvalidSyscall(nr)),
        }
    }
}
