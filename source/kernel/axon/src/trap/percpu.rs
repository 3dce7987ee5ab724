// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Per-core trap state and the core-indexed registry.
//!
//! Each slot is only written by its own core, so relaxed atomics are enough;
//! other cores may read the counters for diagnostics.

#![allow(clippy::declare_interior_mutable_const)]

use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};

use static_assertions::assert_impl_all;

use crate::config::MAX_CPUS;
use crate::mm::WalkerState;
use crate::types::CpuId;

/// Dispatcher state machine of one core.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum DispatchState {
    Idle = 0,
    Dispatching = 1,
    ReturningToUser = 2,
}

impl DispatchState {
    const fn from_raw(raw: u8) -> Self {
        match raw {
            1 => Self::Dispatching,
            2 => Self::ReturningToUser,
            _ => Self::Idle,
        }
    }
}

/// Registry slot of one core.
pub struct CpuShared {
    state: AtomicU8,
    depth: AtomicU32,
    irq_nesting: AtomicU32,
    need_resched: AtomicBool,
    walker_configured: AtomicBool,
    traps: AtomicU64,
}

impl CpuShared {
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(DispatchState::Idle as u8),
            depth: AtomicU32::new(0),
            irq_nesting: AtomicU32::new(0),
            need_resched: AtomicBool::new(false),
            walker_configured: AtomicBool::new(false),
            traps: AtomicU64::new(0),
        }
    }

    pub fn traps(&self) -> u64 {
        self.traps.load(Ordering::Relaxed)
    }
}

impl Default for CpuShared {
    fn default() -> Self {
        Self::new()
    }
}

/// Core-indexed table of per-core slots.
pub struct CpuRegistry {
    cpus: [CpuShared; MAX_CPUS],
}

impl Default for CpuRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CpuRegistry {
    pub const fn new() -> Self {
        const SLOT: CpuShared = CpuShared::new();
        Self { cpus: [SLOT; MAX_CPUS] }
    }

    #[inline]
    pub fn get(&self, id: CpuId) -> &CpuShared {
        &self.cpus[id.index()]
    }

    /// Handle used by the trap path running on `id`.
    #[inline]
    pub fn local(&self, id: CpuId) -> CpuLocal<'_> {
        CpuLocal { id, shared: self.get(id) }
    }
}

/// Registry of the running system.
pub static CPUS: CpuRegistry = CpuRegistry::new();

assert_impl_all!(CpuRegistry: Sync);

/// Per-trap handle on the current core's slot.
#[derive(Clone, Copy)]
pub struct CpuLocal<'r> {
    pub id: CpuId,
    shared: &'r CpuShared,
}

impl<'r> CpuLocal<'r> {
    pub fn state(&self) -> DispatchState {
        DispatchState::from_raw(self.shared.state.load(Ordering::Relaxed))
    }

    fn set_state(&self, state: DispatchState) {
        self.shared.state.store(state as u8, Ordering::Relaxed);
    }

    /// Trap nesting depth; 0 outside any trap.
    pub fn depth(&self) -> u32 {
        self.shared.depth.load(Ordering::Relaxed)
    }

    /// Idle or ReturningToUser (nested) -> Dispatching.
    pub fn enter(&self) {
        self.shared.depth.fetch_add(1, Ordering::Relaxed);
        self.shared.traps.fetch_add(1, Ordering::Relaxed);
        self.set_state(DispatchState::Dispatching);
    }

    /// Dispatching -> ReturningToUser; only the outermost trap returns to user mode.
    pub fn begin_return(&self) {
        if self.depth() != 1 || self.state() != DispatchState::Dispatching {
            crate::log_error!(
                target: "trap",
                "{}: illegal transition {:?} -> ReturningToUser at depth {}",
                self.id,
                self.state(),
                self.depth()
            );
            return;
        }
        self.set_state(DispatchState::ReturningToUser);
    }

    /// Leaves one trap level; the outermost exit goes back to Idle.
    pub fn leave(&self) {
        let prev = self.depth();
        if prev == 0 {
            crate::log_error!(target: "trap", "{}: illegal transition Idle -> Idle", self.id);
            return;
        }
        self.shared.depth.store(prev - 1, Ordering::Relaxed);
        self.set_state(if prev == 1 { DispatchState::Idle } else { DispatchState::Dispatching });
    }

    pub fn irq_enter(&self) {
        self.shared.irq_nesting.fetch_add(1, Ordering::Relaxed);
    }

    pub fn irq_exit(&self) {
        self.shared.irq_nesting.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn in_irq(&self) -> bool {
        self.shared.irq_nesting.load(Ordering::Relaxed) != 0
    }

    pub fn set_need_resched(&self) {
        self.shared.need_resched.store(true, Ordering::Relaxed);
    }

    pub fn take_need_resched(&self) -> bool {
        self.shared.need_resched.swap(false, Ordering::Relaxed)
    }

    pub fn walker_state(&self) -> WalkerState {
        if self.shared.walker_configured.load(Ordering::Relaxed) {
            WalkerState::Configured
        } else {
            WalkerState::Uninitialized
        }
    }

    pub fn set_walker_state(&self, state: WalkerState) {
        self.shared.walker_configured.store(state == WalkerState::Configured, Ordering::Relaxed);
    }
}
