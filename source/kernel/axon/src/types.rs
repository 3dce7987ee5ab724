// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Newtypes for identifiers crossing the trap layer
//! OWNERS: @kernel-team
//! PUBLIC API: CpuId, TaskId, IrqId, Asid
//! DEPENDS_ON: config::MAX_CPUS
//! INVARIANTS: CpuId is always < MAX_CPUS once constructed through `new`
//! ADR: docs/adr/0001-trap-layer-boundaries.md

use core::fmt;

use crate::config::MAX_CPUS;

/// Index of a CPU core, bounded by [`MAX_CPUS`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CpuId(u16);

impl CpuId {
    /// The boot core.
    pub const BOOT: CpuId = CpuId(0);

    #[inline]
    pub const fn new(raw: usize) -> Option<Self> {
        if raw < MAX_CPUS {
            Some(Self(raw as u16))
        } else {
            None
        }
    }

    /// Core number from a raw `CSR.CPUID` value (`CoreID`, bits 8:0).
    ///
    /// `None` when the core is beyond [`MAX_CPUS`]; such a core has no per-core slot.
    #[inline]
    pub const fn from_csr(value: u64) -> Option<Self> {
        Self::new((value & 0x1ff) as usize)
    }

    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    #[inline]
    pub const fn is_boot(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for CpuId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cpu{}", self.0)
    }
}

/// Index into the task arena.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(pub u32);

impl TaskId {
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

/// Interrupt source identifier as reported by the interrupt controller.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IrqId(pub u32);

impl IrqId {
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Address-space identifier loaded into `CSR.ASID`.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Asid(pub u16);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_id_is_bounded() {
        assert!(CpuId::new(MAX_CPUS).is_none());
        assert_eq!(CpuId::new(MAX_CPUS - 1).map(CpuId::index), Some(MAX_CPUS - 1));
        assert!(CpuId::BOOT.is_boot());
    }

    #[test]
    fn csr_core_ids_past_the_table_do_not_alias_boot() {
        assert_eq!(CpuId::from_csr(3), CpuId::new(3));
        assert_eq!(CpuId::from_csr(MAX_CPUS as u64), None);
        assert_eq!(CpuId::from_csr(0x1ff), None);
        // Bits above CoreID are ignored.
        assert_eq!(CpuId::from_csr(0x200 | 1), CpuId::new(1));
    }
}
