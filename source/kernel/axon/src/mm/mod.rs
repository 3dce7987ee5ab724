// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Page-table geometry, walker and user/kernel range validation
//! OWNERS: @kernel-mm-team
//! PUBLIC API: PageWalkConfig, ACTIVE_WALK, PteFlags, walk(), check_user(), check_kernel(), Configurator
//! DEPENDS_ON: hal::Port (scratch-window table reads, CSRs, TLB ops)
//! INVARIANTS: Geometry validated in const context; validator never caches; directory entries
//!             hold the physical address of the next table page
//! ADR: docs/adr/0001-trap-layer-boundaries.md

pub mod tlb;
pub mod uaccess;
pub mod walk;

#[cfg(test)]
mod tests;

pub use tlb::{ConfigError, Configurator, Roots, WalkerState};
pub use uaccess::{check_kernel, check_user, copy_from_user, copy_to_user, Access, UaccessError};
pub use walk::{walk, Leaf, WalkError};

use bitflags::bitflags;
use static_assertions::const_assert;

use crate::config::{PAGE_SHIFT, PGTABLE_LEVELS, VA_BITS};

bitflags! {
    /// LoongArch page-table entry bits.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct PteFlags: u64 {
        const VALID = 1 << 0;
        const DIRTY = 1 << 1;
        /// PLV field set to 3: reachable from user mode.
        const USER = 0b11 << 2;
        /// Directory-level entry that maps a huge page.
        const HUGE = 1 << 6;
        const PRESENT = 1 << 7;
        const WRITE = 1 << 8;
        const NO_READ = 1 << 61;
        const NO_EXEC = 1 << 62;
        const RPLV = 1 << 63;
    }
}

/// Physical frame bits of an entry (PALEN 48).
pub const PFN_MASK: u64 = ((1 << 48) - 1) & !0xfff;

/// Physical address carried by a directory or leaf entry.
#[inline]
pub const fn entry_pa(entry: u64) -> u64 {
    entry & PFN_MASK
}

/// Page-table walker geometry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageWalkConfig {
    levels: usize,
    page_shift: u32,
}

impl PageWalkConfig {
    /// Builds a geometry, panicking on unsupported shapes.
    ///
    /// Used in const items, so a bad shape stops the build.
    pub const fn new(levels: usize, page_shift: u32) -> Self {
        assert!(levels >= 2 && levels <= 4, "page table must have 2, 3 or 4 levels");
        assert!(
            page_shift == 12 || page_shift == 14 || page_shift == 16,
            "page size must be 4K, 16K or 64K"
        );
        let cfg = Self { levels, page_shift };
        assert!(cfg.va_bits() <= 64, "geometry covers more than 64 address bits");
        cfg
    }

    #[inline]
    pub const fn levels(&self) -> usize {
        self.levels
    }

    #[inline]
    pub const fn page_shift(&self) -> u32 {
        self.page_shift
    }

    #[inline]
    pub const fn page_size(&self) -> u64 {
        1 << self.page_shift
    }

    /// Index bits per table page (8-byte entries).
    #[inline]
    pub const fn index_bits(&self) -> u32 {
        self.page_shift - 3
    }

    #[inline]
    pub const fn entries(&self) -> usize {
        1 << self.index_bits()
    }

    /// Address bits translated by the whole walk.
    pub const fn va_bits(&self) -> u32 {
        self.page_shift + self.levels as u32 * self.index_bits()
    }

    /// Shift of the address bits indexed at `level` (0 = root).
    #[inline]
    pub const fn level_shift(&self, level: usize) -> u32 {
        self.page_shift + (self.levels - 1 - level) as u32 * self.index_bits()
    }

    #[inline]
    pub const fn index(&self, level: usize, va: u64) -> usize {
        ((va >> self.level_shift(level)) as usize) & (self.entries() - 1)
    }

    /// Exclusive end of the user window: the walk's reach capped by the hardware VA width.
    pub const fn user_end(&self) -> u64 {
        let bits = if self.va_bits() < VA_BITS { self.va_bits() } else { VA_BITS };
        1 << bits
    }

    /// `CSR.PWCTL0`: PTE, dir1 and dir2 base/width fields.
    pub const fn pwctl0(&self) -> u64 {
        let w = self.index_bits() as u64;
        let pte_base = self.page_shift as u64;
        let mut v = pte_base | (w << 5);
        if self.levels > 2 {
            let pmd_base = pte_base + w;
            v |= (pmd_base << 10) | (w << 15);
        }
        if self.levels > 3 {
            let pud_base = pte_base + 2 * w;
            v |= (pud_base << 20) | (w << 25);
        }
        v
    }

    /// `CSR.PWCTL1`: dir3 (root) base/width.
    pub const fn pwctl1(&self) -> u64 {
        let w = self.index_bits() as u64;
        let pgd_base = self.level_shift(0) as u64;
        pgd_base | (w << 6)
    }
}

/// Geometry this kernel is built for.
pub const ACTIVE_WALK: PageWalkConfig = PageWalkConfig::new(PGTABLE_LEVELS, PAGE_SHIFT);

const_assert!(ACTIVE_WALK.levels() == PGTABLE_LEVELS);
