// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Software page-table walk shared by the validator and the TLB miss path.

use super::{entry_pa, PageWalkConfig, PteFlags};
use crate::hal::Port;

/// Leaf reached by a walk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Leaf {
    pub entry: u64,
    /// Level the leaf was found at; below `levels - 1` means a huge page.
    pub level: usize,
}

impl Leaf {
    #[inline]
    pub fn flags(&self) -> PteFlags {
        PteFlags::from_bits_truncate(self.entry)
    }

    #[inline]
    pub fn is_huge(&self, cfg: &PageWalkConfig) -> bool {
        self.level + 1 < cfg.levels()
    }
}

/// Why a walk stopped without a leaf.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WalkError {
    /// Empty entry at `level`.
    NotPresent { level: usize },
}

/// Walks from `root` to the entry translating `va`.
///
/// Every table page is read through the port's per-level scratch window, so
/// the walk needs no mapping of its own and never recurses into validation.
pub fn walk<P: Port + ?Sized>(
    port: &P,
    cfg: &PageWalkConfig,
    root: u64,
    va: u64,
) -> Result<Leaf, WalkError> {
    let last = cfg.levels() - 1;
    let mut table = entry_pa(root);
    for level in 0..=last {
        let entry = port.read_table_entry(level, table, cfg.index(level, va));
        if entry == 0 {
            return Err(WalkError::NotPresent { level });
        }
        if level == last || entry & PteFlags::HUGE.bits() != 0 {
            return Ok(Leaf { entry, level });
        }
        table = entry_pa(entry);
    }
    Err(WalkError::NotPresent { level: last })
}
