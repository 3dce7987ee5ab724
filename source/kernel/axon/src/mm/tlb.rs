// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Hardware page-walker configuration and the software TLB miss path
//! OWNERS: @kernel-mm-team
//! PUBLIC API: Configurator::{configure_core, resolve_miss}, Roots, WalkerState, ConfigError, MissKind
//! DEPENDS_ON: hal::Port, mm::walk, config::VECSIZE
//! INVARIANTS: Refill block copied once, by core 0 only; roots written only here or by the
//!             address-space switch collaborator; a core is configured at most once
//! ADR: docs/adr/0001-trap-layer-boundaries.md

use core::fmt;
use core::sync::atomic::{AtomicBool, Ordering};

use super::uaccess::kernel_start;
use super::{walk, Leaf, PageWalkConfig, PteFlags, WalkError};
use crate::config::VECSIZE;
use crate::hal::{Csr, Port};
use crate::types::CpuId;

/// Size of the TLB refill handler block.
pub const REFILL_BLOCK_SIZE: usize = 0x80;
/// Vector slot of the refill handler relative to `EENTRY`.
pub const REFILL_VECTOR: usize = 80;

/// `TLBREHI.PS` / `TLBIDX.PS` field positions.
const TLBREHI_PS_MASK: u64 = 0x3f;
const TLBIDX_PS_SHIFT: u32 = 24;
const TLBIDX_PS_MASK: u64 = 0x3f << TLBIDX_PS_SHIFT;
/// Physical address bits of a direct-mapped kernel address (PALEN 48).
const PA_MASK: u64 = (1 << 48) - 1;

/// Kernel and user root tables.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Roots {
    /// `CSR.PGDH`
    pub kernel: u64,
    /// `CSR.PGDL`
    pub user: u64,
}

/// Per-core configuration state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum WalkerState {
    #[default]
    Uninitialized,
    Configured,
}

/// Errors surfaced by the configurator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfigError {
    /// `configure_core` ran twice on the same core.
    AlreadyConfigured(CpuId),
    /// Refill vector would not fit the vector area.
    RefillBlockTooLarge(usize),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Access that raised a page-invalid exception.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MissKind {
    Load,
    Store,
    Fetch,
    /// Store to a clean page (`TLBM`).
    Modify,
}

/// Why the miss path could not refill.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MissError {
    Walk(WalkError),
    /// Leaf present but does not allow the access.
    Denied { entry: u64 },
}

impl From<WalkError> for MissError {
    fn from(value: WalkError) -> Self {
        Self::Walk(value)
    }
}

/// Even/odd TLB pair loaded for a resolved miss.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Refill {
    pub va: u64,
    pub lo0: u64,
    pub lo1: u64,
    pub page_shift: u32,
}

/// Boot-time page-walker configurator shared by all cores.
pub struct Configurator {
    cfg: PageWalkConfig,
    refill_installed: AtomicBool,
}

impl Configurator {
    pub const fn new(cfg: PageWalkConfig) -> Self {
        Self { cfg, refill_installed: AtomicBool::new(false) }
    }

    #[inline]
    pub fn geometry(&self) -> &PageWalkConfig {
        &self.cfg
    }

    /// Address of the refill handler slot for a vector table at `eentry`.
    #[inline]
    pub const fn refill_entry(eentry: u64) -> u64 {
        eentry + (REFILL_VECTOR * VECSIZE) as u64
    }

    /// Programs the walker on `cpu` and, on core 0, installs `refill_code`.
    pub fn configure_core<P: Port + ?Sized>(
        &self,
        port: &P,
        cpu: CpuId,
        state: &mut WalkerState,
        roots: Roots,
        eentry: u64,
        refill_code: &[u8],
    ) -> Result<(), ConfigError> {
        if *state == WalkerState::Configured {
            return Err(ConfigError::AlreadyConfigured(cpu));
        }
        if refill_code.len() > REFILL_BLOCK_SIZE {
            return Err(ConfigError::RefillBlockTooLarge(refill_code.len()));
        }

        let ps = u64::from(self.cfg.page_shift());
        port.write_csr(Csr::Stlbps, ps);
        let ehi = port.read_csr(Csr::TlbrEhi);
        port.write_csr(Csr::TlbrEhi, (ehi & !TLBREHI_PS_MASK) | ps);
        let idx = port.read_csr(Csr::TlbIdx);
        port.write_csr(Csr::TlbIdx, (idx & !TLBIDX_PS_MASK) | (ps << TLBIDX_PS_SHIFT));

        port.write_csr(Csr::Pwctl0, self.cfg.pwctl0());
        port.write_csr(Csr::Pwctl1, self.cfg.pwctl1());
        port.write_csr(Csr::Pgdh, roots.kernel);
        port.write_csr(Csr::Pgdl, roots.user);
        port.invalidate_tlb_all();
        port.write_csr(Csr::Tmid, cpu.index() as u64);

        let refill = Self::refill_entry(eentry);
        // The refill handler runs with translation off.
        port.write_csr(Csr::TlbrEntry, refill & PA_MASK);
        if cpu.is_boot()
            && self
                .refill_installed
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            port.write_code(refill, refill_code);
            port.flush_icache(refill, REFILL_BLOCK_SIZE);
        }

        *state = WalkerState::Configured;
        Ok(())
    }

    /// Resolves a page-invalid exception at `badv` by walking the live table.
    ///
    /// `user` is the privilege the access was made from; the root follows the address half.
    pub fn resolve_miss<P: Port + ?Sized>(
        &self,
        port: &P,
        badv: u64,
        user: bool,
        kind: MissKind,
    ) -> Result<Refill, MissError> {
        let kernel_half = badv >= kernel_start(&self.cfg);
        let root = port.read_csr(if kernel_half { Csr::Pgdh } else { Csr::Pgdl });
        let leaf = walk(port, &self.cfg, root, badv)?;
        let mut entry = permitted(&leaf, user, kind)?;
        if kind == MissKind::Modify {
            entry |= PteFlags::DIRTY.bits();
        }

        let refill = if leaf.is_huge(&self.cfg) {
            // Split the huge mapping into two halves of one TLB pair.
            let span_shift = self.cfg.level_shift(leaf.level);
            let half = 1u64 << (span_shift - 1);
            let lo0 = entry & !PteFlags::HUGE.bits();
            Refill {
                va: badv & !((1u64 << span_shift) - 1),
                lo0,
                lo1: lo0 + half,
                page_shift: span_shift - 1,
            }
        } else {
            let shift = self.cfg.page_shift();
            let pair_va = badv & !((1u64 << (shift + 1)) - 1);
            let odd = badv & (1u64 << shift) != 0;
            let buddy_va = pair_va | if odd { 0 } else { 1u64 << shift };
            let buddy = walk(port, &self.cfg, root, buddy_va).map(|l| l.entry).unwrap_or(0);
            let (lo0, lo1) = if odd { (buddy, entry) } else { (entry, buddy) };
            Refill { va: pair_va, lo0, lo1, page_shift: shift }
        };
        port.tlb_fill(refill.va, refill.lo0, refill.lo1, refill.page_shift);
        Ok(refill)
    }
}

fn permitted(leaf: &Leaf, user: bool, kind: MissKind) -> Result<u64, MissError> {
    let flags = leaf.flags();
    let denied = Err(MissError::Denied { entry: leaf.entry });
    if !flags.contains(PteFlags::PRESENT) {
        return denied;
    }
    if user && !flags.contains(PteFlags::USER) {
        return denied;
    }
    let ok = match kind {
        MissKind::Load => !flags.contains(PteFlags::NO_READ),
        MissKind::Store | MissKind::Modify => flags.contains(PteFlags::WRITE),
        MissKind::Fetch => !flags.contains(PteFlags::NO_EXEC),
    };
    if ok {
        Ok(leaf.entry | PteFlags::VALID.bits())
    } else {
        denied
    }
}
