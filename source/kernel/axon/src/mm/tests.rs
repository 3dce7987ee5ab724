// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![cfg(test)]
//! CONTEXT: Unit and property tests for the validator and the page-walker configurator
//! OWNERS: @kernel-mm-team
//! NOTE: Tests only; page tables live in the fake port's physical memory.
//!
//! TEST_SCOPE:
//!   - check_user/check_kernel soundness over mapped, unmapped and boundary ranges
//!   - read and write permission bits are independent
//!   - PWCTL encodings for 2/3/4 level geometries; refill block installed once on core 0
//!   - miss path refills even/odd pairs and refuses unmapped or forbidden accesses
//!
//! TEST_SCENARIOS:
//!   - middle_page_unmapped_fails(): 3-page range with a hole fails, 1-page prefix passes
//!   - write_does_not_imply_read() / read_does_not_imply_write()
//!   - huge_leaf_short_circuits(): a directory-level leaf ends the walk early
//!   - configure_installs_refill_once(): second core and second call do not copy code

use proptest::prelude::*;

use super::tlb::{MissError, MissKind, REFILL_BLOCK_SIZE};
use super::uaccess::{kernel_start, USER_START};
use super::*;
use crate::hal::fake::FakePort;
use crate::hal::{Csr, Port};
use crate::types::CpuId;

const PAGE: u64 = ACTIVE_WALK.page_size();
const BASE: u64 = 0x4000_0000;

fn user_flags() -> PteFlags {
    PteFlags::PRESENT | PteFlags::VALID | PteFlags::USER
}

// ——— validator ———

#[test]
fn middle_page_unmapped_fails() {
    let port = FakePort::new();
    port.map_user_rw(BASE);
    port.map_user_rw(BASE + 2 * PAGE);

    assert!(!check_user(&port, &ACTIVE_WALK, BASE, 3 * PAGE as usize, Access::Read));
    assert!(check_user(&port, &ACTIVE_WALK, BASE, PAGE as usize, Access::Read));
    assert!(check_user(&port, &ACTIVE_WALK, BASE, PAGE as usize, Access::ReadWrite));
}

#[test]
fn zero_length_and_null_fail_closed() {
    let port = FakePort::new();
    port.map_user_rw(BASE);
    assert!(!check_user(&port, &ACTIVE_WALK, BASE, 0, Access::Read));
    assert!(!check_user(&port, &ACTIVE_WALK, 0, 8, Access::Read));
}

#[test]
fn range_outside_user_window_fails() {
    let port = FakePort::new();
    port.map_user_rw(0);
    assert!(!check_user(&port, &ACTIVE_WALK, USER_START - 8, 16, Access::Read));

    let top = ACTIVE_WALK.user_end() - PAGE;
    port.map_user_rw(top);
    assert!(check_user(&port, &ACTIVE_WALK, top, 16, Access::Read));
    // Crossing into the kernel half.
    assert!(!check_user(&port, &ACTIVE_WALK, top, PAGE as usize + 16, Access::Read));
    // Wrapping.
    assert!(!check_user(&port, &ACTIVE_WALK, u64::MAX - 4, 16, Access::Read));
}

#[test]
fn unaligned_range_spanning_two_pages_checks_both() {
    let port = FakePort::new();
    port.map_user_rw(BASE);
    let addr = BASE + PAGE - 1;
    assert!(!check_user(&port, &ACTIVE_WALK, addr, 2, Access::Read));
    port.map_user_rw(BASE + PAGE);
    assert!(check_user(&port, &ACTIVE_WALK, addr, 2, Access::Read));
}

#[test]
fn write_does_not_imply_read() {
    let port = FakePort::new();
    port.map(Csr::Pgdl, BASE, user_flags() | PteFlags::WRITE | PteFlags::NO_READ);
    assert!(check_user(&port, &ACTIVE_WALK, BASE, 8, Access::Write));
    assert!(!check_user(&port, &ACTIVE_WALK, BASE, 8, Access::Read));
    assert!(!check_user(&port, &ACTIVE_WALK, BASE, 8, Access::ReadWrite));
}

#[test]
fn read_does_not_imply_write() {
    let port = FakePort::new();
    port.map(Csr::Pgdl, BASE, user_flags());
    assert!(check_user(&port, &ACTIVE_WALK, BASE, 8, Access::Read));
    assert!(!check_user(&port, &ACTIVE_WALK, BASE, 8, Access::Write));
}

#[test]
fn kernel_only_leaf_rejected_for_user() {
    let port = FakePort::new();
    port.map(Csr::Pgdl, BASE, PteFlags::PRESENT | PteFlags::VALID | PteFlags::WRITE);
    assert!(!check_user(&port, &ACTIVE_WALK, BASE, 8, Access::Read));
}

#[test]
fn non_present_leaf_rejected() {
    let port = FakePort::new();
    port.map(Csr::Pgdl, BASE, PteFlags::USER | PteFlags::WRITE);
    assert!(!check_user(&port, &ACTIVE_WALK, BASE, 8, Access::Read));
}

#[test]
fn huge_leaf_short_circuits() {
    let port = FakePort::new();
    let level = ACTIVE_WALK.levels() - 2;
    port.map_at_level(Csr::Pgdl, BASE, level, user_flags() | PteFlags::WRITE);
    let span = 1u64 << ACTIVE_WALK.level_shift(level);

    let before = port.table_reads();
    assert!(check_user(&port, &ACTIVE_WALK, BASE, PAGE as usize, Access::ReadWrite));
    assert_eq!(port.table_reads() - before, level + 1);
    assert!(check_user(&port, &ACTIVE_WALK, BASE + span - PAGE, PAGE as usize, Access::Write));
}

#[test]
fn every_call_rewalks() {
    let port = FakePort::new();
    port.map_user_rw(BASE);
    assert!(check_user(&port, &ACTIVE_WALK, BASE, 8, Access::Write));
    port.unmap(Csr::Pgdl, BASE);
    assert!(!check_user(&port, &ACTIVE_WALK, BASE, 8, Access::Write));
}

#[test]
fn kernel_check_uses_kernel_root() {
    let port = FakePort::new();
    let kva = kernel_start(&ACTIVE_WALK) + 0x20_0000;
    port.map(Csr::Pgdh, kva, PteFlags::PRESENT | PteFlags::VALID | PteFlags::WRITE);

    assert!(check_kernel(&port, &ACTIVE_WALK, kva, 64, Access::ReadWrite));
    assert!(!check_kernel(&port, &ACTIVE_WALK, kva + PAGE, 64, Access::Read));
    assert!(!check_kernel(&port, &ACTIVE_WALK, BASE, 64, Access::Read));
    assert!(!check_user(&port, &ACTIVE_WALK, kva, 64, Access::Read));
}

#[test]
fn copy_helpers_refuse_unvalidated_ranges() {
    let port = FakePort::new();
    port.map(Csr::Pgdl, BASE, user_flags());
    assert_eq!(
        copy_to_user(&port, &ACTIVE_WALK, BASE, &[1, 2, 3]),
        Err(UaccessError::Fault { addr: BASE, len: 3 })
    );
    assert_eq!(port.user_writes(), 0);

    let mut out = [0u8; 4];
    assert!(copy_from_user(&port, &ACTIVE_WALK, BASE, &mut out).is_ok());
}

proptest! {
    #[test]
    fn mapped_ranges_pass(pages in 1usize..6, offset in 0u64..PAGE, len in 1usize..4096) {
        let port = FakePort::new();
        port.map_user_range(BASE, pages + 2);
        let span = (pages as u64) * PAGE;
        prop_assume!(offset + len as u64 <= span);
        prop_assert!(check_user(&port, &ACTIVE_WALK, BASE + offset, len, Access::ReadWrite));
    }

    #[test]
    fn any_hole_fails(pages in 2usize..6, hole in 0usize..6) {
        prop_assume!(hole < pages);
        let port = FakePort::new();
        port.map_user_range(BASE, pages);
        port.unmap(Csr::Pgdl, BASE + hole as u64 * PAGE);
        prop_assert!(!check_user(&port, &ACTIVE_WALK, BASE, pages * PAGE as usize, Access::Read));
    }
}

// ——— page-walker configurator ———

#[test]
fn pwctl_four_level_4k() {
    let cfg = PageWalkConfig::new(4, 12);
    let expect0 = 12 | (9 << 5) | (21 << 10) | (9 << 15) | (30 << 20) | (9 << 25);
    assert_eq!(cfg.pwctl0(), expect0);
    assert_eq!(cfg.pwctl1(), 39 | (9 << 6));
    assert_eq!(cfg.va_bits(), 48);
}

#[test]
fn pwctl_three_level_16k() {
    let cfg = PageWalkConfig::new(3, 14);
    assert_eq!(cfg.pwctl0(), 14 | (11 << 5) | (25 << 10) | (11 << 15));
    assert_eq!(cfg.pwctl1(), 36 | (11 << 6));
}

#[test]
fn pwctl_two_level_omits_middle_directories() {
    let cfg = PageWalkConfig::new(2, 12);
    assert_eq!(cfg.pwctl0(), 12 | (9 << 5));
    assert_eq!(cfg.pwctl1(), 21 | (9 << 6));
    assert_eq!(cfg.user_end(), 1 << 30);
}

#[test]
#[should_panic]
fn unsupported_geometry_rejected() {
    let _ = PageWalkConfig::new(5, 12);
}

#[test]
fn configure_programs_walker_and_installs_refill_once() {
    let port = FakePort::new();
    let conf = Configurator::new(ACTIVE_WALK);
    let roots = Roots { kernel: 0x9000, user: 0xa000 };
    let eentry = 0x9000_0000_0020_0000;
    let code = [0u8; REFILL_BLOCK_SIZE];

    let mut s0 = WalkerState::default();
    conf.configure_core(&port, CpuId::BOOT, &mut s0, roots, eentry, &code).unwrap();
    assert_eq!(s0, WalkerState::Configured);
    assert_eq!(port.read_csr(Csr::Pwctl0), ACTIVE_WALK.pwctl0());
    assert_eq!(port.read_csr(Csr::Pwctl1), ACTIVE_WALK.pwctl1());
    assert_eq!(port.read_csr(Csr::Pgdh), 0x9000);
    assert_eq!(port.read_csr(Csr::Pgdl), 0xa000);
    assert_eq!(port.read_csr(Csr::Stlbps), u64::from(ACTIVE_WALK.page_shift()));
    assert_eq!(port.read_csr(Csr::TlbrEntry), 0x0020_a000);
    assert_eq!(port.tlb_flushes(), 1);
    assert_eq!(port.code_writes(), vec![(eentry + 80 * 0x200, REFILL_BLOCK_SIZE)]);
    assert_eq!(port.icache_flushes(), vec![(eentry + 80 * 0x200, REFILL_BLOCK_SIZE)]);

    // Roots are written before the flush, the flush before TMID.
    let writes = port.csr_writes();
    let pgdl = writes.iter().position(|(c, _)| *c == Csr::Pgdl).unwrap();
    let tmid = writes.iter().position(|(c, _)| *c == Csr::Tmid).unwrap();
    assert!(pgdl < tmid);

    assert_eq!(
        conf.configure_core(&port, CpuId::BOOT, &mut s0, roots, eentry, &code),
        Err(ConfigError::AlreadyConfigured(CpuId::BOOT))
    );

    let cpu1 = CpuId::new(1).unwrap();
    let mut s1 = WalkerState::default();
    conf.configure_core(&port, cpu1, &mut s1, roots, eentry, &code).unwrap();
    assert_eq!(port.read_csr(Csr::Tmid), 1);
    assert_eq!(port.code_writes().len(), 1);
    assert_eq!(port.tlb_flushes(), 2);
}

#[test]
fn oversized_refill_block_rejected() {
    let port = FakePort::new();
    let conf = Configurator::new(ACTIVE_WALK);
    let mut st = WalkerState::default();
    let code = [0u8; REFILL_BLOCK_SIZE + 4];
    assert_eq!(
        conf.configure_core(&port, CpuId::BOOT, &mut st, Roots::default(), 0, &code),
        Err(ConfigError::RefillBlockTooLarge(REFILL_BLOCK_SIZE + 4))
    );
    assert_eq!(st, WalkerState::Uninitialized);
}

#[test]
fn miss_refills_even_odd_pair() {
    let port = FakePort::new();
    let conf = Configurator::new(ACTIVE_WALK);
    let odd = BASE + PAGE;
    let even_entry = port.map(Csr::Pgdl, BASE, user_flags());
    let odd_entry = port.map(Csr::Pgdl, odd, user_flags() | PteFlags::WRITE);

    let refill = conf.resolve_miss(&port, odd + 8, true, MissKind::Store).unwrap();
    assert_eq!(refill.va, BASE);
    assert_eq!(refill.lo0, even_entry);
    assert_eq!(refill.lo1, odd_entry | PteFlags::VALID.bits());
    assert_eq!(port.tlb_fills().len(), 1);
}

#[test]
fn miss_on_unmapped_or_forbidden_page_fails() {
    let port = FakePort::new();
    let conf = Configurator::new(ACTIVE_WALK);
    assert!(matches!(
        conf.resolve_miss(&port, BASE, true, MissKind::Load),
        Err(MissError::Walk(WalkError::NotPresent { .. }))
    ));

    port.map(Csr::Pgdl, BASE, user_flags() | PteFlags::NO_EXEC);
    assert!(matches!(
        conf.resolve_miss(&port, BASE, true, MissKind::Fetch),
        Err(MissError::Denied { .. })
    ));
    assert!(matches!(
        conf.resolve_miss(&port, BASE, true, MissKind::Store),
        Err(MissError::Denied { .. })
    ));
    assert!(port.tlb_fills().is_empty());
}

#[test]
fn modify_fault_sets_dirty() {
    let port = FakePort::new();
    let conf = Configurator::new(ACTIVE_WALK);
    port.map(Csr::Pgdl, BASE, user_flags() | PteFlags::WRITE);
    let refill = conf.resolve_miss(&port, BASE, true, MissKind::Modify).unwrap();
    assert_ne!(refill.lo0 & PteFlags::DIRTY.bits(), 0);
}
