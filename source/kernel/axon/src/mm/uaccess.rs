// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Range validation against the live page table before touching user memory
//! OWNERS: @kernel-mm-team
//! PUBLIC API: check_user(), check_kernel(), copy_to_user(), copy_from_user(), Access
//! DEPENDS_ON: mm::walk, hal::Port (PGDL/PGDH roots, scratch-window reads)
//! INVARIANTS: Zero length fails; wrap fails; every covered page is walked on every call;
//!             read and write permissions are independent bits
//! ADR: docs/adr/0001-trap-layer-boundaries.md

use core::fmt;

use super::{walk, Leaf, PageWalkConfig, PteFlags};
use crate::hal::{Csr, Port};

/// Lowest user address; page zero is never mapped.
pub const USER_START: u64 = 0x1000;

/// Requested access.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
    ReadWrite,
}

/// Error returned by the copy helpers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UaccessError {
    /// Range failed validation; nothing was copied.
    Fault { addr: u64, len: usize },
}

impl fmt::Display for UaccessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Domain {
    User,
    Kernel,
}

/// Checks `[addr, addr + len)` in the current user address space.
pub fn check_user<P: Port + ?Sized>(
    port: &P,
    cfg: &PageWalkConfig,
    addr: u64,
    len: usize,
    access: Access,
) -> bool {
    let Some(end) = range_end(addr, len) else {
        return false;
    };
    if addr < USER_START || end > cfg.user_end() {
        return false;
    }
    check_range(port, cfg, port.read_csr(Csr::Pgdl), addr, end, access, Domain::User)
}

/// Same walk as [`check_user`], rooted at the kernel table and the upper half.
pub fn check_kernel<P: Port + ?Sized>(
    port: &P,
    cfg: &PageWalkConfig,
    addr: u64,
    len: usize,
    access: Access,
) -> bool {
    let Some(end) = range_end(addr, len) else {
        return false;
    };
    if addr < kernel_start(cfg) {
        return false;
    }
    check_range(port, cfg, port.read_csr(Csr::Pgdh), addr, end, access, Domain::Kernel)
}

/// First address of the kernel half for this geometry.
#[inline]
pub fn kernel_start(cfg: &PageWalkConfig) -> u64 {
    !(cfg.user_end() - 1)
}

/// Exclusive end of a non-empty, non-wrapping range starting at a non-null address.
#[inline]
fn range_end(addr: u64, len: usize) -> Option<u64> {
    if addr == 0 || len == 0 {
        return None;
    }
    addr.checked_add(len as u64)
}

fn check_range<P: Port + ?Sized>(
    port: &P,
    cfg: &PageWalkConfig,
    root: u64,
    start: u64,
    end: u64,
    access: Access,
    domain: Domain,
) -> bool {
    let page_mask = !(cfg.page_size() - 1);
    let mut page = start & page_mask;
    let last = (end - 1) & page_mask;
    loop {
        let leaf = match walk(port, cfg, root, page) {
            Ok(leaf) => leaf,
            Err(_) => return false,
        };
        if !leaf_permits(&leaf, access, domain) {
            return false;
        }
        if page == last {
            return true;
        }
        page += cfg.page_size();
    }
}

fn leaf_permits(leaf: &Leaf, access: Access, domain: Domain) -> bool {
    let flags = leaf.flags();
    if !flags.contains(PteFlags::PRESENT) {
        return false;
    }
    if domain == Domain::User && !flags.contains(PteFlags::USER) {
        return false;
    }
    let readable = !flags.contains(PteFlags::NO_READ);
    let writable = flags.contains(PteFlags::WRITE);
    match access {
        Access::Read => readable,
        Access::Write => writable,
        Access::ReadWrite => readable && writable,
    }
}

/// Validates for write, then copies `bytes` to user `addr`.
pub fn copy_to_user<P: Port + ?Sized>(
    port: &P,
    cfg: &PageWalkConfig,
    addr: u64,
    bytes: &[u8],
) -> Result<(), UaccessError> {
    if !check_user(port, cfg, addr, bytes.len(), Access::Write) {
        return Err(UaccessError::Fault { addr, len: bytes.len() });
    }
    port.write_user(addr, bytes);
    Ok(())
}

/// Validates for read, then copies user `addr` into `out`.
pub fn copy_from_user<P: Port + ?Sized>(
    port: &P,
    cfg: &PageWalkConfig,
    addr: u64,
    out: &mut [u8],
) -> Result<(), UaccessError> {
    if !check_user(port, cfg, addr, out.len(), Access::Read) {
        return Err(UaccessError::Fault { addr, len: out.len() });
    }
    port.read_user(addr, out);
    Ok(())
}
