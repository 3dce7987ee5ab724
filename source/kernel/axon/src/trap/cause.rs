// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Exception cause decoding and the fatal/recoverable policy.
//!
//! [`classify`] is the only place that decides whether a trap is survivable.

use crate::frame::{estat_ecode, estat_esubcode};
use crate::mm::tlb::MissKind;

/// `ESTAT.Ecode` values.
pub mod ecode {
    pub const INT: u32 = 0x0;
    pub const PIL: u32 = 0x1;
    pub const PIS: u32 = 0x2;
    pub const PIF: u32 = 0x3;
    pub const PME: u32 = 0x4;
    pub const PNR: u32 = 0x5;
    pub const PNX: u32 = 0x6;
    pub const PPI: u32 = 0x7;
    pub const ADE: u32 = 0x8;
    pub const ALE: u32 = 0x9;
    pub const BCE: u32 = 0xa;
    pub const SYS: u32 = 0xb;
    pub const BRK: u32 = 0xc;
    pub const INE: u32 = 0xd;
    pub const IPE: u32 = 0xe;
    pub const FPD: u32 = 0xf;
    pub const SXD: u32 = 0x10;
    pub const ASXD: u32 = 0x11;
    pub const FPE: u32 = 0x12;
    pub const WPE: u32 = 0x13;
    pub const BTD: u32 = 0x14;
    pub const BTE: u32 = 0x15;
    pub const GSPR: u32 = 0x16;
    pub const HVC: u32 = 0x17;
    pub const GCM: u32 = 0x18;
}

/// Non-recoverable fault classes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FaultClass {
    /// Page present but access not permitted (`PNR`/`PNX`/`PPI`).
    PageProtection,
    /// Page-invalid exception the walker could not resolve.
    UnresolvedMiss,
    /// `ADEF` (subcode 0) or `ADEM` (subcode 1).
    AddressError { fetch: bool },
    Alignment,
    BoundCheck,
    Breakpoint,
    ReservedInstruction,
    PrivilegedInstruction,
    FpDisabled,
    LsxDisabled,
    LasxDisabled,
    /// Scalar (subcode 0) or vector (subcode 1) FP exception.
    FpException { vector: bool },
    Watchpoint,
    LbtDisabled,
    LbtException,
    /// Virtualization exceptions; no guest support.
    Virtualization,
    /// `syscall` executed in kernel mode.
    KernelSyscall,
    Reserved(u32),
}

/// Decision for one trap.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Disposition {
    Syscall,
    Interrupt,
    TlbMiss(MissKind),
    Fatal(FaultClass),
}

/// Maps the raw `ESTAT` value and the privilege the trap came from to a disposition.
///
/// Faults are fatal to the whole system regardless of privilege.
pub fn classify(estat: u64, from_user: bool) -> Disposition {
    let sub = estat_esubcode(estat);
    let fatal = Disposition::Fatal;
    match estat_ecode(estat) {
        ecode::INT => Disposition::Interrupt,
        ecode::SYS if from_user => Disposition::Syscall,
        ecode::SYS => fatal(FaultClass::KernelSyscall),
        ecode::PIL => Disposition::TlbMiss(MissKind::Load),
        ecode::PIS => Disposition::TlbMiss(MissKind::Store),
        ecode::PIF => Disposition::TlbMiss(MissKind::Fetch),
        ecode::PME => Disposition::TlbMiss(MissKind::Modify),
        ecode::PNR | ecode::PNX | ecode::PPI => fatal(FaultClass::PageProtection),
        ecode::ADE => fatal(FaultClass::AddressError { fetch: sub == 0 }),
        ecode::ALE => fatal(FaultClass::Alignment),
        ecode::BCE => fatal(FaultClass::BoundCheck),
        ecode::BRK => fatal(FaultClass::Breakpoint),
        ecode::INE => fatal(FaultClass::ReservedInstruction),
        ecode::IPE => fatal(FaultClass::PrivilegedInstruction),
        ecode::FPD => fatal(FaultClass::FpDisabled),
        ecode::SXD => fatal(FaultClass::LsxDisabled),
        ecode::ASXD => fatal(FaultClass::LasxDisabled),
        ecode::FPE => fatal(FaultClass::FpException { vector: sub == 1 }),
        ecode::WPE => fatal(FaultClass::Watchpoint),
        ecode::BTD => fatal(FaultClass::LbtDisabled),
        ecode::BTE => fatal(FaultClass::LbtException),
        ecode::GSPR | ecode::HVC | ecode::GCM => fatal(FaultClass::Virtualization),
        other => fatal(FaultClass::Reserved(other)),
    }
}

/// Short mnemonic for diagnostics.
pub fn ecode_name(code: u32) -> &'static str {
    match code {
        ecode::INT => "INT",
        ecode::PIL => "PIL",
        ecode::PIS => "PIS",
        ecode::PIF => "PIF",
        ecode::PME => "PME",
        ecode::PNR => "PNR",
        ecode::PNX => "PNX",
        ecode::PPI => "PPI",
        ecode::ADE => "ADE",
        ecode::ALE => "ALE",
        ecode::BCE => "BCE",
        ecode::SYS => "SYS",
        ecode::BRK => "BRK",
        ecode::INE => "INE",
        ecode::IPE => "IPE",
        ecode::FPD => "FPD",
        ecode::SXD => "SXD",
        ecode::ASXD => "ASXD",
        ecode::FPE => "FPE",
        ecode::WPE => "WPE",
        ecode::BTD => "BTD",
        ecode::BTE => "BTE",
        ecode::GSPR => "GSPR",
        ecode::HVC => "HVC",
        ecode::GCM => "GCM",
        _ => "RSV",
    }
}
