// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Extended-context records placed above the signal frame.
//!
//! Each record is a 16-byte header (`magic`, `size`, padding) followed by the
//! payload. `size` covers header, payload and any alignment gap, so adding it
//! to the record address lands on the next header. The chain ends with an
//! all-zero header.

use alloc::vec::Vec;
use core::fmt;

use crate::frame::FpuState;
use crate::hal::{FpBank, Port};
use crate::mm::{check_user, Access, PageWalkConfig};

/// Size of a record header.
pub const SCTX_INFO_SIZE: u64 = 16;

pub const FPU_CTX_MAGIC: u32 = 0x4650_5501;
pub const LSX_CTX_MAGIC: u32 = 0x5358_0001;
pub const LASX_CTX_MAGIC: u32 = 0x4153_5801;
pub const LBT_CTX_MAGIC: u32 = 0x4254_0001;
pub const END_CTX_MAGIC: u32 = 0;

/// Upper bound on records parsed before giving up.
const MAX_RECORDS: usize = 8;

/// Kind of an extended-context record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubKind {
    Fpu,
    Lsx,
    Lasx,
    Lbt,
}

impl SubKind {
    pub const fn magic(self) -> u32 {
        match self {
            SubKind::Fpu => FPU_CTX_MAGIC,
            SubKind::Lsx => LSX_CTX_MAGIC,
            SubKind::Lasx => LASX_CTX_MAGIC,
            SubKind::Lbt => LBT_CTX_MAGIC,
        }
    }

    pub const fn from_magic(magic: u32) -> Option<Self> {
        match magic {
            FPU_CTX_MAGIC => Some(SubKind::Fpu),
            LSX_CTX_MAGIC => Some(SubKind::Lsx),
            LASX_CTX_MAGIC => Some(SubKind::Lasx),
            LBT_CTX_MAGIC => Some(SubKind::Lbt),
            _ => None,
        }
    }

    /// Alignment of the payload.
    pub const fn align(self) -> u64 {
        match self {
            SubKind::Fpu | SubKind::Lbt => 8,
            SubKind::Lsx => 16,
            SubKind::Lasx => 32,
        }
    }

    /// Payload size in bytes, padded to the payload alignment.
    pub const fn payload_size(self) -> u64 {
        match self {
            // regs[32], fcc, fcsr + pad
            SubKind::Fpu => 32 * 8 + 8 + 8,
            // regs[64], fcc, fcsr + pad
            SubKind::Lsx => 64 * 8 + 8 + 8,
            // regs[128], fcc, fcsr, padded to 32
            SubKind::Lasx => 128 * 8 + 32,
            // scr[4], eflags, ftop
            SubKind::Lbt => 4 * 8 + 4 + 4,
        }
    }

    pub const fn bank(self) -> Option<FpBank> {
        match self {
            SubKind::Fpu => Some(FpBank::Fpu),
            SubKind::Lsx => Some(FpBank::Lsx),
            SubKind::Lasx => Some(FpBank::Lasx),
            SubKind::Lbt => None,
        }
    }

    const fn lanes(self) -> usize {
        match self {
            SubKind::Fpu | SubKind::Lbt => 1,
            SubKind::Lsx => 2,
            SubKind::Lasx => 4,
        }
    }
}

/// Decoded extended-context payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubContext {
    /// FP/vector bank: the low `lanes` words of each register plus control state.
    Fp { kind: SubKind, regs: [[u64; 4]; 32], fcc: u64, fcsr: u32 },
    Lbt { scr: [u64; 4], eflags: u32, ftop: u32 },
}

impl SubContext {
    /// Copies the part of `state` that `kind` describes.
    pub fn capture(kind: SubKind, state: &FpuState) -> Self {
        match kind {
            SubKind::Lbt => SubContext::Lbt {
                scr: state.scr,
                eflags: state.eflags as u32,
                ftop: state.ftop as u32,
            },
            _ => {
                let lanes = kind.lanes();
                let mut regs = [[0u64; 4]; 32];
                for (dst, src) in regs.iter_mut().zip(state.fpr.iter()) {
                    dst[..lanes].copy_from_slice(&src[..lanes]);
                }
                SubContext::Fp { kind, regs, fcc: state.fcc, fcsr: state.fcsr as u32 }
            }
        }
    }

    pub fn kind(&self) -> SubKind {
        match self {
            SubContext::Fp { kind, .. } => *kind,
            SubContext::Lbt { .. } => SubKind::Lbt,
        }
    }

    /// Writes the payload back into `state`; lanes beyond the record are left alone.
    pub fn apply(&self, state: &mut FpuState) {
        match *self {
            SubContext::Fp { kind, regs, fcc, fcsr } => {
                let lanes = kind.lanes();
                for (dst, src) in state.fpr.iter_mut().zip(regs.iter()) {
                    dst[..lanes].copy_from_slice(&src[..lanes]);
                }
                state.fcc = fcc;
                state.fcsr = u64::from(fcsr);
            }
            SubContext::Lbt { scr, eflags, ftop } => {
                state.scr = scr;
                state.eflags = u64::from(eflags);
                state.ftop = u64::from(ftop);
            }
        }
    }

    fn encode(&self, out: &mut Vec<u8>) {
        match *self {
            SubContext::Fp { kind, regs, fcc, fcsr } => {
                let lanes = kind.lanes();
                for r in regs.iter() {
                    for w in &r[..lanes] {
                        out.extend_from_slice(&w.to_le_bytes());
                    }
                }
                out.extend_from_slice(&fcc.to_le_bytes());
                out.extend_from_slice(&fcsr.to_le_bytes());
            }
            SubContext::Lbt { scr, eflags, ftop } => {
                for w in scr.iter() {
                    out.extend_from_slice(&w.to_le_bytes());
                }
                out.extend_from_slice(&eflags.to_le_bytes());
                out.extend_from_slice(&ftop.to_le_bytes());
            }
        }
    }

    fn decode(kind: SubKind, bytes: &[u8]) -> Self {
        let word = |i: usize| le_u64(&bytes[i * 8..i * 8 + 8]);
        match kind {
            SubKind::Lbt => SubContext::Lbt {
                scr: [word(0), word(1), word(2), word(3)],
                eflags: le_u32(&bytes[32..36]),
                ftop: le_u32(&bytes[36..40]),
            },
            _ => {
                let lanes = kind.lanes();
                let mut regs = [[0u64; 4]; 32];
                for (i, r) in regs.iter_mut().enumerate() {
                    for (lane, w) in r[..lanes].iter_mut().enumerate() {
                        *w = word(i * lanes + lane);
                    }
                }
                let tail = 32 * lanes;
                SubContext::Fp {
                    kind,
                    regs,
                    fcc: word(tail),
                    fcsr: le_u32(&bytes[(tail + 1) * 8..(tail + 1) * 8 + 4]),
                }
            }
        }
    }
}

fn le_u64(b: &[u8]) -> u64 {
    let mut w = [0u8; 8];
    w.copy_from_slice(b);
    u64::from_le_bytes(w)
}

fn le_u32(b: &[u8]) -> u32 {
    let mut w = [0u8; 4];
    w.copy_from_slice(b);
    u32::from_le_bytes(w)
}

/// One placed record. `kind == None` is the terminator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Placement {
    pub kind: Option<SubKind>,
    pub addr: u64,
    pub size: u64,
}

/// Records laid out downward from a stack pointer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtLayout {
    /// Highest address first (terminator), lowest last.
    pub blocks: Vec<Placement>,
    /// Address of the lowest record; the signal frame ends here.
    pub low: u64,
}

impl ExtLayout {
    /// Places the terminator at the top, then `kinds` in order, each below the last.
    pub fn plan(sp: u64, kinds: &[SubKind]) -> Self {
        let mut base = sp - SCTX_INFO_SIZE;
        let mut blocks = Vec::with_capacity(kinds.len() + 1);
        blocks.push(Placement { kind: None, addr: base, size: SCTX_INFO_SIZE });
        for &kind in kinds {
            let align = kind.align().max(16);
            let new_base = ((base - kind.payload_size()) & !(align - 1)) - SCTX_INFO_SIZE;
            blocks.push(Placement { kind: Some(kind), addr: new_base, size: base - new_base });
            base = new_base;
        }
        Self { blocks, low: base }
    }

    /// Bytes spanned from `low` to the end of the terminator.
    pub fn size(&self) -> u64 {
        self.blocks.iter().map(|b| b.size).sum()
    }

    /// Serializes `contexts` (same order as the planned kinds) and the terminator.
    pub fn write<P: Port + ?Sized>(&self, port: &P, contexts: &[SubContext]) {
        for block in &self.blocks {
            let mut bytes = Vec::with_capacity(block.size as usize);
            match block.kind {
                None => {
                    bytes.extend_from_slice(&END_CTX_MAGIC.to_le_bytes());
                    bytes.extend_from_slice(&0u32.to_le_bytes());
                    bytes.extend_from_slice(&[0u8; 8]);
                }
                Some(kind) => {
                    bytes.extend_from_slice(&kind.magic().to_le_bytes());
                    bytes.extend_from_slice(&(block.size as u32).to_le_bytes());
                    bytes.extend_from_slice(&[0u8; 8]);
                    if let Some(ctx) = contexts.iter().find(|c| c.kind() == kind) {
                        ctx.encode(&mut bytes);
                    }
                }
            }
            port.write_user(block.addr, &bytes);
        }
    }
}

/// Why a record chain was rejected.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChainError {
    /// Record `position` is not readable user memory.
    Fault { position: usize, addr: u64 },
    BadMagic { position: usize, magic: u32 },
    /// Record size smaller than its payload or a non-zero terminator size.
    BadSize { position: usize, size: u32 },
    /// A kind appeared twice, or two FP banks were present.
    Duplicate { position: usize },
    /// No terminator within the record limit or the address space.
    Unterminated,
}

impl fmt::Display for ChainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Walks the chain starting at `start`, validating each record before reading it.
///
/// Stops at the first bad record without reading past its header.
pub fn read_chain<P: Port + ?Sized>(
    port: &P,
    cfg: &PageWalkConfig,
    start: u64,
) -> Result<Vec<SubContext>, ChainError> {
    let mut out: Vec<SubContext> = Vec::new();
    let mut cursor = start;
    for position in 0..MAX_RECORDS {
        if !check_user(port, cfg, cursor, SCTX_INFO_SIZE as usize, Access::Read) {
            return Err(ChainError::Fault { position, addr: cursor });
        }
        let mut header = [0u8; SCTX_INFO_SIZE as usize];
        port.read_user(cursor, &mut header);
        let magic = le_u32(&header[0..4]);
        let size = le_u32(&header[4..8]);

        if magic == END_CTX_MAGIC {
            if size != 0 {
                return Err(ChainError::BadSize { position, size });
            }
            return Ok(out);
        }
        let kind = SubKind::from_magic(magic).ok_or(ChainError::BadMagic { position, magic })?;
        let payload_len = kind.payload_size();
        if u64::from(size) < SCTX_INFO_SIZE + payload_len {
            return Err(ChainError::BadSize { position, size });
        }
        let clash = out.iter().any(|c| {
            c.kind() == kind || (c.kind().bank().is_some() && kind.bank().is_some())
        });
        if clash {
            return Err(ChainError::Duplicate { position });
        }

        let payload_addr = cursor + SCTX_INFO_SIZE;
        if !check_user(port, cfg, payload_addr, payload_len as usize, Access::Read) {
            return Err(ChainError::Fault { position, addr: payload_addr });
        }
        let mut payload = alloc::vec![0u8; payload_len as usize];
        port.read_user(payload_addr, &mut payload);
        out.push(SubContext::decode(kind, &payload));

        cursor = cursor.checked_add(u64::from(size)).ok_or(ChainError::Unterminated)?;
    }
    Err(ChainError::Unterminated)
}
