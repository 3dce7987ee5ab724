// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Fatal-trap reports and the last-trap record used by the panic path.

use core::fmt::{self, Write};

use spin::Mutex;

use super::cause::{ecode_name, FaultClass};
use crate::frame::{reg, ExceptionFrame};
use crate::types::CpuId;

static LAST_TRAP: Mutex<Option<ExceptionFrame>> = Mutex::new(None);

#[cfg(feature = "trap_ring")]
const TRAP_RING_LEN: usize = 64;
#[cfg(feature = "trap_ring")]
static TRAP_RING: Mutex<([Option<ExceptionFrame>; TRAP_RING_LEN], usize)> =
    Mutex::new(([None; TRAP_RING_LEN], 0));

/// Remembers `frame` as the most recent trap.
pub fn record(frame: &ExceptionFrame) {
    *LAST_TRAP.lock() = Some(*frame);
    #[cfg(feature = "trap_ring")]
    {
        let mut ring = TRAP_RING.lock();
        let idx = ring.1;
        ring.0[idx % TRAP_RING_LEN] = Some(*frame);
        ring.1 = (idx + 1) % TRAP_RING_LEN;
    }
}

pub fn last_trap() -> Option<ExceptionFrame> {
    *LAST_TRAP.lock()
}

/// Recent traps, oldest first.
#[cfg(feature = "trap_ring")]
pub fn recent_traps() -> alloc::vec::Vec<ExceptionFrame> {
    let ring = TRAP_RING.lock();
    (0..TRAP_RING_LEN).filter_map(|i| ring.0[(ring.1 + i) % TRAP_RING_LEN]).collect()
}

/// Everything logged about a trap that stops the system.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FatalReport {
    pub cpu: CpuId,
    pub class: FaultClass,
    pub frame: ExceptionFrame,
}

impl FatalReport {
    pub fn new(cpu: CpuId, class: FaultClass, frame: &ExceptionFrame) -> Self {
        Self { cpu, class, frame: *frame }
    }

    /// Emits the report at error level, one line per row.
    pub fn log(&self) {
        let f = &self.frame;
        crate::log_error!(
            target: "trap",
            "{}: fatal {:?} ({} ecode=0x{:x} subcode=0x{:x}) from {}",
            self.cpu,
            self.class,
            ecode_name(f.ecode()),
            f.ecode(),
            f.esubcode(),
            if f.from_user() { "user" } else { "kernel" }
        );
        crate::log_error!(
            target: "trap",
            " era=0x{:016x} badv=0x{:016x} estat=0x{:016x}",
            f.era,
            f.badv,
            f.estat
        );
        crate::log_error!(
            target: "trap",
            " crmd=0x{:x} prmd=0x{:x} euen=0x{:x} ecfg=0x{:x}",
            f.crmd,
            f.prmd,
            f.euen,
            f.ecfg
        );
        for row in 0..4 {
            let base = row * 8;
            crate::log_error!(
                target: "trap",
                " r{:02}..r{:02} = {:016x?}",
                base,
                base + 7,
                &f.regs[base..base + 8]
            );
        }
    }
}

/// Short textual dump of a trap frame.
pub fn fmt_frame<W: Write>(frame: &ExceptionFrame, f: &mut W) -> fmt::Result {
    writeln!(f, " era=0x{:016x}", frame.era)?;
    writeln!(f, " estat=0x{:016x} ({})", frame.estat, ecode_name(frame.ecode()))?;
    writeln!(f, " badv=0x{:016x}", frame.badv)?;
    writeln!(f, " a0..a7 = {:016x?}", &frame.regs[reg::A0..=reg::A7])
}
