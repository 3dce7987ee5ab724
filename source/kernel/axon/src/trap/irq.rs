// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Interrupt handler registry and the acknowledge/handle/EOI drain loop.

use core::fmt;

use spin::Mutex;

use super::percpu::CpuLocal;
use crate::config::MAX_IRQS;
use crate::types::{CpuId, IrqId};

/// Interrupt controller collaborator.
pub trait InterruptController {
    /// Claims the highest-priority pending source, with the core it was routed from.
    fn ack(&self) -> Option<(CpuId, IrqId)>;
    /// Signals end of interrupt for a source claimed by [`ack`](Self::ack).
    fn eoi(&self, irq: IrqId, source: CpuId);
}

/// Interrupt callback; runs with interrupts masked.
pub type IrqHandler = fn(IrqId, CpuId);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IrqError {
    OutOfRange(IrqId),
    AlreadyInstalled(IrqId),
}

impl fmt::Display for IrqError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Handler table indexed by interrupt id.
pub struct IrqTable {
    handlers: Mutex<[Option<IrqHandler>; MAX_IRQS]>,
}

impl Default for IrqTable {
    fn default() -> Self {
        Self::new()
    }
}

impl IrqTable {
    pub const fn new() -> Self {
        const NONE: Option<IrqHandler> = None;
        Self { handlers: Mutex::new([NONE; MAX_IRQS]) }
    }

    pub fn install(&self, irq: IrqId, handler: IrqHandler) -> Result<(), IrqError> {
        let mut handlers = self.handlers.lock();
        let slot = handlers.get_mut(irq.index()).ok_or(IrqError::OutOfRange(irq))?;
        if slot.is_some() {
            return Err(IrqError::AlreadyInstalled(irq));
        }
        *slot = Some(handler);
        Ok(())
    }

    pub fn remove(&self, irq: IrqId) -> Option<IrqHandler> {
        self.handlers.lock().get_mut(irq.index()).and_then(Option::take)
    }

    pub fn handler(&self, irq: IrqId) -> Option<IrqHandler> {
        self.handlers.lock().get(irq.index()).copied().flatten()
    }
}

/// Handles every pending source on `cpu`; returns how many were claimed.
///
/// Each claimed source gets exactly one EOI, handled or not.
pub fn drain(intc: &dyn InterruptController, table: &IrqTable, cpu: &CpuLocal<'_>) -> usize {
    let mut handled = 0;
    while let Some((source, irq)) = intc.ack() {
        cpu.irq_enter();
        match table.handler(irq) {
            Some(handler) => handler(irq, cpu.id),
            None => crate::log_warn!(target: "irq", "{}: spurious irq {}", cpu.id, irq.0),
        }
        intc.eoi(irq, source);
        cpu.irq_exit();
        handled += 1;
    }
    handled
}
