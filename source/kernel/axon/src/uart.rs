// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Minimal NS16550 UART support for trap diagnostics.

use core::fmt::{self, Write};
use spin::Mutex;

/// Loongson 7A bridge UART0, reached through the uncached direct-map window.
const UART0_BASE: usize = 0x8000_0000_1fe0_01e0;
const UART_TX: usize = 0x0;
const UART_LSR: usize = 0x5;
const LSR_TX_IDLE: u8 = 1 << 5;

static UART0: Mutex<KernelUart> = Mutex::new(KernelUart::new(UART0_BASE));

/// UART implementation capable of formatted writes.
#[derive(Clone, Copy)]
pub struct KernelUart {
    base: usize,
}

impl KernelUart {
    /// Creates a UART abstraction rooted at `base`.
    pub const fn new(base: usize) -> Self {
        Self { base }
    }

    /// Returns a guard for the boot UART singleton.
    pub fn lock() -> spin::MutexGuard<'static, KernelUart> {
        UART0.lock()
    }

    fn write_raw(&self, offset: usize, value: u8) {
        write_mmio(self.base, offset, value);
    }
}

fn write_mmio(base: usize, offset: usize, value: u8) {
    // SAFETY: the UART window is a fixed device mapping in the uncached DMW.
    unsafe {
        while core::ptr::read_volatile((base + UART_LSR) as *const u8) & LSR_TX_IDLE == 0 {}
        core::ptr::write_volatile((base + offset) as *mut u8, value);
    }
}

impl Write for KernelUart {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for &byte in s.as_bytes() {
            if byte == b'\n' {
                self.write_raw(UART_TX, b'\r');
            }
            self.write_raw(UART_TX, byte);
        }
        Ok(())
    }
}

/// Lock-free writer for fatal paths where the mutex may already be held.
pub struct RawUart;

impl Write for RawUart {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for &byte in s.as_bytes() {
            if byte == b'\n' {
                write_mmio(UART0_BASE, UART_TX, b'\r');
            }
            write_mmio(UART0_BASE, UART_TX, byte);
        }
        Ok(())
    }
}

pub fn raw_writer() -> RawUart {
    RawUart
}
