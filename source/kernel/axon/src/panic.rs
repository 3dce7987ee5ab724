// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Panic handler emitting deterministic diagnostics over UART
//! OWNERS: @kernel-team
//! PUBLIC API: panic handler (no_std)
//! DEPENDS_ON: trap::last_trap(), trap::fatal::fmt_frame(), uart::raw_writer(), hal::la64::PORT
//! INVARIANTS: Lock-free UART writer; no allocations; the core halts afterwards
//! ADR: docs/adr/0001-trap-layer-boundaries.md

use core::{fmt::Write, panic::PanicInfo};

use crate::hal::la64::PORT;
use crate::hal::Port;
use crate::{trap, uart};

/// Prints the panic location and message, then the last trap frame if there was one.
#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    let mut w = uart::raw_writer();
    let _ = w.write_str("\nPANIC: ");
    if let Some(location) = info.location() {
        let _ = write!(w, "{}:{}: ", location.file(), location.line());
    }
    match info.message().as_str() {
        Some(msg) => {
            let _ = w.write_str(msg);
        }
        None => {
            let _ = write!(w, "{}", info.message());
        }
    }
    let _ = w.write_str("\n");

    if let Some(frame) = trap::last_trap() {
        let _ = w.write_str("PANIC: last trap:\n");
        let _ = trap::fatal::fmt_frame(&frame, &mut w);
    }

    PORT.halt()
}
