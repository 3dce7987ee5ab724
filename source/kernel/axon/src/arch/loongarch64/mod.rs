// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: LoongArch64 trap entry glue: vector table, Rust entry point, per-core bring-up
//! OWNERS: @kernel-arch-team
//! PUBLIC API: register_kernel(), init_core(), KernelRefs, BootError,
//!             axon_do_{syscall,irq,tlb,fault}
//! DEPENDS_ON: trap::Dispatcher, mm::tlb::Configurator, hal::la64::PORT, heap, trap.S
//! INVARIANTS: register_kernel() runs before the first init_core(); the vector table and the
//!             refill block come from trap.S; a Halt outcome never returns to the stub
//! ADR: docs/adr/0001-trap-layer-boundaries.md

use core::fmt;

use spin::{Mutex, Once};
use static_assertions::const_assert_eq;

use crate::config::{MAX_CPUS, PGTABLE_LEVELS, VECSIZE};
use crate::frame::{
    ExceptionFrame, EF_OFF_BADV, EF_OFF_CRMD, EF_OFF_ECFG, EF_OFF_ERA, EF_OFF_ESTAT, EF_OFF_EUEN,
    EF_OFF_ORIG_A0, EF_OFF_PRMD, EF_OFF_TYPE, EF_STACK_SIZE,
};
use crate::hal::la64::PORT;
use crate::hal::{CpuFeatures, Csr, Port};
use crate::mm::tlb::{Configurator, REFILL_VECTOR};
use crate::mm::{ConfigError, Roots};
use crate::task::TaskTable;
use crate::trap::vector::{install_vectors, VectorError};
use crate::trap::{Dispatcher, InterruptController, IrqTable, Scheduler, SyscallTables, TrapOutcome, CPUS};
use crate::types::CpuId;

core::arch::global_asm!(
    include_str!("trap.S"),
    VECSIZE = const VECSIZE,
    EF_SIZE = const EF_STACK_SIZE,
    OFF_ORIG_A0 = const EF_OFF_ORIG_A0,
    OFF_TYPE = const EF_OFF_TYPE,
    OFF_ERA = const EF_OFF_ERA,
    OFF_BADV = const EF_OFF_BADV,
    OFF_CRMD = const EF_OFF_CRMD,
    OFF_PRMD = const EF_OFF_PRMD,
    OFF_EUEN = const EF_OFF_EUEN,
    OFF_ECFG = const EF_OFF_ECFG,
    OFF_ESTAT = const EF_OFF_ESTAT,
    CSR_CRMD = const 0x0,
    CSR_PRMD = const 0x1,
    CSR_EUEN = const 0x2,
    CSR_ECFG = const 0x4,
    CSR_ESTAT = const 0x5,
    CSR_ERA = const 0x6,
    CSR_BADV = const 0x7,
    CSR_PGD = const 0x1b,
    CSR_KS0 = const 0x30,
    CSR_KS1 = const 0x31,
    CSR_KS2 = const 0x32,
    CSR_TLBRSAVE = const 0x8b,
    PT_LEVELS = const PGTABLE_LEVELS,
);

// trap.S lays out one slot per cause code up to the refill slot.
const_assert_eq!(REFILL_VECTOR, 0x50);

extern "C" {
    static axon_vector_base: u8;
    static axon_refill_start: u8;
    static axon_refill_end: u8;
}

/// Kernel-wide collaborators the entry point hands to the dispatcher.
pub struct KernelRefs {
    pub walker: &'static Configurator,
    pub syscalls: &'static SyscallTables,
    pub irqs: &'static IrqTable,
    pub intc: &'static (dyn InterruptController + Sync),
    pub sched: &'static (dyn Scheduler + Sync),
    pub tasks: &'static Mutex<TaskTable>,
    pub features: CpuFeatures,
}

static KERNEL: Once<KernelRefs> = Once::new();

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BootError {
    /// init_core() ran before register_kernel().
    NotRegistered,
    Vector(VectorError),
    Walker(ConfigError),
}

impl From<VectorError> for BootError {
    fn from(value: VectorError) -> Self {
        Self::Vector(value)
    }
}

impl From<ConfigError> for BootError {
    fn from(value: ConfigError) -> Self {
        Self::Walker(value)
    }
}

impl fmt::Display for BootError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Publishes the collaborators; later calls are ignored.
pub fn register_kernel(refs: KernelRefs) {
    KERNEL.call_once(|| refs);
}

fn vector_base() -> u64 {
    // SAFETY: linker-provided symbol; only its address is taken.
    unsafe { core::ptr::addr_of!(axon_vector_base) as u64 }
}

fn refill_code() -> &'static [u8] {
    // SAFETY: both symbols delimit the refill block in .text.trap.
    unsafe {
        let start = core::ptr::addr_of!(axon_refill_start);
        let end = core::ptr::addr_of!(axon_refill_end);
        core::slice::from_raw_parts(start, end as usize - start as usize)
    }
}

/// Stops a core whose `CoreID` has no per-core slot instead of sharing another's.
fn current_cpu() -> CpuId {
    let raw = PORT.read_csr(Csr::CpuId);
    match CpuId::from_csr(raw) {
        Some(cpu) => cpu,
        None => {
            crate::log_error!(target: "boot", "core id {} out of range (max {})", raw & 0x1ff, MAX_CPUS);
            PORT.halt()
        }
    }
}

/// Brings up trap handling on the calling core.
///
/// `kernel_stack_top` is where user-mode traps start their frame; `lie` selects the
/// local interrupt lines left enabled in `ECFG`.
pub fn init_core(roots: Roots, kernel_stack_top: u64, lie: u64) -> Result<CpuId, BootError> {
    let kernel = KERNEL.get().ok_or(BootError::NotRegistered)?;
    crate::heap::init_heap();
    let cpu = current_cpu();
    let local = CPUS.local(cpu);

    PORT.write_csr(Csr::Ks0, kernel_stack_top);
    let eentry = vector_base();
    install_vectors(&PORT, eentry, lie)?;

    let mut state = local.walker_state();
    kernel.walker.configure_core(&PORT, cpu, &mut state, roots, eentry, refill_code())?;
    local.set_walker_state(state);
    crate::log_debug!(
        target: "boot",
        "{}: walker {} levels, page shift {}",
        cpu,
        kernel.walker.geometry().levels(),
        kernel.walker.geometry().page_shift()
    );
    crate::log_info!(target: "boot", "{}: traps ready, vectors at 0x{:x}", cpu, eentry);
    Ok(cpu)
}

fn enter(frame: usize) {
    // SAFETY: trap.S passes the address of the frame it just pushed on this core's stack.
    let frame = unsafe { &mut *(frame as *mut ExceptionFrame) };
    let Some(kernel) = KERNEL.get() else {
        crate::log_error!(target: "trap", "trap before kernel registration, era=0x{:x}", frame.era);
        PORT.halt();
    };
    let cpu = CPUS.local(current_cpu());
    let dispatcher = Dispatcher {
        port: &PORT,
        walker: kernel.walker,
        syscalls: kernel.syscalls,
        irqs: kernel.irqs,
        intc: kernel.intc,
        sched: kernel.sched,
        tasks: kernel.tasks,
        features: kernel.features,
    };
    if let TrapOutcome::Halt(_) = dispatcher.dispatch(&cpu, frame) {
        PORT.halt();
    }
}

// Per-cause targets of the vector slots. ESTAT stays authoritative: each one goes
// through Dispatcher::dispatch so a mismatched slot still gets classified.

#[no_mangle]
extern "C" fn axon_do_syscall(frame: usize) {
    enter(frame);
}

#[no_mangle]
extern "C" fn axon_do_irq(frame: usize) {
    enter(frame);
}

#[no_mangle]
extern "C" fn axon_do_tlb(frame: usize) {
    enter(frame);
}

#[no_mangle]
extern "C" fn axon_do_fault(frame: usize) {
    enter(frame);
}
