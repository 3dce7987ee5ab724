// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Trap dispatcher: syscalls, interrupts, TLB misses and fatal faults
//! OWNERS: @kernel-team
//! PUBLIC API: Dispatcher::{dispatch, handle_syscall, handle_irq, handle_tlb, handle_fault},
//!             Scheduler, InterruptController, TrapOutcome, classify()
//! DEPENDS_ON: frame, mm::tlb (miss path), signal (return-to-user pass), task::TaskTable
//! INVARIANTS: Shadow frame captured before any handler runs; a0 written only by a
//!             registered syscall handler; every acked interrupt gets one EOI; only the
//!             outermost trap from user mode runs the return-to-user pass
//! ADR: docs/adr/0001-trap-layer-boundaries.md

pub mod cause;
pub mod fatal;
pub mod irq;
pub mod percpu;
pub mod syscall;
pub mod vector;

#[cfg(test)]
pub(crate) mod fake;

pub use cause::{classify, Disposition, FaultClass};
pub use fatal::{last_trap, record, FatalReport};
pub use irq::{InterruptController, IrqError, IrqHandler, IrqTable};
pub use percpu::{CpuLocal, CpuRegistry, DispatchState, CPUS};
pub use syscall::{Args, Route, SyscallTable, SyscallTables};

use spin::Mutex;

use crate::frame::{reg, Crmd, ExceptionFrame, FrameType};
use crate::hal::{CpuFeatures, Csr, Port};
use crate::mm::tlb::{Configurator, MissKind};
use crate::signal::{self, SignalEnv, WorkOutcome};
use crate::task::{TaskState, TaskTable};
use crate::types::TaskId;

/// Width of the `syscall` instruction.
const SYSCALL_INSN_SIZE: u64 = 4;

/// Scheduler collaborator.
pub trait Scheduler {
    /// Task whose user context is live on this core, if any.
    fn current_task(&self) -> Option<TaskId>;
    /// Requests a switch at the next opportunity.
    fn mark_reschedule_needed(&self);
    /// Accounting hook after a user-mode entry was captured.
    fn enter_kernel_hook(&self, task: TaskId);
    /// Accounting hook right before `task` resumes in user mode.
    fn enter_user_hook(&self, task: TaskId);
    /// `task` was terminated on this core; it must not be resumed.
    fn task_exited(&self, task: TaskId);
}

/// What the assembly stub does once the dispatcher returns.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrapOutcome {
    /// Restore the (possibly modified) frame.
    Resume,
    /// Log already emitted; stop the core.
    Halt(FatalReport),
}

/// Borrowed collaborators of the trap path.
pub struct Dispatcher<'k, P: Port + ?Sized> {
    pub port: &'k P,
    pub walker: &'k Configurator,
    pub syscalls: &'k SyscallTables,
    pub irqs: &'k IrqTable,
    pub intc: &'k dyn InterruptController,
    pub sched: &'k dyn Scheduler,
    pub tasks: &'k Mutex<TaskTable>,
    pub features: CpuFeatures,
}

impl<'k, P: Port + ?Sized> Dispatcher<'k, P> {
    /// Routes a trap by its cause.
    pub fn dispatch(&self, cpu: &CpuLocal<'_>, frame: &mut ExceptionFrame) -> TrapOutcome {
        record(frame);
        match classify(frame.estat, frame.from_user()) {
            Disposition::Syscall => self.handle_syscall(cpu, frame),
            Disposition::Interrupt => self.handle_irq(cpu, frame),
            Disposition::TlbMiss(kind) => self.handle_tlb(cpu, frame, kind),
            Disposition::Fatal(class) => self.handle_fault(cpu, frame, class),
        }
    }

    /// Syscall entry: runs the handler and writes its result to `a0`.
    pub fn handle_syscall(&self, cpu: &CpuLocal<'_>, frame: &mut ExceptionFrame) -> TrapOutcome {
        cpu.enter();
        frame.orig_a0 = frame.regs[reg::A0];
        frame.era = frame.era.wrapping_add(SYSCALL_INSN_SIZE);
        frame.set_kind(FrameType::Syscall);
        self.capture_user_entry(frame);

        let nr = frame.syscall_nr();
        match syscall::route(nr) {
            syscall::Route::SigReturn => self.sys_rt_sigreturn(frame),
            syscall::Route::Standard(slot) => {
                let args = Args::from_frame(frame);
                let ret = self.with_irqs_enabled(|| self.syscalls.standard.dispatch(slot, &args));
                Self::complete_syscall(cpu, frame, nr, ret);
            }
            syscall::Route::Extended(slot) => {
                let addr = &*frame as *const ExceptionFrame as u64;
                let args = Args::extended(frame, slot, addr);
                let ret = self.with_irqs_enabled(|| self.syscalls.extended.dispatch(slot, &args));
                Self::complete_syscall(cpu, frame, nr, ret);
            }
            syscall::Route::Invalid(_) => {
                Self::complete_syscall(cpu, frame, nr, Err(syscall::Error::InvalidSyscall(nr)));
            }
        }

        self.return_to_user(cpu, frame);
        cpu.leave();
        TrapOutcome::Resume
    }

    /// Interrupt entry: drains the controller.
    pub fn handle_irq(&self, cpu: &CpuLocal<'_>, frame: &mut ExceptionFrame) -> TrapOutcome {
        cpu.enter();
        frame.set_kind(FrameType::Irq);
        self.capture_user_entry(frame);

        irq::drain(self.intc, self.irqs, cpu);
        cpu.set_need_resched();
        self.sched.mark_reschedule_needed();

        self.return_to_user(cpu, frame);
        cpu.leave();
        TrapOutcome::Resume
    }

    /// Page-invalid entry: refills from the live table or stops the system.
    pub fn handle_tlb(
        &self,
        cpu: &CpuLocal<'_>,
        frame: &mut ExceptionFrame,
        kind: MissKind,
    ) -> TrapOutcome {
        cpu.enter();
        frame.set_kind(FrameType::TlbRefill);
        let outcome = match self.walker.resolve_miss(self.port, frame.badv, frame.from_user(), kind) {
            Ok(_) => TrapOutcome::Resume,
            Err(err) => {
                crate::log_error!(
                    target: "tlb",
                    "{}: unresolved {:?} miss at 0x{:x}: {:?}",
                    cpu.id,
                    kind,
                    frame.badv,
                    err
                );
                self.halt_report(cpu, frame, FaultClass::UnresolvedMiss)
            }
        };
        cpu.leave();
        outcome
    }

    /// Any other exception: logged and fatal.
    pub fn handle_fault(
        &self,
        cpu: &CpuLocal<'_>,
        frame: &mut ExceptionFrame,
        class: FaultClass,
    ) -> TrapOutcome {
        cpu.enter();
        frame.set_kind(FrameType::Exception);
        let outcome = self.halt_report(cpu, frame, class);
        cpu.leave();
        outcome
    }

    fn halt_report(&self, cpu: &CpuLocal<'_>, frame: &ExceptionFrame, class: FaultClass) -> TrapOutcome {
        let report = FatalReport::new(cpu.id, class, frame);
        report.log();
        TrapOutcome::Halt(report)
    }

    /// Stores the handler result in `a0`; unknown numbers leave `a0` as the caller set it.
    fn complete_syscall(
        cpu: &CpuLocal<'_>,
        frame: &mut ExceptionFrame,
        nr: u64,
        ret: syscall::SysResult<i64>,
    ) {
        match ret {
            Ok(value) => frame.regs[reg::A0] = value as u64,
            Err(_) => crate::log_warn!(target: "syscall", "{}: unknown syscall {}", cpu.id, nr),
        }
    }

    /// Runs `f` with `CRMD.IE` set, restoring the previous state afterwards.
    fn with_irqs_enabled<R>(&self, f: impl FnOnce() -> R) -> R {
        let crmd = self.port.read_csr(Csr::Crmd);
        self.port.write_csr(Csr::Crmd, crmd | Crmd::IE.bits());
        let out = f();
        self.port.write_csr(Csr::Crmd, crmd);
        out
    }

    fn env(&self) -> SignalEnv<'_, P> {
        SignalEnv { port: self.port, walk: self.walker.geometry(), features: self.features }
    }

    /// Copies a user-mode frame into the current task's shadow slot.
    fn capture_user_entry(&self, frame: &ExceptionFrame) {
        if !frame.from_user() {
            return;
        }
        let Some(id) = self.sched.current_task() else {
            return;
        };
        if let Ok(task) = self.tasks.lock().task_mut(id) {
            task.shadow = *frame;
            task.first_start = false;
        }
        self.sched.enter_kernel_hook(id);
    }

    fn sys_rt_sigreturn(&self, frame: &mut ExceptionFrame) {
        let Some(id) = self.sched.current_task() else {
            return;
        };
        let mut tasks = self.tasks.lock();
        let Ok(task) = tasks.task_mut(id) else {
            return;
        };
        if let Err(err) = signal::sigreturn(&self.env(), task, frame) {
            crate::log_error!(target: "signal", "{}: bad signal frame at 0x{:x}: {}", id, frame.sp(), err);
            signal::force_sigsegv(self.sched, task);
        }
    }

    /// Signal delivery, syscall restart and debug-state reinstatement before user resume.
    fn return_to_user(&self, cpu: &CpuLocal<'_>, frame: &mut ExceptionFrame) {
        if !frame.from_user() || cpu.depth() != 1 {
            return;
        }
        cpu.begin_return();
        let Some(id) = self.sched.current_task() else {
            return;
        };
        let mut tasks = self.tasks.lock();
        let Ok(task) = tasks.task_mut(id) else {
            return;
        };
        let outcome = match task.state {
            TaskState::Killed(sig) => WorkOutcome::Killed(sig),
            TaskState::Stopped(sig) => WorkOutcome::Stopped(sig),
            TaskState::Ready | TaskState::Running => {
                signal::do_work_pending(&self.env(), self.sched, id, task, frame)
            }
        };
        match outcome {
            WorkOutcome::Killed(sig) => {
                crate::log_info!(target: "signal", "{} terminated by signal {}", id, sig);
                self.sched.task_exited(id);
            }
            WorkOutcome::Stopped(_) => {}
            WorkOutcome::Resume | WorkOutcome::Delivered(_) => {
                if task.trace.traced {
                    self.port.write_debug_regs(&task.trace.hw);
                }
                self.sched.enter_user_hook(id);
            }
        }
    }
}
