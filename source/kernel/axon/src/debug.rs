// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Debugger access to a task's user register state and hardware debug state
//! OWNERS: @kernel-team
//! PUBLIC API: read_regs, write_regs, export_regs, import_regs, set_single_step,
//!             set_watchpoint, clear_watchpoint, detach, DebugError
//! DEPENDS_ON: frame::DebugFrame, task::TaskTable, mm::check_kernel
//! INVARIANTS: A task that never trapped reports only its entry point; write-back refuses
//!             privileged modes; debugger buffers are validated against the kernel root
//! ADR: docs/adr/0001-trap-layer-boundaries.md

use core::fmt;

use crate::frame::debug::DF_WORDS;
use crate::frame::{DebugFrame, FrameError};
use crate::hal::{Port, Watchpoint, MAX_WATCHPOINTS};
use crate::mm::{check_kernel, Access, PageWalkConfig};
use crate::task::{TaskError, TaskTable};
use crate::types::TaskId;

/// Size of an exported register set.
pub const DEBUG_FRAME_BYTES: usize = DF_WORDS * 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DebugError {
    Task(TaskError),
    Frame(FrameError),
    /// Debugger buffer not mapped in the kernel half with the needed access.
    BadBuffer { addr: u64 },
    NoSuchSlot(usize),
}

impl From<TaskError> for DebugError {
    fn from(value: TaskError) -> Self {
        Self::Task(value)
    }
}

impl From<FrameError> for DebugError {
    fn from(value: FrameError) -> Self {
        Self::Frame(value)
    }
}

impl fmt::Display for DebugError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Watchpoint bank.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WatchKind {
    Inst,
    Data,
}

/// Register view of `id`.
pub fn read_regs(tasks: &TaskTable, id: TaskId) -> Result<DebugFrame, DebugError> {
    let task = tasks.task(id)?;
    if task.first_start {
        return Ok(DebugFrame::first_start(task.entry));
    }
    Ok(DebugFrame::from_frame(&task.shadow))
}

/// Installs `regs` as the state `id` resumes with.
///
/// Before the first run only the entry point is taken from `regs`.
pub fn write_regs(tasks: &mut TaskTable, id: TaskId, regs: &DebugFrame) -> Result<(), DebugError> {
    let task = tasks.task_mut(id)?;
    if task.first_start {
        task.entry = regs.era;
        task.switch.pc = regs.era;
        return Ok(());
    }
    regs.apply_to(&mut task.shadow)?;
    Ok(())
}

/// Copies the register view of `id` into the kernel buffer at `addr`.
pub fn export_regs<P: Port + ?Sized>(
    port: &P,
    cfg: &PageWalkConfig,
    tasks: &TaskTable,
    id: TaskId,
    addr: u64,
) -> Result<(), DebugError> {
    let regs = read_regs(tasks, id)?;
    if !check_kernel(port, cfg, addr, DEBUG_FRAME_BYTES, Access::Write) {
        return Err(DebugError::BadBuffer { addr });
    }
    let mut bytes = [0u8; DEBUG_FRAME_BYTES];
    for (chunk, word) in bytes.chunks_exact_mut(8).zip(regs.to_words()) {
        chunk.copy_from_slice(&word.to_le_bytes());
    }
    port.write_user(addr, &bytes);
    Ok(())
}

/// Reads a register set from the kernel buffer at `addr` and installs it.
pub fn import_regs<P: Port + ?Sized>(
    port: &P,
    cfg: &PageWalkConfig,
    tasks: &mut TaskTable,
    id: TaskId,
    addr: u64,
) -> Result<(), DebugError> {
    if !check_kernel(port, cfg, addr, DEBUG_FRAME_BYTES, Access::Read) {
        return Err(DebugError::BadBuffer { addr });
    }
    let mut bytes = [0u8; DEBUG_FRAME_BYTES];
    port.read_user(addr, &mut bytes);
    let mut words = [0u64; DF_WORDS];
    for (word, chunk) in words.iter_mut().zip(bytes.chunks_exact(8)) {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(chunk);
        *word = u64::from_le_bytes(raw);
    }
    write_regs(tasks, id, &DebugFrame::from_words(&words))
}

pub fn set_single_step(tasks: &mut TaskTable, id: TaskId, on: bool) -> Result<(), DebugError> {
    let task = tasks.task_mut(id)?;
    task.trace.traced = true;
    task.trace.hw.single_step = on;
    Ok(())
}

/// Programs watchpoint `slot`; takes effect on the task's next return to user mode.
pub fn set_watchpoint(
    tasks: &mut TaskTable,
    id: TaskId,
    kind: WatchKind,
    slot: usize,
    wp: Watchpoint,
) -> Result<(), DebugError> {
    if slot >= MAX_WATCHPOINTS {
        return Err(DebugError::NoSuchSlot(slot));
    }
    let task = tasks.task_mut(id)?;
    task.trace.traced = true;
    match kind {
        WatchKind::Inst => task.trace.hw.inst[slot] = wp,
        WatchKind::Data => task.trace.hw.data[slot] = wp,
    }
    Ok(())
}

pub fn clear_watchpoint(
    tasks: &mut TaskTable,
    id: TaskId,
    kind: WatchKind,
    slot: usize,
) -> Result<(), DebugError> {
    set_watchpoint(tasks, id, kind, slot, Watchpoint::default())
}

/// Drops all debugger state; the task is no longer traced.
pub fn detach(tasks: &mut TaskTable, id: TaskId) -> Result<(), DebugError> {
    tasks.task_mut(id)?.trace = Default::default();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{reg, ExceptionFrame, PLV_KERNEL, PLV_USER};
    use crate::hal::fake::FakePort;
    use crate::hal::Csr;
    use crate::mm::uaccess::kernel_start;
    use crate::mm::{PteFlags, ACTIVE_WALK};
    use crate::task::SpawnParams;

    fn table_with_task() -> (TaskTable, TaskId) {
        let mut tasks = TaskTable::new();
        let id = tasks
            .spawn(SpawnParams { entry: 0x12_0000, stack_top: 0x7000_0000, ..Default::default() })
            .unwrap();
        (tasks, id)
    }

    fn trapped(tasks: &mut TaskTable, id: TaskId) {
        let task = tasks.task_mut(id).unwrap();
        let mut frame = ExceptionFrame { era: 0x12_0040, prmd: PLV_USER, ..Default::default() };
        frame.regs[reg::A0] = 7;
        task.shadow = frame;
        task.first_start = false;
    }

    #[test]
    fn never_run_task_reports_entry_only() {
        let (tasks, id) = table_with_task();
        let regs = read_regs(&tasks, id).unwrap();
        assert_eq!(regs, DebugFrame::first_start(0x12_0000));
        assert_eq!(regs.regs, [0; 32]);
    }

    #[test]
    fn never_run_task_takes_new_entry() {
        let (mut tasks, id) = table_with_task();
        write_regs(&mut tasks, id, &DebugFrame::first_start(0x13_0000)).unwrap();
        let task = tasks.task(id).unwrap();
        assert_eq!(task.entry, 0x13_0000);
        assert_eq!(task.switch.pc, 0x13_0000);
    }

    #[test]
    fn write_back_rejects_privileged_mode() {
        let (mut tasks, id) = table_with_task();
        trapped(&mut tasks, id);
        let mut regs = read_regs(&tasks, id).unwrap();
        assert_eq!(regs.gpr(reg::A0), Ok(7));

        regs.prmd = PLV_KERNEL;
        assert_eq!(
            write_regs(&mut tasks, id, &regs),
            Err(DebugError::Frame(FrameError::PrivilegedMode(PLV_KERNEL)))
        );
        assert_eq!(tasks.task(id).unwrap().shadow.era, 0x12_0040);

        regs.prmd = PLV_USER;
        regs.era = 0x12_0100;
        regs.regs[0] = 0xdead;
        write_regs(&mut tasks, id, &regs).unwrap();
        let shadow = tasks.task(id).unwrap().shadow;
        assert_eq!(shadow.era, 0x12_0100);
        assert_eq!(shadow.regs[0], 0);
    }

    #[test]
    fn export_needs_mapped_kernel_buffer() {
        let port = FakePort::new();
        let (mut tasks, id) = table_with_task();
        trapped(&mut tasks, id);
        let kva = kernel_start(&ACTIVE_WALK) + 0x40_0000;

        assert_eq!(
            export_regs(&port, &ACTIVE_WALK, &tasks, id, kva),
            Err(DebugError::BadBuffer { addr: kva })
        );
        assert_eq!(
            export_regs(&port, &ACTIVE_WALK, &tasks, id, 0x4000_0000),
            Err(DebugError::BadBuffer { addr: 0x4000_0000 })
        );

        port.map(Csr::Pgdh, kva, PteFlags::PRESENT | PteFlags::VALID | PteFlags::WRITE);
        export_regs(&port, &ACTIVE_WALK, &tasks, id, kva).unwrap();
        assert_eq!(port.read_u64(kva + (reg::A0 * 8) as u64), 7);
        assert_eq!(port.read_u64(kva + 32 * 8), 0x12_0040);

        port.write_u64(kva + 32 * 8, 0x12_0200);
        import_regs(&port, &ACTIVE_WALK, &mut tasks, id, kva).unwrap();
        assert_eq!(tasks.task(id).unwrap().shadow.era, 0x12_0200);
    }

    #[test]
    fn hardware_state_marks_task_traced() {
        let (mut tasks, id) = table_with_task();
        let wp = Watchpoint { addr: 0x5000, mask: 0x7, ctrl: 1 };
        set_watchpoint(&mut tasks, id, WatchKind::Data, 2, wp).unwrap();
        set_single_step(&mut tasks, id, true).unwrap();
        assert_eq!(
            set_watchpoint(&mut tasks, id, WatchKind::Inst, MAX_WATCHPOINTS, wp),
            Err(DebugError::NoSuchSlot(MAX_WATCHPOINTS))
        );

        let trace = tasks.task(id).unwrap().trace;
        assert!(trace.traced);
        assert!(trace.hw.single_step);
        assert_eq!(trace.hw.data[2], wp);

        clear_watchpoint(&mut tasks, id, WatchKind::Data, 2).unwrap();
        assert_eq!(tasks.task(id).unwrap().trace.hw.data[2], Watchpoint::default());
        detach(&mut tasks, id).unwrap();
        assert!(!tasks.task(id).unwrap().trace.traced);
        assert_eq!(read_regs(&tasks, TaskId(99)), Err(DebugError::Task(TaskError::NoSuchTask(TaskId(99)))));
    }
}
