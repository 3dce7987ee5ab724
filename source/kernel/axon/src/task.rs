// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Task control blocks as seen by the trap layer
//! OWNERS: @kernel-team
//! PUBLIC API: Task, TaskState, TaskTable::{spawn, task, task_mut, remove}, TaskError
//! DEPENDS_ON: frame (switch context, shadow frame), signal::SignalState, hal::HwDebugState
//! INVARIANTS: Shadow frame updated on every user-mode entry; slot ids are never reused while live
//! ADR: docs/adr/0001-trap-layer-boundaries.md

use alloc::vec::Vec;
use core::fmt;

use crate::config::MAX_TASKS;
use crate::frame::{ExceptionFrame, TaskSwitchContext};
use crate::hal::HwDebugState;
use crate::signal::SignalState;
use crate::types::{Asid, TaskId};

/// Lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskState {
    Ready,
    Running,
    /// Stopped by a job-control signal.
    Stopped(u32),
    /// Terminated by a signal; the scheduler reaps it.
    Killed(u32),
}

/// Debugger attachment.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TraceState {
    pub traced: bool,
    pub hw: HwDebugState,
}

/// Task control block.
#[derive(Clone, Debug)]
pub struct Task {
    id: TaskId,
    pub state: TaskState,
    /// User entry point, reported to the debugger before the first run.
    pub entry: u64,
    /// True until the task has trapped into the kernel once.
    pub first_start: bool,
    pub switch: TaskSwitchContext,
    /// Copy of the most recent user-mode exception frame.
    pub shadow: ExceptionFrame,
    pub signals: SignalState,
    pub trace: TraceState,
}

impl Task {
    pub fn id(&self) -> TaskId {
        self.id
    }

    #[inline]
    pub fn is_alive(&self) -> bool {
        matches!(self.state, TaskState::Ready | TaskState::Running)
    }

    pub fn terminate(&mut self, sig: u32) {
        self.state = TaskState::Killed(sig);
    }

    pub fn stop(&mut self, sig: u32) {
        self.state = TaskState::Stopped(sig);
    }
}

/// Error returned by task table lookups.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskError {
    /// Every slot is taken.
    TableFull,
    NoSuchTask(TaskId),
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Parameters of a new user task.
#[derive(Clone, Copy, Debug, Default)]
pub struct SpawnParams {
    pub entry: u64,
    pub stack_top: u64,
    pub tls: u64,
    pub pgdl: u64,
    pub asid: Asid,
}

/// Slot table of task control blocks.
pub struct TaskTable {
    slots: Vec<Option<Task>>,
}

impl Default for TaskTable {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskTable {
    pub const fn new() -> Self {
        Self { slots: Vec::new() }
    }

    /// Creates a ready user task in the first free slot.
    pub fn spawn(&mut self, params: SpawnParams) -> Result<TaskId, TaskError> {
        let index = match self.slots.iter().position(Option::is_none) {
            Some(free) => free,
            None if self.slots.len() < MAX_TASKS => {
                self.slots.push(None);
                self.slots.len() - 1
            }
            None => return Err(TaskError::TableFull),
        };
        let id = TaskId(index as u32);
        self.slots[index] = Some(Task {
            id,
            state: TaskState::Ready,
            entry: params.entry,
            first_start: true,
            switch: TaskSwitchContext::thread_init(
                params.entry,
                params.stack_top,
                params.tls,
                params.pgdl,
                params.asid,
                true,
            ),
            shadow: ExceptionFrame::default(),
            signals: SignalState::default(),
            trace: TraceState::default(),
        });
        Ok(id)
    }

    pub fn task(&self, id: TaskId) -> Result<&Task, TaskError> {
        self.slots.get(id.index()).and_then(Option::as_ref).ok_or(TaskError::NoSuchTask(id))
    }

    pub fn task_mut(&mut self, id: TaskId) -> Result<&mut Task, TaskError> {
        self.slots.get_mut(id.index()).and_then(Option::as_mut).ok_or(TaskError::NoSuchTask(id))
    }

    /// Frees the slot of a reaped task.
    pub fn remove(&mut self, id: TaskId) -> Result<Task, TaskError> {
        self.slots.get_mut(id.index()).and_then(Option::take).ok_or(TaskError::NoSuchTask(id))
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
