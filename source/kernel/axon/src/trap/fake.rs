// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Host-side scheduler and interrupt-controller fakes.

use alloc::{collections::VecDeque, vec::Vec};
use core::sync::atomic::{AtomicUsize, Ordering};

use spin::Mutex;

use super::{InterruptController, Scheduler};
use crate::types::{CpuId, IrqId, TaskId};

#[derive(Default)]
pub struct FakeScheduler {
    current: Mutex<Option<TaskId>>,
    resched: AtomicUsize,
    kernel_hooks: Mutex<Vec<TaskId>>,
    user_hooks: Mutex<Vec<TaskId>>,
    exited: Mutex<Vec<TaskId>>,
}

impl FakeScheduler {
    pub fn running(id: TaskId) -> Self {
        let sched = Self::default();
        *sched.current.lock() = Some(id);
        sched
    }

    pub fn resched_requests(&self) -> usize {
        self.resched.load(Ordering::Relaxed)
    }

    pub fn kernel_hooks(&self) -> Vec<TaskId> {
        self.kernel_hooks.lock().clone()
    }

    pub fn user_hooks(&self) -> Vec<TaskId> {
        self.user_hooks.lock().clone()
    }

    pub fn exited(&self) -> Vec<TaskId> {
        self.exited.lock().clone()
    }
}

impl Scheduler for FakeScheduler {
    fn current_task(&self) -> Option<TaskId> {
        *self.current.lock()
    }

    fn mark_reschedule_needed(&self) {
        self.resched.fetch_add(1, Ordering::Relaxed);
    }

    fn enter_kernel_hook(&self, task: TaskId) {
        self.kernel_hooks.lock().push(task);
    }

    fn enter_user_hook(&self, task: TaskId) {
        self.user_hooks.lock().push(task);
    }

    fn task_exited(&self, task: TaskId) {
        self.exited.lock().push(task);
    }
}

#[derive(Default)]
pub struct FakeIntc {
    pending: Mutex<VecDeque<(CpuId, IrqId)>>,
    eois: Mutex<Vec<(IrqId, CpuId)>>,
}

impl FakeIntc {
    pub fn raise(&self, source: CpuId, irq: IrqId) {
        self.pending.lock().push_back((source, irq));
    }

    pub fn eois(&self) -> Vec<(IrqId, CpuId)> {
        self.eois.lock().clone()
    }
}

impl InterruptController for FakeIntc {
    fn ack(&self) -> Option<(CpuId, IrqId)> {
        self.pending.lock().pop_front()
    }

    fn eoi(&self, irq: IrqId, source: CpuId) {
        self.eois.lock().push((irq, source));
    }
}
