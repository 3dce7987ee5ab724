// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Kernel heap backing the task table and other boot-time allocations
//! OWNERS: @kernel-mm-team
//! PUBLIC API: init_heap(), free_bytes(), HEAP_SIZE
//! DEPENDS_ON: linked_list_allocator::LockedHeap
//! INVARIANTS: Arena initialised exactly once; registered as the global allocator on target only
//! ADR: docs/adr/0001-trap-layer-boundaries.md

use linked_list_allocator::LockedHeap;
use spin::Once;

/// Size of the static heap arena.
pub const HEAP_SIZE: usize = 512 * 1024;

#[repr(C, align(4096))]
struct Arena([u8; HEAP_SIZE]);

static mut ARENA: Arena = Arena([0; HEAP_SIZE]);
static INIT: Once<()> = Once::new();

#[cfg_attr(all(target_arch = "loongarch64", target_os = "none"), global_allocator)]
static ALLOCATOR: LockedHeap = LockedHeap::empty();

/// Hands the static arena to the allocator; later calls are no-ops.
pub fn init_heap() {
    INIT.call_once(|| {
        // SAFETY: the arena is only ever referenced here, once, and lives for 'static.
        unsafe {
            let base = core::ptr::addr_of_mut!(ARENA) as *mut u8;
            ALLOCATOR.lock().init(base, HEAP_SIZE);
        }
    });
}

/// Bytes currently available in the arena.
pub fn free_bytes() -> usize {
    ALLOCATOR.lock().free()
}
