// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Architecture specific support code
//! OWNERS: @kernel-arch-team
//! PUBLIC API: arch backends under `arch::<isa>`
//! DEPENDS_ON: per-ISA modules (loongarch64)
//! INVARIANTS: Keep per-arch code isolated behind module boundaries; host builds compile none of it
//! ADR: docs/adr/0001-trap-layer-boundaries.md

#[cfg(all(target_arch = "loongarch64", target_os = "none"))]
pub mod loongarch64;
