// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Host-side fake port: CSR file, page tables in fake physical memory,
//! sparse user memory and a live FP register file.

use alloc::{collections::BTreeMap, vec, vec::Vec};

use spin::Mutex;

use super::{Csr, FpBank, HwDebugState, Port};
use crate::frame::FpuState;
use crate::mm::{PageWalkConfig, PteFlags, ACTIVE_WALK};

/// Base of fake physical memory handed out for table pages and frames.
const PHYS_BASE: u64 = 0x10_0000;

#[derive(Default)]
struct State {
    csrs: BTreeMap<Csr, u64>,
    csr_writes: Vec<(Csr, u64)>,
    tlb_flushes: usize,
    tlb_fills: Vec<(u64, u64, u64, u32)>,
    code: Vec<(u64, usize)>,
    icache: Vec<(u64, usize)>,
    tables: BTreeMap<u64, Vec<u64>>,
    table_reads: Vec<(usize, u64)>,
    next_phys: u64,
    user: BTreeMap<u64, Vec<u8>>,
    user_writes: usize,
    user_reads: Vec<(u64, usize)>,
    live_fp: FpuState,
    fp_saves: Vec<FpBank>,
    fp_restores: Vec<FpBank>,
    debug_writes: Vec<HwDebugState>,
}

pub struct FakePort {
    cfg: PageWalkConfig,
    state: Mutex<State>,
}

impl FakePort {
    /// Empty machine with fresh kernel and user roots installed in PGDH/PGDL.
    pub fn new() -> Self {
        Self::with_geometry(ACTIVE_WALK)
    }

    pub fn with_geometry(cfg: PageWalkConfig) -> Self {
        let port = Self { cfg, state: Mutex::new(State { next_phys: PHYS_BASE, ..State::default() }) };
        let user_root = port.alloc_table();
        let kernel_root = port.alloc_table();
        {
            let mut st = port.state.lock();
            st.csrs.insert(Csr::Pgdl, user_root);
            st.csrs.insert(Csr::Pgdh, kernel_root);
        }
        port
    }

    fn alloc_table(&self) -> u64 {
        let mut st = self.state.lock();
        let pa = st.next_phys;
        st.next_phys += self.cfg.page_size();
        st.tables.insert(pa, vec![0; self.cfg.entries()]);
        pa
    }

    fn alloc_frame(&self, size: u64) -> u64 {
        let mut st = self.state.lock();
        let pa = (st.next_phys + size - 1) & !(size - 1);
        st.next_phys = pa + size;
        pa
    }

    /// Maps one base page at `va` in the tree under `root_csr`.
    pub fn map(&self, root_csr: Csr, va: u64, flags: PteFlags) -> u64 {
        self.map_at_level(root_csr, va, self.cfg.levels() - 1, flags)
    }

    /// Maps a user page readable and writable.
    pub fn map_user_rw(&self, va: u64) {
        let flags = PteFlags::PRESENT | PteFlags::VALID | PteFlags::USER | PteFlags::WRITE;
        self.map(Csr::Pgdl, va, flags | PteFlags::DIRTY);
    }

    /// Maps `count` consecutive user pages readable and writable.
    pub fn map_user_range(&self, va: u64, count: usize) {
        for i in 0..count as u64 {
            self.map_user_rw(va + i * self.cfg.page_size());
        }
    }

    /// Installs a leaf at `level`; levels above the last get the HUGE bit.
    pub fn map_at_level(&self, root_csr: Csr, va: u64, level: usize, flags: PteFlags) -> u64 {
        let last = self.cfg.levels() - 1;
        let mut table = self.read_csr(root_csr);
        for l in 0..level {
            let idx = self.cfg.index(l, va);
            let existing = self.state.lock().tables[&table][idx];
            table = if existing == 0 {
                let next = self.alloc_table();
                if let Some(t) = self.state.lock().tables.get_mut(&table) {
                    t[idx] = next;
                }
                next
            } else {
                existing & crate::mm::PFN_MASK
            };
        }
        let span = 1u64 << self.cfg.level_shift(level);
        let frame = self.alloc_frame(span);
        let mut bits = frame | flags.bits();
        if level < last {
            bits |= PteFlags::HUGE.bits();
        }
        let idx = self.cfg.index(level, va);
        if let Some(t) = self.state.lock().tables.get_mut(&table) {
            t[idx] = bits;
        }
        bits
    }

    /// Clears the leaf translating `va` (walks existing tables only).
    pub fn unmap(&self, root_csr: Csr, va: u64) {
        let mut table = self.read_csr(root_csr);
        let last = self.cfg.levels() - 1;
        let mut st = self.state.lock();
        for l in 0..=last {
            let idx = self.cfg.index(l, va);
            let Some(t) = st.tables.get_mut(&table) else { return };
            let entry = t[idx];
            if l == last || entry & PteFlags::HUGE.bits() != 0 {
                t[idx] = 0;
                return;
            }
            if entry == 0 {
                return;
            }
            table = entry & crate::mm::PFN_MASK;
        }
    }

    pub fn set_csr(&self, csr: Csr, value: u64) {
        self.state.lock().csrs.insert(csr, value);
    }

    pub fn csr_writes(&self) -> Vec<(Csr, u64)> {
        self.state.lock().csr_writes.clone()
    }

    pub fn tlb_flushes(&self) -> usize {
        self.state.lock().tlb_flushes
    }

    pub fn tlb_fills(&self) -> Vec<(u64, u64, u64, u32)> {
        self.state.lock().tlb_fills.clone()
    }

    pub fn code_writes(&self) -> Vec<(u64, usize)> {
        self.state.lock().code.clone()
    }

    pub fn icache_flushes(&self) -> Vec<(u64, usize)> {
        self.state.lock().icache.clone()
    }

    pub fn table_reads(&self) -> usize {
        self.state.lock().table_reads.len()
    }

    pub fn user_writes(&self) -> usize {
        self.state.lock().user_writes
    }

    /// Highest user address read so far (exclusive).
    pub fn user_read_end(&self) -> u64 {
        self.state.lock().user_reads.iter().map(|(a, l)| a + *l as u64).max().unwrap_or(0)
    }

    pub fn clear_user_reads(&self) {
        self.state.lock().user_reads.clear();
    }

    pub fn live_fp(&self) -> FpuState {
        self.state.lock().live_fp
    }

    pub fn set_live_fp(&self, st: FpuState) {
        self.state.lock().live_fp = st;
    }

    pub fn fp_saves(&self) -> Vec<FpBank> {
        self.state.lock().fp_saves.clone()
    }

    pub fn fp_restores(&self) -> Vec<FpBank> {
        self.state.lock().fp_restores.clone()
    }

    pub fn debug_writes(&self) -> usize {
        self.state.lock().debug_writes.len()
    }

    pub fn read_u64(&self, addr: u64) -> u64 {
        let mut b = [0u8; 8];
        self.read_user(addr, &mut b);
        u64::from_le_bytes(b)
    }

    pub fn write_u64(&self, addr: u64, value: u64) {
        self.write_user(addr, &value.to_le_bytes());
    }

    pub fn read_u32(&self, addr: u64) -> u32 {
        let mut b = [0u8; 4];
        self.read_user(addr, &mut b);
        u32::from_le_bytes(b)
    }

    pub fn write_u32(&self, addr: u64, value: u32) {
        self.write_user(addr, &value.to_le_bytes());
    }

    fn page_of(&self, addr: u64) -> (u64, usize) {
        let size = self.cfg.page_size();
        (addr & !(size - 1), (addr & (size - 1)) as usize)
    }
}

impl Port for FakePort {
    fn read_csr(&self, csr: Csr) -> u64 {
        self.state.lock().csrs.get(&csr).copied().unwrap_or(0)
    }

    fn write_csr(&self, csr: Csr, value: u64) {
        let mut st = self.state.lock();
        st.csrs.insert(csr, value);
        st.csr_writes.push((csr, value));
    }

    fn invalidate_tlb_all(&self) {
        self.state.lock().tlb_flushes += 1;
    }

    fn tlb_fill(&self, va: u64, lo0: u64, lo1: u64, page_shift: u32) {
        self.state.lock().tlb_fills.push((va, lo0, lo1, page_shift));
    }

    fn write_code(&self, addr: u64, code: &[u8]) {
        self.state.lock().code.push((addr, code.len()));
    }

    fn flush_icache(&self, addr: u64, len: usize) {
        self.state.lock().icache.push((addr, len));
    }

    fn read_table_entry(&self, level: usize, table: u64, index: usize) -> u64 {
        let mut st = self.state.lock();
        st.table_reads.push((level, table));
        st.tables.get(&table).and_then(|t| t.get(index)).copied().unwrap_or(0)
    }

    fn write_user(&self, addr: u64, bytes: &[u8]) {
        let size = self.cfg.page_size() as usize;
        let mut st = self.state.lock();
        st.user_writes += 1;
        for (i, b) in bytes.iter().enumerate() {
            let (page, off) = self.page_of(addr + i as u64);
            st.user.entry(page).or_insert_with(|| vec![0; size])[off] = *b;
        }
    }

    fn read_user(&self, addr: u64, out: &mut [u8]) {
        let mut st = self.state.lock();
        st.user_reads.push((addr, out.len()));
        for (i, b) in out.iter_mut().enumerate() {
            let (page, off) = self.page_of(addr + i as u64);
            *b = st.user.get(&page).map(|p| p[off]).unwrap_or(0);
        }
    }

    fn save_fp(&self, bank: FpBank, state: &mut FpuState) {
        let mut st = self.state.lock();
        st.fp_saves.push(bank);
        let live = st.live_fp;
        let lanes = lanes(bank);
        for (dst, src) in state.fpr.iter_mut().zip(live.fpr.iter()) {
            dst[..lanes].copy_from_slice(&src[..lanes]);
        }
        state.fcc = live.fcc;
        state.fcsr = live.fcsr;
    }

    fn restore_fp(&self, bank: FpBank, state: &FpuState) {
        let mut st = self.state.lock();
        st.fp_restores.push(bank);
        let lanes = lanes(bank);
        for (dst, src) in st.live_fp.fpr.iter_mut().zip(state.fpr.iter()) {
            dst[..lanes].copy_from_slice(&src[..lanes]);
        }
        st.live_fp.fcc = state.fcc;
        st.live_fp.fcsr = state.fcsr;
    }

    fn save_lbt(&self, state: &mut FpuState) {
        let live = self.state.lock().live_fp;
        state.scr = live.scr;
        state.eflags = live.eflags;
        state.ftop = live.ftop;
    }

    fn restore_lbt(&self, state: &FpuState) {
        let mut st = self.state.lock();
        st.live_fp.scr = state.scr;
        st.live_fp.eflags = state.eflags;
        st.live_fp.ftop = state.ftop;
    }

    fn write_debug_regs(&self, state: &HwDebugState) {
        self.state.lock().debug_writes.push(*state);
    }

    fn halt(&self) -> ! {
        panic!("fake port halted");
    }
}

fn lanes(bank: FpBank) -> usize {
    match bank {
        FpBank::Fpu => 1,
        FpBank::Lsx => 2,
        FpBank::Lasx => 4,
    }
}
