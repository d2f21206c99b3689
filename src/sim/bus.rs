// Freescale SEC (TALITOS) Descriptor Engine
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! Bounce-buffer bus used by the simulated SEC.

use crate::bus::{BusAddr, DmaDirection, DmaMapper, ScatterList, Segment};
use crate::descriptor::{DescStatus, HwDesc};
use crate::error::{SecError, SecResult};
use crate::header::DESC_HDR_DONE;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Default first bus address handed out.
pub const SIM_BUS_BASE: u64 = 0x1000_0000;

const ALIGN: u64 = 64;

#[derive(Debug)]
struct Mapping {
    data: Vec<u8>,
    dir: DmaDirection,
    desc: Option<(HwDesc, Arc<DescStatus>)>,
}

#[derive(Debug)]
struct BusState {
    next: u64,
    maps: BTreeMap<u64, Mapping>,
    total: usize,
}

/// Simulated bus: every mapping is a private copy at a fresh bus address.
#[derive(Debug)]
pub struct SimBus {
    state: Mutex<BusState>,
    fail_next_map: AtomicBool,
}

impl Default for SimBus {
    fn default() -> Self {
        Self::new()
    }
}

impl SimBus {
    pub fn new() -> Self {
        Self::with_base(SIM_BUS_BASE)
    }

    /// Bus whose first mapping starts at `base`.
    pub fn with_base(base: u64) -> Self {
        Self {
            state: Mutex::new(BusState {
                next: base.max(ALIGN),
                maps: BTreeMap::new(),
                total: 0,
            }),
            fail_next_map: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BusState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn insert(&self, mapping: Mapping) -> SecResult<BusAddr> {
        if self.fail_next_map.swap(false, Ordering::AcqRel) {
            return Err(SecError::OutOfMemory(mapping.data.len()));
        }
        let mut st = self.lock();
        let addr = st.next;
        let len = (mapping.data.len() as u64).max(1);
        st.next = (addr + len).div_ceil(ALIGN) * ALIGN;
        st.maps.insert(addr, mapping);
        st.total += 1;
        Ok(BusAddr(addr))
    }

    /// Make the next mapping attempt fail.
    pub fn fail_next_map(&self) {
        self.fail_next_map.store(true, Ordering::Release);
    }

    /// Mappings currently live.
    pub fn live_mappings(&self) -> usize {
        self.lock().maps.len()
    }

    /// Mappings created since the bus was built.
    pub fn total_mappings(&self) -> usize {
        self.lock().total
    }

    /// Map `data` as a caller buffer and return it as a one-segment list.
    pub fn map_buffer(&self, data: &[u8]) -> SecResult<ScatterList> {
        let addr = self.map_single(data, DmaDirection::Bidirectional)?;
        Ok(ScatterList::single(addr, data.len() as u32))
    }

    /// Map `data` split into chunks of at most `chunk` bytes, each its own
    /// mapping.
    pub fn map_chunks(&self, data: &[u8], chunk: usize) -> SecResult<ScatterList> {
        let mut segments = Vec::new();
        for part in data.chunks(chunk.max(1)) {
            let addr = self.map_single(part, DmaDirection::Bidirectional)?;
            segments.push(Segment::new(addr, part.len() as u32));
        }
        Ok(ScatterList::new(segments))
    }

    /// Contents of a scatter list.
    pub fn read_list(&self, sg: &ScatterList) -> SecResult<Vec<u8>> {
        sg.read(self, 0, sg.total_len())
    }

    /// Descriptor mapped at `addr`.
    pub fn descriptor(&self, addr: BusAddr) -> Option<HwDesc> {
        self.lock()
            .maps
            .get(&addr.0)
            .and_then(|m| m.desc.as_ref().map(|(d, _)| *d))
    }

    /// Device side: write the done header back into the descriptor at
    /// `addr`, with `hdr_lo` as the low header word.
    pub fn complete_desc(&self, addr: BusAddr, hdr_lo: u32) -> SecResult<HwDesc> {
        let st = self.lock();
        let Some((desc, status)) = st.maps.get(&addr.0).and_then(|m| m.desc.as_ref()) else {
            return Err(SecError::UnmappedAddress(addr.0));
        };
        status.writeback(desc.hdr | DESC_HDR_DONE, hdr_lo);
        Ok(*desc)
    }
}

impl DmaMapper for SimBus {
    fn map_single(&self, data: &[u8], dir: DmaDirection) -> SecResult<BusAddr> {
        self.insert(Mapping {
            data: data.to_vec(),
            dir,
            desc: None,
        })
    }

    fn unmap_single(&self, addr: BusAddr, dir: DmaDirection) -> SecResult<Vec<u8>> {
        let mut st = self.lock();
        match st.maps.remove(&addr.0) {
            Some(m) => {
                if m.dir != dir {
                    log::warn!("bus {addr}: mapped {:?}, unmapped {dir:?}", m.dir);
                }
                Ok(m.data)
            }
            None => Err(SecError::UnmappedAddress(addr.0)),
        }
    }

    fn map_desc(&self, desc: &HwDesc, status: &Arc<DescStatus>) -> SecResult<BusAddr> {
        self.insert(Mapping {
            data: desc.to_bytes().to_vec(),
            dir: DmaDirection::Bidirectional,
            desc: Some((*desc, Arc::clone(status))),
        })
    }

    fn unmap_desc(&self, addr: BusAddr) {
        if self.lock().maps.remove(&addr.0).is_none() {
            log::warn!("bus {addr}: descriptor was not mapped");
        }
    }

    fn read(&self, addr: BusAddr, len: usize) -> SecResult<Vec<u8>> {
        let st = self.lock();
        let (start, m) = st
            .maps
            .range(..=addr.0)
            .next_back()
            .ok_or(SecError::UnmappedAddress(addr.0))?;
        let off = (addr.0 - start) as usize;
        if off + len > m.data.len() {
            return Err(SecError::UnmappedAddress(addr.0 + len as u64));
        }
        Ok(m.data[off..off + len].to_vec())
    }

    fn write(&self, addr: BusAddr, data: &[u8]) -> SecResult<()> {
        let mut st = self.lock();
        let (start, m) = st
            .maps
            .range_mut(..=addr.0)
            .next_back()
            .ok_or(SecError::UnmappedAddress(addr.0))?;
        let off = (addr.0 - *start) as usize;
        if off + data.len() > m.data.len() {
            return Err(SecError::UnmappedAddress(addr.0 + data.len() as u64));
        }
        m.data[off..off + data.len()].copy_from_slice(data);
        Ok(())
    }
}
