// Freescale SEC (TALITOS) Descriptor Engine
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! Bus addresses, scatter lists and the DMA mapping facility.
//!
//! The engine never touches host memory on behalf of the device directly.
//! Every buffer the SEC reads or writes is handed to a [`DmaMapper`], which
//! returns the bus address the device uses. Implementations may be an
//! IOMMU-backed mapping, a bounce buffer, or the simulator in
//! [`crate::sim`].

use crate::descriptor::{DescStatus, HwDesc};
use crate::error::{SecError, SecResult};
use std::sync::Arc;

/// Device-visible (bus) address. The SEC supports 36-bit addressing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct BusAddr(pub u64);

impl BusAddr {
    /// Null bus address, used by empty descriptor pointers.
    pub const NULL: Self = Self(0);

    /// Upper 32 bits.
    #[inline]
    pub const fn hi(self) -> u32 {
        (self.0 >> 32) as u32
    }

    /// Lower 32 bits.
    #[inline]
    pub const fn lo(self) -> u32 {
        self.0 as u32
    }

    /// Address `bytes` past this one.
    #[inline]
    pub const fn offset(self, bytes: usize) -> Self {
        Self(self.0 + bytes as u64)
    }

    /// Reassemble an address from the high and low register words.
    #[inline]
    pub const fn from_parts(hi: u32, lo: u32) -> Self {
        Self(((hi as u64) << 32) | lo as u64)
    }

    #[inline]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl std::fmt::Display for BusAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#011x}", self.0)
    }
}

/// Direction of a DMA mapping, seen from the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmaDirection {
    /// Device reads the buffer.
    ToDevice,
    /// Device writes the buffer.
    FromDevice,
    /// Device reads and writes the buffer.
    Bidirectional,
}

/// Bus-mapping facility used by the engine and the algorithm front-ends.
pub trait DmaMapper: Send + Sync {
    /// Map a contiguous buffer for device access.
    fn map_single(&self, data: &[u8], dir: DmaDirection) -> SecResult<BusAddr>;

    /// Release a mapping and return the buffer contents as last seen by the
    /// device.
    fn unmap_single(&self, addr: BusAddr, dir: DmaDirection) -> SecResult<Vec<u8>>;

    /// Map a hardware descriptor. `status` is the device-written view of the
    /// header; the device updates it when the descriptor is done.
    fn map_desc(&self, desc: &HwDesc, status: &Arc<DescStatus>) -> SecResult<BusAddr>;

    /// Release a descriptor mapping.
    fn unmap_desc(&self, addr: BusAddr);

    /// CPU read of `len` bytes at `addr`, inside any live mapping.
    fn read(&self, addr: BusAddr, len: usize) -> SecResult<Vec<u8>>;

    /// CPU write of `data` at `addr`, inside any live mapping.
    fn write(&self, addr: BusAddr, data: &[u8]) -> SecResult<()>;
}

impl<T: DmaMapper + ?Sized> DmaMapper for Arc<T> {
    fn map_single(&self, data: &[u8], dir: DmaDirection) -> SecResult<BusAddr> {
        (**self).map_single(data, dir)
    }

    fn unmap_single(&self, addr: BusAddr, dir: DmaDirection) -> SecResult<Vec<u8>> {
        (**self).unmap_single(addr, dir)
    }

    fn map_desc(&self, desc: &HwDesc, status: &Arc<DescStatus>) -> SecResult<BusAddr> {
        (**self).map_desc(desc, status)
    }

    fn unmap_desc(&self, addr: BusAddr) {
        (**self).unmap_desc(addr)
    }

    fn read(&self, addr: BusAddr, len: usize) -> SecResult<Vec<u8>> {
        (**self).read(addr, len)
    }

    fn write(&self, addr: BusAddr, data: &[u8]) -> SecResult<()> {
        (**self).write(addr, data)
    }
}

/// One physically contiguous, already-mapped buffer segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub addr: BusAddr,
    pub len: u32,
}

impl Segment {
    pub const fn new(addr: BusAddr, len: u32) -> Self {
        Self { addr, len }
    }

    /// Bus address one past the last byte.
    #[inline]
    pub const fn end(&self) -> BusAddr {
        self.addr.offset(self.len as usize)
    }
}

/// Ordered list of mapped segments describing one logical buffer.
///
/// A list is *chained* when it was assembled from independently allocated
/// lists (see [`ScatterList::chain`]).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScatterList {
    segments: Vec<Segment>,
    chained: bool,
}

impl ScatterList {
    pub fn new(segments: Vec<Segment>) -> Self {
        Self {
            segments,
            chained: false,
        }
    }

    /// List with a single segment.
    pub fn single(addr: BusAddr, len: u32) -> Self {
        Self::new(vec![Segment::new(addr, len)])
    }

    /// Append `next` behind this list.
    pub fn chain(mut self, next: &ScatterList) -> Self {
        self.segments.extend_from_slice(&next.segments);
        self.chained = true;
        self
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn is_chained(&self) -> bool {
        self.chained
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Total bytes covered by all segments.
    pub fn total_len(&self) -> usize {
        self.segments.iter().map(|s| s.len as usize).sum()
    }

    /// Number of leading segments needed to cover `nbytes`.
    pub fn count_for(&self, nbytes: usize) -> usize {
        let mut remaining = nbytes as i64;
        let mut count = 0;
        for seg in &self.segments {
            if remaining <= 0 {
                break;
            }
            remaining -= seg.len as i64;
            count += 1;
        }
        count
    }

    /// Last of the first `nents` segments (at least one).
    pub fn last_of(&self, nents: usize) -> Option<&Segment> {
        let n = nents.max(1).min(self.segments.len());
        n.checked_sub(1).and_then(|i| self.segments.get(i))
    }

    /// Bus address of the first segment.
    pub fn first_addr(&self) -> BusAddr {
        self.segments.first().map(|s| s.addr).unwrap_or(BusAddr::NULL)
    }

    /// Copy `len` bytes starting `skip` bytes into the list.
    pub fn read(&self, mapper: &dyn DmaMapper, skip: usize, len: usize) -> SecResult<Vec<u8>> {
        let mut out = Vec::with_capacity(len);
        let mut offset = 0usize;
        for seg in &self.segments {
            if out.len() == len {
                break;
            }
            let seg_len = seg.len as usize;
            let seg_end = offset + seg_len;
            if seg_end > skip {
                let start = skip.saturating_sub(offset);
                let take = (seg_len - start).min(len - out.len());
                out.extend(mapper.read(seg.addr.offset(start), take)?);
            }
            offset = seg_end;
        }
        Ok(out)
    }

    /// Copy `data` into the list starting `skip` bytes in.
    pub fn write(&self, mapper: &dyn DmaMapper, skip: usize, data: &[u8]) -> SecResult<()> {
        let mut written = 0usize;
        let mut offset = 0usize;
        for seg in &self.segments {
            if written == data.len() {
                break;
            }
            let seg_len = seg.len as usize;
            let seg_end = offset + seg_len;
            if seg_end > skip {
                let start = skip.saturating_sub(offset);
                let take = (seg_len - start).min(data.len() - written);
                mapper.write(seg.addr.offset(start), &data[written..written + take])?;
                written += take;
            }
            offset = seg_end;
        }
        if written < data.len() {
            return Err(SecError::InvalidArgument(format!(
                "scatter list too short for {} bytes at offset {skip}",
                data.len()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bus_addr_parts() {
        let addr = BusAddr(0xf_1234_5678);
        assert_eq!(addr.hi(), 0xf);
        assert_eq!(addr.lo(), 0x1234_5678);
        assert_eq!(BusAddr::from_parts(addr.hi(), addr.lo()), addr);
        assert_eq!(addr.offset(8), BusAddr(0xf_1234_5680));
        assert_eq!(addr.to_string(), "0xf12345678");
    }

    #[test]
    fn test_count_for() {
        let sg = ScatterList::new(vec![
            Segment::new(BusAddr(0x1000), 16),
            Segment::new(BusAddr(0x2000), 16),
            Segment::new(BusAddr(0x3000), 16),
        ]);
        assert_eq!(sg.count_for(0), 0);
        assert_eq!(sg.count_for(1), 1);
        assert_eq!(sg.count_for(16), 1);
        assert_eq!(sg.count_for(17), 2);
        assert_eq!(sg.count_for(48), 3);
        assert_eq!(sg.total_len(), 48);
        assert_eq!(sg.last_of(2).map(|s| s.addr), Some(BusAddr(0x2000)));
        assert_eq!(sg.last_of(0).map(|s| s.addr), Some(BusAddr(0x1000)));
    }

    #[test]
    fn test_chain_marks_list() {
        let a = ScatterList::single(BusAddr(0x1000), 8);
        let b = ScatterList::single(BusAddr(0x2000), 8);
        assert!(!a.is_chained());
        let c = a.chain(&b);
        assert!(c.is_chained());
        assert_eq!(c.segments().len(), 2);
    }
}
