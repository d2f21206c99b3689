// Freescale SEC (TALITOS) Descriptor Engine
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! SEC hardware descriptor, descriptor pointers and link tables.
//!
//! A descriptor is a header word, a low header word and seven pointers.
//! On the bus every field is big-endian; [`HwDesc::to_bytes`] and
//! [`HwDesc::from_bytes`] convert between the CPU view and the wire view.

use crate::bus::{BusAddr, Segment};
use crate::error::{SecError, SecResult};
use crate::header::{DESC_HDR_DONE, DESC_HDR_LO_ICCR1_MASK, DESC_HDR_LO_ICCR1_PASS};
use std::sync::atomic::{AtomicU32, Ordering};

/// Number of pointers in a descriptor.
pub const DESC_PTR_COUNT: usize = 7;

/// Size of a descriptor pointer on the bus.
pub const DESC_PTR_SIZE: usize = 8;

/// Size of a descriptor on the bus.
pub const DESC_SIZE: usize = 8 + DESC_PTR_COUNT * DESC_PTR_SIZE;

/// Largest length a single descriptor pointer can describe.
pub const MAX_DATA_LEN: usize = 65535;

/// `j_extent`: the pointer refers to a link table.
pub const DESC_PTR_LNKTBL_JUMP: u8 = 0x80;
/// `j_extent` of a link table entry: last entry of the table.
pub const DESC_PTR_LNKTBL_RETURN: u8 = 0x02;
/// `j_extent` of a link table entry: continue with the next table.
pub const DESC_PTR_LNKTBL_NEXT: u8 = 0x01;

/// Descriptor pointer: a length, a jump/extent byte and a 36-bit address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DescPtr {
    pub len: u16,
    pub j_extent: u8,
    /// Upper address bits.
    pub eptr: u8,
    pub ptr: u32,
}

impl DescPtr {
    /// Empty pointer.
    pub const EMPTY: Self = Self {
        len: 0,
        j_extent: 0,
        eptr: 0,
        ptr: 0,
    };

    /// Pointer to `len` bytes at `addr`.
    #[inline]
    pub const fn new(addr: BusAddr, len: u16) -> Self {
        Self {
            len,
            j_extent: 0,
            eptr: addr.hi() as u8,
            ptr: addr.lo(),
        }
    }

    #[inline]
    pub fn set_addr(&mut self, addr: BusAddr) {
        self.ptr = addr.lo();
        self.eptr = addr.hi() as u8;
    }

    #[inline]
    pub const fn addr(&self) -> BusAddr {
        BusAddr::from_parts(self.eptr as u32, self.ptr)
    }

    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.len == 0 && self.ptr == 0 && self.eptr == 0
    }

    /// Wire encoding.
    pub fn to_bytes(&self) -> [u8; DESC_PTR_SIZE] {
        let mut out = [0u8; DESC_PTR_SIZE];
        out[0..2].copy_from_slice(&self.len.to_be_bytes());
        out[2] = self.j_extent;
        out[3] = self.eptr;
        out[4..8].copy_from_slice(&self.ptr.to_be_bytes());
        out
    }

    /// Decode a wire-encoded pointer.
    pub fn from_bytes(bytes: &[u8; DESC_PTR_SIZE]) -> Self {
        Self {
            len: u16::from_be_bytes([bytes[0], bytes[1]]),
            j_extent: bytes[2],
            eptr: bytes[3],
            ptr: u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
        }
    }
}

/// Hardware descriptor as built by the CPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HwDesc {
    pub hdr: u32,
    pub hdr_lo: u32,
    pub ptr: [DescPtr; DESC_PTR_COUNT],
}

impl HwDesc {
    /// Descriptor with every field zeroed.
    #[inline]
    pub const fn new() -> Self {
        Self {
            hdr: 0,
            hdr_lo: 0,
            ptr: [DescPtr::EMPTY; DESC_PTR_COUNT],
        }
    }

    /// Descriptor with only the header set.
    #[inline]
    pub const fn with_header(hdr: u32) -> Self {
        let mut desc = Self::new();
        desc.hdr = hdr;
        desc
    }

    /// Wire encoding.
    pub fn to_bytes(&self) -> [u8; DESC_SIZE] {
        let mut out = [0u8; DESC_SIZE];
        out[0..4].copy_from_slice(&self.hdr.to_be_bytes());
        out[4..8].copy_from_slice(&self.hdr_lo.to_be_bytes());
        for (i, p) in self.ptr.iter().enumerate() {
            let at = 8 + i * DESC_PTR_SIZE;
            out[at..at + DESC_PTR_SIZE].copy_from_slice(&p.to_bytes());
        }
        out
    }

    /// Decode a wire-encoded descriptor.
    pub fn from_bytes(bytes: &[u8]) -> SecResult<Self> {
        if bytes.len() < DESC_SIZE {
            return Err(SecError::InvalidArgument(format!(
                "descriptor needs {DESC_SIZE} bytes, got {}",
                bytes.len()
            )));
        }
        let word = |at: usize| {
            u32::from_be_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
        };
        let mut desc = Self::with_header(word(0));
        desc.hdr_lo = word(4);
        for (i, p) in desc.ptr.iter_mut().enumerate() {
            let at = 8 + i * DESC_PTR_SIZE;
            let mut raw = [0u8; DESC_PTR_SIZE];
            raw.copy_from_slice(&bytes[at..at + DESC_PTR_SIZE]);
            *p = DescPtr::from_bytes(&raw);
        }
        Ok(desc)
    }
}

/// Device-written view of a descriptor header.
///
/// The SEC writes the header back with the done bits set once it has
/// finished a descriptor, and optionally the integrity check result in the
/// low word. Completion processing reads it with acquire ordering so that
/// everything the device wrote before is visible.
#[derive(Debug, Default)]
pub struct DescStatus {
    hdr: AtomicU32,
    hdr_lo: AtomicU32,
}

impl DescStatus {
    pub const fn new(hdr: u32) -> Self {
        Self {
            hdr: AtomicU32::new(hdr),
            hdr_lo: AtomicU32::new(0),
        }
    }

    /// Reset to a freshly built header.
    #[inline]
    pub fn reset(&self, hdr: u32) {
        self.hdr_lo.store(0, Ordering::Relaxed);
        self.hdr.store(hdr, Ordering::Release);
    }

    /// Device side: publish the writeback words.
    #[inline]
    pub fn writeback(&self, hdr: u32, hdr_lo: u32) {
        self.hdr_lo.store(hdr_lo, Ordering::Relaxed);
        self.hdr.store(hdr, Ordering::Release);
    }

    #[inline]
    pub fn hdr(&self) -> u32 {
        self.hdr.load(Ordering::Acquire)
    }

    #[inline]
    pub fn hdr_lo(&self) -> u32 {
        self.hdr_lo.load(Ordering::Acquire)
    }

    /// Returns true once the device has marked the descriptor done.
    #[inline]
    pub fn is_done(&self) -> bool {
        self.hdr() & DESC_HDR_DONE == DESC_HDR_DONE
    }

    /// Returns true if the hardware integrity check passed.
    #[inline]
    pub fn icv_passed(&self) -> bool {
        self.hdr_lo() & DESC_HDR_LO_ICCR1_MASK == DESC_HDR_LO_ICCR1_PASS
    }
}

/// Fill `table` with one entry per segment of `sg`, trimmed so that the
/// entries add up to exactly `cryptlen`, and mark the last entry as the end
/// of the table.
///
/// Returns the number of entries in use. `table` must hold at least
/// `sg.len()` entries.
pub fn sg_to_link_tbl(
    sg: &[Segment],
    cryptlen: usize,
    table: &mut [DescPtr],
) -> SecResult<usize> {
    if sg.is_empty() {
        return Ok(0);
    }
    if table.len() < sg.len() {
        return Err(SecError::InvalidArgument(format!(
            "link table holds {} entries, {} needed",
            table.len(),
            sg.len()
        )));
    }

    let mut remaining = cryptlen as i64;
    for (entry, seg) in table.iter_mut().zip(sg) {
        *entry = DescPtr::new(seg.addr, seg.len as u16);
        remaining -= seg.len as i64;
    }

    // Drop or shorten trailing entries that run past cryptlen.
    let mut count = sg.len();
    let mut excess = -remaining;
    while excess > 0 && count > 1 && table[count - 1].len as i64 <= excess {
        excess -= table[count - 1].len as i64;
        table[count - 1] = DescPtr::EMPTY;
        count -= 1;
    }
    if excess > 0 {
        let last = &mut table[count - 1];
        last.len = (last.len as i64 - excess).max(0) as u16;
    }

    table[count - 1].j_extent = DESC_PTR_LNKTBL_RETURN;
    Ok(count)
}

/// Wire encoding of a link table.
pub fn link_tbl_bytes(table: &[DescPtr]) -> Vec<u8> {
    table.iter().flat_map(|p| p.to_bytes()).collect()
}
