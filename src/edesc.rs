// Freescale SEC (TALITOS) Descriptor Engine
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! Extended descriptors and their per-context recycle pool.
//!
//! An [`ExtDesc`] wraps one [`HwDesc`] with the bookkeeping a front-end
//! needs to tear a request down again: scatter list segment counts, the
//! link table and its bus mapping, and the ICV area. Ownership moves from
//! the front-end to the engine on submission and back to the completion
//! callback, which releases it into the [`EdescPool`].

use crate::affinity::ExecCtx;
use crate::bus::{BusAddr, ScatterList};
use crate::descriptor::{
    link_tbl_bytes, DescPtr, DescStatus, HwDesc, DESC_PTR_SIZE, MAX_DATA_LEN,
};
use crate::error::{SecError, SecResult};
use std::sync::{Arc, Mutex, PoisonError};

/// Segment counts and extra space a request needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EdescLayout {
    /// Source segments behind a link table; 0 for a single segment.
    pub src_nents: usize,
    /// Destination segments behind a link table; 0 for a single segment.
    /// Equals `src_nents` for an in-place operation.
    pub dst_nents: usize,
    pub src_chained: bool,
    pub dst_chained: bool,
    /// Link table entries, including the two ICV entries.
    pub link_entries: usize,
    /// ICV bytes behind the link table, or stashed when there is none.
    pub icv_len: usize,
}

/// Where the output of a request goes.
#[derive(Debug, Clone, Copy)]
pub enum Destination<'a> {
    /// Output overwrites the source.
    InPlace,
    /// Output goes to a separate scatter list.
    Separate(&'a ScatterList),
    /// Output is a digest in a single buffer.
    Digest,
}

impl EdescLayout {
    /// Size a request.
    ///
    /// `cryptlen + authsize` must fit a descriptor pointer. Link tables are
    /// only needed when either side spans more than one segment; the ICV
    /// area then follows the table. Without a link table, `icv_stashing`
    /// reserves room to keep a copy of the incoming ICV.
    pub fn for_request(
        src: &ScatterList,
        dst: Destination<'_>,
        cryptlen: usize,
        authsize: usize,
        icv_stashing: bool,
    ) -> SecResult<Self> {
        if cryptlen + authsize > MAX_DATA_LEN {
            return Err(SecError::LengthTooLarge(cryptlen + authsize));
        }

        let src_nents = src.count_for(cryptlen + authsize);
        let src_nents = if src_nents == 1 { 0 } else { src_nents };

        let (dst_nents, dst_chained) = match dst {
            Destination::InPlace => (src_nents, src.is_chained()),
            Destination::Digest => (0, false),
            Destination::Separate(d) => {
                let n = d.count_for(cryptlen + authsize);
                (if n == 1 { 0 } else { n }, d.is_chained())
            }
        };

        let (link_entries, icv_len) = if src_nents > 0 || dst_nents > 0 {
            (src_nents + dst_nents + 2, authsize)
        } else {
            (0, if icv_stashing { authsize } else { 0 })
        };

        Ok(Self {
            src_nents,
            dst_nents,
            src_chained: src.is_chained(),
            dst_chained,
            link_entries,
            icv_len,
        })
    }

    /// Bytes of the link table area, ICV included.
    #[inline]
    pub fn dma_len(&self) -> usize {
        if self.link_entries == 0 {
            0
        } else {
            self.link_entries * DESC_PTR_SIZE + self.icv_len
        }
    }
}

/// Extended (software) descriptor.
#[derive(Debug)]
pub struct ExtDesc {
    pub layout: EdescLayout,
    pub desc: HwDesc,
    status: Arc<DescStatus>,
    /// Link table entries; `layout.link_entries` long.
    pub link_tbl: Vec<DescPtr>,
    /// ICV area; `layout.icv_len` long.
    pub icv: Vec<u8>,
    /// Bus address of the mapped link table area, if any.
    pub dma_link_tbl: Option<BusAddr>,
}

impl ExtDesc {
    fn empty() -> Self {
        Self {
            layout: EdescLayout::default(),
            desc: HwDesc::new(),
            status: Arc::new(DescStatus::default()),
            link_tbl: Vec::new(),
            icv: Vec::new(),
            dma_link_tbl: None,
        }
    }

    /// Zero everything and size the variable parts for `layout`.
    fn prepare(&mut self, layout: EdescLayout) -> SecResult<()> {
        self.layout = layout;
        self.desc = HwDesc::new();
        self.dma_link_tbl = None;

        // A status still shared with a stale mapping is left behind.
        if Arc::get_mut(&mut self.status).is_some() {
            self.status.reset(0);
        } else {
            self.status = Arc::new(DescStatus::default());
        }

        self.link_tbl.clear();
        self.link_tbl
            .try_reserve_exact(layout.link_entries)
            .map_err(|_| SecError::OutOfMemory(layout.link_entries * DESC_PTR_SIZE))?;
        self.link_tbl.resize(layout.link_entries, DescPtr::EMPTY);

        self.icv.clear();
        self.icv
            .try_reserve_exact(layout.icv_len)
            .map_err(|_| SecError::OutOfMemory(layout.icv_len))?;
        self.icv.resize(layout.icv_len, 0);
        Ok(())
    }

    /// Device-written status view.
    #[inline]
    pub fn status(&self) -> &Arc<DescStatus> {
        &self.status
    }

    /// Prepare the status view for submission of the current header.
    #[inline]
    pub fn arm(&self) {
        self.status.reset(self.desc.hdr);
    }

    /// Bytes to map for the link table area: the table followed by the ICV.
    pub fn link_area_bytes(&self) -> Vec<u8> {
        let mut bytes = link_tbl_bytes(&self.link_tbl);
        bytes.extend_from_slice(&self.icv);
        bytes
    }

    /// Offset of the ICV inside the link table area.
    #[inline]
    pub fn icv_offset(&self) -> usize {
        self.link_tbl.len() * DESC_PTR_SIZE
    }
}

/// Bounded per-context stacks of reusable extended descriptors.
///
/// Each execution context has its own stack behind its own lock, so
/// contexts never contend with each other. A request allocated by one
/// context may be released by another; the descriptor then moves to the
/// releasing context's stack.
#[derive(Debug)]
pub struct EdescPool {
    stacks: Vec<Mutex<Vec<Box<ExtDesc>>>>,
    depth: usize,
}

impl EdescPool {
    pub fn new(contexts: usize, depth: usize) -> Self {
        let stacks = (0..contexts.max(1))
            .map(|_| Mutex::new(Vec::with_capacity(depth)))
            .collect();
        Self { stacks, depth }
    }

    fn stack(&self, ctx: ExecCtx) -> &Mutex<Vec<Box<ExtDesc>>> {
        &self.stacks[ctx.index() % self.stacks.len()]
    }

    /// Allocate a zero-initialised descriptor sized for `layout`.
    ///
    /// Reuses a cached descriptor of context `ctx` when one is available.
    /// With `urgent` the pool lock is only tried, never waited on.
    pub fn alloc(
        &self,
        ctx: ExecCtx,
        layout: EdescLayout,
        urgent: bool,
    ) -> SecResult<Box<ExtDesc>> {
        let cached = if urgent {
            self.stack(ctx).try_lock().ok().and_then(|mut s| s.pop())
        } else {
            self.stack(ctx)
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .pop()
        };

        let mut edesc = cached.unwrap_or_else(|| Box::new(ExtDesc::empty()));
        edesc.prepare(layout)?;
        log::trace!(
            "{ctx}: edesc alloc, {} link entries, {} icv bytes",
            layout.link_entries,
            layout.icv_len
        );
        Ok(edesc)
    }

    /// Return a descriptor to context `ctx`'s stack, or free it when the
    /// stack is full.
    pub fn release(&self, ctx: ExecCtx, edesc: Box<ExtDesc>) {
        let mut stack = self
            .stack(ctx)
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if stack.len() < self.depth {
            stack.push(edesc);
        }
    }

    /// Descriptors cached for `ctx`.
    pub fn cached(&self, ctx: ExecCtx) -> usize {
        self.stack(ctx)
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[inline]
    pub fn depth(&self) -> usize {
        self.depth
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::Segment;

    fn sg(lens: &[u32]) -> ScatterList {
        ScatterList::new(
            lens.iter()
                .enumerate()
                .map(|(i, &len)| Segment::new(BusAddr(0x1000 * (i as u64 + 1)), len))
                .collect(),
        )
    }

    #[test]
    fn test_layout_single_segments() {
        let src = sg(&[64]);
        let l = EdescLayout::for_request(&src, Destination::InPlace, 52, 12, false).unwrap();
        assert_eq!(l.src_nents, 0);
        assert_eq!(l.link_entries, 0);
        assert_eq!(l.icv_len, 0);
        assert_eq!(l.dma_len(), 0);

        let stash = EdescLayout::for_request(&src, Destination::InPlace, 52, 12, true).unwrap();
        assert_eq!(stash.icv_len, 12);
        assert_eq!(stash.dma_len(), 0);
    }

    #[test]
    fn test_layout_with_link_table() {
        let src = sg(&[32, 32]);
        let dst = sg(&[16, 16, 32]);
        let l = EdescLayout::for_request(&src, Destination::Separate(&dst), 52, 12, false)
            .unwrap();
        assert_eq!(l.src_nents, 2);
        assert_eq!(l.dst_nents, 3);
        assert_eq!(l.link_entries, 7);
        assert_eq!(l.dma_len(), 7 * 8 + 12);
    }

    #[test]
    fn test_layout_in_place_counts_both_sides() {
        let src = sg(&[32, 32]);
        let l = EdescLayout::for_request(&src, Destination::InPlace, 52, 12, false).unwrap();
        assert_eq!(l.src_nents, 2);
        assert_eq!(l.dst_nents, 2);
        assert_eq!(l.link_entries, 6);
    }

    #[test]
    fn test_layout_rejects_large() {
        let src = sg(&[64]);
        let err = EdescLayout::for_request(&src, Destination::InPlace, 65530, 12, false);
        assert!(matches!(err, Err(SecError::LengthTooLarge(65542))));
    }

    #[test]
    fn test_pool_recycles() {
        let pool = EdescPool::new(2, 2);
        let ctx = ExecCtx(1);
        let layout = EdescLayout {
            link_entries: 3,
            icv_len: 12,
            ..Default::default()
        };
        let mut e = pool.alloc(ctx, layout, false).unwrap();
        e.desc.hdr = 0x1234;
        e.icv[0] = 0xaa;
        pool.release(ctx, e);
        assert_eq!(pool.cached(ctx), 1);
        assert_eq!(pool.cached(ExecCtx(0)), 0);

        let e = pool.alloc(ctx, layout, true).unwrap();
        assert_eq!(pool.cached(ctx), 0);
        assert_eq!(e.desc.hdr, 0);
        assert_eq!(e.icv, vec![0; 12]);
        assert_eq!(e.link_tbl.len(), 3);
    }

    #[test]
    fn test_pool_bounded() {
        let pool = EdescPool::new(1, 1);
        let ctx = ExecCtx(0);
        let a = pool.alloc(ctx, EdescLayout::default(), false).unwrap();
        let b = pool.alloc(ctx, EdescLayout::default(), false).unwrap();
        pool.release(ctx, a);
        pool.release(ctx, b);
        assert_eq!(pool.cached(ctx), 1);
    }

    #[test]
    fn test_shared_status_replaced() {
        let pool = EdescPool::new(1, 4);
        let ctx = ExecCtx(0);
        let e = pool.alloc(ctx, EdescLayout::default(), false).unwrap();
        let stale = Arc::clone(e.status());
        pool.release(ctx, e);
        let e = pool.alloc(ctx, EdescLayout::default(), false).unwrap();
        assert!(!Arc::ptr_eq(&stale, e.status()));
    }
}
