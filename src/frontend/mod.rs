// Freescale SEC (TALITOS) Descriptor Engine
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! Algorithm front-ends.
//!
//! The front-ends turn cipher, AEAD and hash requests into descriptors and
//! submit them through [`SecEngine::submit`]. They map the buffers the
//! device needs besides the caller's scatter lists (keys, IVs, hash
//! contexts, link tables) and unmap them again once the request completes,
//! or right away when the engine does not accept it.
//!
//! Source and destination scatter lists are mapped by the caller and stay
//! mapped; the front-ends access them through the mapper.
//!
//! Every request takes a [`Done`] callback that runs exactly once if the
//! request was accepted, and never if the submitting call returned an
//! error.

mod aead;
mod cipher;
mod hash;

pub use aead::{authenc_key, AeadRequest, AeadTfm};
pub use cipher::{CipherRequest, CipherTfm};
pub use hash::{HashRequest, HashState, HashTfm};

use crate::affinity::ExecCtx;
use crate::bus::{BusAddr, DmaDirection, DmaMapper, ScatterList};
use crate::descriptor::{sg_to_link_tbl, DescPtr, DESC_PTR_LNKTBL_JUMP, DESC_PTR_SIZE};
use crate::edesc::ExtDesc;
use crate::engine::SecEngine;
use crate::error::{RequestError, SecError, SecResult};
use crate::regs::RegisterIo;
use crate::submit::{CompletionFn, SubmitResult};
use scopeguard::{guard, ScopeGuard};

/// Completion callback of a front-end request.
pub type Done<T> = Box<dyn FnOnce(Result<T, RequestError>) + Send>;

/// Buffers a front-end mapped for one request.
#[derive(Debug, Clone, Default)]
pub(crate) struct DmaSet {
    maps: Vec<(BusAddr, DmaDirection)>,
}

impl DmaSet {
    /// Map `data` and return a descriptor pointer to it.
    pub(crate) fn map(
        &mut self,
        mapper: &dyn DmaMapper,
        data: &[u8],
        dir: DmaDirection,
    ) -> SecResult<DescPtr> {
        if data.is_empty() {
            return Ok(DescPtr::EMPTY);
        }
        let addr = mapper.map_single(data, dir)?;
        self.maps.push((addr, dir));
        Ok(DescPtr::new(addr, data.len() as u16))
    }

    /// Map the link table area of `edesc`, zeroed, if it needs one.
    pub(crate) fn map_link_area(
        &mut self,
        mapper: &dyn DmaMapper,
        edesc: &mut ExtDesc,
    ) -> SecResult<()> {
        let len = edesc.layout.dma_len();
        if len == 0 {
            return Ok(());
        }
        let addr = mapper.map_single(&vec![0u8; len], DmaDirection::Bidirectional)?;
        self.maps.push((addr, DmaDirection::Bidirectional));
        edesc.dma_link_tbl = Some(addr);
        Ok(())
    }

    /// Unmap one buffer and return what the device left in it.
    pub(crate) fn take(&mut self, mapper: &dyn DmaMapper, addr: BusAddr) -> SecResult<Vec<u8>> {
        let pos = self
            .maps
            .iter()
            .position(|(a, _)| *a == addr)
            .ok_or(SecError::UnmappedAddress(addr.0))?;
        let (addr, dir) = self.maps.swap_remove(pos);
        mapper.unmap_single(addr, dir)
    }

    /// Unmap everything still mapped.
    pub(crate) fn release(&mut self, mapper: &dyn DmaMapper) {
        for (addr, dir) in self.maps.drain(..) {
            if let Err(e) = mapper.unmap_single(addr, dir) {
                log::warn!("unmap {addr}: {e}");
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.maps.len()
    }
}

/// Write the link table area of `edesc` to its mapping.
pub(crate) fn sync_link_area(mapper: &dyn DmaMapper, edesc: &ExtDesc) -> SecResult<()> {
    match edesc.dma_link_tbl {
        Some(addr) => mapper.write(addr, &edesc.link_area_bytes()),
        None => Ok(()),
    }
}

/// Point descriptor pointer `idx` at `len` bytes of `sg`.
///
/// A single segment is pointed at directly. Otherwise the first `nents`
/// segments go into the link table starting at entry `tbl_start`; if
/// trimming to `len` leaves more than one entry the pointer jumps to the
/// table. Returns the number of entries used.
pub(crate) fn link_sg(
    edesc: &mut ExtDesc,
    idx: usize,
    sg: &ScatterList,
    nents: usize,
    tbl_start: usize,
    len: usize,
) -> SecResult<usize> {
    if nents == 0 {
        edesc.desc.ptr[idx].set_addr(sg.first_addr());
        return Ok(1);
    }

    let segments = &sg.segments()[..nents.min(sg.segments().len())];
    let count = sg_to_link_tbl(segments, len, &mut edesc.link_tbl[tbl_start..])?;
    if count > 1 {
        let base = edesc
            .dma_link_tbl
            .ok_or_else(|| SecError::InvalidArgument("link table not mapped".into()))?;
        let ptr = &mut edesc.desc.ptr[idx];
        ptr.j_extent |= DESC_PTR_LNKTBL_JUMP;
        ptr.set_addr(base.offset(tbl_start * DESC_PTR_SIZE));
    } else {
        edesc.desc.ptr[idx].set_addr(sg.first_addr());
    }
    Ok(count)
}

impl<R: RegisterIo, M: DmaMapper> SecEngine<R, M> {
    /// Submit a front-end descriptor.
    ///
    /// `dma` holds the buffers mapped for the request; they are unmapped
    /// here unless the request is accepted, in which case `callback` owns
    /// a copy and must release them.
    pub(crate) fn submit_mapped(
        &self,
        ctx: ExecCtx,
        edesc: Box<ExtDesc>,
        dma: ScopeGuard<DmaSet, impl FnOnce(DmaSet)>,
        callback: CompletionFn,
    ) -> SecResult<u8> {
        match self.submit(ctx, edesc, callback) {
            SubmitResult::InProgress { channel } => {
                ScopeGuard::into_inner(dma);
                Ok(channel)
            }
            SubmitResult::Deferred { edesc, reason } => {
                log::trace!("{ctx}: request deferred: {reason}");
                self.pool.release(ctx, edesc);
                Err(reason.into())
            }
            SubmitResult::Failed { edesc, error } => {
                self.pool.release(ctx, edesc);
                Err(error)
            }
        }
    }

    /// Guard that unmaps a [`DmaSet`] when dropped.
    pub(crate) fn dma_guard(&self) -> ScopeGuard<DmaSet, impl FnOnce(DmaSet) + '_> {
        guard(DmaSet::default(), move |mut dma| dma.release(&self.mapper))
    }

    /// Guard that returns an extended descriptor to `ctx`'s pool when
    /// dropped.
    pub(crate) fn edesc_guard(
        &self,
        ctx: ExecCtx,
        edesc: Box<ExtDesc>,
    ) -> ScopeGuard<Box<ExtDesc>, impl FnOnce(Box<ExtDesc>) + '_> {
        guard(edesc, move |e| self.pool.release(ctx, e))
    }
}
